//! In-process scripted PostgreSQL server for integration tests.
//!
//! Each test spawns a listener thread that speaks just enough of the v3
//! protocol to exercise the client: it accepts startup packets, performs a
//! scripted authentication, and then answers the client's messages from a
//! per-test closure. No external database is required.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;

use pglink::{Conn, Opts, SslMode};

/// Spawn a single-connection scripted server; returns its port and the
/// join handle (joining propagates script panics into the test).
pub fn spawn_server<F>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(&mut ServerConn) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let port = listener.local_addr().expect("local addr").port();

    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut server = ServerConn::new(stream);
        script(&mut server);
    });

    (port, handle)
}

/// Spawn a server accepting any number of connections, each handled by a
/// clone of the script. Returns the port and a stopper closure.
pub fn spawn_multi_server<F>(script: F) -> (u16, JoinHandle<()>)
where
    F: Fn(&mut ServerConn) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let port = listener.local_addr().expect("local addr").port();

    let handle = std::thread::spawn(move || {
        let script = std::sync::Arc::new(script);
        let mut workers = Vec::new();
        // Serve until the listener is dropped with the test process
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let script = std::sync::Arc::clone(&script);
            workers.push(std::thread::spawn(move || {
                let mut server = ServerConn::new(stream);
                script(&mut server);
            }));
            if workers.len() >= 16 {
                break;
            }
        }
        for worker in workers {
            let _ = worker.join();
        }
    });

    (port, handle)
}

/// Default connection options against a scripted server.
pub fn test_opts(port: u16) -> Opts {
    let mut opts = Opts::default();
    opts.host = "127.0.0.1".into();
    opts.port = port;
    opts.user = "tester".into();
    opts.password = Some("sekret".into());
    opts.database = Some("testdb".into());
    opts.ssl_mode = SslMode::Disable;
    opts
}

/// Connect a client to a scripted server.
pub fn connect(port: u16) -> Conn {
    Conn::connect(test_opts(port)).expect("client connect")
}

/// The first packet of a connection: a session startup or a cancel
/// request aimed at another session.
pub enum Startup {
    Session(Vec<(String, String)>),
    Cancel { pid: u32, secret: u32 },
}

/// The server side of one scripted connection.
pub struct ServerConn {
    stream: TcpStream,
}

impl ServerConn {
    fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    // === Reading client messages ===

    /// The first packet of a fresh connection.
    pub fn read_startup_any(&mut self) -> Startup {
        loop {
            let mut len_bytes = [0u8; 4];
            self.stream.read_exact(&mut len_bytes).expect("startup len");
            let len = i32::from_be_bytes(len_bytes) as usize;
            assert!(len >= 8, "startup packet too short");

            let mut payload = vec![0u8; len - 4];
            self.stream.read_exact(&mut payload).expect("startup body");

            let code = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            match code {
                80877103 => {
                    // SSLRequest: refuse, client continues in plaintext
                    self.stream.write_all(b"N").expect("ssl refusal");
                }
                80877102 => {
                    let pid = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
                    let secret =
                        u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);
                    return Startup::Cancel { pid, secret };
                }
                196608 => {
                    let mut params = Vec::new();
                    let mut rest = &payload[4..];
                    while let Some(zero) = rest.iter().position(|&b| b == 0) {
                        if zero == 0 {
                            break;
                        }
                        let key = String::from_utf8(rest[..zero].to_vec()).expect("key utf8");
                        rest = &rest[zero + 1..];
                        let zero = rest
                            .iter()
                            .position(|&b| b == 0)
                            .expect("value terminator");
                        let value = String::from_utf8(rest[..zero].to_vec()).expect("value utf8");
                        rest = &rest[zero + 1..];
                        params.push((key, value));
                    }
                    return Startup::Session(params);
                }
                other => panic!("unexpected startup code {other}"),
            }
        }
    }

    /// Read the startup packet, answering SSLRequests with 'N' first.
    /// Returns the startup parameter pairs.
    pub fn read_startup(&mut self) -> Vec<(String, String)> {
        match self.read_startup_any() {
            Startup::Session(params) => params,
            Startup::Cancel { .. } => panic!("unexpected CancelRequest"),
        }
    }

    /// Read one framed client message (tag + payload).
    pub fn read_message(&mut self) -> (u8, Vec<u8>) {
        let mut tag = [0u8; 1];
        self.stream.read_exact(&mut tag).expect("message tag");
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes).expect("message len");
        let len = i32::from_be_bytes(len_bytes) as usize;
        assert!(len >= 4, "message length too small");
        let mut payload = vec![0u8; len - 4];
        self.stream.read_exact(&mut payload).expect("message body");
        (tag[0], payload)
    }

    /// Read one message, asserting its tag.
    pub fn expect(&mut self, expected: u8) -> Vec<u8> {
        let (tag, payload) = self.read_message();
        assert_eq!(
            tag as char, expected as char,
            "expected client message '{}', got '{}'",
            expected as char, tag as char
        );
        payload
    }

    /// Read messages until (and including) Sync; returns the tag sequence.
    pub fn read_until_sync(&mut self) -> Vec<(u8, Vec<u8>)> {
        let mut messages = Vec::new();
        loop {
            let (tag, payload) = self.read_message();
            let done = tag == b'S';
            messages.push((tag, payload));
            if done {
                return messages;
            }
        }
    }

    /// Extract the query text of a 'Q' message.
    pub fn query_text(payload: &[u8]) -> String {
        let end = payload
            .iter()
            .position(|&b| b == 0)
            .expect("query terminator");
        String::from_utf8(payload[..end].to_vec()).expect("query utf8")
    }

    // === Scripted handshake ===

    /// Accept the startup packet and bring the session to ReadyForQuery
    /// with no password exchange.
    pub fn handshake(&mut self) {
        self.read_startup();
        self.auth_ok();
        self.parameter_status("server_version", "16.3");
        self.parameter_status("standard_conforming_strings", "on");
        self.backend_key_data(4242, 117);
        self.ready_for_query(b'I');
    }

    /// Accept the startup packet, demand a cleartext password, verify it,
    /// then finish the handshake.
    pub fn handshake_cleartext(&mut self, expected_password: &str) {
        self.read_startup();

        // AuthenticationCleartextPassword
        self.send(b'R', &3_i32.to_be_bytes());

        let payload = self.expect(b'p');
        let end = payload.iter().position(|&b| b == 0).expect("password nul");
        let password = String::from_utf8(payload[..end].to_vec()).expect("password utf8");
        assert_eq!(password, expected_password);

        self.auth_ok();
        self.parameter_status("server_version", "16.3");
        self.parameter_status("standard_conforming_strings", "on");
        self.backend_key_data(4242, 117);
        self.ready_for_query(b'I');
    }

    // === Sending server messages ===

    /// Send one framed message.
    pub fn send(&mut self, tag: u8, payload: &[u8]) {
        let mut frame = Vec::with_capacity(payload.len() + 5);
        frame.push(tag);
        frame.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).expect("send frame");
        self.stream.flush().expect("flush frame");
    }

    pub fn auth_ok(&mut self) {
        self.send(b'R', &0_i32.to_be_bytes());
    }

    pub fn parameter_status(&mut self, name: &str, value: &str) {
        let mut payload = Vec::new();
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.send(b'S', &payload);
    }

    pub fn backend_key_data(&mut self, pid: u32, secret: u32) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&pid.to_be_bytes());
        payload.extend_from_slice(&secret.to_be_bytes());
        self.send(b'K', &payload);
    }

    pub fn ready_for_query(&mut self, status: u8) {
        self.send(b'Z', &[status]);
    }

    pub fn command_complete(&mut self, tag: &str) {
        let mut payload = tag.as_bytes().to_vec();
        payload.push(0);
        self.send(b'C', &payload);
    }

    pub fn empty_query_response(&mut self) {
        self.send(b'I', &[]);
    }

    pub fn parse_complete(&mut self) {
        self.send(b'1', &[]);
    }

    pub fn bind_complete(&mut self) {
        self.send(b'2', &[]);
    }

    pub fn close_complete(&mut self) {
        self.send(b'3', &[]);
    }

    pub fn no_data(&mut self) {
        self.send(b'n', &[]);
    }

    pub fn parameter_description(&mut self, oids: &[u32]) {
        let mut payload = (oids.len() as i16).to_be_bytes().to_vec();
        for oid in oids {
            payload.extend_from_slice(&oid.to_be_bytes());
        }
        self.send(b't', &payload);
    }

    /// RowDescription for `(name, type_oid, format)` columns.
    pub fn row_description(&mut self, columns: &[(&str, u32, u16)]) {
        let mut payload = (columns.len() as u16).to_be_bytes().to_vec();
        for (name, oid, format) in columns {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
            payload.extend_from_slice(&0_u32.to_be_bytes()); // table oid
            payload.extend_from_slice(&0_i16.to_be_bytes()); // column id
            payload.extend_from_slice(&oid.to_be_bytes());
            payload.extend_from_slice(&(-1_i16).to_be_bytes()); // size
            payload.extend_from_slice(&(-1_i32).to_be_bytes()); // modifier
            payload.extend_from_slice(&format.to_be_bytes());
        }
        self.send(b'T', &payload);
    }

    pub fn data_row(&mut self, columns: &[Option<&[u8]>]) {
        let mut payload = (columns.len() as u16).to_be_bytes().to_vec();
        for column in columns {
            match column {
                None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
                Some(bytes) => {
                    payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    payload.extend_from_slice(bytes);
                }
            }
        }
        self.send(b'D', &payload);
    }

    pub fn error_response(&mut self, severity: &str, code: &str, message: &str) {
        let mut payload = Vec::new();
        for (tag, value) in [
            (b'S', severity),
            (b'V', severity),
            (b'C', code),
            (b'M', message),
        ] {
            payload.push(tag);
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        payload.push(0);
        self.send(b'E', &payload);
    }

    pub fn notice_response(&mut self, message: &str) {
        let mut payload = Vec::new();
        for (tag, value) in [(b'S', "NOTICE"), (b'V', "NOTICE"), (b'C', "00000"), (b'M', message)]
        {
            payload.push(tag);
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        payload.push(0);
        self.send(b'N', &payload);
    }

    pub fn notification(&mut self, pid: u32, channel: &str, message: &str) {
        let mut payload = pid.to_be_bytes().to_vec();
        payload.extend_from_slice(channel.as_bytes());
        payload.push(0);
        payload.extend_from_slice(message.as_bytes());
        payload.push(0);
        self.send(b'A', &payload);
    }

    pub fn copy_in_response(&mut self, binary: bool, columns: u16) {
        let mut payload = vec![u8::from(binary)];
        payload.extend_from_slice(&columns.to_be_bytes());
        for _ in 0..columns {
            payload.extend_from_slice(&u16::from(binary).to_be_bytes());
        }
        self.send(b'G', &payload);
    }

    pub fn copy_out_response(&mut self, binary: bool, columns: u16) {
        let mut payload = vec![u8::from(binary)];
        payload.extend_from_slice(&columns.to_be_bytes());
        for _ in 0..columns {
            payload.extend_from_slice(&u16::from(binary).to_be_bytes());
        }
        self.send(b'H', &payload);
    }

    pub fn copy_data(&mut self, data: &[u8]) {
        self.send(b'd', data);
    }

    pub fn copy_done(&mut self) {
        self.send(b'c', &[]);
    }

    /// Serve simple queries until the client terminates, tracking a
    /// minimal transaction state: `begin` flips the ReadyForQuery status
    /// to 'T', `commit`/`rollback` back to 'I'.
    pub fn serve_simple_queries(&mut self) {
        let mut status = b'I';
        loop {
            let mut tag = [0u8; 1];
            if self.stream.read_exact(&mut tag).is_err() {
                return; // client hung up
            }
            let mut len_bytes = [0u8; 4];
            if self.stream.read_exact(&mut len_bytes).is_err() {
                return;
            }
            let len = i32::from_be_bytes(len_bytes) as usize;
            let mut payload = vec![0u8; len.saturating_sub(4)];
            if self.stream.read_exact(&mut payload).is_err() {
                return;
            }

            match tag[0] {
                b'Q' => {
                    let text = Self::query_text(&payload);
                    let verb = text
                        .split_whitespace()
                        .next()
                        .unwrap_or("")
                        .to_ascii_lowercase();
                    let reply = match verb.as_str() {
                        "begin" => {
                            status = b'T';
                            "BEGIN"
                        }
                        "commit" => {
                            status = b'I';
                            "COMMIT"
                        }
                        "rollback" => {
                            status = b'I';
                            "ROLLBACK"
                        }
                        _ => "OK",
                    };
                    if text.is_empty() {
                        self.empty_query_response();
                    } else {
                        self.command_complete(reply);
                    }
                    self.ready_for_query(status);
                }
                b'X' => return,
                _ => {}
            }
        }
    }
}
