//! COPY subprotocol integration tests.

mod common;

use common::{ServerConn, connect, spawn_server};
use pglink::{Error, Value};

#[test]
fn copy_in_text_round_trip() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        let payload = server.expect(b'Q');
        assert_eq!(ServerConn::query_text(&payload), "copy t from stdin");
        server.copy_in_response(false, 2);

        // Collect CopyData until CopyDone
        let mut received = Vec::new();
        loop {
            let (tag, payload) = server.read_message();
            match tag {
                b'd' => received.extend_from_slice(&payload),
                b'c' => break,
                other => panic!("unexpected COPY message '{}'", other as char),
            }
        }
        assert_eq!(
            String::from_utf8(received).unwrap(),
            "1\thello\n2\t\\N\n3\ttab\\there\n"
        );

        server.command_complete("COPY 3");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let rows = vec![
        Ok(vec![Value::from(1), Value::from("hello")]),
        Ok(vec![Value::from(2), Value::Null]),
        Ok(vec![Value::from(3), Value::from("tab\there")]),
    ];
    let tag = conn.copy_from_rows("copy t from stdin", rows).unwrap();
    assert_eq!(tag.rows_affected(), 3);
    drop(conn);

    server.join().unwrap();
}

#[test]
fn copy_in_binary_frames_rows() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        server.expect(b'Q');
        server.copy_in_response(true, 1);

        let mut received = Vec::new();
        loop {
            let (tag, payload) = server.read_message();
            match tag {
                b'd' => received.extend_from_slice(&payload),
                b'c' => break,
                other => panic!("unexpected COPY message '{}'", other as char),
            }
        }

        // PGCOPY signature + flags + extension length
        assert!(received.starts_with(b"PGCOPY\n\xff\r\n\0"));
        let body = &received[11 + 4 + 4..];
        // One row: column count 1, length 4, value 7
        assert_eq!(&body[0..2], &1_i16.to_be_bytes());
        assert_eq!(&body[2..6], &4_i32.to_be_bytes());
        assert_eq!(&body[6..10], &7_i32.to_be_bytes());
        // End-of-data marker
        assert_eq!(&body[10..12], &(-1_i16).to_be_bytes());

        server.command_complete("COPY 1");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let rows = vec![Ok(vec![Value::from(7)])];
    let tag = conn
        .copy_from_rows("copy t from stdin binary", rows)
        .unwrap();
    assert_eq!(tag.rows_affected(), 1);
    drop(conn);

    server.join().unwrap();
}

#[test]
fn copy_in_source_error_sends_copy_fail() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        server.expect(b'Q');
        server.copy_in_response(false, 1);

        // One data chunk, then the failure
        loop {
            let (tag, payload) = server.read_message();
            match tag {
                b'd' => continue,
                b'f' => {
                    let end = payload.iter().position(|&b| b == 0).unwrap();
                    let message = std::str::from_utf8(&payload[..end]).unwrap();
                    assert!(message.contains("source went away"), "{message}");
                    break;
                }
                other => panic!("unexpected COPY message '{}'", other as char),
            }
        }

        server.error_response("ERROR", "57014", "COPY from stdin failed");
        server.ready_for_query(b'I');

        // Still usable afterwards
        server.expect(b'Q');
        server.command_complete("SELECT 1");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let rows = vec![
        Ok(vec![Value::from(1)]),
        Err(Error::Io(std::io::Error::other("source went away"))),
    ];
    let err = conn.copy_from_rows("copy t from stdin", rows).unwrap_err();
    assert!(matches!(err, Error::Encode(_)));

    assert!(conn.is_alive());
    conn.exec("select 1").unwrap();
    drop(conn);

    server.join().unwrap();
}

#[test]
fn copy_out_streams_to_writer() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        let payload = server.expect(b'Q');
        assert_eq!(ServerConn::query_text(&payload), "copy t to stdout");
        server.copy_out_response(false, 2);
        server.copy_data(b"1\thello\n");
        server.copy_data(b"2\t\\N\n");
        server.copy_done();
        server.command_complete("COPY 2");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let mut sink = Vec::new();
    let tag = conn.copy_to_writer("copy t to stdout", &mut sink).unwrap();
    assert_eq!(tag.rows_affected(), 2);
    assert_eq!(String::from_utf8(sink).unwrap(), "1\thello\n2\t\\N\n");
    drop(conn);

    server.join().unwrap();
}

#[test]
fn copy_statement_rejected_by_server_surfaces_error() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        server.expect(b'Q');
        server.error_response("ERROR", "42P01", "relation \"missing\" does not exist");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let rows: Vec<pglink::Result<Vec<Value>>> = vec![];
    let err = conn
        .copy_from_rows("copy missing from stdin", rows)
        .unwrap_err();
    assert_eq!(err.sqlstate(), Some("42P01"));
    assert!(conn.is_alive());
    drop(conn);

    server.join().unwrap();
}
