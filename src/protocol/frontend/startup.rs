//! Startup and termination messages.

use crate::protocol::codec::{frame, frame_untagged, put_cstr, put_i32, put_u8};

/// Protocol version 3.0 (0x00030000)
pub const PROTOCOL_VERSION_3_0: i32 = 196608;

/// SSL request code
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Cancel request code
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Write an SSLRequest message.
///
/// This is sent before StartupMessage to request TLS encryption.
/// Server responds with single byte: 'S' (accepted) or 'N' (rejected).
pub fn write_ssl_request(buf: &mut Vec<u8>) {
    frame_untagged(buf, |body| put_i32(body, SSL_REQUEST_CODE));
}

/// Write a StartupMessage.
///
/// Parameters is a list of (name, value) pairs.
/// Required: "user" - database username
/// Optional: "database", "options", "replication", "client_encoding", etc.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) {
    frame_untagged(buf, |body| {
        put_i32(body, PROTOCOL_VERSION_3_0);
        for (name, value) in params {
            put_cstr(body, name);
            put_cstr(body, value);
        }
        // Empty key terminates the pair list
        put_u8(body, 0);
    });
}

/// Write a CancelRequest message.
///
/// This is sent on a NEW connection to cancel a query running on another
/// connection. The server closes the connection immediately with no response.
pub fn write_cancel_request(buf: &mut Vec<u8>, pid: u32, secret_key: u32) {
    frame_untagged(buf, |body| {
        put_i32(body, CANCEL_REQUEST_CODE);
        put_i32(body, pid as i32);
        put_i32(body, secret_key as i32);
    });
}

/// Write a Terminate message.
///
/// Sent to cleanly close the connection.
pub fn write_terminate(buf: &mut Vec<u8>) {
    frame(buf, super::msg_type::TERMINATE, |_| {});
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_request_layout() {
        let mut buf = Vec::new();
        write_ssl_request(&mut buf);

        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &8_i32.to_be_bytes());
        assert_eq!(&buf[4..8], &SSL_REQUEST_CODE.to_be_bytes());
    }

    #[test]
    fn startup_layout() {
        let mut buf = Vec::new();
        write_startup(&mut buf, &[("user", "postgres"), ("database", "test")]);

        // Length at start, includes itself
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());

        let version = i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        assert_eq!(version, PROTOCOL_VERSION_3_0);

        // Empty key terminates the pair list
        assert_eq!(buf[buf.len() - 1], 0);
    }

    #[test]
    fn cancel_request_layout() {
        let mut buf = Vec::new();
        write_cancel_request(&mut buf, 1234, 5678);

        assert_eq!(buf.len(), 16);
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len, 16);
        let code = i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        assert_eq!(code, CANCEL_REQUEST_CODE);
        let pid = i32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        assert_eq!(pid, 1234);
    }

    #[test]
    fn terminate_layout() {
        let mut buf = Vec::new();
        write_terminate(&mut buf);

        assert_eq!(buf, [b'X', 0, 0, 0, 4]);
    }
}
