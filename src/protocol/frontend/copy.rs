//! COPY subprotocol frontend messages.

use crate::protocol::codec::{frame, put_bytes, put_cstr};

/// Write a CopyData message.
pub fn write_copy_data(buf: &mut Vec<u8>, data: &[u8]) {
    frame(buf, super::msg_type::COPY_DATA, |body| put_bytes(body, data));
}

/// Write a CopyDone message.
pub fn write_copy_done(buf: &mut Vec<u8>) {
    frame(buf, super::msg_type::COPY_DONE, |_| {});
}

/// Write a CopyFail message.
pub fn write_copy_fail(buf: &mut Vec<u8>, error_message: &str) {
    frame(buf, super::msg_type::COPY_FAIL, |body| {
        put_cstr(body, error_message)
    });
}
