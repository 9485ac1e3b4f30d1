//! Simple query protocol messages.

use crate::protocol::codec::{frame, put_cstr};

/// Write a Query message (simple query protocol).
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    frame(buf, super::msg_type::QUERY, |body| put_cstr(body, query));
}
