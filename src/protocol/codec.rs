//! Wire primitives: a borrowing cursor over message payloads and
//! length-framed write helpers.
//!
//! Every integer on the wire is big-endian. Strings are NUL-terminated
//! unless a length prefix precedes them. A framed message is one tag
//! byte (absent for the startup family) followed by an i32 length that
//! counts itself but not the tag.

use crate::error::{Error, Result};

/// Borrowing reader over one message payload.
///
/// Each accessor consumes from the front; running past the end is a
/// protocol error naming the field that came up short.
pub struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    /// Wrap a payload.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// True once everything has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The next byte, without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    /// Consume and return everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn advance(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let Some((head, tail)) = self.buf.split_at_checked(n) else {
            return Err(Error::Protocol(format!(
                "{}: payload truncated ({} of {} bytes left)",
                what,
                self.buf.len(),
                n
            )));
        };
        self.buf = tail;
        Ok(head)
    }

    /// Consume `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.advance(n, "bytes")
    }

    /// Consume one byte.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.advance(1, "u8")?[0])
    }

    /// Consume a big-endian i16.
    pub fn i16(&mut self) -> Result<i16> {
        let raw = self.advance(2, "i16")?;
        Ok(i16::from_be_bytes([raw[0], raw[1]]))
    }

    /// Consume a big-endian u16.
    pub fn u16(&mut self) -> Result<u16> {
        let raw = self.advance(2, "u16")?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    /// Consume a big-endian i32.
    pub fn i32(&mut self) -> Result<i32> {
        let raw = self.advance(4, "i32")?;
        Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Consume a big-endian u32.
    pub fn u32(&mut self) -> Result<u32> {
        let raw = self.advance(4, "u32")?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Consume a NUL-terminated string, returning its bytes without the
    /// terminator.
    pub fn cstr_bytes(&mut self) -> Result<&'a [u8]> {
        let Some(nul) = memchr::memchr(0, self.buf) else {
            return Err(Error::Protocol(
                "string missing NUL terminator".into(),
            ));
        };
        let head = &self.buf[..nul];
        self.buf = &self.buf[nul + 1..];
        Ok(head)
    }

    /// Consume a NUL-terminated UTF-8 string.
    pub fn cstr(&mut self) -> Result<&'a str> {
        let raw = self.cstr_bytes()?;
        simdutf8::compat::from_utf8(raw)
            .map_err(|e| Error::Protocol(format!("string is not UTF-8: {e}")))
    }
}

// === Write helpers ===

/// Append one byte.
#[inline]
pub fn put_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Append a big-endian i16.
#[inline]
pub fn put_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Append a big-endian u16.
#[inline]
pub fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Append a big-endian i32.
#[inline]
pub fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Append a big-endian u32.
#[inline]
pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Append raw bytes.
#[inline]
pub fn put_bytes(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
}

/// Append a NUL-terminated string.
#[inline]
pub fn put_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Append one tagged message: the closure fills the payload and the
/// length field is patched in afterwards, so a message can never be
/// emitted with a stale length.
pub fn frame(out: &mut Vec<u8>, tag: u8, body: impl FnOnce(&mut Vec<u8>)) {
    out.push(tag);
    let len_at = reserve_len(out);
    body(out);
    patch_len(out, len_at);
}

/// Append one untagged message (the startup family: StartupMessage,
/// SSLRequest, CancelRequest).
pub fn frame_untagged(out: &mut Vec<u8>, body: impl FnOnce(&mut Vec<u8>)) {
    let len_at = reserve_len(out);
    body(out);
    patch_len(out, len_at);
}

fn reserve_len(out: &mut Vec<u8>) -> usize {
    let len_at = out.len();
    out.extend_from_slice(&[0; 4]);
    len_at
}

fn patch_len(out: &mut Vec<u8>, len_at: usize) {
    let len = (out.len() - len_at) as i32;
    out[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_integers() {
        let payload = [0x00, 0x01, 0x00, 0x00, 0x00, 0x2A, 0x07];
        let mut cur = Cursor::new(&payload);
        assert_eq!(cur.i16().unwrap(), 1);
        assert_eq!(cur.i32().unwrap(), 42);
        assert_eq!(cur.u8().unwrap(), 7);
        assert!(cur.is_empty());
    }

    #[test]
    fn cursor_truncation_is_an_error() {
        let mut cur = Cursor::new(&[0x00]);
        let err = cur.i32().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn cursor_cstr_and_rest() {
        let mut cur = Cursor::new(b"hello\0world");
        assert_eq!(cur.cstr().unwrap(), "hello");
        assert_eq!(cur.rest(), b"world");
        assert!(cur.is_empty());
    }

    #[test]
    fn cursor_cstr_requires_terminator() {
        let mut cur = Cursor::new(b"no-nul");
        assert!(cur.cstr().is_err());
    }

    #[test]
    fn cursor_peek_does_not_consume() {
        let mut cur = Cursor::new(&[9, 8]);
        assert_eq!(cur.peek(), Some(9));
        assert_eq!(cur.u8().unwrap(), 9);
        assert_eq!(cur.peek(), Some(8));
    }

    #[test]
    fn frame_length_counts_itself_but_not_the_tag() {
        let mut out = Vec::new();
        frame(&mut out, b'Q', |body| put_cstr(body, "select 1"));

        assert_eq!(out[0], b'Q');
        let len = i32::from_be_bytes([out[1], out[2], out[3], out[4]]);
        assert_eq!(len as usize, out.len() - 1);
        assert_eq!(&out[5..], b"select 1\0");
    }

    #[test]
    fn untagged_frame_covers_whole_message() {
        let mut out = Vec::new();
        frame_untagged(&mut out, |body| put_i32(body, 80877103));

        assert_eq!(out.len(), 8);
        let len = i32::from_be_bytes([out[0], out[1], out[2], out[3]]);
        assert_eq!(len, 8);
    }

    #[test]
    fn empty_frame_is_five_bytes() {
        let mut out = Vec::new();
        frame(&mut out, b'S', |_| {});

        assert_eq!(out, [b'S', 0, 0, 0, 4]);
    }

    #[test]
    fn consecutive_frames_share_one_buffer() {
        let mut out = Vec::new();
        frame(&mut out, b'H', |_| {});
        frame(&mut out, b'S', |_| {});

        assert_eq!(out.len(), 10);
        assert_eq!(out[0], b'H');
        assert_eq!(out[5], b'S');
    }
}
