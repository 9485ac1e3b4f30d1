//! COPY subprotocol: bulk rows in and out.

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::protocol::backend::{CommandComplete, CopyInResponse, ErrorResponse, msg_type};
use crate::protocol::frontend::{
    write_copy_data, write_copy_done, write_copy_fail, write_query,
};
use crate::types::value::Value;

use super::{CommandTag, Conn};

/// PGCOPY binary signature: "PGCOPY\n\xff\r\n\0".
const BINARY_SIGNATURE: &[u8] = b"PGCOPY\n\xff\r\n\0";

/// CopyData payloads are batched up to this size before hitting the wire.
const CHUNK_SIZE: usize = 64 * 1024;

impl Conn {
    /// COPY FROM STDIN with a raw byte source.
    ///
    /// The reader's bytes are forwarded verbatim; they must match the
    /// format the COPY statement requests.
    pub fn copy_from_reader(&mut self, sql: &str, reader: &mut dyn Read) -> Result<CommandTag> {
        let _response = self.start_copy_in(sql)?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    return self.abort_copy_in(&format!("source read failed: {}", e));
                }
            };
            self.send_copy_data(&buf[..n])?;
        }

        self.finish_copy_in()
    }

    /// COPY FROM STDIN, encoding one row of values per iterator item.
    ///
    /// Rows are rendered in the format the server requested: text
    /// (tab-separated, `\N` nulls) or binary (PGCOPY framing). A source
    /// error aborts the COPY with CopyFail and is returned to the caller.
    pub fn copy_from_rows<I>(&mut self, sql: &str, rows: I) -> Result<CommandTag>
    where
        I: IntoIterator<Item = Result<Vec<Value>>>,
    {
        let response = self.start_copy_in(sql)?;
        let binary = response.is_binary();

        let mut chunk = Vec::with_capacity(CHUNK_SIZE);
        if binary {
            chunk.extend_from_slice(BINARY_SIGNATURE);
            chunk.extend_from_slice(&0_i32.to_be_bytes()); // flags
            chunk.extend_from_slice(&0_i32.to_be_bytes()); // extension length
        }

        for row in rows {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    return self.abort_copy_in(&e.to_string());
                }
            };

            let encoded = if binary {
                self.encode_binary_row(&row)
            } else {
                self.encode_text_row(&row)
            };
            match encoded {
                Ok(bytes) => chunk.extend_from_slice(&bytes),
                Err(e) => {
                    return self.abort_copy_in(&e.to_string());
                }
            }

            if chunk.len() >= CHUNK_SIZE {
                self.send_copy_data(&chunk)?;
                chunk.clear();
            }
        }

        if binary {
            chunk.extend_from_slice(&(-1_i16).to_be_bytes()); // end-of-data marker
        }
        if !chunk.is_empty() {
            self.send_copy_data(&chunk)?;
        }

        self.finish_copy_in()
    }

    /// COPY TO STDOUT, forwarding the data stream into a writer.
    pub fn copy_to_writer(&mut self, sql: &str, writer: &mut dyn Write) -> Result<CommandTag> {
        self.ensure_ready()?;
        tracing::trace!(sql, "copy out");

        self.buffers.write_buffer.clear();
        write_query(&mut self.buffers.write_buffer, sql);
        self.write_flush()?;
        self.pending_ready += 1;

        // Wait for CopyOutResponse
        loop {
            self.read_message()?;
            if self.absorb_if_async()? {
                continue;
            }
            match self.buffers.type_byte {
                msg_type::COPY_OUT_RESPONSE => break,
                msg_type::ERROR_RESPONSE => {
                    let response = ErrorResponse::parse(&self.buffers.read_buffer)?;
                    self.drain_one_ready()?;
                    return Err(response.into_error());
                }
                other => {
                    let err = Error::Protocol(format!(
                        "expected CopyOutResponse, got '{}'",
                        other as char
                    ));
                    self.mark_dead(&err.to_string());
                    return Err(err);
                }
            }
        }

        let mut sink_error: Option<Error> = None;
        let mut tag = CommandTag::default();

        loop {
            self.read_message()?;
            if self.absorb_if_async()? {
                continue;
            }
            match self.buffers.type_byte {
                msg_type::COPY_DATA => {
                    if sink_error.is_none() {
                        if let Err(e) = writer.write_all(&self.buffers.read_buffer) {
                            // Keep consuming; the stream cannot be stopped
                            // from the client side mid-COPY-OUT
                            sink_error = Some(Error::Io(e));
                        }
                    }
                }
                msg_type::COPY_DONE => {}
                msg_type::COMMAND_COMPLETE => {
                    if let Ok(complete) = CommandComplete::parse(&self.buffers.read_buffer) {
                        tag = CommandTag::new(complete.tag.to_string());
                    }
                }
                msg_type::ERROR_RESPONSE => {
                    let response = ErrorResponse::parse(&self.buffers.read_buffer)?;
                    self.drain_one_ready()?;
                    return Err(response.into_error());
                }
                msg_type::READY_FOR_QUERY => {
                    self.finish_ready()?;
                    break;
                }
                other => {
                    let err = Error::Protocol(format!(
                        "unexpected message in COPY OUT: '{}'",
                        other as char
                    ));
                    self.mark_dead(&err.to_string());
                    return Err(err);
                }
            }
        }

        match sink_error {
            Some(e) => Err(e),
            None => Ok(tag),
        }
    }

    fn start_copy_in(&mut self, sql: &str) -> Result<CopyInResponse> {
        self.ensure_ready()?;
        tracing::trace!(sql, "copy in");

        self.buffers.write_buffer.clear();
        write_query(&mut self.buffers.write_buffer, sql);
        self.write_flush()?;
        self.pending_ready += 1;

        loop {
            self.read_message()?;
            if self.absorb_if_async()? {
                continue;
            }
            match self.buffers.type_byte {
                msg_type::COPY_IN_RESPONSE => {
                    return CopyInResponse::parse(&self.buffers.read_buffer);
                }
                msg_type::ERROR_RESPONSE => {
                    let response = ErrorResponse::parse(&self.buffers.read_buffer)?;
                    self.drain_one_ready()?;
                    return Err(response.into_error());
                }
                other => {
                    let err = Error::Protocol(format!(
                        "expected CopyInResponse, got '{}'",
                        other as char
                    ));
                    self.mark_dead(&err.to_string());
                    return Err(err);
                }
            }
        }
    }

    fn send_copy_data(&mut self, data: &[u8]) -> Result<()> {
        self.buffers.write_buffer.clear();
        write_copy_data(&mut self.buffers.write_buffer, data);
        self.write_flush()
    }

    /// Send CopyFail and drain the resulting error exchange; the returned
    /// error carries the abort message.
    fn abort_copy_in(&mut self, message: &str) -> Result<CommandTag> {
        self.buffers.write_buffer.clear();
        write_copy_fail(&mut self.buffers.write_buffer, message);
        self.write_flush()?;
        self.drain_one_ready()?;
        Err(Error::Encode(format!("COPY aborted: {}", message)))
    }

    fn finish_copy_in(&mut self) -> Result<CommandTag> {
        self.buffers.write_buffer.clear();
        write_copy_done(&mut self.buffers.write_buffer);
        self.write_flush()?;

        let mut tag = CommandTag::default();
        loop {
            self.read_message()?;
            if self.absorb_if_async()? {
                continue;
            }
            match self.buffers.type_byte {
                msg_type::COMMAND_COMPLETE => {
                    if let Ok(complete) = CommandComplete::parse(&self.buffers.read_buffer) {
                        tag = CommandTag::new(complete.tag.to_string());
                    }
                }
                msg_type::ERROR_RESPONSE => {
                    let response = ErrorResponse::parse(&self.buffers.read_buffer)?;
                    self.drain_one_ready()?;
                    return Err(response.into_error());
                }
                msg_type::READY_FOR_QUERY => {
                    self.finish_ready()?;
                    return Ok(tag);
                }
                other => {
                    let err = Error::Protocol(format!(
                        "unexpected message finishing COPY: '{}'",
                        other as char
                    ));
                    self.mark_dead(&err.to_string());
                    return Err(err);
                }
            }
        }
    }

    /// Render one text-format COPY row: tab separators, `\N` nulls,
    /// backslash escapes, trailing newline.
    fn encode_text_row(&self, row: &[Value]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                out.push(b'\t');
            }
            if value.is_null() {
                out.extend_from_slice(b"\\N");
                continue;
            }

            let codec = self
                .registry
                .codec(value.natural_oid())
                .ok_or_else(|| Error::Encode(format!("no codec for {:?}", value)))?;
            let encode = codec
                .text_encode
                .as_ref()
                .ok_or_else(|| Error::Encode(format!("no text encoder for {:?}", value)))?;
            let mut field = Vec::new();
            encode(value, &mut field)?;

            for b in field {
                match b {
                    b'\\' => out.extend_from_slice(b"\\\\"),
                    b'\t' => out.extend_from_slice(b"\\t"),
                    b'\n' => out.extend_from_slice(b"\\n"),
                    b'\r' => out.extend_from_slice(b"\\r"),
                    other => out.push(other),
                }
            }
        }
        out.push(b'\n');
        Ok(out)
    }

    /// Render one binary-format COPY row: i16 column count, then a
    /// length-prefixed field (or -1 for NULL) per column.
    fn encode_binary_row(&self, row: &[Value]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&(row.len() as i16).to_be_bytes());
        for value in row {
            if value.is_null() {
                out.extend_from_slice(&(-1_i32).to_be_bytes());
                continue;
            }

            let codec = self
                .registry
                .codec(value.natural_oid())
                .ok_or_else(|| Error::Encode(format!("no codec for {:?}", value)))?;
            let encode = codec
                .binary_encode
                .as_ref()
                .ok_or_else(|| Error::Encode(format!("no binary encoder for {:?}", value)))?;

            let len_at = out.len();
            out.extend_from_slice(&[0, 0, 0, 0]);
            encode(value, &mut out)?;
            let len = (out.len() - len_at - 4) as i32;
            out[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
        }
        Ok(out)
    }
}
