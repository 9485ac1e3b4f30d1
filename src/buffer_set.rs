//! Buffer set shared between the connection and its state machines.

/// Read/write buffers for one connection.
pub struct BufferSet {
    /// Type byte of the last message read
    pub type_byte: u8,
    /// Payload of the last message read (length field stripped)
    pub read_buffer: Vec<u8>,
    /// Pending outgoing bytes
    pub write_buffer: Vec<u8>,
}

impl BufferSet {
    /// Create a new buffer set.
    pub fn new() -> Self {
        Self {
            type_byte: 0,
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
        }
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
