//! The unit of transfer between a source stream and a destination write.

use bytes::Bytes;

/// A bounded slice of an object's bytes.
///
/// At most one chunk per job is alive at a time; it is dropped as soon as
/// the destination has accepted it.
#[derive(Clone, Debug)]
pub struct Chunk {
    /// Byte offset of the first byte within the object.
    pub offset: u64,
    pub bytes: Bytes,
    /// Set when this chunk ends an object of known length.
    pub is_final: bool,
}

impl Chunk {
    pub fn new(offset: u64, bytes: Bytes, is_final: bool) -> Self {
        Self {
            offset,
            bytes,
            is_final,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Offset one past the last byte of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.bytes.len() as u64
    }
}
