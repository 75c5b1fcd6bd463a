/// A byte range of the source file uploaded as one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Byte offset within the file.
    pub offset: u64,
    /// Number of bytes in this range.
    pub length: u64,
}

impl ChunkRange {
    /// One past the last byte of the range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Bytes of one chunk together with their checksum.
///
/// Produced right before the upload of that chunk and dropped right after.
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    pub range: ChunkRange,
    pub data: Vec<u8>,
    /// SHA-1 hex digest of `data`.
    pub checksum: String,
}
