//! Chunk planning, SHA-1 checksums and byte accounting for OVA uploads.
//!
//! Files are never loaded whole: the whole-file digest is streamed and each
//! chunk is read (and hashed) only when it is about to be sent.

mod chunked;
mod progress;
mod types;

pub use chunked::{
    checksum_bytes, chunk_checksum, plan_ranges, read_chunk, whole_file_checksum,
};
pub use progress::{ConfirmedBytes, SpeedCalculator};
pub use types::{ChunkPayload, ChunkRange};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },
}
