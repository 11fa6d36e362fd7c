use thiserror::Error;

use crate::chunk::ChunkId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not a zstd frame at offset {offset} (magic {magic:#010x})")]
    NotAFrame { offset: u64, magic: u32 },

    #[error("truncated zstd frame starting at offset {offset}")]
    TruncatedFrame { offset: u64 },

    #[error("malformed chunk index: {0}")]
    MalformedIndex(String),

    #[error("chunk hash must be 32 bytes / 64 hex characters, got length {0}")]
    InvalidHashLength(usize),

    #[error("invalid hex in chunk hash: {0}")]
    InvalidHash(#[from] blake3::HexError),

    #[error("chunk {0} not found in store or seeds")]
    MissingChunk(ChunkId),

    #[error("seed chunk {id} truncated: wanted {expected} bytes, copied {got}")]
    TruncatedSeedChunk {
        id: ChunkId,
        expected: u64,
        got: u64,
    },

    #[error("no dictionary available for dictionary id {0}")]
    MissingDictionary(u32),

    #[error("short read at uncompressed position {pos}: wanted {wanted} bytes, got {got}")]
    TruncatedRead { pos: u64, wanted: usize, got: usize },

    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("archive entries are read-only: {0}")]
    InvalidOpenMode(String),

    #[error("decompression failed for frame at offset {offset}: {source}")]
    Decompress {
        offset: u64,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
