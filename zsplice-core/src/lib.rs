//! Delta-update distribution for chunked zstd tarballs.
//!
//! An archive here is a zstd stream whose ordinary frames correspond
//! one-to-one with content-defined chunks, followed by two skippable frames:
//! an ordered chunk-ID table and a per-frame seek table. Such a file is at
//! once a plain decompressible stream, a catalog of its own chunks, and a
//! randomly seekable view of the tarball inside it. New versions are
//! synthesized from a local chunk store plus byte ranges spliced out of any
//! older archive, without decompressing a single chunk.

pub mod chunk;
pub mod error;
pub mod format;
pub mod frame;
pub mod index;
pub mod recompress;
pub mod seed;
pub mod seekable;
pub mod synth;
pub mod tarfs;

pub use chunk::{ChunkId, ChunkStore};
pub use error::{Error, Result};
