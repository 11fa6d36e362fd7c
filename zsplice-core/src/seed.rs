//! Recovers the chunk layout of an existing chunked archive so its
//! compressed byte ranges can be spliced into a new one.

use std::io::{Read, Seek};

use tracing::debug;

use crate::chunk::ChunkId;
use crate::error::Result;
use crate::format;
use crate::frame::{self, Frame, SkippableFrame, ZstdFrame};

/// A chunk id bound to the compressed byte range inside a seed archive that
/// decompresses to the chunk's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedChunk {
    pub id: ChunkId,
    pub dictionary_id: u32,
    pub offset: u64,
    pub compressed_len: u32,
}

/// Walks a chunked archive and pairs its content frames with the embedded
/// chunk-ID table. An archive without a matching table yields no records:
/// it is an ordinary zstd file, not a seed.
pub fn extract_seed_chunks<R: Read + Seek>(r: &mut R) -> Result<Vec<CompressedChunk>> {
    let frames = frame::walk(r)?;
    Ok(seed_chunks_from_frames(&frames))
}

/// Same pairing over an already-walked frame list.
pub fn seed_chunks_from_frames(frames: &[Frame]) -> Vec<CompressedChunk> {
    let content: Vec<&ZstdFrame> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::Zstd(z) => Some(z),
            Frame::Skippable(_) => None,
        })
        .collect();
    let skippable: Vec<&SkippableFrame> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::Skippable(s) => Some(s),
            Frame::Zstd(_) => None,
        })
        .collect();

    // Scan skippable frames back to front; the last plausible table wins.
    let ids = skippable.iter().rev().find_map(|s| {
        if s.magic != format::CHUNK_TABLE_MAGIC {
            return None;
        }
        format::parse_chunk_table(&s.payload, content.len())
    });

    let Some(ids) = ids else {
        debug!(frames = frames.len(), "archive carries no chunk-ID table, not a seed");
        return Vec::new();
    };

    content
        .iter()
        .zip(ids)
        .map(|(z, id)| CompressedChunk {
            id,
            dictionary_id: z.dictionary_id,
            offset: z.offset,
            compressed_len: z.compressed_len as u32,
        })
        .collect()
}
