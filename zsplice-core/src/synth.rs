//! Assembles a chunked archive from a chunk store and seed archives by raw
//! byte splicing. No chunk is ever decompressed: store files and seed byte
//! ranges are already single zstd frames, and concatenated frames are again
//! a valid zstd stream.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::chunk::{ChunkId, ChunkStore};
use crate::error::{Error, Result};
use crate::format::{self, SeekEntry};
use crate::frame;
use crate::seed::{self, CompressedChunk};

/// Where each chunk of a synthesized archive came from.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct SynthesisReport {
    pub chunks: usize,
    pub store_chunks: usize,
    pub seed_chunks: usize,
    /// Compressed bytes of content frames, excluding the metadata tables.
    pub content_bytes: u64,
}

/// Writes the chunked archive for `target` to `out`.
///
/// Every chunk is taken from the store when present there, otherwise spliced
/// out of the last seed that provides it. A chunk available from neither
/// fails with [`Error::MissingChunk`]. On any failure the partially written
/// output is removed before the error is returned; seed handles are closed
/// on every path.
pub fn synthesize(
    target: &[ChunkId],
    store: &ChunkStore,
    seeds: &[PathBuf],
    out: &Path,
) -> Result<SynthesisReport> {
    let result = write_archive(target, store, seeds, out);
    if result.is_err() {
        let _ = fs::remove_file(out);
    }
    result
}

fn write_archive(
    target: &[ChunkId],
    store: &ChunkStore,
    seeds: &[PathBuf],
    out: &Path,
) -> Result<SynthesisReport> {
    // Chunk id -> (seed handle index, byte range). Later seeds overwrite
    // earlier ones, so the freshest copy of a shared chunk is used.
    let mut seed_map: HashMap<ChunkId, (usize, CompressedChunk)> = HashMap::new();
    let mut seed_files: Vec<File> = Vec::new();
    for path in seeds {
        let mut file = File::open(path)?;
        let chunks = seed::extract_seed_chunks(&mut file)?;
        debug!(seed = %path.display(), chunks = chunks.len(), "indexed seed archive");
        let handle = seed_files.len();
        seed_files.push(file);
        for chunk in chunks {
            seed_map.insert(chunk.id, (handle, chunk));
        }
    }

    let mut writer = BufWriter::new(File::create(out)?);
    let mut seek_entries: Vec<SeekEntry> = Vec::with_capacity(target.len());
    let mut report = SynthesisReport {
        chunks: target.len(),
        ..SynthesisReport::default()
    };

    for id in target {
        let path = store.chunk_path(id);
        if path.exists() {
            let mut chunk_file = File::open(&path)?;
            let peeked = frame::read_content_frame(&mut chunk_file, 0)?;
            chunk_file.seek(SeekFrom::Start(0))?;
            let copied = io::copy(&mut chunk_file, &mut writer)?;
            seek_entries.push(SeekEntry {
                compressed_len: peeked.compressed_len as u32,
                uncompressed_len: peeked.uncompressed_len as u32,
            });
            report.store_chunks += 1;
            report.content_bytes += copied;
            debug!(chunk = %id, source = "store", bytes = copied, "spliced chunk");
        } else if let Some((handle, chunk)) = seed_map.get(id) {
            let seed_file = &mut seed_files[*handle];
            seed_file.seek(SeekFrom::Start(chunk.offset))?;
            let peeked = frame::read_content_frame(seed_file, chunk.offset)?;
            seed_file.seek(SeekFrom::Start(chunk.offset))?;
            let wanted = u64::from(chunk.compressed_len);
            let copied = io::copy(&mut io::Read::by_ref(seed_file).take(wanted), &mut writer)?;
            if copied != wanted {
                return Err(Error::TruncatedSeedChunk {
                    id: *id,
                    expected: wanted,
                    got: copied,
                });
            }
            seek_entries.push(SeekEntry {
                compressed_len: peeked.compressed_len as u32,
                uncompressed_len: peeked.uncompressed_len as u32,
            });
            report.seed_chunks += 1;
            report.content_bytes += copied;
            debug!(chunk = %id, source = "seed", bytes = copied, "spliced chunk");
        } else {
            return Err(Error::MissingChunk(*id));
        }
    }

    format::write_chunk_table(&mut writer, target)?;
    format::write_seek_table(&mut writer, &seek_entries)?;
    writer.flush()?;

    info!(
        out = %out.display(),
        chunks = report.chunks,
        from_store = report.store_chunks,
        from_seeds = report.seed_chunks,
        content_bytes = report.content_bytes,
        "synthesized chunked archive"
    );
    Ok(report)
}
