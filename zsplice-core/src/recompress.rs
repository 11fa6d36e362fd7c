//! Rewrites every chunk of a store against one shared dictionary.
//!
//! Three phases with strict barriers between them: decompress every chunk
//! that needs rewriting to a `.raw` sibling, optionally train a dictionary
//! over the raw corpus, then recompress and delete the `.raw` files. File
//! names (and therefore content hashes) never change, and the operation is
//! explicitly not transactional: a failure leaves finished chunks in their
//! new form and unfinished ones untouched, plus possibly some `.raw`
//! siblings a rerun will pick up.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::chunk::ChunkStore;
use crate::error::{Error, Result};
use crate::frame::{self, ZstdFrame, ZSTD_MAGIC};

/// Magic leading a structured zstd dictionary, little-endian.
const DICTIONARY_MAGIC: u32 = 0xEC30_A437;

/// Upper bound handed to the dictionary trainer (zstd's customary 110 KiB).
pub const MAX_DICTIONARY_SIZE: usize = 112_640;

#[derive(Debug, Clone)]
pub struct RecompressConfig {
    /// Target dictionary id; 0 is reserved for "no dictionary" and rejected.
    pub dictionary_id: u32,
    pub level: i32,
    pub workers: usize,
    /// Retrain even when the dictionary file already exists. Forced on when
    /// it does not.
    pub train_dictionary: bool,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct RecompressReport {
    pub chunks: usize,
    pub recompressed: usize,
    pub skipped: usize,
    pub trained_dictionary: bool,
    pub original_bytes: u64,
    pub uncompressed_bytes: u64,
    pub recompressed_bytes: u64,
}

/// Reads the dictionary id out of a frame prefix without parsing blocks.
/// Anything that is not an ordinary frame, or carries no id, reports 0.
pub fn embedded_dictionary_id(head: &[u8]) -> u32 {
    if head.len() < 5 || head[0..4] != ZSTD_MAGIC.to_le_bytes() {
        return 0;
    }
    let descriptor = head[4];
    let did_width = match descriptor & 0x03 {
        0 => return 0,
        1 => 1,
        2 => 2,
        _ => 4,
    };
    let mut at = 5;
    // A window descriptor sits before the id unless single-segment is set.
    if descriptor & 0x20 == 0 {
        at += 1;
    }
    if head.len() < at + did_width {
        return 0;
    }
    let mut buf = [0u8; 4];
    buf[..did_width].copy_from_slice(&head[at..at + did_width]);
    u32::from_le_bytes(buf)
}

/// Sniffs the dictionary id of a chunk file from its first few bytes.
pub fn file_dictionary_id(path: &Path) -> Result<u32> {
    let mut head = [0u8; 10];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(embedded_dictionary_id(&head[..filled]))
}

fn raw_path(chunk_path: &Path) -> PathBuf {
    chunk_path.with_extension("raw")
}

fn stamp_dictionary_id(dictionary: &mut [u8], id: u32) {
    // Structured dictionary header: 4-byte magic, then the id, little-endian.
    if dictionary.len() >= 8 && dictionary[0..4] == DICTIONARY_MAGIC.to_le_bytes() {
        dictionary[4..8].copy_from_slice(&id.to_le_bytes());
    }
}

fn decompress_chunk(data: &[u8], peeked: &ZstdFrame, dictionary: Option<&Vec<u8>>) -> Result<Vec<u8>> {
    let capacity = peeked.uncompressed_len as usize;
    match dictionary {
        Some(dict) => zstd::bulk::Decompressor::with_dictionary(dict)
            .and_then(|mut d| d.decompress(data, capacity)),
        None => zstd::bulk::Decompressor::new().and_then(|mut d| d.decompress(data, capacity)),
    }
    .map_err(|source| Error::Decompress { offset: 0, source })
}

/// Recompresses every `*.cacnk` under the store root against dictionary
/// `dictionary_id` at the configured level, training the dictionary first
/// when asked to (or when it does not exist yet). Chunk content is
/// preserved bit-for-bit; only its compressed form changes.
pub fn recompress_store(store: &ChunkStore, cfg: &RecompressConfig) -> Result<RecompressReport> {
    let dict_path = store
        .dictionary_path(cfg.dictionary_id)
        .ok_or(Error::MissingDictionary(0))?;
    let train = cfg.train_dictionary || !dict_path.exists();
    let files = store.chunk_files()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.workers)
        .build()
        .map_err(|e| Error::Io(io::Error::other(e)))?;

    // Dictionaries the existing chunks reference, loaded once up front.
    let mut old_dictionaries: HashMap<u32, Vec<u8>> = HashMap::new();
    for path in &files {
        let id = file_dictionary_id(path)?;
        if id != 0 && !old_dictionaries.contains_key(&id) {
            let bytes = store
                .dictionary_bytes(id)
                .ok_or(Error::MissingDictionary(id))?;
            old_dictionaries.insert(id, bytes);
        }
    }

    let original_bytes = AtomicU64::new(0);
    let uncompressed_bytes = AtomicU64::new(0);
    let skipped = AtomicUsize::new(0);

    // Phase 1: decompress. A chunk already carrying the target id is left
    // alone unless the dictionary is being retrained under it.
    pool.install(|| {
        files.par_iter().try_for_each(|path| -> Result<()> {
            let data = fs::read(path)?;
            original_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
            let peeked = frame::read_content_frame(&mut &data[..], 0)?;
            if train || peeked.dictionary_id != cfg.dictionary_id {
                let raw =
                    decompress_chunk(&data, &peeked, old_dictionaries.get(&peeked.dictionary_id))?;
                uncompressed_bytes.fetch_add(raw.len() as u64, Ordering::Relaxed);
                fs::write(raw_path(path), raw)?;
            } else {
                uncompressed_bytes.fetch_add(peeked.uncompressed_len, Ordering::Relaxed);
                skipped.fetch_add(1, Ordering::Relaxed);
                debug!(path = %path.display(), "chunk already on target dictionary");
            }
            Ok(())
        })
    })?;

    // Phase 2: train, strictly after the decompress pass has drained.
    if train {
        let mut samples = Vec::new();
        for path in &files {
            let raw = raw_path(path);
            if raw.exists() {
                samples.push(fs::read(raw)?);
            }
        }
        let mut dictionary = zstd::dict::from_samples(&samples, MAX_DICTIONARY_SIZE)?;
        stamp_dictionary_id(&mut dictionary, cfg.dictionary_id);
        fs::write(&dict_path, &dictionary)?;
        info!(
            dictionary_id = cfg.dictionary_id,
            samples = samples.len(),
            bytes = dictionary.len(),
            "trained dictionary"
        );
    }
    let dictionary = fs::read(&dict_path)?;

    let recompressed_bytes = AtomicU64::new(0);
    let recompressed = AtomicUsize::new(0);

    // Phase 3: recompress everything phase 1 staged.
    pool.install(|| {
        files.par_iter().try_for_each(|path| -> Result<()> {
            let raw = raw_path(path);
            if !raw.exists() {
                return Ok(());
            }
            let data = fs::read(&raw)?;
            let mut compressor = zstd::bulk::Compressor::with_dictionary(cfg.level, &dictionary)?;
            let compressed = compressor.compress(&data)?;
            fs::write(path, &compressed)?;
            fs::remove_file(&raw)?;
            recompressed_bytes.fetch_add(compressed.len() as u64, Ordering::Relaxed);
            recompressed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    })?;

    let report = RecompressReport {
        chunks: files.len(),
        recompressed: recompressed.into_inner(),
        skipped: skipped.into_inner(),
        trained_dictionary: train,
        original_bytes: original_bytes.into_inner(),
        uncompressed_bytes: uncompressed_bytes.into_inner(),
        recompressed_bytes: recompressed_bytes.into_inner(),
    };
    info!(
        store = %store.root().display(),
        chunks = report.chunks,
        recompressed = report.recompressed,
        skipped = report.skipped,
        original_bytes = report.original_bytes,
        recompressed_bytes = report.recompressed_bytes,
        "recompressed chunk store"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_dictionary_id_from_frame_prefix() {
        // No dictionary: plain bulk compression carries did_flag == 0.
        let plain = zstd::bulk::compress(b"some chunk content", 3).unwrap();
        assert_eq!(embedded_dictionary_id(&plain), 0);

        // Not a zstd frame at all.
        assert_eq!(embedded_dictionary_id(b"PK\x03\x04junk"), 0);
        assert_eq!(embedded_dictionary_id(&[]), 0);
    }

    #[test]
    fn stamping_rewrites_only_the_id_field() {
        let mut dict = Vec::new();
        dict.extend_from_slice(&DICTIONARY_MAGIC.to_le_bytes());
        dict.extend_from_slice(&0xAAAA_AAAAu32.to_le_bytes());
        dict.extend_from_slice(b"entropy tables");
        let tail = dict[8..].to_vec();

        stamp_dictionary_id(&mut dict, 42);
        assert_eq!(&dict[0..4], DICTIONARY_MAGIC.to_le_bytes());
        assert_eq!(u32::from_le_bytes(dict[4..8].try_into().unwrap()), 42);
        assert_eq!(&dict[8..], &tail[..]);
    }
}
