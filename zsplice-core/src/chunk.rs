//! Content-addressed chunk identity and the on-disk chunk store layout.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File extension of a stored compressed chunk.
pub const CHUNK_EXT: &str = "cacnk";

/// A chunk's content hash: 32 bytes of blake3 over the uncompressed bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId([u8; 32]);

impl ChunkId {
    /// Hashes `data` into its chunk id.
    pub fn of(data: &[u8]) -> Self {
        ChunkId(*blake3::hash(data).as_bytes())
    }

    /// Builds an id from exactly 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidHashLength(bytes.len()))?;
        Ok(ChunkId(arr))
    }

    /// Parses the canonical 64-character lowercase-hex form.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 64 {
            return Err(Error::InvalidHashLength(hex.len()));
        }
        let hash = blake3::Hash::from_hex(hex)?;
        Ok(ChunkId(*hash.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for ChunkId {
    /// Short display form: the first 8 hex characters, bracketed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", &self.to_hex()[..8])
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", self.to_hex())
    }
}

/// Conventional file name of a trained dictionary. Id 0 means "no
/// dictionary" and never names a file.
pub fn dictionary_file_name(dictionary_id: u32) -> String {
    format!("dictionary-{dictionary_id}.zstdict")
}

/// A directory of individually compressed chunk files, addressed by content
/// hash: `root/<first 4 hex>/<64 hex>.cacnk`, with trained dictionaries at
/// `root/dictionary-<id>.zstdict`.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ChunkStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The chunk file path is a pure function of the id and the store root.
    pub fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[..4]).join(format!("{hex}.{CHUNK_EXT}"))
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.chunk_path(id).exists()
    }

    /// Path of the dictionary for `dictionary_id`; `None` for id 0.
    pub fn dictionary_path(&self, dictionary_id: u32) -> Option<PathBuf> {
        (dictionary_id != 0).then(|| self.root.join(dictionary_file_name(dictionary_id)))
    }

    /// Reads a dictionary from the store, `None` when id 0 or absent.
    pub fn dictionary_bytes(&self, dictionary_id: u32) -> Option<Vec<u8>> {
        self.dictionary_path(dictionary_id)
            .and_then(|path| fs::read(path).ok())
    }

    /// All `*.cacnk` files under the store root, in stable (sorted) order.
    pub fn chunk_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().map(|e| e == CHUNK_EXT).unwrap_or(false) {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "8f4e33f3dc3e414ff94e5fb6905cba8c8dad3dd26013a4b67e11e345ddd2e8e5";

    #[test]
    fn hex_roundtrip_and_display() {
        let id = ChunkId::from_hex(HEX).unwrap();
        assert_eq!(id.to_hex(), HEX);
        assert_eq!(id.to_string(), "[8f4e33f3]");
    }

    #[test]
    fn rejects_bad_lengths() {
        assert!(matches!(
            ChunkId::from_hex("abcd"),
            Err(Error::InvalidHashLength(4))
        ));
        assert!(matches!(
            ChunkId::from_bytes(&[0u8; 31]),
            Err(Error::InvalidHashLength(31))
        ));
    }

    #[test]
    fn chunk_path_is_deterministic() {
        let store = ChunkStore::new("/var/lib/store");
        let id = ChunkId::from_hex(HEX).unwrap();
        assert_eq!(
            store.chunk_path(&id),
            PathBuf::from(format!("/var/lib/store/8f4e/{HEX}.cacnk"))
        );
    }

    #[test]
    fn dictionary_id_zero_has_no_path() {
        let store = ChunkStore::new("/store");
        assert_eq!(store.dictionary_path(0), None);
        assert_eq!(
            store.dictionary_path(7).unwrap(),
            PathBuf::from("/store/dictionary-7.zstdict")
        );
    }
}
