#![allow(dead_code)] // each test binary uses its own subset of these helpers

use std::fs;
use std::path::PathBuf;

use zsplice_core::chunk::{ChunkId, ChunkStore};

/// Compresses `content` as a single frame and files it under the store.
pub fn store_chunk(store: &ChunkStore, content: &[u8]) -> ChunkId {
    let id = ChunkId::of(content);
    let path = store.chunk_path(&id);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, zstd::bulk::compress(content, 3).unwrap()).unwrap();
    id
}

/// Fills a store from chunk contents and returns their ids in order.
pub fn fill_store(store: &ChunkStore, contents: &[Vec<u8>]) -> Vec<ChunkId> {
    contents.iter().map(|c| store_chunk(store, c)).collect()
}

/// Splits `data` into fixed-size chunk contents.
pub fn split_chunks(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    data.chunks(chunk_size).map(<[u8]>::to_vec).collect()
}

/// A resolver for archives that reference no dictionaries.
pub fn no_dictionaries(_id: u32) -> Option<Vec<u8>> {
    None
}

pub fn temp_store(dir: &tempfile::TempDir, name: &str) -> ChunkStore {
    let root: PathBuf = dir.path().join(name);
    fs::create_dir_all(&root).unwrap();
    ChunkStore::new(root)
}
