mod common;

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Cursor;

use common::temp_store;
use zsplice_core::chunk::{ChunkId, ChunkStore};
use zsplice_core::frame::{self, Frame};
use zsplice_core::recompress::{self, RecompressConfig, RecompressReport};
use zsplice_core::seekable::SeekableReader;
use zsplice_core::synth;

/// Enough related samples for the dictionary trainer to work with: JSON-ish
/// package metadata with shared boilerplate and per-chunk variation.
fn sample_contents() -> Vec<Vec<u8>> {
    (0..64)
        .map(|i: u32| {
            format!(
                concat!(
                    "{{\"name\":\"package-{i}\",\"version\":\"1.{i}.0\",",
                    "\"description\":\"prebuilt binary distribution, variant {i}\",",
                    "\"dependencies\":[\"libc\",\"openssl\",\"zlib\"],",
                    "\"checksums\":{{\"sha256\":\"{pad}\"}},",
                    "\"files\":[\"bin/tool-{i}\",\"share/doc/README\"]}}\n"
                ),
                i = i,
                pad = "deadbeef".repeat(8 + (i as usize % 7)),
            )
            .repeat(24)
            .into_bytes()
        })
        .collect()
}

fn populate(store: &ChunkStore) -> HashMap<ChunkId, Vec<u8>> {
    sample_contents()
        .into_iter()
        .map(|content| (common::store_chunk(store, &content), content))
        .collect()
}

fn config() -> RecompressConfig {
    RecompressConfig {
        dictionary_id: 7,
        level: 12,
        workers: 4,
        train_dictionary: false,
    }
}

fn run(store: &ChunkStore, cfg: &RecompressConfig) -> RecompressReport {
    recompress::recompress_store(store, cfg).unwrap()
}

#[test]
fn rewrites_every_chunk_onto_the_dictionary() {
    let td = tempfile::tempdir().unwrap();
    let store = temp_store(&td, "store");
    let originals = populate(&store);

    // No dictionary on disk yet: training is forced.
    let report = run(&store, &config());
    assert!(report.trained_dictionary);
    assert_eq!(report.chunks, 64);
    assert_eq!(report.recompressed, 64);
    assert_eq!(report.skipped, 0);

    let dict_path = store.dictionary_path(7).unwrap();
    assert!(dict_path.exists());
    let dictionary = fs::read(&dict_path).unwrap();

    for (id, content) in &originals {
        let path = store.chunk_path(id);
        let data = fs::read(&path).unwrap();

        // Exactly one ordinary frame carrying the target dictionary id.
        let frames = frame::walk(&mut Cursor::new(&data)).unwrap();
        assert_eq!(frames.len(), 1);
        let Frame::Zstd(z) = &frames[0] else {
            panic!("chunk file is not an ordinary frame");
        };
        assert_eq!(z.dictionary_id, 7);
        assert_eq!(recompress::file_dictionary_id(&path).unwrap(), 7);

        // Content is preserved bit-for-bit.
        let raw = zstd::bulk::Decompressor::with_dictionary(&dictionary)
            .unwrap()
            .decompress(&data, content.len())
            .unwrap();
        assert_eq!(&raw, content);
        assert_eq!(&ChunkId::of(&raw), id);
    }

    // No .raw staging files survive a successful run.
    assert!(!store
        .chunk_files()
        .unwrap()
        .iter()
        .any(|p| p.with_extension("raw").exists()));
}

#[test]
fn second_run_is_a_no_op() {
    let td = tempfile::tempdir().unwrap();
    let store = temp_store(&td, "store");
    populate(&store);

    run(&store, &config());
    let snapshot: Vec<(std::path::PathBuf, Vec<u8>)> = store
        .chunk_files()
        .unwrap()
        .into_iter()
        .map(|p| {
            let bytes = fs::read(&p).unwrap();
            (p, bytes)
        })
        .collect();

    let report = run(&store, &config());
    assert_eq!(report.recompressed, 0);
    assert_eq!(report.skipped, 64);
    assert!(!report.trained_dictionary);

    for (path, before) in snapshot {
        assert_eq!(fs::read(&path).unwrap(), before, "{path:?} changed");
    }
}

#[test]
fn dictionary_archives_read_back_through_the_store_resolver() {
    let td = tempfile::tempdir().unwrap();
    let store = temp_store(&td, "store");
    let originals = populate(&store);
    run(&store, &config());

    // Synthesize an archive out of the recompressed store and read it back:
    // the seekable reader must pick the dictionary up from the store.
    let mut target: Vec<ChunkId> = originals.keys().copied().collect();
    target.sort();
    let out = td.path().join("all.tar.zst");
    synth::synthesize(&target, &store, &[], &out).unwrap();

    let mut expected = Vec::new();
    for id in &target {
        expected.extend_from_slice(&originals[id]);
    }

    let mut reader = SeekableReader::new(File::open(&out).unwrap(), &store).unwrap();
    assert_eq!(reader.size(), expected.len() as u64);
    let all = reader.read_range(0, expected.len()).unwrap();
    assert_eq!(all, expected);

    // Spot-check a straddling range.
    let mid = expected.len() / 2;
    assert_eq!(
        reader.read_range(mid as u64 - 100, 300).unwrap(),
        &expected[mid - 100..mid + 200]
    );
}
