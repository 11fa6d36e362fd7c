//! On-disk layout of the two metadata tables a chunked archive carries as
//! trailing skippable frames.
//!
//! Both frames are ordinary zstd skippable frames: 4-byte magic, 4-byte
//! little-endian payload length, payload. An archive stays a valid zstd
//! stream with or without them.
//!
//! Chunk-ID table (magic `0x184D2A5D`): `N * 32` hash bytes in content-frame
//! order, then the 4-byte cookie `0xD12FA2A3`.
//!
//! Seek table (magic `0x184D2A5E`): `N` pairs of
//! `(compressed_len: u32, uncompressed_len: u32)`, then `N: u32`, one
//! reserved zero byte, then the 4-byte cookie `0x8F92EAB1`.

use std::io::Write;

use crate::chunk::ChunkId;
use crate::error::Result;

pub const CHUNK_TABLE_MAGIC: u32 = 0x184D_2A5D;
pub const SEEK_TABLE_MAGIC: u32 = 0x184D_2A5E;

pub const CHUNK_TABLE_COOKIE: u32 = 0xD12F_A2A3;
pub const SEEK_TABLE_COOKIE: u32 = 0x8F92_EAB1;

/// Per-content-frame sizes recorded in the seek table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekEntry {
    pub compressed_len: u32,
    pub uncompressed_len: u32,
}

/// Appends the chunk-ID table frame.
pub fn write_chunk_table<W: Write>(w: &mut W, ids: &[ChunkId]) -> Result<()> {
    let payload_len = ids.len() as u32 * 32 + 4;
    w.write_all(&CHUNK_TABLE_MAGIC.to_le_bytes())?;
    w.write_all(&payload_len.to_le_bytes())?;
    for id in ids {
        w.write_all(id.as_bytes())?;
    }
    w.write_all(&CHUNK_TABLE_COOKIE.to_le_bytes())?;
    Ok(())
}

/// Appends the seek-table frame.
pub fn write_seek_table<W: Write>(w: &mut W, entries: &[SeekEntry]) -> Result<()> {
    let payload_len = entries.len() as u32 * 8 + 9;
    w.write_all(&SEEK_TABLE_MAGIC.to_le_bytes())?;
    w.write_all(&payload_len.to_le_bytes())?;
    for entry in entries {
        w.write_all(&entry.compressed_len.to_le_bytes())?;
        w.write_all(&entry.uncompressed_len.to_le_bytes())?;
    }
    w.write_all(&(entries.len() as u32).to_le_bytes())?;
    w.write_all(&[0u8])?;
    w.write_all(&SEEK_TABLE_COOKIE.to_le_bytes())?;
    Ok(())
}

/// Decodes a chunk-ID table payload that should describe `frames` content
/// frames. `None` when the payload length or the trailing cookie does not
/// match: the frame is then just an unrelated skippable frame.
pub fn parse_chunk_table(payload: &[u8], frames: usize) -> Option<Vec<ChunkId>> {
    if payload.len() != frames * 32 + 4 {
        return None;
    }
    let (hashes, cookie) = payload.split_at(frames * 32);
    if cookie != CHUNK_TABLE_COOKIE.to_le_bytes() {
        return None;
    }
    Some(
        hashes
            .chunks_exact(32)
            .map(|row| ChunkId::from_bytes(row).expect("32-byte rows"))
            .collect(),
    )
}

/// Decodes a seek-table payload. `None` when the shape, the entry count, or
/// the cookie does not match.
pub fn parse_seek_table(payload: &[u8]) -> Option<Vec<SeekEntry>> {
    // entries + count + reserved byte + cookie
    if payload.len() < 9 || (payload.len() - 9) % 8 != 0 {
        return None;
    }
    let entries_len = payload.len() - 9;
    let (rows, tail) = payload.split_at(entries_len);
    let count = u32::from_le_bytes(tail[0..4].try_into().unwrap()) as usize;
    if count != entries_len / 8 || tail[4] != 0 {
        return None;
    }
    if tail[5..9] != SEEK_TABLE_COOKIE.to_le_bytes() {
        return None;
    }
    Some(
        rows.chunks_exact(8)
            .map(|row| SeekEntry {
                compressed_len: u32::from_le_bytes(row[0..4].try_into().unwrap()),
                uncompressed_len: u32::from_le_bytes(row[4..8].try_into().unwrap()),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_table_roundtrip() {
        let ids = vec![ChunkId::of(b"a"), ChunkId::of(b"b"), ChunkId::of(b"c")];
        let mut buf = Vec::new();
        write_chunk_table(&mut buf, &ids).unwrap();

        assert_eq!(&buf[0..4], CHUNK_TABLE_MAGIC.to_le_bytes());
        let payload = &buf[8..];
        assert_eq!(parse_chunk_table(payload, 3).unwrap(), ids);
        // Wrong frame count: not our table.
        assert_eq!(parse_chunk_table(payload, 2), None);
    }

    #[test]
    fn seek_table_roundtrip() {
        let entries = vec![
            SeekEntry { compressed_len: 100, uncompressed_len: 4096 },
            SeekEntry { compressed_len: 81, uncompressed_len: 1024 },
        ];
        let mut buf = Vec::new();
        write_seek_table(&mut buf, &entries).unwrap();

        assert_eq!(&buf[0..4], SEEK_TABLE_MAGIC.to_le_bytes());
        assert_eq!(parse_seek_table(&buf[8..]).unwrap(), entries);
    }

    #[test]
    fn corrupt_cookie_is_rejected() {
        let ids = vec![ChunkId::of(b"x")];
        let mut buf = Vec::new();
        write_chunk_table(&mut buf, &ids).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert_eq!(parse_chunk_table(&buf[8..], 1), None);
    }
}
