//! Reader for the external `.caibx` chunk index format.
//!
//! An index file names the ordered chunk ids that compose one target file.
//! It is produced by the chunker on the server side; this side only consumes
//! it. Layout: two 16-byte headers of `(payload_size: u64, type: u64)`, the
//! first `(48, 0x96824d9c7b129ff9)`, the second
//! `(u64::MAX, 0xe75b9e112f17417d)`, then `(offset: u64, hash: [u8; 32])`
//! records until end-of-file or a zero offset. The offsets are
//! producer-side data and are ignored here.

use std::io::{self, Read};

use crate::chunk::ChunkId;
use crate::error::{Error, Result};

pub const INDEX_HEADER_TYPE: u64 = 0x9682_4d9c_7b12_9ff9;
pub const TABLE_HEADER_TYPE: u64 = 0xe75b_9e11_2f17_417d;
pub const INDEX_HEADER_SIZE: u64 = 48;

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_header<R: Read>(r: &mut R) -> io::Result<(u64, u64)> {
    Ok((read_u64(r)?, read_u64(r)?))
}

/// Parses a `.caibx` stream into its ordered chunk-id list.
pub fn read_caibx<R: Read>(r: &mut R) -> Result<Vec<ChunkId>> {
    let (size, kind) = read_header(r)?;
    if size != INDEX_HEADER_SIZE || kind != INDEX_HEADER_TYPE {
        return Err(Error::MalformedIndex(format!(
            "bad index header: size {size}, type {kind:#018x}"
        )));
    }
    // The index header carries chunking parameters we have no use for.
    let mut remainder = vec![0u8; (size - 16) as usize];
    r.read_exact(&mut remainder)?;

    let (size, kind) = read_header(r)?;
    if size != u64::MAX || kind != TABLE_HEADER_TYPE {
        return Err(Error::MalformedIndex(format!(
            "bad table header: size {size:#x}, type {kind:#018x}"
        )));
    }

    let mut ids = Vec::new();
    loop {
        let offset = match read_u64(r) {
            Ok(offset) => offset,
            // End-of-file at a record boundary terminates the table.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(Error::Io(e)),
        };
        if offset == 0 {
            break;
        }
        let mut hash = [0u8; 32];
        r.read_exact(&mut hash)
            .map_err(|_| Error::MalformedIndex(format!("truncated record {}", ids.len())))?;
        ids.push(ChunkId::from_bytes(&hash)?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sample_index(ids: &[ChunkId], terminator: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&INDEX_HEADER_SIZE.to_le_bytes());
        buf.extend_from_slice(&INDEX_HEADER_TYPE.to_le_bytes());
        buf.extend_from_slice(&[0u8; 32]); // feature flags + chunk size params
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf.extend_from_slice(&TABLE_HEADER_TYPE.to_le_bytes());
        for (i, id) in ids.iter().enumerate() {
            buf.extend_from_slice(&((i as u64 + 1) * 4096).to_le_bytes());
            buf.extend_from_slice(id.as_bytes());
        }
        if terminator {
            buf.extend_from_slice(&0u64.to_le_bytes());
        }
        buf
    }

    #[test]
    fn reads_ids_in_order() {
        let ids = vec![ChunkId::of(b"1"), ChunkId::of(b"2"), ChunkId::of(b"3")];
        for terminator in [false, true] {
            let buf = sample_index(&ids, terminator);
            let got = read_caibx(&mut Cursor::new(&buf)).unwrap();
            assert_eq!(got, ids);
        }
    }

    #[test]
    fn rejects_wrong_headers() {
        let mut buf = sample_index(&[ChunkId::of(b"1")], true);
        buf[8] ^= 0xFF; // corrupt the index header type
        let err = read_caibx(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, Error::MalformedIndex(_)));
    }
}
