//! Enumerates the frames of a zstd stream without decompressing anything.
//!
//! The walker understands just enough of RFC 8878 to compute, for every
//! frame, its absolute offset, its exact compressed length, the uncompressed
//! length declared in the frame header, and the dictionary id it references.
//! Skippable frames are surfaced with their payload so higher layers can
//! recognize the metadata tables a chunked archive carries at its tail.

use std::io::{self, Read, Seek, SeekFrom};

use tracing::warn;

use crate::error::{Error, Result};

/// Magic of an ordinary zstd frame, little-endian.
pub const ZSTD_MAGIC: u32 = 0xFD2F_B528;

/// First magic of the skippable-frame family `0x184D2A50..=0x184D2A5F`.
pub const SKIPPABLE_MAGIC_BASE: u32 = 0x184D_2A50;

/// An ordinary (compressed) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZstdFrame {
    /// Absolute byte position of the frame magic in the stream.
    pub offset: u64,
    /// Magic + header + all blocks + optional trailing checksum.
    pub compressed_len: u64,
    /// Frame content size declared in the header (0 when absent).
    pub uncompressed_len: u64,
    /// Dictionary id from the frame header; 0 means no dictionary.
    pub dictionary_id: u32,
}

/// A skippable frame: opaque payload a decoder ignores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippableFrame {
    pub offset: u64,
    pub magic: u32,
    pub payload: Vec<u8>,
}

impl SkippableFrame {
    pub fn compressed_len(&self) -> u64 {
        8 + self.payload.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Zstd(ZstdFrame),
    Skippable(SkippableFrame),
}

impl Frame {
    pub fn offset(&self) -> u64 {
        match self {
            Frame::Zstd(f) => f.offset,
            Frame::Skippable(f) => f.offset,
        }
    }

    pub fn compressed_len(&self) -> u64 {
        match self {
            Frame::Zstd(f) => f.compressed_len,
            Frame::Skippable(f) => f.compressed_len(),
        }
    }
}

fn is_skippable_magic(magic: u32) -> bool {
    magic & 0xFFFF_FFF0 == SKIPPABLE_MAGIC_BASE
}

fn truncated(offset: u64) -> Error {
    Error::TruncatedFrame { offset }
}

/// Reads exactly `buf.len()` bytes, mapping EOF to `TruncatedFrame`.
fn read_exact_or_truncated(r: &mut impl Read, buf: &mut [u8], frame_offset: u64) -> Result<()> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            truncated(frame_offset)
        } else {
            Error::Io(e)
        }
    })
}

/// Reads an unsigned little-endian integer of `width` bytes (width <= 8).
fn read_le_uint(r: &mut impl Read, width: usize, frame_offset: u64) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact_or_truncated(r, &mut buf[..width], frame_offset)?;
    Ok(u64::from_le_bytes(buf))
}

/// Discards `n` bytes from the stream, mapping a short skip to `TruncatedFrame`.
fn skip_bytes(r: &mut impl Read, n: u64, frame_offset: u64) -> Result<()> {
    let copied = io::copy(&mut r.by_ref().take(n), &mut io::sink())?;
    if copied != n {
        return Err(truncated(frame_offset));
    }
    Ok(())
}

/// Parses one frame starting at `offset`, which must be the stream's current
/// position. Returns `Ok(None)` on clean end-of-stream, `NotAFrame` when the
/// next four bytes are not a frame magic (the magic bytes are consumed, the
/// rest of the stream is not), and `TruncatedFrame` when the stream ends in
/// the middle of a frame.
pub fn read_frame<R: Read>(r: &mut R, offset: u64) -> Result<Option<Frame>> {
    let mut magic_buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        let n = r.read(&mut magic_buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(truncated(offset));
        }
        filled += n;
    }
    let magic = u32::from_le_bytes(magic_buf);

    if is_skippable_magic(magic) {
        let size = read_le_uint(r, 4, offset)? as usize;
        let mut payload = vec![0u8; size];
        read_exact_or_truncated(r, &mut payload, offset)?;
        return Ok(Some(Frame::Skippable(SkippableFrame {
            offset,
            magic,
            payload,
        })));
    }

    if magic != ZSTD_MAGIC {
        return Err(Error::NotAFrame { offset, magic });
    }

    Ok(Some(Frame::Zstd(read_zstd_frame_body(r, offset)?)))
}

/// Parses the remainder of an ordinary frame, the magic already consumed.
fn read_zstd_frame_body<R: Read>(r: &mut R, offset: u64) -> Result<ZstdFrame> {
    let descriptor = read_le_uint(r, 1, offset)? as u8;
    let fcs_flag = descriptor >> 6;
    let single_segment = descriptor & 0x20 != 0;
    let has_checksum = descriptor & 0x04 != 0;
    let did_flag = descriptor & 0x03;

    let mut header_len: u64 = 1;

    // Window descriptor is present unless the single-segment flag is set.
    if !single_segment {
        skip_bytes(r, 1, offset)?;
        header_len += 1;
    }

    let did_width = match did_flag {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 4,
    };
    let dictionary_id = read_le_uint(r, did_width, offset)? as u32;
    header_len += did_width as u64;

    let fcs_width = match fcs_flag {
        0 => usize::from(single_segment),
        1 => 2,
        2 => 4,
        _ => 8,
    };
    let mut uncompressed_len = read_le_uint(r, fcs_width, offset)?;
    // The 2-byte field is stored biased; 1-, 4- and 8-byte fields are not.
    if fcs_width == 2 {
        uncompressed_len += 256;
    }
    header_len += fcs_width as u64;

    // Data blocks: 3-byte little-endian headers, payload sizes per block
    // type. An RLE block regenerates `block_size` bytes from a single stored
    // byte.
    let mut blocks_len: u64 = 0;
    loop {
        let header = read_le_uint(r, 3, offset)?;
        let last = header & 1 != 0;
        let block_type = (header >> 1) & 0x3;
        let block_size = header >> 3;
        let stored = if block_type == 1 { 1 } else { block_size };
        skip_bytes(r, stored, offset)?;
        blocks_len += 3 + stored;
        if last {
            break;
        }
    }

    let checksum_len = if has_checksum {
        skip_bytes(r, 4, offset)?;
        4
    } else {
        0
    };

    Ok(ZstdFrame {
        offset,
        compressed_len: 4 + header_len + blocks_len + checksum_len,
        uncompressed_len,
        dictionary_id,
    })
}

/// Parses one frame and requires it to be an ordinary content frame.
/// Used to peek the sizes of a chunk before splicing its bytes verbatim.
pub fn read_content_frame<R: Read>(r: &mut R, offset: u64) -> Result<ZstdFrame> {
    match read_frame(r, offset)? {
        Some(Frame::Zstd(frame)) => Ok(frame),
        Some(Frame::Skippable(frame)) => Err(Error::NotAFrame {
            offset,
            magic: frame.magic,
        }),
        None => Err(truncated(offset)),
    }
}

/// Walks the stream from its current position to end-of-stream and returns
/// the ordered frame list. A non-frame prefix terminates the walk: the
/// condition is logged, the frames seen so far are returned, and the stream
/// is rewound to the first unrecognized byte. `TruncatedFrame` still fails
/// the walk.
pub fn walk<R: Read + Seek>(r: &mut R) -> Result<Vec<Frame>> {
    let mut offset = r.stream_position()?;
    let mut frames = Vec::new();
    loop {
        match read_frame(r, offset) {
            Ok(Some(frame)) => {
                offset += frame.compressed_len();
                frames.push(frame);
            }
            Ok(None) => break,
            Err(Error::NotAFrame { offset, magic }) => {
                warn!(offset, magic, "non-frame trailer, stopping walk");
                r.seek(SeekFrom::Start(offset))?;
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn walks_real_frames_and_skippables() {
        let mut stream = Vec::new();
        let a = zstd::bulk::compress(b"hello hello hello", 3).unwrap();
        let b = zstd::bulk::compress(&[0x42u8; 4096], 3).unwrap();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);
        stream.extend_from_slice(&SKIPPABLE_MAGIC_BASE.to_le_bytes());
        stream.extend_from_slice(&3u32.to_le_bytes());
        stream.extend_from_slice(b"xyz");

        let frames = walk(&mut Cursor::new(&stream)).unwrap();
        assert_eq!(frames.len(), 3);
        let total: u64 = frames.iter().map(Frame::compressed_len).sum();
        assert_eq!(total, stream.len() as u64);
        assert_eq!(frames[0].offset(), 0);
        assert_eq!(frames[1].offset(), a.len() as u64);
        match &frames[0] {
            Frame::Zstd(f) => assert_eq!(f.uncompressed_len, 17),
            other => panic!("expected ordinary frame, got {other:?}"),
        }
        match &frames[2] {
            Frame::Skippable(f) => {
                assert_eq!(f.magic, SKIPPABLE_MAGIC_BASE);
                assert_eq!(f.payload, b"xyz");
            }
            other => panic!("expected skippable frame, got {other:?}"),
        }
    }

    #[test]
    fn stops_at_non_frame_bytes() {
        let mut stream = zstd::bulk::compress(b"data", 3).unwrap();
        let frame_len = stream.len() as u64;
        stream.extend_from_slice(b"GARBAGE!");

        let mut cursor = Cursor::new(&stream);
        let frames = walk(&mut cursor).unwrap();
        assert_eq!(frames.len(), 1);
        // The walk leaves the stream at the first unrecognized byte.
        assert_eq!(cursor.position(), frame_len);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let full = zstd::bulk::compress(&[7u8; 1000], 3).unwrap();
        let cut = &full[..full.len() - 3];
        let err = walk(&mut Cursor::new(cut)).unwrap_err();
        assert!(matches!(err, Error::TruncatedFrame { offset: 0 }));
    }

    #[test]
    fn two_byte_content_size_is_biased() {
        // 300 bytes of incompressible-ish data keeps the encoder honest about
        // the declared content size while staying in the biased 2-byte range.
        let data: Vec<u8> = (0..300u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let compressed = zstd::bulk::compress(&data, 3).unwrap();
        let frames = walk(&mut Cursor::new(&compressed)).unwrap();
        let Frame::Zstd(f) = &frames[0] else {
            panic!("expected ordinary frame");
        };
        assert_eq!(f.uncompressed_len, 300);
    }
}
