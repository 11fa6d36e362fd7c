//! Random access into the uncompressed coordinate space of a chunked
//! archive.
//!
//! One frame walk at construction yields a table mapping uncompressed
//! positions to compressed frame ranges. Reads locate the covering frame,
//! decompress it whole with the referenced dictionary, and copy the
//! requested slice. The most recently decompressed frame is kept, so
//! monotonic-forward cursors (the common tar-scan access pattern) touch each
//! frame once.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};

use tracing::debug;
use zstd::dict::DecoderDictionary;

use crate::chunk::ChunkStore;
use crate::error::{Error, Result};
use crate::frame::{self, Frame};

/// Supplies dictionary bytes for the dictionary ids an archive references.
pub trait DictionaryResolver {
    fn resolve(&self, dictionary_id: u32) -> Option<Vec<u8>>;
}

/// A chunk store resolves `dictionary-<id>.zstdict` under its root.
impl DictionaryResolver for ChunkStore {
    fn resolve(&self, dictionary_id: u32) -> Option<Vec<u8>> {
        self.dictionary_bytes(dictionary_id)
    }
}

impl<F> DictionaryResolver for F
where
    F: Fn(u32) -> Option<Vec<u8>>,
{
    fn resolve(&self, dictionary_id: u32) -> Option<Vec<u8>> {
        self(dictionary_id)
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameEntry {
    compressed_offset: u64,
    compressed_len: u64,
    uncompressed_offset: u64,
    uncompressed_len: u64,
    dictionary_id: u32,
}

struct FrameCache {
    index: usize,
    data: Vec<u8>,
}

/// A read-only random-access view of an archive's uncompressed bytes.
pub struct SeekableReader<R> {
    inner: R,
    frames: Vec<FrameEntry>,
    dictionaries: HashMap<u32, DecoderDictionary<'static>>,
    size: u64,
    pos: u64,
    cache: Option<FrameCache>,
}

impl<R> std::fmt::Debug for SeekableReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeekableReader")
            .field("frames", &self.frames)
            .field("size", &self.size)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Seek> SeekableReader<R> {
    /// Indexes `inner` and loads every referenced dictionary through
    /// `resolver`. Fails with [`Error::MissingDictionary`] when a referenced
    /// dictionary cannot be resolved.
    pub fn new(mut inner: R, resolver: &impl DictionaryResolver) -> Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        let mut frames = Vec::new();
        let mut uncompressed_offset = 0u64;
        for f in frame::walk(&mut inner)? {
            if let Frame::Zstd(z) = f {
                frames.push(FrameEntry {
                    compressed_offset: z.offset,
                    compressed_len: z.compressed_len,
                    uncompressed_offset,
                    uncompressed_len: z.uncompressed_len,
                    dictionary_id: z.dictionary_id,
                });
                uncompressed_offset += z.uncompressed_len;
            }
        }

        let mut dictionaries = HashMap::new();
        for entry in &frames {
            let id = entry.dictionary_id;
            if id != 0 && !dictionaries.contains_key(&id) {
                let bytes = resolver.resolve(id).ok_or(Error::MissingDictionary(id))?;
                dictionaries.insert(id, DecoderDictionary::copy(&bytes));
            }
        }

        debug!(
            frames = frames.len(),
            size = uncompressed_offset,
            dictionaries = dictionaries.len(),
            "indexed seekable archive"
        );
        Ok(SeekableReader {
            inner,
            frames,
            dictionaries,
            size: uncompressed_offset,
            pos: 0,
            cache: None,
        })
    }

    /// Total uncompressed length of the archive content.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current logical cursor in uncompressed coordinates.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Moves the cursor, clamped into `[0, size]`.
    pub fn seek_to(&mut self, pos: u64) -> u64 {
        self.pos = pos.min(self.size);
        self.pos
    }

    /// Advances the cursor by `n`, clamped at the end of the archive.
    pub fn skip(&mut self, n: u64) -> u64 {
        self.seek_to(self.pos.saturating_add(n))
    }

    /// Reads at an absolute position without touching the cursor. Returns
    /// the number of bytes read, short only when the range crosses the end
    /// of the archive.
    pub fn read_at(&mut self, mut pos: u64, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0usize;
        while done < buf.len() && pos < self.size {
            let idx = self
                .frames
                .partition_point(|f| f.uncompressed_offset + f.uncompressed_len <= pos);
            self.load_frame(idx)?;
            let frame_start = self.frames[idx].uncompressed_offset;
            let cache = self.cache.as_ref().expect("frame cached by load_frame");
            let skip = (pos - frame_start) as usize;
            let n = (buf.len() - done).min(cache.data.len() - skip);
            buf[done..done + n].copy_from_slice(&cache.data[skip..skip + n]);
            done += n;
            pos += n as u64;
        }
        Ok(done)
    }

    /// Fills `buf` from the absolute position `pos`. Anything short of a
    /// full buffer, including a range crossing the end of the archive, is
    /// [`Error::TruncatedRead`]. Unlike the blanket `Read::read_exact`,
    /// this keeps the crate's typed error.
    pub fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let got = self.read_at(pos, buf)?;
        if got < buf.len() {
            return Err(Error::TruncatedRead {
                pos,
                wanted: buf.len(),
                got,
            });
        }
        Ok(())
    }

    /// Reads exactly `len` bytes starting at `pos`. The result is shorter
    /// only when the range extends past the end of the archive; a short read
    /// inside the archive is [`Error::TruncatedRead`].
    pub fn read_range(&mut self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let got = self.read_at(pos, &mut buf)?;
        if got < len && pos + len as u64 <= self.size {
            return Err(Error::TruncatedRead {
                pos,
                wanted: len,
                got,
            });
        }
        buf.truncate(got);
        Ok(buf)
    }

    /// Decompresses frame `idx` into the cache unless it is already there.
    fn load_frame(&mut self, idx: usize) -> Result<()> {
        if matches!(&self.cache, Some(c) if c.index == idx) {
            return Ok(());
        }
        let entry = self.frames[idx];
        self.inner.seek(SeekFrom::Start(entry.compressed_offset))?;
        let mut compressed = vec![0u8; entry.compressed_len as usize];
        self.inner.read_exact(&mut compressed)?;

        let capacity = entry.uncompressed_len as usize;
        let data = match entry.dictionary_id {
            0 => zstd::bulk::Decompressor::new()
                .and_then(|mut d| d.decompress(&compressed, capacity)),
            id => {
                let dict = self
                    .dictionaries
                    .get(&id)
                    .ok_or(Error::MissingDictionary(id))?;
                zstd::bulk::Decompressor::with_prepared_dictionary(dict)
                    .and_then(|mut d| d.decompress(&compressed, capacity))
            }
        }
        .map_err(|source| Error::Decompress {
            offset: entry.compressed_offset,
            source,
        })?;

        if data.len() as u64 != entry.uncompressed_len {
            return Err(Error::TruncatedRead {
                pos: entry.uncompressed_offset,
                wanted: entry.uncompressed_len as usize,
                got: data.len(),
            });
        }
        self.cache = Some(FrameCache { index: idx, data });
        Ok(())
    }
}

impl<R: Read + Seek> Read for SeekableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(self.pos, buf).map_err(io::Error::other)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SeekableReader<R> {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let pos = match target {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(d) => self.pos.saturating_add_signed(d),
            SeekFrom::End(d) => self.size.saturating_add_signed(d),
        };
        Ok(self.seek_to(pos))
    }
}
