//! A read-only, path-addressed view of the tar stream inside a chunked
//! archive.
//!
//! Construction makes a single forward pass over the tar headers (the
//! payloads are seeked over, so only frames containing headers are
//! decompressed) and records every entry with the absolute uncompressed
//! offset of its file bytes. All later reads go straight to the seekable
//! reader at `payload_offset + position`, so any number of file views can
//! share the one underlying cursor.

use std::cell::RefCell;
use std::io::{self, Read, Seek};

use tracing::debug;

use crate::error::{Error, Result};
use crate::seekable::SeekableReader;

/// Hop limit when chasing symlink chains.
const SYMLINK_HOP_BOUND: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Hardlink,
}

/// One tar entry. `payload_offset` is the absolute position of the entry's
/// file bytes in the uncompressed archive.
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub path: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub size: u64,
    pub link_target: Option<String>,
    pub payload_offset: u64,
}

/// What `stat`/`lstat` report. A missing path yields the default (empty)
/// stat rather than an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub kind: Option<EntryKind>,
    pub mode: u32,
    pub size: u64,
}

impl Stat {
    fn of(entry: &TarEntry) -> Self {
        Stat {
            kind: Some(entry.kind),
            mode: entry.mode,
            size: entry.size,
        }
    }

    pub fn exists(&self) -> bool {
        self.kind.is_some()
    }
}

/// Open options for [`TarFs::open_with`]. Only reads are possible; asking
/// for anything else is [`Error::InvalidOpenMode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    write: bool,
    create: bool,
    truncate: bool,
    append: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(mut self, yes: bool) -> Self {
        self.write = yes;
        self
    }

    pub fn create(mut self, yes: bool) -> Self {
        self.create = yes;
        self
    }

    pub fn truncate(mut self, yes: bool) -> Self {
        self.truncate = yes;
        self
    }

    pub fn append(mut self, yes: bool) -> Self {
        self.append = yes;
        self
    }

    fn wants_mutation(&self) -> bool {
        self.write || self.create || self.truncate || self.append
    }
}

/// Strips the decorations tar paths carry: leading `./`, leading `/`,
/// trailing `/`.
fn normalize(path: &str) -> String {
    let mut p = path;
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    p.trim_start_matches('/').trim_end_matches('/').to_string()
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Joins a symlink target onto the directory of the link, collapsing `.`
/// and `..` the way path normalization does. Absolute targets restart at
/// the archive root.
fn resolve_link(base_dir: &str, target: &str) -> String {
    let mut parts: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|c| !c.is_empty()).collect()
    };
    for comp in target.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// The in-memory tar index plus the shared reader it serves reads from.
#[derive(Debug)]
pub struct TarFs<R> {
    reader: RefCell<SeekableReader<R>>,
    entries: std::collections::HashMap<String, TarEntry>,
    dirs: std::collections::HashMap<String, Vec<String>>,
}

impl<R: Read + Seek> TarFs<R> {
    /// Scans the tar stream once and builds the entry and directory maps.
    pub fn new(mut reader: SeekableReader<R>) -> Result<Self> {
        use std::collections::HashMap;

        reader.seek_to(0);
        let mut entries: HashMap<String, TarEntry> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        {
            let mut archive = tar::Archive::new(&mut reader);
            for entry in archive.entries_with_seek()? {
                let entry = entry?;
                let header = entry.header();
                let kind = match header.entry_type() {
                    tar::EntryType::Regular => EntryKind::File,
                    tar::EntryType::Directory => EntryKind::Directory,
                    tar::EntryType::Symlink => EntryKind::Symlink,
                    tar::EntryType::Link => EntryKind::Hardlink,
                    _ => continue,
                };
                let path = normalize(&String::from_utf8_lossy(&entry.path_bytes()));
                if path.is_empty() {
                    continue;
                }
                let link_target = entry
                    .link_name_bytes()
                    .map(|b| String::from_utf8_lossy(&b).into_owned());
                let record = TarEntry {
                    path: path.clone(),
                    kind,
                    mode: header.mode()?,
                    size: entry.size(),
                    link_target,
                    payload_offset: entry.raw_file_position(),
                };
                order.push(path.clone());
                entries.insert(path, record);
            }
        }

        // Tars routinely omit directory entries for intermediate paths;
        // synthesize them so readdir/stat see a coherent tree.
        for path in &order {
            let mut dir = parent_dir(path);
            while !dir.is_empty() && !entries.contains_key(dir) {
                entries.insert(
                    dir.to_string(),
                    TarEntry {
                        path: dir.to_string(),
                        kind: EntryKind::Directory,
                        mode: 0o755,
                        size: 0,
                        link_target: None,
                        payload_offset: 0,
                    },
                );
                dir = parent_dir(dir);
            }
        }

        let mut dirs: HashMap<String, Vec<String>> = HashMap::new();
        dirs.insert(String::new(), Vec::new());
        for entry in entries.values() {
            if entry.kind == EntryKind::Directory {
                dirs.entry(entry.path.clone()).or_default();
            }
        }
        for entry in entries.values() {
            dirs.entry(parent_dir(&entry.path).to_string())
                .or_default()
                .push(entry.path.clone());
        }
        for children in dirs.values_mut() {
            children.sort();
        }

        debug!(entries = entries.len(), "indexed tar archive");
        Ok(TarFs {
            reader: RefCell::new(reader),
            entries,
            dirs,
        })
    }

    /// Follows symlinks (and hardlinks) to the final entry.
    fn resolve(&self, path: &str) -> Result<&TarEntry> {
        let mut key = normalize(path);
        for _ in 0..SYMLINK_HOP_BOUND {
            let entry = self
                .entries
                .get(&key)
                .ok_or_else(|| Error::NotFound(key.clone()))?;
            match (entry.kind, &entry.link_target) {
                (EntryKind::Symlink, Some(target)) => {
                    key = resolve_link(parent_dir(&entry.path), target);
                }
                (EntryKind::Hardlink, Some(target)) => {
                    key = normalize(target);
                }
                (EntryKind::Symlink | EntryKind::Hardlink, None) => {
                    return Err(Error::NotFound(key));
                }
                _ => return Ok(entry),
            }
        }
        Err(Error::NotFound(normalize(path)))
    }

    /// Returns a view of the entry at `path` without following links.
    pub fn get(&self, path: &str) -> Result<TarFile<'_, R>> {
        let key = normalize(path);
        let entry = self
            .entries
            .get(&key)
            .ok_or_else(|| Error::NotFound(key.clone()))?;
        Ok(TarFile {
            fs: self,
            entry: entry.clone(),
            pos: 0,
        })
    }

    /// Opens `path` for reading, following links.
    pub fn open(&self, path: &str) -> Result<TarFile<'_, R>> {
        let entry = self.resolve(path)?;
        Ok(TarFile {
            fs: self,
            entry: entry.clone(),
            pos: 0,
        })
    }

    /// Opens with explicit options; anything beyond plain reading is
    /// rejected.
    pub fn open_with(&self, path: &str, options: &OpenOptions) -> Result<TarFile<'_, R>> {
        if options.wants_mutation() {
            return Err(Error::InvalidOpenMode(normalize(path)));
        }
        self.open(path)
    }

    /// Stats `path`, following links. Missing paths give the empty stat.
    pub fn stat(&self, path: &str) -> Stat {
        match self.resolve(path) {
            Ok(entry) => Stat::of(entry),
            Err(_) => Stat::default(),
        }
    }

    /// Stats the entry itself, links not followed.
    pub fn lstat(&self, path: &str) -> Stat {
        match self.entries.get(&normalize(path)) {
            Some(entry) => Stat::of(entry),
            None => Stat::default(),
        }
    }

    /// Lists the children of a directory (full paths, sorted). The empty
    /// path or `/` lists the archive root.
    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let key = normalize(path);
        let dir_key = if key.is_empty() {
            key
        } else {
            let entry = self.resolve(&key)?;
            if entry.kind != EntryKind::Directory {
                return Err(Error::NotADirectory(entry.path.clone()));
            }
            entry.path.clone()
        };
        Ok(self.dirs.get(&dir_key).cloned().unwrap_or_default())
    }
}

/// A positioned read handle onto one tar entry. Each read seeks the shared
/// reader absolutely, so views never disturb each other.
#[derive(Debug)]
pub struct TarFile<'a, R> {
    fs: &'a TarFs<R>,
    entry: TarEntry,
    pos: u64,
}

impl<'a, R: Read + Seek> TarFile<'a, R> {
    pub fn entry(&self) -> &TarEntry {
        &self.entry
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Moves the view cursor, clamped to the entry size.
    pub fn seek_to(&mut self, pos: u64) -> u64 {
        self.pos = pos.min(self.entry.size);
        self.pos
    }

    /// Reads from the view cursor. Reading at or past the end of the entry
    /// is an end-of-file error.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pos >= self.entry.size {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read past end of {}", self.entry.path),
            )));
        }
        let n = (buf.len() as u64).min(self.entry.size - self.pos) as usize;
        let mut reader = self.fs.reader.borrow_mut();
        let got = reader.read_at(self.entry.payload_offset + self.pos, &mut buf[..n])?;
        self.pos += got as u64;
        Ok(got)
    }

    /// Reads everything from the view cursor to the end of the entry.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let len = (self.entry.size - self.pos) as usize;
        let mut reader = self.fs.reader.borrow_mut();
        let data = reader.read_range(self.entry.payload_offset + self.pos, len)?;
        self.pos += data.len() as u64;
        Ok(data)
    }
}
