use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use zsplice_core::chunk::ChunkStore;
use zsplice_core::frame::{self, Frame};
use zsplice_core::index;
use zsplice_core::recompress::{self, RecompressConfig};
use zsplice_core::seed;
use zsplice_core::seekable::SeekableReader;
use zsplice_core::synth;
use zsplice_core::tarfs::TarFs;

#[derive(Parser)]
#[command(name = "zsplice", version, about = "chunked zstd archive tooling")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List the frames of an archive
    Inspect { archive: PathBuf },
    /// List the chunk ids embedded in an archive
    Chunks { archive: PathBuf },
    /// Synthesize an archive from an index, a chunk store, and seeds
    Make {
        /// .caibx index naming the target chunks
        #[arg(long)]
        index: PathBuf,
        /// Chunk store root
        #[arg(long)]
        store: PathBuf,
        /// Seed archives, later ones win on overlap
        #[arg(long = "seed")]
        seeds: Vec<PathBuf>,
        output: PathBuf,
    },
    /// Recompress a chunk store against one dictionary
    Recompress {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        dictionary_id: u32,
        #[arg(long, default_value_t = 19)]
        level: i32,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Retrain the dictionary even if it already exists
        #[arg(long, default_value_t = false)]
        train: bool,
    },
    /// List a directory inside an archive
    Ls {
        archive: PathBuf,
        #[arg(default_value = "")]
        path: String,
        /// Chunk store to resolve dictionaries from
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Print a file from inside an archive
    Cat {
        archive: PathBuf,
        path: String,
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Inspect { archive } => inspect(&archive),
        Cmd::Chunks { archive } => chunks(&archive),
        Cmd::Make { index, store, seeds, output } => make(&index, &store, &seeds, &output),
        Cmd::Recompress { store, dictionary_id, level, workers, train } => {
            let cfg = RecompressConfig {
                dictionary_id,
                level,
                workers,
                train_dictionary: train,
            };
            let report = recompress::recompress_store(&ChunkStore::new(store), &cfg)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Cmd::Ls { archive, path, store } => ls(&archive, &path, store),
        Cmd::Cat { archive, path, store } => cat(&archive, &path, store),
    }
}

fn inspect(archive: &PathBuf) -> Result<()> {
    let mut file =
        File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    let frames = frame::walk(&mut file)?;
    let mut content = 0usize;
    let mut uncompressed = 0u64;
    for f in &frames {
        match f {
            Frame::Zstd(z) => {
                content += 1;
                uncompressed += z.uncompressed_len;
                println!(
                    "{:>12}  zstd       {:>10} -> {:>10}  dict {}",
                    z.offset, z.compressed_len, z.uncompressed_len, z.dictionary_id
                );
            }
            Frame::Skippable(s) => {
                println!(
                    "{:>12}  skippable  {:>10}    magic {:#010x}",
                    s.offset,
                    s.payload.len(),
                    s.magic
                );
            }
        }
    }
    println!("{} frames, {content} content frames, {uncompressed} bytes uncompressed", frames.len());
    Ok(())
}

fn chunks(archive: &PathBuf) -> Result<()> {
    let mut file =
        File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    let records = seed::extract_seed_chunks(&mut file)?;
    for r in &records {
        println!("{} {:>12} {:>10}", r.id.to_hex(), r.offset, r.compressed_len);
    }
    Ok(())
}

fn make(index: &PathBuf, store: &PathBuf, seeds: &[PathBuf], output: &PathBuf) -> Result<()> {
    let mut caibx =
        File::open(index).with_context(|| format!("open {}", index.display()))?;
    let target = index::read_caibx(&mut caibx)?;
    let report = synth::synthesize(&target, &ChunkStore::new(store), seeds, output)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn open_tarfs(archive: &PathBuf, store: Option<PathBuf>) -> Result<TarFs<File>> {
    let file = File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    // Default dictionary location: the archive's own directory.
    let root = store.unwrap_or_else(|| {
        archive.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
    });
    let reader = SeekableReader::new(file, &ChunkStore::new(root))?;
    Ok(TarFs::new(reader)?)
}

fn ls(archive: &PathBuf, path: &str, store: Option<PathBuf>) -> Result<()> {
    let fs = open_tarfs(archive, store)?;
    for child in fs.readdir(path)? {
        println!("{child}");
    }
    Ok(())
}

fn cat(archive: &PathBuf, path: &str, store: Option<PathBuf>) -> Result<()> {
    let fs = open_tarfs(archive, store)?;
    let mut file = fs.open(path)?;
    let data = file.read_to_end()?;
    io::stdout().write_all(&data)?;
    Ok(())
}
