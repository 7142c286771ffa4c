//! snapdb - inspect and poke at a snapdb store from the command line

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use snapdb::{Config, Database, PageNumber, SnapshotToken};
use std::path::PathBuf;

/// snapdb - embedded page store with snapshot isolation
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path of the base file; the log lives next to it at <PATH>-wal
    path: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new, empty store
    Init {
        /// Page size in bytes
        #[arg(short, long, default_value = "4096")]
        page_size: usize,
    },
    /// Print store and log statistics
    Info,
    /// Write a page in its own transaction
    Write {
        /// Page to overwrite; a new page is allocated when omitted
        #[arg(short, long)]
        page: Option<u32>,
        /// Page contents, zero-padded to the page size
        data: String,
    },
    /// Print a page
    Read {
        page: u32,
        /// Read as of a snapshot token instead of the latest commit
        #[arg(long)]
        at: Option<String>,
    },
    /// Print a token for the latest commit
    Snapshot,
    /// Merge the log into the base file
    Checkpoint,
    /// Re-read the log and print the range of openable snapshots
    Recover,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match args.command {
        Command::Init { page_size } => {
            let config = Config::builder()
                .page_size(page_size)
                .build()
                .context("Invalid configuration")?;
            let db = Database::create(&args.path, config)
                .with_context(|| format!("Failed to create store at {}", args.path.display()))?;
            println!("created store {:016x}", db.store_id());
        }
        Command::Info => {
            let db = open(&args.path)?;
            let info = db.info().context("Failed to read store info")?;
            println!("store id:             {:016x}", info.store_id);
            println!("page size:            {}", info.page_size);
            println!("read mark:            {}", info.read_mark.value());
            println!("pages:                {}", info.page_count);
            println!("free pages:           {}", info.free_pages);
            println!("base file pages:      {}", info.base_file_pages);
            println!("wal frames:           {}", info.wal_frames);
            println!("wal commits:          {}", info.wal_commits);
            println!("wal bytes:            {}", info.wal_bytes);
            println!("checkpointed through: {}", info.checkpointed_through.value());
        }
        Command::Write { page, data } => {
            let db = open(&args.path)?;
            let mut writer = db.begin_write().context("Failed to begin write")?;
            let page = match page {
                Some(page) => PageNumber(page),
                None => writer.allocate().context("Failed to allocate page")?,
            };
            writer
                .write(page, data.as_bytes())
                .with_context(|| format!("Failed to write {}", page))?;
            match writer.commit().context("Commit failed")? {
                Some(sequence) => println!("wrote {} at {}", page, sequence),
                None => println!("nothing to commit"),
            }
        }
        Command::Read { page, at } => {
            let db = open(&args.path)?;
            let page = PageNumber(page);
            let data = match at {
                Some(token) => {
                    let token: SnapshotToken = token.parse().context("Bad snapshot token")?;
                    let snapshot = db.open_at(&token).context("Cannot open snapshot")?;
                    db.read_snapshot(page, &snapshot)
                }
                None => db.begin_read().read(page),
            }
            .with_context(|| format!("Failed to read {}", page))?;

            let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            println!("{}", String::from_utf8_lossy(&data[..end]));
        }
        Command::Snapshot => {
            let db = open(&args.path)?;
            let snapshot = db.capture();
            println!("{}", snapshot.token());
            db.release(&snapshot)?;
        }
        Command::Checkpoint => {
            let db = open(&args.path)?;
            let merged = db.checkpoint().context("Checkpoint failed")?;
            println!("merged {} frames", merged);
        }
        Command::Recover => {
            let db = open(&args.path)?;
            let range = db.recover_snapshots().context("Recovery failed")?;
            println!(
                "snapshots openable from {} through {}",
                range.oldest.value(),
                range.newest.value()
            );
        }
    }

    Ok(())
}

fn open(path: &std::path::Path) -> Result<Database> {
    Database::open(path, Config::default())
        .with_context(|| format!("Failed to open store at {}", path.display()))
}
