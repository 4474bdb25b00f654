#![warn(missing_docs)]

//! `spool-inspect`: lists and decodes batch files on disk.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eventspool_storage::batch_codec::{decode_events, BatchFileReaderWriter};
use eventspool_storage::{BatchFile, FilePersistenceConfig, PlainBatchFileReaderWriter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "spool-inspect")]
#[command(about = "Inspect eventspool batch directories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List batch files of a consent root, oldest first.
    List {
        root: PathBuf,
    },
    /// Decode one batch file.
    Decode {
        file: PathBuf,
        /// Print payloads as text instead of sizes only.
        #[arg(long)]
        show_payload: bool,
    },
    /// Validate a persistence config file.
    CheckConfig {
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::List { root } => list(&root),
        Command::Decode { file, show_payload } => decode(&file, show_payload),
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn list(root: &Path) -> Result<()> {
    let mut batches: Vec<BatchFile> = std::fs::read_dir(root)
        .with_context(|| format!("reading {}", root.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| BatchFile::from_path(entry.path()))
        .collect();
    batches.sort_by(|a, b| a.id.cmp(&b.id));

    println!("{:<16} {:>10} {:>8} {:>9}", "batch", "bytes", "events", "metadata");
    for batch in batches {
        let bytes = std::fs::read(&batch.path)
            .with_context(|| format!("reading {}", batch.path.display()))?;
        let decoded = decode_events(&bytes);
        println!(
            "{:<16} {:>10} {:>8} {:>9}{}",
            batch.id,
            bytes.len(),
            decoded.events.len(),
            if batch.metadata_path().exists() { "yes" } else { "no" },
            if decoded.complete { "" } else { "  (corrupt tail)" }
        );
    }
    Ok(())
}

fn decode(file: &Path, show_payload: bool) -> Result<()> {
    if BatchFile::from_path(file.to_path_buf()).is_none() {
        bail!("{} is not a batch file name", file.display());
    }
    let events = PlainBatchFileReaderWriter.read_events(file);
    for (index, event) in events.iter().enumerate() {
        if show_payload {
            println!("{:>5} {}", index, String::from_utf8_lossy(&event.data));
        } else {
            println!(
                "{:>5} data={}B metadata={}B",
                index,
                event.data.len(),
                event.metadata.len()
            );
        }
    }
    tracing::info!(events = events.len(), "decoded batch");
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    // from_file rejects invalid limits.
    let config = FilePersistenceConfig::from_file(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
