//! fsmanifest - Main entry point
//!
//! Create, update, compare and verify file tree manifests.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fsmanifest::commands::{report, ManifestTool, Source};
use fsmanifest::config::{Config, ReportFormat};
use fsmanifest::{utils, DiffEntry, Fidelity};
use std::io;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Hashing worker threads (overrides config, 0 = one per CPU)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Report format for compare and verify (overrides config)
    #[arg(long, value_enum, global = true)]
    format: Option<ReportFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan and hash a directory into a new manifest
    Create {
        directory: PathBuf,
        manifest: PathBuf,
        /// Replace the manifest if it already exists
        #[arg(long)]
        force: bool,
    },

    /// Write a new manifest, hashing only files that changed since the old one
    Update {
        directory: PathBuf,
        old_manifest: PathBuf,
        new_manifest: PathBuf,
        /// Replace the new manifest if it already exists
        #[arg(long)]
        force: bool,
    },

    /// Compare two manifests or directories
    Compare {
        /// Also compare content hashes
        #[arg(short, long)]
        strict: bool,
        a: PathBuf,
        b: PathBuf,
    },

    /// Check a directory against a manifest
    Verify {
        /// Compare size and modification time only
        #[arg(short, long)]
        quick: bool,
        directory: PathBuf,
        manifest: PathBuf,
    },

    /// Print the MD5 digest of a file
    Md5 { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config.scan.workers = workers;
    }
    if let Some(log_level) = args.log_level {
        config.log.level = log_level;
    }
    if let Some(format) = args.format {
        config.report.format = format;
    }

    // Initialize logging
    utils::logger::init(&config.log.level)?;
    tracing::debug!("fsmanifest v{} starting", env!("CARGO_PKG_VERSION"));

    let format = config.report.format;
    let tool = ManifestTool::new(config);

    match args.command {
        Command::Create {
            directory,
            manifest,
            force,
        } => {
            let summary = blocking(move || tool.create(&directory, &manifest, force)).await?;
            println!("{}", summary);
        }
        Command::Update {
            directory,
            old_manifest,
            new_manifest,
            force,
        } => {
            let summary =
                blocking(move || tool.update(&directory, &old_manifest, &new_manifest, force))
                    .await?;
            println!("{}", summary);
        }
        Command::Compare { strict, a, b } => {
            let fidelity = if strict { Fidelity::Strict } else { Fidelity::Quick };
            let entries = compare(tool, a, b, fidelity).await?;
            report::write_report(&entries, format, io::stdout().lock())?;
        }
        Command::Verify {
            quick,
            directory,
            manifest,
        } => {
            let fidelity = if quick { Fidelity::Quick } else { Fidelity::Strict };
            let entries = blocking(move || tool.verify(&directory, &manifest, fidelity)).await?;
            report::write_report(&entries, format, io::stdout().lock())?;
        }
        Command::Md5 { file } => {
            let digest = {
                let file = file.clone();
                blocking(move || tool.checksum(&file)).await?
            };
            println!("{}  {}", digest, file.display());
        }
    }

    Ok(())
}

/// Both sides load concurrently; a scanned directory never waits on the other side.
async fn compare(
    tool: ManifestTool,
    a: PathBuf,
    b: PathBuf,
    fidelity: Fidelity,
) -> Result<Vec<DiffEntry>> {
    let (before, after) = (Source::classify(&a), Source::classify(&b));
    let (before_other, after_other) = (after.clone(), before.clone());
    let (left, right) = (tool.clone(), tool);
    let (before, after) = tokio::try_join!(
        blocking(move || left.load_source(&before, &before_other, fidelity)),
        blocking(move || right.load_source(&after, &after_other, fidelity)),
    )?;
    Ok(fsmanifest::manifest::compare(&before, &after, fidelity)?)
}

/// Run a blocking command off the async runtime
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> fsmanifest::Result<T> + Send + 'static,
{
    let value = tokio::task::spawn_blocking(f)
        .await
        .context("command task panicked")??;
    Ok(value)
}
