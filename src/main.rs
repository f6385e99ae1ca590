// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! gridstore — versioned blob bucket CLI
//!
//! Usage:
//!   gridstore --config gridstore.toml put report.pdf            # new revision
//!   gridstore --config gridstore.toml get report.pdf -o out.pdf # latest revision
//!   gridstore --config gridstore.toml ls --name report.pdf      # all revisions
//!   gridstore --config gridstore.toml rm <blob-id>

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gridstore::config::Config;
use gridstore::{FileFilter, FsAdapter, Payload, SaveMeta, StoreError};

#[derive(Parser)]
#[command(name = "gridstore", about = "Versioned chunked blob storage", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gridstore.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file as a new revision.
    Put {
        file: PathBuf,
        /// Logical filename; defaults to the file's name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Download the latest revision of a filename.
    Get {
        name: String,
        /// Write to this path instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List revisions, latest first.
    Ls {
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete one revision by blob id.
    Rm { id: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = match Config::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    };

    let mut adapter = FsAdapter::from_config(&cfg.store);
    if let Err(e) = adapter.connect().await {
        error!(error = %e, uri = cfg.store.uri, "Failed to connect blob store");
        std::process::exit(1);
    }

    // CTRL+C releases in-flight transfers instead of killing them mid-write.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received CTRL+C, cancelling transfer…");
            trigger.cancel();
        }
    });

    let result = match cli.command {
        Command::Put { file, name, content_type } => run_put(&adapter, file, name, content_type, &cancel).await,
        Command::Get { name, output } => run_get(&adapter, &name, output, &cancel).await,
        Command::Ls { name } => run_ls(&adapter, name).await,
        Command::Rm { id } => run_rm(&adapter, &id).await,
    };

    let _ = adapter.disconnect().await;
    if let Err(e) = result {
        error!(error = %e, code = e.code(), "Command failed");
        std::process::exit(1);
    }
}

async fn run_put(
    adapter: &FsAdapter,
    file: PathBuf,
    name: Option<String>,
    content_type: Option<String>,
    cancel: &CancellationToken,
) -> Result<(), StoreError> {
    let name = name
        .or_else(|| file.file_name().map(|n| n.to_string_lossy().into_owned()))
        .ok_or_else(|| StoreError::BadRequest(format!("Cannot derive a filename from {file:?}")))?;
    let source = tokio::fs::File::open(&file).await?;

    let mut meta = SaveMeta::named(name);
    meta.content_type = content_type;
    let receipt = adapter.save_with_cancel(Payload::from_reader(source), meta, cancel).await?;

    println!(
        "{}  {}  v{}  {} bytes  {}",
        receipt.blob_id, receipt.filename, receipt.version, receipt.length, receipt.content_type
    );
    Ok(())
}

async fn run_get(
    adapter: &FsAdapter,
    name: &str,
    output: Option<PathBuf>,
    cancel: &CancellationToken,
) -> Result<(), StoreError> {
    let mut stream = adapter.find_by_id_with_cancel(name, cancel).await?;
    let mut out: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match &output {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    let mut total: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        out.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    out.flush().await?;

    info!(
        filename = name,
        version = %stream.record().metadata.version,
        bytes = total,
        output = ?output,
        "Download complete"
    );
    Ok(())
}

async fn run_ls(adapter: &FsAdapter, name: Option<String>) -> Result<(), StoreError> {
    let filter = match name {
        Some(n) => FileFilter::by_filename(n),
        None => FileFilter::new(),
    };
    let records = adapter.find(&filter).await?;

    println!("=== Bucket '{}' ({} records) ===", adapter.bucket_name(), records.len());
    for r in &records {
        println!(
            "{}  {:<32}  v{:<4}  {:>10} bytes  {:<24}  {}",
            r.blob_id,
            r.filename,
            r.metadata.version.get(),
            r.length,
            r.content_type,
            r.uploaded_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn run_rm(adapter: &FsAdapter, id: &str) -> Result<(), StoreError> {
    let removed = adapter.remove_by_id(id).await?;
    println!("removed {removed}");
    Ok(())
}
