use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use fileq::lock::read_lock_owner;
use fileq::{FileQueue, LockConfig, Message, StoreConfig};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "fileq", version, about = "File-backed message queue tooling")]
struct Cli {
    #[arg(long = "root")]
    root: PathBuf,
    #[arg(long = "visibility-timeout-ms", default_value_t = 30_000)]
    visibility_timeout_ms: u64,
    #[arg(long = "lock-timeout-ms")]
    lock_timeout_ms: Option<u64>,
    #[arg(long = "no-fsync")]
    no_fsync: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append a message; `-` reads the body from stdin.
    Push { queue: String, body: String },
    /// Lease the next visible message and print it as JSON.
    Pull { queue: String },
    /// Delete a leased message by receipt handle.
    Delete { queue: String, receipt_handle: String },
    Stats { queue: String },
    List,
}

#[derive(Serialize)]
struct PulledMessage {
    receipt_handle: String,
    attempts: u32,
    visible_from: u64,
    body: String,
    // Set when the body is not UTF-8; `body` then holds base64.
    body_base64: bool,
}

impl From<Message> for PulledMessage {
    fn from(message: Message) -> Self {
        let receipt_handle = message
            .receipt_handle()
            .map(ToString::to_string)
            .unwrap_or_default();
        let attempts = message.attempts();
        let visible_from = message.visible_from();
        let (body, body_base64) = match String::from_utf8(message.into_body()) {
            Ok(body) => (body, false),
            Err(err) => (STANDARD.encode(err.into_bytes()), true),
        };
        Self {
            receipt_handle,
            attempts,
            visible_from,
            body,
            body_base64,
        }
    }
}

#[derive(Serialize)]
struct StatsReport {
    queue: String,
    directory: PathBuf,
    pending: u64,
    in_flight: u64,
    locked_by_pid: Option<u32>,
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let lock = match cli.lock_timeout_ms {
        Some(ms) => LockConfig::bounded(Duration::from_millis(ms)),
        None => LockConfig::default(),
    };
    let mut config = StoreConfig::new(&cli.root)
        .with_visibility_timeout(Duration::from_millis(cli.visibility_timeout_ms))
        .with_lock(lock);
    if cli.no_fsync {
        config = config.unsynced();
    }
    let queue = FileQueue::open(config)
        .with_context(|| format!("opening queue root {}", cli.root.display()))?;

    let mut out = io::BufWriter::new(io::stdout());
    match cli.command {
        Commands::Push { queue: name, body } => {
            let body = if body == "-" {
                let mut buf = Vec::new();
                io::stdin().read_to_end(&mut buf).context("reading body from stdin")?;
                buf
            } else {
                body.into_bytes()
            };
            queue.push(&name, body)?;
        }
        Commands::Pull { queue: name } => {
            if let Some(message) = queue.pull(&name)? {
                serde_json::to_writer(&mut out, &PulledMessage::from(message))?;
                writeln!(out)?;
            }
        }
        Commands::Delete {
            queue: name,
            receipt_handle,
        } => queue.delete(&name, &receipt_handle)?,
        Commands::Stats { queue: name } => {
            let stats = queue.stats(&name)?;
            let directory = queue.queue_dir(&name);
            let owner = read_lock_owner(&directory.join(fileq::layout::LOCK_DIR))?;
            let report = StatsReport {
                queue: name,
                directory,
                pending: stats.pending,
                in_flight: stats.in_flight,
                locked_by_pid: owner.map(|owner| owner.pid),
            };
            serde_json::to_writer_pretty(&mut out, &report)?;
            writeln!(out)?;
        }
        Commands::List => {
            for name in queue.list_queues()? {
                writeln!(out, "{name}")?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
