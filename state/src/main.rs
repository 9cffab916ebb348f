//! `state-replay`: feed a recorded gateway stream through the tracker.
//!
//! Input is JSON lines, one `{"shard": n, "event": {...}}` object per line,
//! read from a file or stdin. The GC loop runs while the stream is replayed;
//! per-shard stats are logged at the end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use guild_state::config::StateConfig;
use guild_state::engine::events::GatewayEvent;
use guild_state::InMemoryTracker;

#[derive(Parser, Debug)]
#[command(name = "state-replay", version, about = "Replay a gateway event stream into the state tracker")]
struct Args {
    /// Event stream to replay. Reads stdin when omitted.
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", default_value = "guild-state.toml")]
    config: PathBuf,

    /// Override the configured shard count
    #[arg(short = 's', long)]
    shards: Option<usize>,

    /// Keep the GC loop running this long after the input is exhausted
    #[arg(long, value_name = "MS", default_value_t = 0)]
    linger_ms: u64,
}

#[derive(Deserialize)]
struct ReplayLine {
    #[serde(default)]
    shard: usize,
    event: GatewayEvent,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = StateConfig::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;
    let total_shards = args.shards.unwrap_or(config.tracker.total_shards);
    anyhow::ensure!(total_shards > 0, "shard count must be at least 1");

    let tracker = Arc::new(InMemoryTracker::new(
        config.to_tracker_config(),
        total_shards,
    ));
    let gc_tasks = tracker.run_gc_loop(config.gc_interval());

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    info!(shards = total_shards, "Replaying events");

    let mut lines = reader.lines();
    let mut line_no = 0usize;
    let mut applied = 0usize;
    let mut skipped = 0usize;

    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ReplayLine>(&line) {
            Ok(entry) if entry.shard < total_shards => {
                if let Some(owner) = tracker.owning_shard(&entry.event)
                    && owner != entry.shard
                {
                    warn!(
                        line = line_no,
                        shard = entry.shard,
                        owner,
                        "Event recorded on a shard that does not own its guild"
                    );
                }
                tracker.handle_event(entry.shard, &entry.event);
                applied += 1;
            }
            Ok(entry) => {
                warn!(line = line_no, shard = entry.shard, "Shard out of range, skipping");
                skipped += 1;
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "Undecodable event, skipping");
                skipped += 1;
            }
        }
    }

    if args.linger_ms > 0 {
        tokio::time::sleep(Duration::from_millis(args.linger_ms)).await;
    }
    for task in &gc_tasks {
        task.abort();
    }

    info!(applied, skipped, "Replay finished");
    for shard_id in 0..total_shards {
        let stats = tracker.shard_stats(shard_id);
        info!(
            shard = shard_id,
            guilds = stats.guilds,
            members = stats.members,
            messages = stats.messages,
            "Shard stats"
        );
    }

    Ok(())
}
