/*
 * Copyright 2025 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! imghub server - runs the storage router, health probes and analysis workers

use anyhow::Context;
use clap::Parser;
use imghub::analysis::NewImage;
use imghub::{Config, ImageHub};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imghub-server")]
#[command(about = "Multi-endpoint image storage with background AI analysis")]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides `monitoring.log_level`
    #[arg(long)]
    log_level: Option<String>,

    /// Overrides `queue.concurrency`
    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    node_id: Option<String>,

    /// Ingest every file in this directory after startup
    #[arg(long)]
    ingest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        Config::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        Config::default()
    };
    if let Some(level) = args.log_level {
        config.monitoring.log_level = level;
    }
    if let Some(concurrency) = args.concurrency {
        config.queue.concurrency = concurrency;
    }
    if let Some(node_id) = args.node_id {
        config.server.node_id = node_id;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .init();

    if !args.config.exists() {
        info!("Configuration file not found, using defaults");
    }
    info!("Starting imghub server with config: {:?}", config);

    let hub = ImageHub::new(config).await?;
    if let Err(e) = hub.start() {
        error!("Failed to start imghub: {}", e);
        return Err(e.into());
    }
    info!("imghub server started successfully");

    if let Some(dir) = args.ingest.as_deref() {
        ingest_directory(&hub, dir).await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping server...");

    hub.stop().await;
    let stats = hub.queue_stats();
    info!(
        "imghub server stopped ({} succeeded, {} failed, {} retries)",
        stats.succeeded, stats.failed, stats.total_retries
    );
    Ok(())
}

async fn ingest_directory(hub: &ImageHub, dir: &Path) -> anyhow::Result<()> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading {}", dir.display()))?;

    let mut ingested = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let bytes = tokio::fs::read(&path).await?;
        match hub.ingest(&bytes, NewImage::default()).await {
            Ok(receipt) => {
                ingested += 1;
                info!(
                    "📥 {} -> {} (deduplicated: {}, tasks: {})",
                    path.display(),
                    receipt.image.id,
                    receipt.deduplicated,
                    receipt.tasks.len()
                );
            }
            Err(e) => warn!("⚠️ Skipping {}: {}", path.display(), e),
        }
    }
    info!("📥 Ingested {} files from {}", ingested, dir.display());
    Ok(())
}
