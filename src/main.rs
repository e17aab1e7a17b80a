//! `candle-gateway` server binary: loads configuration, builds the
//! [`AppContext`], starts the background ingestion/retention tasks, and
//! serves the HTTP/WebSocket boundary.
//!
//! Top-level setup/teardown uses `anyhow::Result` (matching the teacher's
//! own `main.rs`); everything below this file returns the typed
//! `CoreError`/`Result<T, CoreError>` so callers can branch on kind.

use anyhow::Context;
use candle_gateway::config::AppConfig;
use candle_gateway::context::AppContext;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Caching proxy for exchange candlestick market data.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the key=value config file.
    #[arg(short, long, default_value = "candle-gateway.conf")]
    config: String,

    /// Directory of static dashboard files served at `/`.
    #[arg(long, default_value = "./web")]
    static_dir: String,

    /// Overrides `db.path` from the config file.
    #[arg(long)]
    db_path: Option<String>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(&args.config);
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    tracing::info!(host = %config.server_host, port = config.server_port, db = %config.db_path, "starting candle-gateway");

    let ctx = Arc::new(AppContext::build(config).context("failed to build application context")?);
    ctx.spawn_background_tasks()
        .context("failed to start background tasks")?;

    candle_gateway::web::run(ctx, &args.static_dir)
        .await
        .context("http server exited with an error")
}
