//! catbox_json - cache file inspector
//!
//! Starts the engine against a cache file, which restores it and evicts every
//! entry that expired while nothing was running, prints the resulting
//! statistics as JSON, then stops the engine so the file is rewritten without
//! the expired entries.
//!
//! Configuration comes from `CATBOX_*` environment variables; an optional
//! first argument overrides the cache file path.

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catbox_json::{Config, Connection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catbox_json=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env().context("invalid CATBOX_* configuration")?;
    if let Some(path) = std::env::args_os().nth(1) {
        config.cache_file = PathBuf::from(path);
    }
    info!(
        "Configuration loaded: cache_file={}, max_byte_size={}, save_debounce={}ms",
        config.cache_file.display(),
        config.max_byte_size,
        config.save_debounce.as_millis()
    );

    let connection = Connection::new(config).context("failed to create connection")?;
    connection
        .start()
        .await
        .context("failed to restore cache file")?;

    let stats = connection.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    connection
        .stop()
        .await
        .context("failed to write cache file")?;

    info!("Inspection complete");
    Ok(())
}
