//! Skiff daemon - content pipeline control plane.
//!
//! Routes curated resource records to delivery backends and can install
//! an authorized newer version of itself.

use anyhow::Result;
use skiff_common::SkiffConfig;
use skiffd::organize::QueueOrganizer;
use skiffd::server::{self, AppState};
use skiffd::store::SqliteStore;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skiffd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Skiff daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = SkiffConfig::load();
    if config.ensure_device_token() {
        if let Err(e) = config.save() {
            warn!("Failed to persist generated device token: {e}");
        }
    }

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let organizer = Arc::new(QueueOrganizer::spawn());
    let state = AppState::new(config, store, organizer);

    info!("Skiff daemon ready");
    server::run(state).await
}
