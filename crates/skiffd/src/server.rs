//! HTTP server for skiffd

use crate::organize::Organizer;
use crate::routes;
use crate::store::ResourceStore;
use anyhow::Result;
use axum::Router;
use skiff_common::SkiffConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    /// Live configuration; handlers take a cloned snapshot per request
    /// and writers replace the whole value.
    pub config: Arc<RwLock<SkiffConfig>>,
    pub store: Arc<dyn ResourceStore>,
    pub organizer: Arc<dyn Organizer>,
    /// Serializes online-update attempts; a failed try_lock means one is
    /// already in flight.
    pub update_lock: Mutex<()>,
    /// Pending restart task after a successful install, abortable until
    /// the exec delay elapses.
    pub restart_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: SkiffConfig,
        store: Arc<dyn ResourceStore>,
        organizer: Arc<dyn Organizer>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            store,
            organizer,
            update_lock: Mutex::new(()),
            restart_task: std::sync::Mutex::new(None),
            start_time: Instant::now(),
        }
    }
}

/// Run the HTTP server
pub async fn run(state: AppState) -> Result<()> {
    let addr = state.config.read().await.server.listen_addr.clone();
    let state = Arc::new(state);

    let app = Router::new()
        .merge(routes::push_routes())
        .merge(routes::resource_routes())
        .merge(routes::system_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // Loopback by default; the API exposes credentials and config.
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("  Listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
