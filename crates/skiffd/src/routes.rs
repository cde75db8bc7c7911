//! API routes for skiffd
//!
//! The dispatch and update endpoints answer `{success, ..., msg}` with an
//! HTTP 200 even on failure, carrying a stable error code where one
//! exists; the CLI branches on the body, not the status line.

use crate::delivery::{DriveBackend, StreamBackend};
use crate::dispatch::Dispatcher;
use crate::organize::organize_items;
use crate::server::AppState;
use crate::store::PAGE_SIZE;
use crate::update::{schedule_restart, HttpSource, Updater};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use skiff_common::api::{
    AckResponse, DeleteRequest, HealthResponse, ListQuery, ListResponse, OrganizeRequest,
    PushRequest, PushResponse, StatusResponse, UpdateResponse,
};
use skiff_common::SkiffError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

type AppStateArc = Arc<AppState>;

const RUNNING_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Push Routes
// ============================================================================

pub fn push_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/push", post(push_resources))
        .route("/organize", post(organize_resources))
}

async fn push_resources(
    State(state): State<AppStateArc>,
    Json(req): Json<PushRequest>,
) -> Json<PushResponse> {
    info!("  Push request: {} ids (organize: {})", req.ids.len(), req.organize);

    let config = state.config.read().await.clone();

    let items = match state.store.get_by_ids(&req.ids) {
        Ok(items) => items,
        Err(e) => return Json(push_error(e)),
    };

    let drive = match DriveBackend::from_settings(&config.delivery) {
        Ok(backend) => backend,
        Err(e) => return Json(push_error(e)),
    };
    let stream = match StreamBackend::from_settings(&config.delivery) {
        Ok(backend) => backend,
        Err(e) => return Json(push_error(e)),
    };

    let dispatcher = Dispatcher::new(
        state.store.clone(),
        Duration::from_millis(config.delivery.push_delay_ms),
    );
    let outcome = dispatcher
        .dispatch(&items, &drive, &stream, req.organize, state.organizer.as_ref())
        .await;

    if let Some(e) = &outcome.aborted {
        error!("  Push batch aborted: {e}");
    }
    Json(PushResponse {
        success: outcome.success(),
        count: outcome.pushed,
        msg: outcome.message(req.organize),
    })
}

fn push_error(e: SkiffError) -> PushResponse {
    PushResponse {
        success: false,
        count: 0,
        msg: e.to_string(),
    }
}

async fn organize_resources(
    State(state): State<AppStateArc>,
    Json(req): Json<OrganizeRequest>,
) -> Json<PushResponse> {
    let items = match state.store.get_by_ids(&req.ids) {
        Ok(items) => items,
        Err(e) => return Json(push_error(e)),
    };

    let count = organize_items(&items, state.organizer.as_ref());
    info!("  Queued {} of {} resources for organize", count, items.len());
    Json(PushResponse {
        success: true,
        count,
        msg: format!("queued {count} resources for organize"),
    })
}

// ============================================================================
// Resource Routes
// ============================================================================

pub fn resource_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/data", get(list_resources))
        .route("/delete", post(delete_resources))
        .route("/export", get(export_resources))
}

async fn list_resources(
    State(state): State<AppStateArc>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, (StatusCode, String)> {
    let (data, total) = state
        .store
        .list(&query)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(ListResponse {
        success: true,
        data,
        total,
        page: query.page.unwrap_or(1).max(1),
        page_size: PAGE_SIZE,
    }))
}

async fn delete_resources(
    State(state): State<AppStateArc>,
    Json(req): Json<DeleteRequest>,
) -> Json<AckResponse> {
    match state.store.delete_by_ids(&req.ids) {
        Ok(deleted) => {
            info!("  Deleted {} resources", deleted);
            Json(AckResponse {
                success: true,
                msg: Some(format!("deleted {deleted} resources")),
            })
        }
        Err(e) => Json(AckResponse::err(e.to_string())),
    }
}

async fn export_resources(
    State(state): State<AppStateArc>,
) -> Result<Response, (StatusCode, String)> {
    let items = state
        .store
        .all_for_export()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["id", "code", "title", "magnet", "created_at"])
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    for item in &items {
        writer
            .write_record([
                item.id.to_string(),
                item.code.clone().unwrap_or_default(),
                item.title.clone().unwrap_or_default(),
                item.magnet.clone().unwrap_or_default(),
                item.created_at.to_rfc3339(),
            ])
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }
    let data = writer
        .into_inner()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"resources.csv\"",
            ),
        ],
        data,
    )
        .into_response())
}

// ============================================================================
// System Routes
// ============================================================================

pub fn system_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/system/online-update", post(online_update))
        .route("/status", get(status))
        .route("/config", post(replace_config))
}

async fn online_update(State(state): State<AppStateArc>) -> Json<UpdateResponse> {
    // Single flight: overlapping update attempts are rejected, not queued.
    let Ok(_guard) = state.update_lock.try_lock() else {
        return Json(UpdateResponse {
            success: false,
            msg: "update already in progress".to_string(),
            code: None,
        });
    };

    let config = state.config.read().await.clone();
    let Some(token) = config.device_token().map(String::from) else {
        return Json(update_error(SkiffError::AuthorizationDenied(
            "(none)".to_string(),
        )));
    };

    let source = match HttpSource::from_config(&config.update, config.proxy.as_deref()) {
        Ok(source) => source,
        Err(e) => return Json(update_error(e)),
    };
    let updater = Updater::new(
        source,
        config.update.clone(),
        token,
        RUNNING_VERSION.to_string(),
    );

    match updater.run().await {
        Ok(outcome) => {
            info!("✅  Update {} installed, scheduling restart", outcome.version);
            let mut slot = state
                .restart_task
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // A live pending restart stays; a finished one (the script
            // failed to launch) is replaced.
            if slot.as_ref().map_or(true, |task| task.is_finished()) {
                *slot = Some(schedule_restart(&config.update));
            }
            Json(UpdateResponse {
                success: true,
                msg: format!("updating to {}, daemon will restart", outcome.version),
                code: None,
            })
        }
        Err(e) => {
            error!("  Update failed: {e}");
            Json(update_error(e))
        }
    }
}

fn update_error(e: SkiffError) -> UpdateResponse {
    UpdateResponse {
        success: false,
        code: Some(e.code()),
        msg: e.to_string(),
    }
}

async fn status(State(state): State<AppStateArc>) -> Json<StatusResponse> {
    let config = state.config.read().await.clone();
    Json(StatusResponse {
        version: RUNNING_VERSION.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        device_token: config.device_token().map(String::from),
        config,
    })
}

async fn replace_config(
    State(state): State<AppStateArc>,
    Json(patch): Json<serde_json::Value>,
) -> Json<AckResponse> {
    let current = state.config.read().await.clone();
    let merged = match current.merged_with(&patch) {
        Ok(merged) => merged,
        Err(e) => return Json(AckResponse::err(format!("invalid config patch: {e}"))),
    };

    // Persist first; the running config only changes once the file did.
    if let Err(e) = merged.save() {
        return Json(AckResponse::err(format!("failed to persist config: {e}")));
    }
    *state.config.write().await = merged;
    info!("  Configuration replaced and saved");
    Json(AckResponse::ok())
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: RUNNING_VERSION.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
