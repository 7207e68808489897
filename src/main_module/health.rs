//! Health and cache connectivity checks

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use log::warn;
use serde_json::{json, Value};

use crate::core::shared::state::AppState;
use crate::store::UserStore;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = match state.store.count_users().await {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check: database unavailable: {e}");
            false
        }
    };
    let cache_ok = match state.cache.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check: cache unavailable: {e}");
            false
        }
    };

    let healthy = db_ok && cache_ok;
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "database": db_ok,
            "cache": cache_ok,
        })),
    )
}

pub async fn test_cache(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.cache.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "message": "Cache connection is working" })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "message": e.message() })),
        ),
    }
}
