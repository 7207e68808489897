//! HTTP server initialization and routing

use axum::{middleware, routing::get, Router};
use log::{error, info};
use std::net::SocketAddr;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;

use crate::core::shared::state::AppState;
use crate::security::{cookie_to_bearer, create_cors_layer};
use crate::{accounts, admin, channels, reports};

use super::{health_check, shutdown_signal, test_cache};

/// Every route with its middleware, ready to serve or to drive with `oneshot`.
pub fn build_router(state: AppState) -> Router {
    let cors = create_cors_layer(&state.config.server.cors_allowed_origins);
    let max_upload_bytes = state.config.server.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/test-cache", get(test_cache))
        .merge(accounts::configure())
        .merge(reports::configure(max_upload_bytes))
        .merge(channels::configure())
        .merge(admin::configure())
        .with_state(state)
        // Last added runs first: cookies are parsed before the bearer shim reads them
        .layer(middleware::from_fn(cookie_to_bearer))
        .layer(CookieManagerLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_axum_server(state: AppState) -> std::io::Result<()> {
    let host: std::net::IpAddr = state
        .config
        .server
        .host
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let addr = SocketAddr::from((host, state.config.server.port));
    let cache = state.cache.clone();
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {addr}: {e} - is another instance running?");
            return Err(e);
        }
    };
    info!("HTTP server listening on {addr}");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Closing cache connection");
    cache.close().await;
    served
}
