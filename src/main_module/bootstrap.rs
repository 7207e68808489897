//! Bootstrap and application initialization logic

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::sync::Arc;

use crate::cache::{CacheBackend, InMemoryCacheBackend, TokenCache};
use crate::core::config::AppConfig;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{create_pool, redact_url, run_migrations};
use crate::gateway::HttpTaxGateway;
use crate::security::JwtManager;
use crate::store::PgStore;

/// `RUST_LOG` wins; otherwise `info` for everything.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

fn cache_backend(config: &AppConfig) -> Result<Arc<dyn CacheBackend>> {
    match config.cache.backend.as_str() {
        "memory" => {
            warn!("Using the in-memory credential cache; sessions are lost on restart");
            Ok(Arc::new(InMemoryCacheBackend::new()))
        }
        #[cfg(feature = "cache")]
        "redis" => {
            let backend = crate::cache::RedisCacheBackend::new(&config.cache.url)
                .map_err(|e| anyhow!(e.to_string()))?;
            Ok(Arc::new(backend))
        }
        other => Err(anyhow!("Unsupported cache backend {other:?}")),
    }
}

/// Database pool and migrations, cache connection, gateway and JWT signer.
pub async fn build_state(config: AppConfig) -> Result<AppState> {
    info!(
        "Connecting to database {}",
        redact_url(&config.database.url)
    );
    let pool = create_pool(&config.database.url, config.database.max_connections)?;
    if config.database.run_migrations {
        let migration_pool = pool.clone();
        tokio::task::spawn_blocking(move || run_migrations(&migration_pool))
            .await
            .context("Migration task panicked")?
            .map_err(|e| anyhow!("Failed to run migrations: {e}"))?;
        info!("Database migrations applied");
    }

    let cache = TokenCache::new(cache_backend(&config)?);
    cache
        .connect()
        .await
        .map_err(|e| anyhow!("Cache connection failed: {e}"))?;

    let gateway = HttpTaxGateway::new(config.gateway.clone())
        .map_err(|e| anyhow!("Failed to build gateway client: {e}"))?;
    let jwt = JwtManager::from_auth_config(&config.auth)?;
    info!("External tax API at {}", config.gateway.base_url);

    Ok(AppState::new(
        config,
        Arc::new(PgStore::new(pool)),
        cache,
        Arc::new(gateway),
        jwt,
    ))
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(
        "Starting {} {} on {}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.server.host,
        config.server.port
    );
    let state = build_state(config).await?;
    super::run_axum_server(state).await?;
    info!("Server stopped");
    Ok(())
}
