use std::sync::Arc;

use crate::cache::TokenCache;
use crate::core::config::AppConfig;
use crate::gateway::TaxGateway;
use crate::reports::{ReportOrchestrator, RetryPolicy};
use crate::security::{IdentityResolver, JwtManager};
use crate::store::Store;

/// Shared handles for every request. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub cache: TokenCache,
    pub gateway: Arc<dyn TaxGateway>,
    pub jwt: JwtManager,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        cache: TokenCache,
        gateway: Arc<dyn TaxGateway>,
        jwt: JwtManager,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            cache,
            gateway,
            jwt,
        }
    }

    pub fn identity(&self) -> IdentityResolver {
        IdentityResolver::new(self.jwt.clone(), self.store.clone(), self.cache.clone())
    }

    pub fn orchestrator(&self) -> ReportOrchestrator {
        ReportOrchestrator::new(
            self.store.clone(),
            self.cache.clone(),
            self.gateway.clone(),
            self.identity(),
            self.config.billing.clone(),
            RetryPolicy::from_config(&self.config.gateway),
        )
    }
}
