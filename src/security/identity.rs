use log::debug;
use std::sync::Arc;

use crate::cache::{SessionCredential, TokenCache};
use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::User;
use crate::security::jwt::JwtManager;
use crate::store::Store;

/// A local user together with the external session they are acting under.
#[derive(Debug, Clone)]
pub struct VerifiedSession {
    pub user: User,
    pub credential: SessionCredential,
}

/// Maps bearer credentials to local users and local users to the external
/// sessions they registered.
#[derive(Clone)]
pub struct IdentityResolver {
    jwt: JwtManager,
    store: Arc<dyn Store>,
    cache: TokenCache,
}

impl IdentityResolver {
    pub fn new(jwt: JwtManager, store: Arc<dyn Store>, cache: TokenCache) -> Self {
        Self { jwt, store, cache }
    }

    pub async fn resolve(&self, bearer: &str) -> TaxResult<User> {
        let claims = self.jwt.validate_token(bearer).map_err(|e| {
            debug!("Rejected bearer token: {e}");
            TaxError::Unauthenticated("Invalid or expired token".into())
        })?;
        let user_id = claims
            .user_id()
            .map_err(|e| TaxError::Unauthenticated(e.to_string()))?;

        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| TaxError::NotFound(format!("User {user_id} not found")))
    }

    /// The cache is consulted before the user table, so a missing external
    /// session is reported even when `local_user_id` does not exist.
    pub async fn verify_pair(
        &self,
        local_user_id: i32,
        system_user_id: i64,
    ) -> TaxResult<VerifiedSession> {
        let credential = self
            .cache
            .get_credential(system_user_id)
            .await?
            .ok_or_else(|| {
                TaxError::Unauthenticated("Token not found. Please login first.".into())
            })?;

        let user = self
            .store
            .get_user(local_user_id)
            .await?
            .ok_or_else(|| TaxError::NotFound(format!("User {local_user_id} not found")))?;

        if credential.user_id != user.id {
            return Err(TaxError::Unauthorized(format!(
                "External session {system_user_id} was not registered by this user"
            )));
        }

        Ok(VerifiedSession { user, credential })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::models::{NewUser, UserRole};
    use crate::store::{MemoryStore, UserStore};
    use chrono::{Duration, Utc};

    const SECRET: &str = "identity-resolver-test-secret-with-enough-length";

    async fn setup() -> (IdentityResolver, Arc<MemoryStore>, TokenCache, User) {
        let store = Arc::new(MemoryStore::new());
        let cache = TokenCache::in_memory();
        cache.connect().await.unwrap();
        let user = store
            .create_user(NewUser {
                username: "operator".into(),
                email: "operator@example.com".into(),
                password_hash: "x".into(),
                first_name: None,
                last_name: None,
                role: UserRole::Level2.as_str().into(),
                is_admin: false,
                is_top_level_admin: false,
                first_level_channel_id: None,
                channel_id: None,
            })
            .await
            .unwrap();
        let jwt = JwtManager::from_secret(SECRET).unwrap();
        let resolver = IdentityResolver::new(jwt, store.clone(), cache.clone());
        (resolver, store, cache, user)
    }

    fn credential(system_user_id: i64, user_id: i32) -> SessionCredential {
        SessionCredential {
            token: "T1".into(),
            system_user_id,
            user_id,
            tenant_id: "tenant".into(),
            expiration_time: Utc::now() + Duration::hours(1),
            taxpayer_no: "91110000".into(),
        }
    }

    #[tokio::test]
    async fn test_resolve_valid_token() {
        let (resolver, _, _, user) = setup().await;
        let token = JwtManager::from_secret(SECRET)
            .unwrap()
            .issue_for_user(user.id, &user.username, &user.role)
            .unwrap();

        let resolved = resolver.resolve(&token.access_token).await.unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn test_resolve_garbage_is_unauthenticated() {
        let (resolver, _, _, _) = setup().await;
        let err = resolver.resolve("not.a.jwt").await.unwrap_err();
        assert!(matches!(err, TaxError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_resolve_deleted_user_is_not_found() {
        let (resolver, store, _, user) = setup().await;
        let token = JwtManager::from_secret(SECRET)
            .unwrap()
            .issue_for_user(user.id, &user.username, &user.role)
            .unwrap();
        store.delete_user(user.id).await.unwrap();

        let err = resolver.resolve(&token.access_token).await.unwrap_err();
        assert!(matches!(err, TaxError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_verify_pair_without_cache_entry() {
        let (resolver, _, _, user) = setup().await;

        let err = resolver.verify_pair(user.id, 99).await.unwrap_err();
        assert!(matches!(err, TaxError::Unauthenticated(_)));

        // Same outcome for a local id that does not exist.
        let err = resolver.verify_pair(12345, 99).await.unwrap_err();
        assert!(matches!(err, TaxError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_verify_pair_checks_owner() {
        let (resolver, _, cache, user) = setup().await;
        cache.put(&credential(42, user.id)).await.unwrap();
        cache.put(&credential(43, user.id + 100)).await.unwrap();

        let session = resolver.verify_pair(user.id, 42).await.unwrap();
        assert_eq!(session.credential.token, "T1");

        let err = resolver.verify_pair(user.id, 43).await.unwrap_err();
        assert!(matches!(err, TaxError::Unauthorized(_)));
    }
}
