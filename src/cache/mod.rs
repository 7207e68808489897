//! External-session credential cache.
//!
//! [`TokenCache`] owns the key layout and TTL rules; the storage itself is a
//! [`CacheBackend`] with an explicit connect/close lifecycle so tests can run
//! against [`InMemoryCacheBackend`] instead of Redis.

mod memory;
#[cfg(feature = "cache")]
mod redis_backend;

pub use memory::InMemoryCacheBackend;
#[cfg(feature = "cache")]
pub use redis_backend::RedisCacheBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::utils::token_preview;

pub const TOKEN_KEY_PREFIX: &str = "yas_token:";
pub const TOKEN_INDEX_KEY_PREFIX: &str = "yas_token_index:";
pub const REGISTRATION_KEY_PREFIX: &str = "yas_registration:";
pub const UPLOAD_PARAMS_KEY_PREFIX: &str = "upload_params:";

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn connect(&self) -> TaxResult<()>;

    async fn close(&self);

    /// Fails with `CacheUnavailable` when the backend cannot be reached,
    /// including when `connect` was never called.
    async fn ping(&self) -> TaxResult<()>;

    async fn get(&self, key: &str) -> TaxResult<Option<String>>;

    /// Writes every entry in one atomic step. `ttl_secs = None` keeps them forever.
    async fn set_many(&self, entries: &[(String, String)], ttl_secs: Option<u64>) -> TaxResult<()>;

    async fn delete(&self, keys: &[String]) -> TaxResult<()>;
}

/// Session credential issued by the external system at tenant registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    pub token: String,
    pub system_user_id: i64,
    /// Local user that performed the registration.
    pub user_id: i32,
    pub tenant_id: String,
    pub expiration_time: DateTime<Utc>,
    pub taxpayer_no: String,
}

/// Company classification captured at registration, reused for uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationMetadata {
    pub company_name: String,
    pub industry: String,
    pub registration_type: String,
    pub taxpayer_nature: String,
    pub index_standard_type: String,
    pub taxpayer_no: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    pub date_source: i32,
    pub date_type: i32,
    pub year: i32,
    pub timestamp: DateTime<Utc>,
}

fn token_key(system_user_id: i64) -> String {
    format!("{TOKEN_KEY_PREFIX}{system_user_id}")
}

fn token_index_key(token: &str) -> String {
    format!("{TOKEN_INDEX_KEY_PREFIX}{token}")
}

fn registration_key(system_user_id: i64) -> String {
    format!("{REGISTRATION_KEY_PREFIX}{system_user_id}")
}

fn upload_params_key(user_id: i32) -> String {
    format!("{UPLOAD_PARAMS_KEY_PREFIX}{user_id}")
}

/// Whole seconds until `expiry`; an expiry in the past or under a second away is rejected.
pub fn ttl_until(expiry: DateTime<Utc>, now: DateTime<Utc>) -> TaxResult<u64> {
    let secs = (expiry - now).num_seconds();
    if secs <= 0 {
        return Err(TaxError::ExpiredCredential(format!(
            "Credential expired at {expiry}"
        )));
    }
    Ok(secs as u64)
}

#[derive(Clone)]
pub struct TokenCache {
    backend: Arc<dyn CacheBackend>,
}

impl TokenCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCacheBackend::new()))
    }

    pub async fn connect(&self) -> TaxResult<()> {
        self.backend.connect().await
    }

    pub async fn close(&self) {
        self.backend.close().await
    }

    pub async fn ping(&self) -> TaxResult<()> {
        self.backend.ping().await
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> TaxResult<Option<T>> {
        match self.backend.get(key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!("Discarding unreadable cache entry {key}: {e}");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Stores the credential under its external user id, plus the token
    /// index entry, both expiring at the credential's expiration time.
    pub async fn put(&self, credential: &SessionCredential) -> TaxResult<()> {
        self.backend.ping().await?;
        let ttl = ttl_until(credential.expiration_time, Utc::now())?;

        let key = token_key(credential.system_user_id);
        if let Some(previous) = self.read_json::<SessionCredential>(&key).await? {
            if previous.token != credential.token {
                self.backend.delete(&[token_index_key(&previous.token)]).await?;
            }
        }

        let entries = vec![
            (key, serde_json::to_string(credential)?),
            (
                token_index_key(&credential.token),
                credential.system_user_id.to_string(),
            ),
        ];
        self.backend.set_many(&entries, Some(ttl)).await?;
        info!(
            "Cached session token {} for system user {} (ttl {ttl}s)",
            token_preview(&credential.token),
            credential.system_user_id
        );
        Ok(())
    }

    pub async fn get_credential(&self, system_user_id: i64) -> TaxResult<Option<SessionCredential>> {
        self.backend.ping().await?;
        self.read_json(&token_key(system_user_id)).await
    }

    pub async fn get(&self, system_user_id: i64) -> TaxResult<Option<String>> {
        Ok(self
            .get_credential(system_user_id)
            .await?
            .map(|credential| credential.token))
    }

    pub async fn get_taxpayer_number(&self, system_user_id: i64) -> TaxResult<Option<String>> {
        Ok(self
            .get_credential(system_user_id)
            .await?
            .map(|credential| credential.taxpayer_no)
            .filter(|tin| !tin.is_empty()))
    }

    /// Removes the credential and its token index entry. Returns whether a record existed.
    pub async fn invalidate(&self, system_user_id: i64) -> TaxResult<bool> {
        self.backend.ping().await?;
        let key = token_key(system_user_id);
        let existing = self.read_json::<SessionCredential>(&key).await?;
        let mut keys = vec![key];
        if let Some(ref credential) = existing {
            keys.push(token_index_key(&credential.token));
        }
        self.backend.delete(&keys).await?;
        debug!("Invalidated cached credential for system user {system_user_id}");
        Ok(existing.is_some())
    }

    pub async fn find_by_token(&self, token: &str) -> TaxResult<Option<SessionCredential>> {
        self.backend.ping().await?;
        let Some(raw_id) = self.backend.get(&token_index_key(token)).await? else {
            return Ok(None);
        };
        let Ok(system_user_id) = raw_id.parse::<i64>() else {
            warn!("Token index entry holds a non-numeric id: {raw_id}");
            return Ok(None);
        };
        Ok(self
            .read_json::<SessionCredential>(&token_key(system_user_id))
            .await?
            .filter(|credential| credential.token == token))
    }

    pub async fn put_registration(
        &self,
        system_user_id: i64,
        metadata: &RegistrationMetadata,
        expiry: DateTime<Utc>,
    ) -> TaxResult<()> {
        self.backend.ping().await?;
        let ttl = ttl_until(expiry, Utc::now())?;
        let entries = vec![(
            registration_key(system_user_id),
            serde_json::to_string(metadata)?,
        )];
        self.backend.set_many(&entries, Some(ttl)).await
    }

    pub async fn get_registration(
        &self,
        system_user_id: i64,
    ) -> TaxResult<Option<RegistrationMetadata>> {
        self.backend.ping().await?;
        self.read_json(&registration_key(system_user_id)).await
    }

    pub async fn put_upload_params(&self, user_id: i32, params: &UploadParams) -> TaxResult<()> {
        self.backend.ping().await?;
        let entries = vec![(upload_params_key(user_id), serde_json::to_string(params)?)];
        self.backend.set_many(&entries, None).await
    }

    pub async fn get_upload_params(&self, user_id: i32) -> TaxResult<Option<UploadParams>> {
        self.backend.ping().await?;
        self.read_json(&upload_params_key(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn credential(system_user_id: i64, token: &str, expires_in: Duration) -> SessionCredential {
        SessionCredential {
            token: token.into(),
            system_user_id,
            user_id: 7,
            tenant_id: "tenant-1".into(),
            expiration_time: Utc::now() + expires_in,
            taxpayer_no: "91110000".into(),
        }
    }

    async fn connected_cache() -> TokenCache {
        let cache = TokenCache::in_memory();
        cache.connect().await.unwrap();
        cache
    }

    #[test]
    fn test_ttl_until() {
        let now = Utc::now();
        assert_eq!(ttl_until(now + Duration::seconds(90), now).unwrap(), 90);
        assert!(matches!(
            ttl_until(now, now),
            Err(TaxError::ExpiredCredential(_))
        ));
        assert!(ttl_until(now - Duration::hours(1), now).is_err());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = connected_cache().await;
        cache
            .put(&credential(42, "T1", Duration::hours(2)))
            .await
            .unwrap();

        assert_eq!(cache.get(42).await.unwrap().as_deref(), Some("T1"));
        assert_eq!(
            cache.get_taxpayer_number(42).await.unwrap().as_deref(),
            Some("91110000")
        );
        assert_eq!(cache.get(43).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_credential_is_not_stored() {
        let cache = connected_cache().await;
        let err = cache
            .put(&credential(42, "T1", Duration::seconds(-5)))
            .await
            .unwrap_err();
        assert!(matches!(err, TaxError::ExpiredCredential(_)));
        assert_eq!(cache.get(42).await.unwrap(), None);
        assert_eq!(cache.find_by_token("T1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_removes_index() {
        let cache = connected_cache().await;
        cache
            .put(&credential(42, "T1", Duration::hours(1)))
            .await
            .unwrap();
        assert!(cache.find_by_token("T1").await.unwrap().is_some());

        assert!(cache.invalidate(42).await.unwrap());
        assert_eq!(cache.get(42).await.unwrap(), None);
        assert_eq!(cache.find_by_token("T1").await.unwrap(), None);
        assert!(!cache.invalidate(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_reissued_token_drops_old_index() {
        let cache = connected_cache().await;
        cache
            .put(&credential(42, "T1", Duration::hours(1)))
            .await
            .unwrap();
        cache
            .put(&credential(42, "T2", Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(cache.find_by_token("T1").await.unwrap(), None);
        let found = cache.find_by_token("T2").await.unwrap().unwrap();
        assert_eq!(found.system_user_id, 42);
    }

    #[tokio::test]
    async fn test_unconnected_cache_fails_closed() {
        let cache = TokenCache::in_memory();
        let err = cache.get(42).await.unwrap_err();
        assert!(matches!(err, TaxError::CacheUnavailable(_)));

        cache.connect().await.unwrap();
        assert!(cache.get(42).await.is_ok());

        cache.close().await;
        assert!(matches!(
            cache.find_by_token("T1").await,
            Err(TaxError::CacheUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_params_round_trip() {
        let cache = connected_cache().await;
        let params = UploadParams {
            date_source: 1,
            date_type: 2,
            year: 2024,
            timestamp: Utc::now(),
        };
        cache.put_upload_params(7, &params).await.unwrap();
        assert_eq!(cache.get_upload_params(7).await.unwrap(), Some(params));
        assert_eq!(cache.get_upload_params(8).await.unwrap(), None);
    }

    #[test]
    fn test_credential_wire_names() {
        let json = serde_json::to_value(credential(42, "T1", Duration::hours(1))).unwrap();
        assert_eq!(json["systemUserId"], 42);
        assert_eq!(json["taxpayerNo"], "91110000");
        assert!(json.get("expirationTime").is_some());
    }
}
