use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::CacheBackend;
use crate::core::error::{TaxError, TaxResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local backend. Expiry is checked on read; `close` makes every
/// call fail the way an unreachable Redis would.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    connected: AtomicBool,
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_connected(&self) -> TaxResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TaxError::CacheUnavailable(
                "Cache connection is not established".into(),
            ))
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn connect(&self) -> TaxResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn ping(&self) -> TaxResult<()> {
        self.ensure_connected()
    }

    async fn get(&self, key: &str) -> TaxResult<Option<String>> {
        self.ensure_connected()?;
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_many(&self, entries: &[(String, String)], ttl_secs: Option<u64>) -> TaxResult<()> {
        self.ensure_connected()?;
        let expires_at = ttl_secs.map(|secs| Utc::now() + Duration::seconds(secs as i64));
        let mut map = self.entries.write().await;
        for (key, value) in entries {
            map.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> TaxResult<()> {
        self.ensure_connected()?;
        let mut map = self.entries.write().await;
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }
}
