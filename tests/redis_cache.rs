#![cfg(feature = "cache")]

use chrono::{Duration, Utc};
use std::sync::Arc;

use taxgate::cache::{RedisCacheBackend, SessionCredential, TokenCache};

#[tokio::test]
async fn test_credential_round_trip_against_redis() {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());
    let backend = match RedisCacheBackend::new(&redis_url) {
        Ok(backend) => backend,
        Err(_) => {
            println!("Skipping test - invalid Redis URL");
            return;
        }
    };
    let cache = TokenCache::new(Arc::new(backend));
    if cache.connect().await.is_err() {
        println!("Skipping test - Redis not available");
        return;
    }

    let system_user_id = 900_000 + i64::from(Utc::now().timestamp_subsec_micros() % 1000);
    let credential = SessionCredential {
        token: format!("it-token-{system_user_id}"),
        system_user_id,
        user_id: 1,
        tenant_id: "tenant-it".into(),
        expiration_time: Utc::now() + Duration::minutes(5),
        taxpayer_no: "91110000".into(),
    };
    cache.put(&credential).await.unwrap();

    assert_eq!(
        cache.get(system_user_id).await.unwrap().as_deref(),
        Some(credential.token.as_str())
    );
    assert_eq!(
        cache
            .find_by_token(&credential.token)
            .await
            .unwrap()
            .map(|c| c.system_user_id),
        Some(system_user_id)
    );

    assert!(cache.invalidate(system_user_id).await.unwrap());
    assert!(cache.find_by_token(&credential.token).await.unwrap().is_none());
    assert!(cache.get_credential(system_user_id).await.unwrap().is_none());

    cache.close().await;
}
