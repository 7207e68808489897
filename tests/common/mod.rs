#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use taxgate::cache::TokenCache;
use taxgate::core::config::AppConfig;
use taxgate::core::error::{TaxError, TaxResult};
use taxgate::core::shared::models::{Channel, NewChannel, NewUser, User, UserRole};
use taxgate::core::shared::state::AppState;
use taxgate::gateway::{
    FileUpload, QueryOutcome, RegisteredTenant, ReportQuery, SubmitOutcome, TaxGateway,
    TenantRegistration, UploadParameters,
};
use taxgate::security::{hash_password, JwtManager};
use taxgate::store::{ChannelStore, MemoryStore, Store, UserStore};

pub const JWT_SECRET: &str = "integration-test-secret-that-is-long-enough";
pub const PASSWORD: &str = "s3cret-password";

/// Gateway double that counts calls and replays scripted query results.
pub struct FakeGateway {
    pub registrations: AtomicUsize,
    pub submissions: AtomicUsize,
    pub queries: AtomicUsize,
    /// Total file bytes handed to `submit_files`.
    pub submitted_bytes: AtomicUsize,
    pub system_user_id: i64,
    pub token: String,
    query_results: Mutex<VecDeque<TaxResult<Value>>>,
}

impl FakeGateway {
    pub fn new(system_user_id: i64, token: &str) -> Self {
        Self {
            registrations: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            submitted_bytes: AtomicUsize::new(0),
            system_user_id,
            token: token.to_string(),
            query_results: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_query(&self, result: TaxResult<Value>) {
        self.query_results
            .lock()
            .expect("query script lock")
            .push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
            + self.submissions.load(Ordering::SeqCst)
            + self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaxGateway for FakeGateway {
    async fn register_tenant(
        &self,
        _registration: &TenantRegistration,
    ) -> TaxResult<RegisteredTenant> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(RegisteredTenant {
            token: self.token.clone(),
            system_user_id: self.system_user_id,
            tenant_id: "tenant-1".into(),
            expiration_time: Utc::now() + Duration::hours(1),
        })
    }

    async fn submit_files(
        &self,
        _token: &str,
        _taxpayer_no: &str,
        _params: UploadParameters,
        files: &[FileUpload],
    ) -> TaxResult<SubmitOutcome> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let total: usize = files.iter().map(|f| f.bytes.len()).sum();
        self.submitted_bytes.fetch_add(total, Ordering::SeqCst);
        Ok(SubmitOutcome {
            status: 200,
            message: "Upload successful".into(),
        })
    }

    async fn query_report(
        &self,
        _token: &str,
        _taxpayer_no: &str,
        _query: &ReportQuery,
    ) -> TaxResult<QueryOutcome> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .query_results
            .lock()
            .expect("query script lock")
            .pop_front();
        let payload = scripted.unwrap_or_else(|| Ok(json!({"score": 0})))?;
        Ok(QueryOutcome {
            status: 200,
            message: "ok".into(),
            payload,
        })
    }
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
}

pub async fn context() -> TestContext {
    context_with(AppConfig::default()).await
}

pub async fn context_with(mut config: AppConfig) -> TestContext {
    config.auth.jwt_secret = JWT_SECRET.into();
    config.gateway.retry_backoff_ms = 1;

    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new(42, "T1"));
    let cache = TokenCache::in_memory();
    cache.connect().await.expect("in-memory cache connects");
    let jwt = JwtManager::from_auth_config(&config.auth).expect("valid test secret");

    let dyn_store: Arc<dyn Store> = store.clone();
    let dyn_gateway: Arc<dyn TaxGateway> = gateway.clone();
    TestContext {
        state: AppState::new(config, dyn_store, cache, dyn_gateway, jwt),
        store,
        gateway,
    }
}

pub async fn seed_channel(store: &MemoryStore, number: &str, balance: i64) -> Channel {
    store
        .create_channel(NewChannel {
            channel_number: number.into(),
            channel_name: format!("Channel {number}"),
            channel_location: None,
            industry: None,
            contact_person: None,
            contact_number: None,
            email: None,
            website: None,
            app: None,
            official_account: None,
            douyin_account: None,
            balance: BigDecimal::from(balance),
            admin_user_id: None,
        })
        .await
        .expect("channel created")
}

pub async fn seed_user(
    store: &MemoryStore,
    username: &str,
    role: UserRole,
    channel_id: Option<i32>,
) -> User {
    store
        .create_user(NewUser {
            username: username.into(),
            email: format!("{username}@example.com"),
            password_hash: hash_password(PASSWORD).expect("hash"),
            first_name: None,
            last_name: None,
            is_admin: matches!(role, UserRole::Admin | UserRole::TopLevelAdmin),
            is_top_level_admin: role == UserRole::TopLevelAdmin,
            role: role.as_str().into(),
            first_level_channel_id: None,
            channel_id,
        })
        .await
        .expect("user created")
}

pub fn bearer(state: &AppState, user: &User) -> String {
    let token = state
        .jwt
        .issue_for_user(user.id, &user.username, &user.role)
        .expect("token issued");
    format!("Bearer {}", token.access_token)
}

pub fn spreadsheet(name: &str) -> FileUpload {
    FileUpload {
        filename: name.into(),
        content_type: Some("application/vnd.ms-excel".into()),
        bytes: b"fake workbook".to_vec(),
    }
}

pub fn assert_kind<T: std::fmt::Debug>(result: TaxResult<T>, kind: &str) -> TaxError {
    let err = result.expect_err("expected an error");
    assert_eq!(err.kind(), kind, "unexpected error: {err:?}");
    err
}
