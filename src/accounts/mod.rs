//! Local login/logout and tenant registration with the remote tax system.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use log::{info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tower_cookies::Cookies;

use crate::cache::{RegistrationMetadata, SessionCredential};
use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::User;
use crate::core::shared::state::AppState;
use crate::gateway::{RegisteredTenant, TenantRegistration};
use crate::security::auth::LOGIN_PATH;
use crate::security::{
    create_auth_cookie, removal_cookie, verify_password, AuthenticatedUser,
};
use crate::store::UserStore;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: User,
}

pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(request): Json<LoginRequest>,
) -> TaxResult<Json<LoginResponse>> {
    let rejected = || TaxError::Unauthenticated("Incorrect username or password".into());

    let user = state
        .store
        .get_user_by_username(request.username.trim())
        .await?
        .ok_or_else(rejected)?;

    let hash = user.password_hash.clone();
    let password = request.password;
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await?;
    match verified {
        Ok(true) => {}
        Ok(false) => return Err(rejected()),
        Err(e) => {
            warn!("Unusable password hash for user {}: {e}", user.id);
            return Err(rejected());
        }
    }

    let token = state
        .jwt
        .issue_for_user(user.id, &user.username, &user.role)
        .map_err(|e| TaxError::Internal(e.to_string()))?;
    cookies.add(create_auth_cookie(
        &token.access_token,
        state.jwt.expiry_minutes(),
        state.config.auth.cookie_secure,
    ));
    info!("User {} logged in", user.id);

    Ok(Json(LoginResponse {
        access_token: token.access_token,
        token_type: token.token_type,
        expires_in: token.expires_in,
        user,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    pub system_user_id: Option<i64>,
}

/// Clears the auth cookie. With `system_user_id`, also drops the caller's
/// cached external session.
pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
    caller: Option<AuthenticatedUser>,
    Query(query): Query<LogoutQuery>,
) -> TaxResult<Json<serde_json::Value>> {
    cookies.add(removal_cookie());

    let mut invalidated = false;
    if let Some(system_user_id) = query.system_user_id {
        let AuthenticatedUser(user) = caller.ok_or_else(|| {
            TaxError::Unauthenticated("Login required to end an external session".into())
        })?;
        if let Some(credential) = state.cache.get_credential(system_user_id).await? {
            if credential.user_id != user.id && !(user.is_admin || user.is_top_level_admin) {
                return Err(TaxError::Unauthorized(format!(
                    "External session {system_user_id} belongs to another user"
                )));
            }
            invalidated = state.cache.invalidate(system_user_id).await?;
            info!("User {} ended external session {system_user_id}", user.id);
        }
    }

    Ok(Json(json!({
        "message": "Successfully logged out",
        "session_invalidated": invalidated,
    })))
}

pub async fn logout_page(cookies: Cookies) -> Response {
    cookies.add(removal_cookie());
    Redirect::to(LOGIN_PATH).into_response()
}

/// Classification codes arrive as numbers or numeric strings.
fn flexible_i32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i32),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub company_name: String,
    #[serde(deserialize_with = "flexible_i32")]
    pub index_standard_type: i32,
    #[serde(deserialize_with = "flexible_i32")]
    pub industry: i32,
    #[serde(deserialize_with = "flexible_i32")]
    pub registration_type: i32,
    #[serde(deserialize_with = "flexible_i32")]
    pub taxpayer_nature: i32,
    pub taxpayer_no: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub status: u16,
    pub msg: String,
    pub data: RegisteredTenant,
}

pub async fn register_tenant(
    state: &AppState,
    user: &User,
    request: RegisterRequest,
) -> TaxResult<RegisteredTenant> {
    let taxpayer_no = request.taxpayer_no.trim().to_string();
    if taxpayer_no.is_empty() {
        return Err(TaxError::Validation("taxpayerNo is required".into()));
    }
    if request.company_name.trim().is_empty() {
        return Err(TaxError::Validation("companyName is required".into()));
    }

    let registration = TenantRegistration {
        company_name: request.company_name.trim().to_string(),
        index_standard_type: request.index_standard_type,
        industry: request.industry,
        registration_type: request.registration_type,
        taxpayer_nature: request.taxpayer_nature,
        taxpayer_no: taxpayer_no.clone(),
        user_id: user.id,
    };
    let tenant = state.gateway.register_tenant(&registration).await?;

    let credential = SessionCredential {
        token: tenant.token.clone(),
        system_user_id: tenant.system_user_id,
        user_id: user.id,
        tenant_id: tenant.tenant_id.clone(),
        expiration_time: tenant.expiration_time,
        taxpayer_no: taxpayer_no.clone(),
    };
    state.cache.put(&credential).await?;

    let metadata = RegistrationMetadata {
        company_name: registration.company_name,
        industry: registration.industry.to_string(),
        registration_type: registration.registration_type.to_string(),
        taxpayer_nature: registration.taxpayer_nature.to_string(),
        index_standard_type: registration.index_standard_type.to_string(),
        taxpayer_no,
    };
    state
        .cache
        .put_registration(tenant.system_user_id, &metadata, tenant.expiration_time)
        .await?;

    Ok(tenant)
}

pub async fn register(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(request): Json<RegisterRequest>,
) -> TaxResult<Json<RegisterResponse>> {
    let tenant = register_tenant(&state, &user, request).await?;
    info!(
        "User {} registered external session {}",
        user.id, tenant.system_user_id
    );
    Ok(Json(RegisterResponse {
        status: 200,
        msg: "Registration successful".into(),
        data: tenant,
    }))
}

pub fn configure() -> Router<AppState> {
    Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/register", post(register))
        .route("/logout", get(logout_page))
}
