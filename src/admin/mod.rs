//! Administrative JSON API.
//!
//! `/admin/api/*` is CRUD over every entity and needs `is_admin` (or the
//! top-level flag). `/topadmin/api/*` holds the cross-channel views and needs
//! `is_top_level_admin`.

pub mod service;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use log::info;
use serde_json::{json, Value};

use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::{
    Channel, ChannelChanges, CompanyInfo, CompanyReport, NewChannel, ReportTransaction, User,
};
use crate::core::shared::state::AppState;
use crate::security::{require_admin, require_top_level_admin, AuthenticatedUser};
use crate::store::{ChannelStore, CompanyStore, LedgerStore, ReportStore, UserStore};

pub use service::{
    AdminUserReports, ChannelDetails, CreateUserRequest, FullReport, TopAdminDashboard,
    UpdateUserRequest,
};

fn deleted(entity: &str, id: i32) -> Json<Value> {
    Json(json!({ "message": format!("{entity} {id} deleted") }))
}

pub async fn list_users(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
) -> TaxResult<Json<Vec<User>>> {
    require_admin(&admin)?;
    Ok(Json(state.store.list_users().await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> TaxResult<Json<User>> {
    require_admin(&admin)?;
    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| TaxError::NotFound(format!("User {user_id} not found")))?;
    Ok(Json(user))
}

pub async fn create_user(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Json(request): Json<CreateUserRequest>,
) -> TaxResult<(StatusCode, Json<User>)> {
    require_admin(&admin)?;
    if request.is_top_level_admin && !admin.is_top_level_admin {
        return Err(TaxError::Unauthorized(
            "Only top-level admins can grant top-level access".into(),
        ));
    }
    let user = service::create_user(state.store.as_ref(), request).await?;
    info!("Admin {} created user {} ({})", admin.id, user.id, user.role);
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(user_id): Path<i32>,
    Json(request): Json<UpdateUserRequest>,
) -> TaxResult<Json<User>> {
    require_admin(&admin)?;
    if request.is_top_level_admin.is_some() && !admin.is_top_level_admin {
        return Err(TaxError::Unauthorized(
            "Only top-level admins can change top-level access".into(),
        ));
    }
    let user = service::update_user(state.store.as_ref(), user_id, request).await?;
    info!("Admin {} updated user {user_id}", admin.id);
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> TaxResult<Json<Value>> {
    require_admin(&admin)?;
    if admin.id == user_id {
        return Err(TaxError::Conflict("Admins cannot delete their own account".into()));
    }
    service::delete_user(state.store.as_ref(), user_id).await?;
    info!("Admin {} deleted user {user_id}", admin.id);
    Ok(deleted("User", user_id))
}

pub async fn list_channels(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
) -> TaxResult<Json<Vec<Channel>>> {
    require_admin(&admin)?;
    Ok(Json(state.store.list_channels().await?))
}

pub async fn get_channel(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(channel_id): Path<i32>,
) -> TaxResult<Json<Channel>> {
    require_admin(&admin)?;
    Ok(Json(
        crate::channels::service::load_channel(state.store.as_ref(), channel_id).await?,
    ))
}

pub async fn create_channel(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Json(channel): Json<NewChannel>,
) -> TaxResult<(StatusCode, Json<Channel>)> {
    require_admin(&admin)?;
    service::check_new_channel(&channel)?;
    let channel = state.store.create_channel(channel).await?;
    info!("Admin {} created channel {}", admin.id, channel.channel_number);
    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn update_channel(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(channel_id): Path<i32>,
    Json(changes): Json<ChannelChanges>,
) -> TaxResult<Json<Channel>> {
    require_admin(&admin)?;
    let store = state.store.as_ref();
    if changes.is_empty() {
        return Ok(Json(
            crate::channels::service::load_channel(store, channel_id).await?,
        ));
    }
    Ok(Json(store.update_channel(channel_id, changes).await?))
}

pub async fn delete_channel(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(channel_id): Path<i32>,
) -> TaxResult<Json<Value>> {
    require_admin(&admin)?;
    service::delete_channel(state.store.as_ref(), channel_id).await?;
    info!("Admin {} deleted channel {channel_id}", admin.id);
    Ok(deleted("Channel", channel_id))
}

pub async fn list_company_info(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
) -> TaxResult<Json<Vec<CompanyInfo>>> {
    require_admin(&admin)?;
    Ok(Json(state.store.list_company_info().await?))
}

pub async fn get_company_info(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i32>,
) -> TaxResult<Json<CompanyInfo>> {
    require_admin(&admin)?;
    let info = state
        .store
        .get_company_info(id)
        .await?
        .ok_or_else(|| TaxError::NotFound(format!("Company info {id} not found")))?;
    Ok(Json(info))
}

pub async fn delete_company_info(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i32>,
) -> TaxResult<Json<Value>> {
    require_admin(&admin)?;
    state.store.delete_company_info(id).await?;
    info!("Admin {} deleted company info {id}", admin.id);
    Ok(deleted("Company info", id))
}

pub async fn list_reports(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
) -> TaxResult<Json<Vec<CompanyReport>>> {
    require_admin(&admin)?;
    let mut reports = state.store.list_reports().await?;
    reports.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    Ok(Json(reports))
}

pub async fn get_report(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(report_id): Path<i32>,
) -> TaxResult<Json<FullReport>> {
    require_admin(&admin)?;
    Ok(Json(
        service::report_details(state.store.as_ref(), report_id).await?,
    ))
}

pub async fn delete_report(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(report_id): Path<i32>,
) -> TaxResult<Json<Value>> {
    require_admin(&admin)?;
    state.store.delete_report(report_id).await?;
    info!("Admin {} deleted report {report_id}", admin.id);
    Ok(deleted("Report", report_id))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
) -> TaxResult<Json<Vec<ReportTransaction>>> {
    require_admin(&admin)?;
    Ok(Json(state.store.list_transactions().await?))
}

pub async fn top_dashboard(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
) -> TaxResult<Json<TopAdminDashboard>> {
    require_top_level_admin(&admin)?;
    Ok(Json(service::dashboard(state.store.as_ref()).await?))
}

pub async fn top_channel_details(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(channel_id): Path<i32>,
) -> TaxResult<Json<ChannelDetails>> {
    require_top_level_admin(&admin)?;
    Ok(Json(
        service::channel_details(state.store.as_ref(), channel_id).await?,
    ))
}

pub async fn top_user_reports(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> TaxResult<Json<AdminUserReports>> {
    require_top_level_admin(&admin)?;
    Ok(Json(
        service::user_reports(state.store.as_ref(), user_id).await?,
    ))
}

pub async fn top_report_details(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(report_id): Path<i32>,
) -> TaxResult<Json<FullReport>> {
    require_top_level_admin(&admin)?;
    Ok(Json(
        service::report_details(state.store.as_ref(), report_id).await?,
    ))
}

pub fn configure() -> Router<AppState> {
    Router::new()
        .route("/admin/api/users", get(list_users).post(create_user))
        .route(
            "/admin/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/admin/api/channels", get(list_channels).post(create_channel))
        .route(
            "/admin/api/channels/:id",
            get(get_channel).put(update_channel).delete(delete_channel),
        )
        .route("/admin/api/company-info", get(list_company_info))
        .route(
            "/admin/api/company-info/:id",
            get(get_company_info).delete(delete_company_info),
        )
        .route("/admin/api/reports", get(list_reports))
        .route("/admin/api/reports/:id", get(get_report).delete(delete_report))
        .route("/admin/api/transactions", get(list_transactions))
        .route("/topadmin/api/dashboard", get(top_dashboard))
        .route("/topadmin/api/channel/:id", get(top_channel_details))
        .route("/topadmin/api/user/:id/reports", get(top_user_reports))
        .route("/topadmin/api/report/:id", get(top_report_details))
}
