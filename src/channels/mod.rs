//! Channel owner and second-level operator views, plus balance deposits.

pub mod service;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use log::info;
use serde::{Deserialize, Serialize};

use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::User;
use crate::core::shared::state::AppState;
use crate::security::AuthenticatedUser;

pub use service::{
    channel_dashboard, channel_member_reports, deposit, second_level_dashboard,
    summarize_reports, ChannelDashboard, CompanySummary, ReportSummary, SecondLevelDashboard,
    UserReports,
};

fn caller_channel(user: &User) -> TaxResult<i32> {
    user.channel_id
        .ok_or_else(|| TaxError::Unauthorized("User is not associated with any channel".into()))
}

pub async fn dashboard(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> TaxResult<Json<ChannelDashboard>> {
    let channel_id = caller_channel(&user)?;
    Ok(Json(channel_dashboard(state.store.as_ref(), channel_id).await?))
}

pub async fn member_reports(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> TaxResult<Json<UserReports>> {
    let reports = channel_member_reports(state.store.as_ref(), &user, None, user_id).await?;
    Ok(Json(reports))
}

pub async fn channel_scoped_member_reports(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path((channel_id, user_id)): Path<(i32, i32)>,
) -> TaxResult<Json<UserReports>> {
    let reports =
        channel_member_reports(state.store.as_ref(), &user, Some(channel_id), user_id).await?;
    Ok(Json(reports))
}

#[derive(Debug, Deserialize)]
pub struct DepositQuery {
    pub amount: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct DepositReceipt {
    pub message: String,
    pub new_balance: BigDecimal,
}

pub async fn deposit_funds(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<DepositQuery>,
) -> TaxResult<Json<DepositReceipt>> {
    let channel_id = caller_channel(&user)?;
    let channel = deposit(state.store.as_ref(), channel_id, query.amount.clone()).await?;
    info!(
        "User {} deposited {} into channel {channel_id}, balance now {}",
        user.id, query.amount, channel.balance
    );
    Ok(Json(DepositReceipt {
        message: "Deposit successful".into(),
        new_balance: channel.balance,
    }))
}

pub async fn operator_dashboard(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> TaxResult<Json<SecondLevelDashboard>> {
    Ok(Json(second_level_dashboard(state.store.as_ref(), user).await?))
}

pub fn configure() -> Router<AppState> {
    Router::new()
        .route("/api/channel/dashboard", get(dashboard))
        .route("/api/channel/deposit", post(deposit_funds))
        .route("/api/channel/user/:user_id/reports", get(member_reports))
        .route(
            "/api/channel/:channel_id/user/:user_id/reports",
            get(channel_scoped_member_reports),
        )
        .route("/api/second-level/dashboard", get(operator_dashboard))
}
