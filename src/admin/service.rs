use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::channels::{summarize_reports, ReportSummary};
use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::{
    Channel, CompanyReport, NewChannel, NewUser, User, UserChanges, UserRole,
};
use crate::security::hash_password;
use crate::store::{ChannelStore, CompanyStore, ReportStore, Store, UserStore};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_top_level_admin: bool,
    pub first_level_channel_id: Option<i32>,
    pub channel_id: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<UserRole>,
    pub is_admin: Option<bool>,
    pub is_top_level_admin: Option<bool>,
    pub first_level_channel_id: Option<i32>,
    pub channel_id: Option<i32>,
}

async fn hash_blocking(password: String) -> TaxResult<String> {
    if password.is_empty() {
        return Err(TaxError::Validation("Password must not be empty".into()));
    }
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await?
        .map_err(|e| TaxError::Internal(format!("Password hashing failed: {e}")))
}

/// A second-level operator hangs off a first-level owner or a channel.
pub async fn check_hierarchy(
    store: &dyn Store,
    role: UserRole,
    parent_id: Option<i32>,
    channel_id: Option<i32>,
) -> TaxResult<()> {
    if let Some(channel_id) = channel_id {
        if store.get_channel(channel_id).await?.is_none() {
            return Err(TaxError::Validation(format!("Channel {channel_id} does not exist")));
        }
    }
    if let Some(parent_id) = parent_id {
        let parent = store.get_user(parent_id).await?.ok_or_else(|| {
            TaxError::Validation(format!("Parent user {parent_id} does not exist"))
        })?;
        if role == UserRole::Level2 && !parent.has_role(UserRole::Level1) {
            return Err(TaxError::Validation(
                "A level_2 user's parent must be a level_1 user".into(),
            ));
        }
    }
    if role == UserRole::Level2 && parent_id.is_none() && channel_id.is_none() {
        return Err(TaxError::Validation(
            "A level_2 user needs a level_1 parent or a channel".into(),
        ));
    }
    Ok(())
}

pub async fn create_user(store: &dyn Store, request: CreateUserRequest) -> TaxResult<User> {
    let username = request.username.trim().to_string();
    if username.is_empty() {
        return Err(TaxError::Validation("Username is required".into()));
    }
    check_hierarchy(
        store,
        request.role,
        request.first_level_channel_id,
        request.channel_id,
    )
    .await?;

    let password_hash = hash_blocking(request.password).await?;
    store
        .create_user(NewUser {
            username,
            email: request.email,
            password_hash,
            first_name: request.first_name,
            last_name: request.last_name,
            role: request.role.as_str().to_string(),
            is_admin: request.is_admin,
            is_top_level_admin: request.is_top_level_admin,
            first_level_channel_id: request.first_level_channel_id,
            channel_id: request.channel_id,
        })
        .await
}

pub async fn update_user(
    store: &dyn Store,
    user_id: i32,
    request: UpdateUserRequest,
) -> TaxResult<User> {
    let current = store
        .get_user(user_id)
        .await?
        .ok_or_else(|| TaxError::NotFound(format!("User {user_id} not found")))?;

    let role = match request.role {
        Some(role) => role,
        None => current.role.parse()?,
    };
    if request.role.is_some()
        || request.first_level_channel_id.is_some()
        || request.channel_id.is_some()
    {
        if request.first_level_channel_id == Some(user_id) {
            return Err(TaxError::Validation("A user cannot be its own parent".into()));
        }
        check_hierarchy(
            store,
            role,
            request.first_level_channel_id.or(current.first_level_channel_id),
            request.channel_id.or(current.channel_id),
        )
        .await?;
    }

    let password_hash = match request.password {
        Some(password) => Some(hash_blocking(password).await?),
        None => None,
    };
    let changes = UserChanges {
        username: request.username.map(|u| u.trim().to_string()),
        email: request.email,
        password_hash,
        first_name: request.first_name,
        last_name: request.last_name,
        role: request.role.map(|r| r.as_str().to_string()),
        is_admin: request.is_admin,
        is_top_level_admin: request.is_top_level_admin,
        first_level_channel_id: request.first_level_channel_id,
        channel_id: request.channel_id,
    };
    if changes.is_empty() {
        return Ok(current);
    }
    store.update_user(user_id, changes).await
}

/// Level_2 users that would be left with neither a parent nor a channel.
async fn orphaned_by(
    store: &dyn Store,
    parent_id: Option<i32>,
    channel_id: Option<i32>,
) -> TaxResult<Vec<String>> {
    let users = store.list_users().await?;
    Ok(users
        .into_iter()
        .filter(|u| u.has_role(UserRole::Level2))
        .filter(|u| {
            let loses_anchor = (parent_id.is_some() && u.first_level_channel_id == parent_id)
                || (channel_id.is_some() && u.channel_id == channel_id);
            let keeps_parent =
                u.first_level_channel_id.is_some() && u.first_level_channel_id != parent_id;
            let keeps_channel = u.channel_id.is_some() && u.channel_id != channel_id;
            loses_anchor && !keeps_parent && !keeps_channel
        })
        .map(|u| u.username)
        .collect())
}

fn refuse_orphans(what: &str, orphans: Vec<String>) -> TaxResult<()> {
    if orphans.is_empty() {
        return Ok(());
    }
    Err(TaxError::Conflict(format!(
        "Cannot delete {what}: level_2 users {} would have no parent or channel",
        orphans.join(", ")
    )))
}

pub async fn delete_user(store: &dyn Store, user_id: i32) -> TaxResult<()> {
    refuse_orphans(
        &format!("user {user_id}"),
        orphaned_by(store, Some(user_id), None).await?,
    )?;
    store.delete_user(user_id).await
}

pub async fn delete_channel(store: &dyn Store, channel_id: i32) -> TaxResult<()> {
    refuse_orphans(
        &format!("channel {channel_id}"),
        orphaned_by(store, None, Some(channel_id)).await?,
    )?;
    store.delete_channel(channel_id).await
}

pub fn check_new_channel(channel: &NewChannel) -> TaxResult<()> {
    if channel.channel_number.trim().is_empty() {
        return Err(TaxError::Validation("channel_number is required".into()));
    }
    if channel.channel_name.trim().is_empty() {
        return Err(TaxError::Validation("channel_name is required".into()));
    }
    if channel.balance < BigDecimal::zero() {
        return Err(TaxError::Validation("Balance must not be negative".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_channels: i64,
    pub total_users: i64,
    pub total_reports: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberSummary {
    pub id: i32,
    pub username: String,
    pub role: String,
    pub reports_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelOverview {
    pub id: i32,
    pub channel_number: String,
    pub channel_name: String,
    pub channel_location: Option<String>,
    pub users: Vec<MemberSummary>,
    pub total_reports: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopAdminDashboard {
    pub stats: DashboardStats,
    pub channels: Vec<ChannelOverview>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberReports {
    pub id: i32,
    pub username: String,
    pub role: String,
    pub reports: Vec<ReportSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelDetails {
    pub channel: Channel,
    pub users: Vec<MemberReports>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedBy {
    pub id: i32,
    pub username: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FullReport {
    #[serde(flatten)]
    pub report: CompanyReport,
    pub company_name: String,
    pub processed_by: Option<ProcessedBy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminUserReports {
    pub user: User,
    pub reports: Vec<ReportSummary>,
}

fn reports_per_user(reports: &[CompanyReport]) -> HashMap<i32, usize> {
    let mut counts = HashMap::new();
    for report in reports {
        *counts.entry(report.user_id).or_insert(0) += 1;
    }
    counts
}

pub async fn dashboard(store: &dyn Store) -> TaxResult<TopAdminDashboard> {
    let stats = DashboardStats {
        total_channels: store.count_channels().await?,
        total_users: store.count_users().await?,
        total_reports: store.count_reports().await?,
    };

    let mut channels = Vec::new();
    for channel in store.list_channels().await? {
        let members = store.list_users_by_channel(channel.id).await?;
        let ids: Vec<i32> = members.iter().map(|u| u.id).collect();
        let counts = reports_per_user(&store.list_reports_by_users(&ids).await?);

        let users: Vec<MemberSummary> = members
            .into_iter()
            .map(|u| MemberSummary {
                reports_count: counts.get(&u.id).copied().unwrap_or(0),
                id: u.id,
                username: u.username,
                role: u.role,
            })
            .collect();
        channels.push(ChannelOverview {
            total_reports: users.iter().map(|u| u.reports_count).sum(),
            id: channel.id,
            channel_number: channel.channel_number,
            channel_name: channel.channel_name,
            channel_location: channel.channel_location,
            users,
        });
    }
    Ok(TopAdminDashboard { stats, channels })
}

pub async fn channel_details(store: &dyn Store, channel_id: i32) -> TaxResult<ChannelDetails> {
    let channel = crate::channels::service::load_channel(store, channel_id).await?;
    let mut users = Vec::new();
    for member in store.list_users_by_channel(channel_id).await? {
        let reports = store.list_reports_by_users(&[member.id]).await?;
        users.push(MemberReports {
            reports: summarize_reports(store, reports).await?,
            id: member.id,
            username: member.username,
            role: member.role,
        });
    }
    Ok(ChannelDetails { channel, users })
}

pub async fn user_reports(store: &dyn Store, user_id: i32) -> TaxResult<AdminUserReports> {
    let user = store
        .get_user(user_id)
        .await?
        .ok_or_else(|| TaxError::NotFound("User not found".into()))?;
    let reports = store.list_reports_by_users(&[user_id]).await?;
    Ok(AdminUserReports {
        reports: summarize_reports(store, reports).await?,
        user,
    })
}

pub async fn report_details(store: &dyn Store, report_id: i32) -> TaxResult<FullReport> {
    let report = store
        .get_report(report_id)
        .await?
        .ok_or_else(|| TaxError::NotFound("Report not found".into()))?;
    let company_name = store
        .latest_company_info(&report.company_tax_number)
        .await?
        .map(|info| info.company_name)
        .unwrap_or_else(|| crate::channels::service::UNKNOWN_COMPANY.to_string());
    let processed_by = store.get_user(report.user_id).await?.map(|u| ProcessedBy {
        id: u.id,
        username: u.username,
        role: u.role,
    });
    Ok(FullReport {
        report,
        company_name,
        processed_by,
    })
}
