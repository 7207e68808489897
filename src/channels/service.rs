//! Read models for channel owners, operators and admins.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::{
    Channel, CompanyInfo, CompanyReport, ReportTransaction, TransactionStats, User, UserRole,
};
use crate::store::{ChannelStore, CompanyStore, LedgerStore, ReportStore, Store, UserStore};

pub const RECENT_TRANSACTIONS: i64 = 10;
pub const UNKNOWN_COMPANY: &str = "Unknown Company";

#[derive(Debug, Clone, Serialize)]
pub struct CompanySummary {
    pub company_name: String,
    pub tax_number: String,
    pub industry: Option<String>,
    pub registration_type: Option<String>,
    pub taxpayer_nature: Option<String>,
    pub index_standard_type: Option<String>,
}

impl CompanySummary {
    fn from_info(info: &CompanyInfo) -> Self {
        Self {
            company_name: info.company_name.clone(),
            tax_number: info.tax_number.clone(),
            industry: info.industry.clone(),
            registration_type: info.registration_type.clone(),
            taxpayer_nature: info.taxpayer_nature.clone(),
            index_standard_type: info.index_standard_type.clone(),
        }
    }

    fn unknown(tax_number: &str) -> Self {
        Self {
            company_name: UNKNOWN_COMPANY.into(),
            tax_number: tax_number.to_string(),
            industry: None,
            registration_type: None,
            taxpayer_nature: None,
            index_standard_type: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub id: i32,
    pub report_type: String,
    pub year: i32,
    pub month: Option<i32>,
    pub quarter: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_by_user_id: i32,
    pub company_info: CompanySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelDashboard {
    pub channel: Channel,
    pub second_level_users: Vec<User>,
    pub reports: Vec<ReportSummary>,
    pub recent_transactions: Vec<ReportTransaction>,
    #[serde(flatten)]
    pub stats: TransactionStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserReports {
    pub user: User,
    pub reports: Vec<ReportSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperatorStats {
    pub total_uploads: i64,
    pub total_downloads: i64,
    pub total_reports: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecondLevelDashboard {
    pub user: User,
    pub channel: Channel,
    pub stats: OperatorStats,
    pub company_reports: Vec<ReportSummary>,
}

/// Joins reports to the most recent company info of their tax number, newest report first.
pub async fn summarize_reports(
    store: &dyn Store,
    mut reports: Vec<CompanyReport>,
) -> TaxResult<Vec<ReportSummary>> {
    reports.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let mut companies: HashMap<String, CompanySummary> = HashMap::new();
    let mut summaries = Vec::with_capacity(reports.len());
    for report in reports {
        let company = match companies.get(&report.company_tax_number) {
            Some(found) => found.clone(),
            None => {
                let found = store
                    .latest_company_info(&report.company_tax_number)
                    .await?
                    .map(|info| CompanySummary::from_info(&info))
                    .unwrap_or_else(|| CompanySummary::unknown(&report.company_tax_number));
                companies.insert(report.company_tax_number.clone(), found.clone());
                found
            }
        };
        summaries.push(ReportSummary {
            id: report.id,
            report_type: report.report_type,
            year: report.year,
            month: report.month,
            quarter: report.quarter,
            created_at: report.created_at,
            updated_at: report.updated_at,
            processed_by_user_id: report.user_id,
            company_info: company,
        });
    }
    Ok(summaries)
}

pub async fn load_channel(store: &dyn Store, channel_id: i32) -> TaxResult<Channel> {
    store
        .get_channel(channel_id)
        .await?
        .ok_or_else(|| TaxError::NotFound("Channel not found".into()))
}

pub async fn channel_dashboard(store: &dyn Store, channel_id: i32) -> TaxResult<ChannelDashboard> {
    let channel = load_channel(store, channel_id).await?;
    let members = store.list_users_by_channel(channel_id).await?;
    let member_ids: Vec<i32> = members.iter().map(|u| u.id).collect();
    let reports = store.list_reports_by_users(&member_ids).await?;

    Ok(ChannelDashboard {
        channel,
        second_level_users: members
            .into_iter()
            .filter(|u| u.has_role(UserRole::Level2))
            .collect(),
        reports: summarize_reports(store, reports).await?,
        recent_transactions: store
            .list_transactions_by_channel(channel_id, Some(RECENT_TRANSACTIONS))
            .await?,
        stats: store.channel_stats(channel_id).await?,
    })
}

pub async fn level2_user_reports(store: &dyn Store, user_id: i32) -> TaxResult<UserReports> {
    let user = store
        .get_user(user_id)
        .await?
        .ok_or_else(|| TaxError::NotFound("User not found".into()))?;
    if !user.has_role(UserRole::Level2) {
        return Err(TaxError::Unauthorized("Not a level 2 user".into()));
    }
    let reports = store.list_reports_by_users(&[user.id]).await?;
    Ok(UserReports {
        reports: summarize_reports(store, reports).await?,
        user,
    })
}

/// Reports of `target_id` as seen by `viewer`, who must share its channel.
pub async fn channel_member_reports(
    store: &dyn Store,
    viewer: &User,
    channel_id: Option<i32>,
    target_id: i32,
) -> TaxResult<UserReports> {
    let viewer_channel = viewer
        .channel_id
        .ok_or_else(|| TaxError::Unauthorized("User is not associated with any channel".into()))?;
    if let Some(requested) = channel_id {
        if requested != viewer_channel {
            return Err(TaxError::Unauthorized(
                "Not authorized to access this channel's data".into(),
            ));
        }
    }

    let target = store
        .get_user(target_id)
        .await?
        .ok_or_else(|| TaxError::NotFound("User not found".into()))?;
    if target.channel_id != Some(viewer_channel) {
        return Err(TaxError::Unauthorized(
            "Not authorized to view this user's reports".into(),
        ));
    }
    level2_user_reports(store, target_id).await
}

pub async fn second_level_dashboard(
    store: &dyn Store,
    user: User,
) -> TaxResult<SecondLevelDashboard> {
    if !user.has_role(UserRole::Level2) {
        return Err(TaxError::Unauthorized(
            "Only second level users can access this endpoint".into(),
        ));
    }
    let channel_id = user
        .channel_id
        .ok_or_else(|| TaxError::NotFound("Channel not found".into()))?;
    let channel = load_channel(store, channel_id).await?;
    let reports = store.list_reports_by_users(&[user.id]).await?;
    let stats = store.user_stats(user.id).await?;
    let company_reports = summarize_reports(store, reports).await?;

    Ok(SecondLevelDashboard {
        stats: OperatorStats {
            total_uploads: stats.total_uploads,
            total_downloads: stats.total_downloads,
            total_reports: company_reports.len(),
        },
        user,
        channel,
        company_reports,
    })
}

pub async fn deposit(store: &dyn Store, channel_id: i32, amount: BigDecimal) -> TaxResult<Channel> {
    if amount <= BigDecimal::zero() {
        return Err(TaxError::Validation("Amount must be greater than 0".into()));
    }
    store.adjust_balance(channel_id, amount).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::models::{NewChannel, NewReportTransaction, NewUser, ReportKey, ReportType};
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn channel(store: &MemoryStore, number: &str) -> Channel {
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
                balance: BigDecimal::from(100),
                admin_user_id: None,
            })
            .await
            .unwrap()
    }

    async fn user(store: &MemoryStore, name: &str, role: UserRole, channel_id: i32) -> User {
        store
            .create_user(NewUser {
                username: name.into(),
                email: format!("{name}@example.com"),
                password_hash: String::new(),
                first_name: None,
                last_name: None,
                role: role.as_str().into(),
                is_admin: false,
                is_top_level_admin: false,
                first_level_channel_id: None,
                channel_id: Some(channel_id),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_channel_dashboard_collects_member_reports() {
        let store = MemoryStore::new();
        let ch = channel(&store, "C1").await;
        let owner = user(&store, "owner", UserRole::Level1, ch.id).await;
        let operator = user(&store, "operator", UserRole::Level2, ch.id).await;

        let key = ReportKey::new("9111", ReportType::Annual, 2024, None).unwrap();
        let report = store
            .upsert_report(&key, json!({"score": 1}), operator.id)
            .await
            .unwrap()
            .report;
        store
            .record_transaction(NewReportTransaction {
                user_id: operator.id,
                channel_id: ch.id,
                report_id: Some(report.id),
                transaction_type: "download".into(),
                cost: BigDecimal::from(5),
            })
            .await
            .unwrap();

        let dashboard = channel_dashboard(&store, ch.id).await.unwrap();
        assert_eq!(dashboard.second_level_users.len(), 1);
        assert_eq!(dashboard.second_level_users[0].id, operator.id);
        assert_eq!(dashboard.reports.len(), 1);
        assert_eq!(dashboard.reports[0].company_info.company_name, UNKNOWN_COMPANY);
        assert_eq!(dashboard.stats.total_downloads, 1);
        assert_eq!(dashboard.recent_transactions.len(), 1);
        assert_eq!(dashboard.channel.balance, BigDecimal::from(95));

        let seen = channel_member_reports(&store, &owner, None, operator.id)
            .await
            .unwrap();
        assert_eq!(seen.reports.len(), 1);
    }

    #[tokio::test]
    async fn test_member_reports_require_same_channel() {
        let store = MemoryStore::new();
        let a = channel(&store, "A").await;
        let b = channel(&store, "B").await;
        let owner_a = user(&store, "owner-a", UserRole::Level1, a.id).await;
        let operator_b = user(&store, "operator-b", UserRole::Level2, b.id).await;

        let err = channel_member_reports(&store, &owner_a, None, operator_b.id)
            .await
            .unwrap_err();
        assert!(matches!(err, TaxError::Unauthorized(_)));

        let err = channel_member_reports(&store, &owner_a, Some(b.id), operator_b.id)
            .await
            .unwrap_err();
        assert!(matches!(err, TaxError::Unauthorized(_)));

        let owner_b = user(&store, "owner-b", UserRole::Level1, b.id).await;
        let err = channel_member_reports(&store, &operator_b, Some(b.id), owner_b.id)
            .await
            .unwrap_err();
        assert_eq!(err.message(), "Not a level 2 user");
    }

    #[tokio::test]
    async fn test_deposit_requires_positive_amount() {
        let store = MemoryStore::new();
        let ch = channel(&store, "D").await;

        for amount in [BigDecimal::from(0), BigDecimal::from(-5)] {
            let err = deposit(&store, ch.id, amount).await.unwrap_err();
            assert!(matches!(err, TaxError::Validation(_)));
        }

        let updated = deposit(&store, ch.id, BigDecimal::from(25)).await.unwrap();
        assert_eq!(updated.balance, BigDecimal::from(125));
    }

    #[tokio::test]
    async fn test_second_level_dashboard_rejects_owner() {
        let store = MemoryStore::new();
        let ch = channel(&store, "E").await;
        let owner = user(&store, "owner", UserRole::Level1, ch.id).await;
        let operator = user(&store, "operator", UserRole::Level2, ch.id).await;

        assert!(matches!(
            second_level_dashboard(&store, owner).await,
            Err(TaxError::Unauthorized(_))
        ));
        let dashboard = second_level_dashboard(&store, operator).await.unwrap();
        assert_eq!(dashboard.stats.total_reports, 0);
        assert_eq!(dashboard.channel.id, ch.id);
    }
}
