//! In-memory store used by tests and `cache.backend = "memory"` development runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    summarize, ChannelStore, CompanyStore, LedgerStore, ReportStore, StoreResult, UpsertedReport,
    UserStore,
};
use crate::core::error::TaxError;
use crate::core::shared::models::{
    Channel, ChannelChanges, CompanyInfo, CompanyReport, NewChannel, NewCompanyInfo,
    NewCompanyReport, NewReportTransaction, NewUser, ReportKey, ReportTransaction,
    TransactionStats, User, UserChanges,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i32, User>,
    channels: BTreeMap<i32, Channel>,
    company_info: BTreeMap<i32, CompanyInfo>,
    reports: BTreeMap<i32, CompanyReport>,
    transactions: BTreeMap<i32, ReportTransaction>,
    next_id: i32,
}

impl Tables {
    fn issue_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn delete_reports_for_tax_number(&mut self, tax_number: &str) {
        let doomed: Vec<i32> = self
            .reports
            .values()
            .filter(|r| r.company_tax_number == tax_number)
            .map(|r| r.id)
            .collect();
        for id in doomed {
            self.delete_report(id);
        }
    }

    fn delete_report(&mut self, report_id: i32) -> bool {
        let removed = self.reports.remove(&report_id).is_some();
        if removed {
            self.transactions
                .retain(|_, tx| tx.report_id != Some(report_id));
        }
        removed
    }
}

/// Every table lives behind one lock so cascades and upserts are atomic.
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn user_not_found(user_id: i32) -> TaxError {
    TaxError::NotFound(format!("User {user_id} not found"))
}

fn channel_not_found(channel_id: i32) -> TaxError {
    TaxError::NotFound(format!("Channel {channel_id} not found"))
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(TaxError::Conflict(format!(
                "Username {} already exists",
                user.username
            )));
        }
        if let Some(channel_id) = user.channel_id {
            if !tables.channels.contains_key(&channel_id) {
                return Err(TaxError::Validation(format!(
                    "Channel {channel_id} does not exist"
                )));
            }
        }
        if let Some(parent_id) = user.first_level_channel_id {
            if !tables.users.contains_key(&parent_id) {
                return Err(TaxError::Validation(format!(
                    "Parent user {parent_id} does not exist"
                )));
            }
        }
        let id = tables.issue_id();
        let created = User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            is_admin: user.is_admin,
            is_top_level_admin: user.is_top_level_admin,
            first_level_channel_id: user.first_level_channel_id,
            channel_id: user.channel_id,
            created_at: Utc::now(),
        };
        tables.users.insert(id, created.clone());
        Ok(created)
    }

    async fn get_user(&self, user_id: i32) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.tables.read().await.users.values().cloned().collect())
    }

    async fn list_users_by_channel(&self, channel_id: i32) -> StoreResult<Vec<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .filter(|u| u.channel_id == Some(channel_id))
            .cloned()
            .collect())
    }

    async fn update_user(&self, user_id: i32, changes: UserChanges) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if let Some(ref username) = changes.username {
            if tables
                .users
                .values()
                .any(|u| u.id != user_id && &u.username == username)
            {
                return Err(TaxError::Conflict(format!("Username {username} already exists")));
            }
        }
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| user_not_found(user_id))?;
        if let Some(v) = changes.username {
            user.username = v;
        }
        if let Some(v) = changes.email {
            user.email = v;
        }
        if let Some(v) = changes.password_hash {
            user.password_hash = v;
        }
        if let Some(v) = changes.first_name {
            user.first_name = Some(v);
        }
        if let Some(v) = changes.last_name {
            user.last_name = Some(v);
        }
        if let Some(v) = changes.role {
            user.role = v;
        }
        if let Some(v) = changes.is_admin {
            user.is_admin = v;
        }
        if let Some(v) = changes.is_top_level_admin {
            user.is_top_level_admin = v;
        }
        if let Some(v) = changes.first_level_channel_id {
            user.first_level_channel_id = Some(v);
        }
        if let Some(v) = changes.channel_id {
            user.channel_id = Some(v);
        }
        Ok(user.clone())
    }

    async fn delete_user(&self, user_id: i32) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.users.remove(&user_id).is_none() {
            return Err(user_not_found(user_id));
        }
        tables.company_info.retain(|_, c| c.user_id != user_id);
        let reports: Vec<i32> = tables
            .reports
            .values()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.id)
            .collect();
        for id in reports {
            tables.delete_report(id);
        }
        tables.transactions.retain(|_, tx| tx.user_id != user_id);
        for user in tables.users.values_mut() {
            if user.first_level_channel_id == Some(user_id) {
                user.first_level_channel_id = None;
            }
        }
        for channel in tables.channels.values_mut() {
            if channel.admin_user_id == Some(user_id) {
                channel.admin_user_id = None;
            }
        }
        Ok(())
    }

    async fn first_admin(&self) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.is_admin)
            .cloned())
    }

    async fn count_users(&self) -> StoreResult<i64> {
        Ok(self.tables.read().await.users.len() as i64)
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn create_channel(&self, channel: NewChannel) -> StoreResult<Channel> {
        let mut tables = self.tables.write().await;
        if tables
            .channels
            .values()
            .any(|c| c.channel_number == channel.channel_number)
        {
            return Err(TaxError::Conflict(format!(
                "Channel number {} already exists",
                channel.channel_number
            )));
        }
        if channel.balance < BigDecimal::from(0) {
            return Err(TaxError::Validation("Balance cannot be negative".into()));
        }
        let id = tables.issue_id();
        let created = Channel {
            id,
            channel_number: channel.channel_number,
            channel_name: channel.channel_name,
            channel_location: channel.channel_location,
            industry: channel.industry,
            contact_person: channel.contact_person,
            contact_number: channel.contact_number,
            email: channel.email,
            website: channel.website,
            app: channel.app,
            official_account: channel.official_account,
            douyin_account: channel.douyin_account,
            balance: channel.balance,
            admin_user_id: channel.admin_user_id,
            registration_time: Utc::now(),
        };
        tables.channels.insert(id, created.clone());
        Ok(created)
    }

    async fn get_channel(&self, channel_id: i32) -> StoreResult<Option<Channel>> {
        Ok(self.tables.read().await.channels.get(&channel_id).cloned())
    }

    async fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        Ok(self.tables.read().await.channels.values().cloned().collect())
    }

    async fn update_channel(
        &self,
        channel_id: i32,
        changes: ChannelChanges,
    ) -> StoreResult<Channel> {
        let mut tables = self.tables.write().await;
        if let Some(ref number) = changes.channel_number {
            if tables
                .channels
                .values()
                .any(|c| c.id != channel_id && &c.channel_number == number)
            {
                return Err(TaxError::Conflict(format!(
                    "Channel number {number} already exists"
                )));
            }
        }
        let channel = tables
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| channel_not_found(channel_id))?;
        if let Some(v) = changes.channel_number {
            channel.channel_number = v;
        }
        if let Some(v) = changes.channel_name {
            channel.channel_name = v;
        }
        if let Some(v) = changes.channel_location {
            channel.channel_location = Some(v);
        }
        if let Some(v) = changes.industry {
            channel.industry = Some(v);
        }
        if let Some(v) = changes.contact_person {
            channel.contact_person = Some(v);
        }
        if let Some(v) = changes.contact_number {
            channel.contact_number = Some(v);
        }
        if let Some(v) = changes.email {
            channel.email = Some(v);
        }
        if let Some(v) = changes.website {
            channel.website = Some(v);
        }
        if let Some(v) = changes.app {
            channel.app = Some(v);
        }
        if let Some(v) = changes.official_account {
            channel.official_account = Some(v);
        }
        if let Some(v) = changes.douyin_account {
            channel.douyin_account = Some(v);
        }
        if let Some(v) = changes.admin_user_id {
            channel.admin_user_id = Some(v);
        }
        Ok(channel.clone())
    }

    async fn delete_channel(&self, channel_id: i32) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.channels.remove(&channel_id).is_none() {
            return Err(channel_not_found(channel_id));
        }
        tables.transactions.retain(|_, tx| tx.channel_id != channel_id);
        for user in tables.users.values_mut() {
            if user.channel_id == Some(channel_id) {
                user.channel_id = None;
            }
        }
        Ok(())
    }

    async fn adjust_balance(&self, channel_id: i32, delta: BigDecimal) -> StoreResult<Channel> {
        let mut tables = self.tables.write().await;
        let channel = tables
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| channel_not_found(channel_id))?;
        let updated = &channel.balance + &delta;
        if updated < BigDecimal::from(0) {
            return Err(TaxError::Validation("Insufficient channel balance".into()));
        }
        channel.balance = updated;
        Ok(channel.clone())
    }

    async fn count_channels(&self) -> StoreResult<i64> {
        Ok(self.tables.read().await.channels.len() as i64)
    }
}

#[async_trait]
impl CompanyStore for MemoryStore {
    async fn create_company_info(&self, info: NewCompanyInfo) -> StoreResult<CompanyInfo> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&info.user_id) {
            return Err(user_not_found(info.user_id));
        }
        let id = tables.issue_id();
        let created = CompanyInfo {
            id,
            company_name: info.company_name,
            tax_number: info.tax_number,
            industry: info.industry,
            registration_type: info.registration_type,
            taxpayer_nature: info.taxpayer_nature,
            index_standard_type: info.index_standard_type,
            uploaded_files: info.uploaded_files,
            upload_params: info.upload_params,
            user_id: info.user_id,
            status: info.status,
            created_at: Utc::now(),
        };
        tables.company_info.insert(id, created.clone());
        Ok(created)
    }

    async fn get_company_info(&self, id: i32) -> StoreResult<Option<CompanyInfo>> {
        Ok(self.tables.read().await.company_info.get(&id).cloned())
    }

    async fn latest_company_info(&self, tax_number: &str) -> StoreResult<Option<CompanyInfo>> {
        // ids grow monotonically, so the last match is the newest row
        Ok(self
            .tables
            .read()
            .await
            .company_info
            .values()
            .filter(|c| c.tax_number == tax_number)
            .last()
            .cloned())
    }

    async fn list_company_info(&self) -> StoreResult<Vec<CompanyInfo>> {
        Ok(self.tables.read().await.company_info.values().cloned().collect())
    }

    async fn list_company_info_by_user(&self, user_id: i32) -> StoreResult<Vec<CompanyInfo>> {
        Ok(self
            .tables
            .read()
            .await
            .company_info
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_company_info(&self, id: i32) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let removed = tables
            .company_info
            .remove(&id)
            .ok_or_else(|| TaxError::NotFound(format!("Company info {id} not found")))?;
        let still_referenced = tables
            .company_info
            .values()
            .any(|c| c.tax_number == removed.tax_number);
        if !still_referenced {
            tables.delete_reports_for_tax_number(&removed.tax_number);
        }
        Ok(())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn upsert_report(
        &self,
        key: &ReportKey,
        report_data: serde_json::Value,
        processing_user_id: i32,
    ) -> StoreResult<UpsertedReport> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&processing_user_id) {
            return Err(user_not_found(processing_user_id));
        }
        let type_name = key.report_type.as_str();
        let existing = tables.reports.values_mut().find(|r| {
            r.company_tax_number == key.tax_number
                && r.report_type == type_name
                && r.year == key.year
                && r.period == key.period
        });
        if let Some(report) = existing {
            report.report_data = report_data;
            report.updated_at = Utc::now();
            return Ok(UpsertedReport {
                report: report.clone(),
                created: false,
            });
        }

        let row = NewCompanyReport::from_key(key, report_data, processing_user_id);
        let id = tables.issue_id();
        let now = Utc::now();
        let report = CompanyReport {
            id,
            user_id: row.user_id,
            company_tax_number: row.company_tax_number,
            report_type: row.report_type,
            year: row.year,
            month: row.month,
            quarter: row.quarter,
            period: row.period,
            report_data: row.report_data,
            created_at: now,
            updated_at: now,
        };
        tables.reports.insert(id, report.clone());
        Ok(UpsertedReport {
            report,
            created: true,
        })
    }

    async fn get_report(&self, report_id: i32) -> StoreResult<Option<CompanyReport>> {
        Ok(self.tables.read().await.reports.get(&report_id).cloned())
    }

    async fn find_report(&self, key: &ReportKey) -> StoreResult<Option<CompanyReport>> {
        let type_name = key.report_type.as_str();
        Ok(self
            .tables
            .read()
            .await
            .reports
            .values()
            .find(|r| {
                r.company_tax_number == key.tax_number
                    && r.report_type == type_name
                    && r.year == key.year
                    && r.period == key.period
            })
            .cloned())
    }

    async fn list_reports(&self) -> StoreResult<Vec<CompanyReport>> {
        Ok(self.tables.read().await.reports.values().cloned().collect())
    }

    async fn list_reports_by_users(&self, user_ids: &[i32]) -> StoreResult<Vec<CompanyReport>> {
        Ok(self
            .tables
            .read()
            .await
            .reports
            .values()
            .filter(|r| user_ids.contains(&r.user_id))
            .cloned()
            .collect())
    }

    async fn delete_report(&self, report_id: i32) -> StoreResult<()> {
        if self.tables.write().await.delete_report(report_id) {
            Ok(())
        } else {
            Err(TaxError::NotFound(format!("Report {report_id} not found")))
        }
    }

    async fn count_reports(&self) -> StoreResult<i64> {
        Ok(self.tables.read().await.reports.len() as i64)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn record_transaction(
        &self,
        transaction: NewReportTransaction,
    ) -> StoreResult<ReportTransaction> {
        let mut tables = self.tables.write().await;
        let channel = tables
            .channels
            .get_mut(&transaction.channel_id)
            .ok_or_else(|| channel_not_found(transaction.channel_id))?;
        let remaining = &channel.balance - &transaction.cost;
        if remaining < BigDecimal::from(0) {
            return Err(TaxError::Validation("Insufficient channel balance".into()));
        }
        channel.balance = remaining;

        let id = tables.issue_id();
        let recorded = ReportTransaction {
            id,
            user_id: transaction.user_id,
            channel_id: transaction.channel_id,
            report_id: transaction.report_id,
            transaction_type: transaction.transaction_type,
            cost: transaction.cost,
            created_at: Utc::now(),
        };
        tables.transactions.insert(id, recorded.clone());
        Ok(recorded)
    }

    async fn list_transactions(&self) -> StoreResult<Vec<ReportTransaction>> {
        Ok(self
            .tables
            .read()
            .await
            .transactions
            .values()
            .rev()
            .cloned()
            .collect())
    }

    async fn list_transactions_by_channel(
        &self,
        channel_id: i32,
        limit: Option<i64>,
    ) -> StoreResult<Vec<ReportTransaction>> {
        let tables = self.tables.read().await;
        let matching = tables
            .transactions
            .values()
            .rev()
            .filter(|tx| tx.channel_id == channel_id)
            .cloned();
        Ok(match limit {
            Some(n) => matching.take(n.max(0) as usize).collect(),
            None => matching.collect(),
        })
    }

    async fn channel_stats(&self, channel_id: i32) -> StoreResult<TransactionStats> {
        let tables = self.tables.read().await;
        Ok(summarize(
            tables
                .transactions
                .values()
                .filter(|tx| tx.channel_id == channel_id),
        ))
    }

    async fn user_stats(&self, user_id: i32) -> StoreResult<TransactionStats> {
        let tables = self.tables.read().await;
        Ok(summarize(
            tables.transactions.values().filter(|tx| tx.user_id == user_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::models::{ReportType, TransactionKind, UserRole};
    use serde_json::json;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: format!("{username}@example.com"),
            password_hash: String::new(),
            first_name: None,
            last_name: None,
            role: UserRole::Level2.as_str().into(),
            is_admin: false,
            is_top_level_admin: false,
            first_level_channel_id: None,
            channel_id: None,
        }
    }

    fn new_channel(number: &str, balance: i64) -> NewChannel {
        NewChannel {
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
        }
    }

    #[tokio::test]
    async fn test_upsert_converges_to_one_row() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("operator")).await.unwrap();
        let key = ReportKey::new("91110000", ReportType::Monthly, 2024, Some(3)).unwrap();

        let first = store
            .upsert_report(&key, json!({"v": 1}), user.id)
            .await
            .unwrap();
        let second = store
            .upsert_report(&key, json!({"v": 2}), user.id)
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.report.id, second.report.id);
        let reports = store.list_reports().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report_data, json!({"v": 2}));
        assert_eq!(reports[0].month, Some(3));
        assert_eq!(reports[0].quarter, None);
    }

    #[tokio::test]
    async fn test_different_periods_are_distinct_rows() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("operator")).await.unwrap();
        for month in 1..=3 {
            let key = ReportKey::new("91110000", ReportType::Monthly, 2024, Some(month)).unwrap();
            store.upsert_report(&key, json!({}), user.id).await.unwrap();
        }
        let annual = ReportKey::new("91110000", ReportType::Annual, 2024, None).unwrap();
        store.upsert_report(&annual, json!({}), user.id).await.unwrap();
        assert_eq!(store.count_reports().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_deleting_last_company_info_removes_reports() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("operator")).await.unwrap();
        let first = store
            .create_company_info(NewCompanyInfo::placeholder("9111", user.id))
            .await
            .unwrap();
        let second = store
            .create_company_info(NewCompanyInfo::placeholder("9111", user.id))
            .await
            .unwrap();
        let key = ReportKey::new("9111", ReportType::Annual, 2023, None).unwrap();
        store.upsert_report(&key, json!({}), user.id).await.unwrap();

        let latest = store.latest_company_info("9111").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);

        store.delete_company_info(first.id).await.unwrap();
        assert_eq!(store.count_reports().await.unwrap(), 1);

        store.delete_company_info(second.id).await.unwrap();
        assert_eq!(store.count_reports().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_transaction_debits_and_never_goes_negative() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("operator")).await.unwrap();
        let channel = store.create_channel(new_channel("C-1", 10)).await.unwrap();

        store
            .record_transaction(NewReportTransaction {
                user_id: user.id,
                channel_id: channel.id,
                report_id: None,
                transaction_type: TransactionKind::Upload.as_str().into(),
                cost: BigDecimal::from(4),
            })
            .await
            .unwrap();
        let err = store
            .record_transaction(NewReportTransaction {
                user_id: user.id,
                channel_id: channel.id,
                report_id: None,
                transaction_type: TransactionKind::Download.as_str().into(),
                cost: BigDecimal::from(7),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let channel = store.get_channel(channel.id).await.unwrap().unwrap();
        assert_eq!(channel.balance, BigDecimal::from(6));
        let stats = store.channel_stats(channel.id).await.unwrap();
        assert_eq!(stats.total_uploads, 1);
        assert_eq!(stats.total_downloads, 0);
        assert_eq!(stats.total_cost, BigDecimal::from(4));
    }

    #[tokio::test]
    async fn test_delete_user_cascades() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("operator")).await.unwrap();
        store
            .create_company_info(NewCompanyInfo::placeholder("9111", user.id))
            .await
            .unwrap();
        let key = ReportKey::new("9111", ReportType::Quarterly, 2024, Some(2)).unwrap();
        store.upsert_report(&key, json!({}), user.id).await.unwrap();

        store.delete_user(user.id).await.unwrap();
        assert!(store.list_company_info().await.unwrap().is_empty());
        assert_eq!(store.count_reports().await.unwrap(), 0);
        assert!(store.delete_user(user.id).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_channel_number_conflicts() {
        let store = MemoryStore::new();
        store.create_channel(new_channel("C-1", 0)).await.unwrap();
        let err = store.create_channel(new_channel("C-1", 0)).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }
}
