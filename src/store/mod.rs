//! Persistence for users, channels, company info, reports and the billing ledger.
//!
//! Two backends implement the same traits: [`PgStore`] (diesel over an r2d2
//! pool) for deployments and [`MemoryStore`] for tests and local runs.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use bigdecimal::BigDecimal;

use crate::core::error::TaxError;
use crate::core::shared::models::{
    Channel, ChannelChanges, CompanyInfo, CompanyReport, NewChannel, NewCompanyInfo,
    NewReportTransaction, NewUser, ReportKey, ReportTransaction, TransactionStats, User,
    UserChanges,
};

/// Result type for store operations
pub type StoreResult<T> = Result<T, TaxError>;

/// Outcome of a report upsert.
#[derive(Debug, Clone)]
pub struct UpsertedReport {
    pub report: CompanyReport,
    /// `false` when an existing row for the same key was refreshed.
    pub created: bool,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    async fn get_user(&self, user_id: i32) -> StoreResult<Option<User>>;

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn list_users(&self) -> StoreResult<Vec<User>>;

    /// Users that belong to the channel through `channel_id`.
    async fn list_users_by_channel(&self, channel_id: i32) -> StoreResult<Vec<User>>;

    async fn update_user(&self, user_id: i32, changes: UserChanges) -> StoreResult<User>;

    /// Removes the user together with their company info, reports and ledger entries.
    async fn delete_user(&self, user_id: i32) -> StoreResult<()>;

    async fn first_admin(&self) -> StoreResult<Option<User>>;

    async fn count_users(&self) -> StoreResult<i64>;
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn create_channel(&self, channel: NewChannel) -> StoreResult<Channel>;

    async fn get_channel(&self, channel_id: i32) -> StoreResult<Option<Channel>>;

    async fn list_channels(&self) -> StoreResult<Vec<Channel>>;

    async fn update_channel(&self, channel_id: i32, changes: ChannelChanges)
        -> StoreResult<Channel>;

    async fn delete_channel(&self, channel_id: i32) -> StoreResult<()>;

    /// Adds `delta` (which may be negative) to the balance. Fails with a
    /// validation error instead of letting the balance drop below zero.
    async fn adjust_balance(&self, channel_id: i32, delta: BigDecimal) -> StoreResult<Channel>;

    async fn count_channels(&self) -> StoreResult<i64>;
}

#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn create_company_info(&self, info: NewCompanyInfo) -> StoreResult<CompanyInfo>;

    async fn get_company_info(&self, id: i32) -> StoreResult<Option<CompanyInfo>>;

    /// Most recent row for a tax number; tax numbers are not unique.
    async fn latest_company_info(&self, tax_number: &str) -> StoreResult<Option<CompanyInfo>>;

    async fn list_company_info(&self) -> StoreResult<Vec<CompanyInfo>>;

    async fn list_company_info_by_user(&self, user_id: i32) -> StoreResult<Vec<CompanyInfo>>;

    /// Deleting the last row that carries a tax number also deletes the
    /// reports stored under it.
    async fn delete_company_info(&self, id: i32) -> StoreResult<()>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Inserts or refreshes the single row for `key` in one atomic step.
    async fn upsert_report(
        &self,
        key: &ReportKey,
        report_data: serde_json::Value,
        processing_user_id: i32,
    ) -> StoreResult<UpsertedReport>;

    async fn get_report(&self, report_id: i32) -> StoreResult<Option<CompanyReport>>;

    async fn find_report(&self, key: &ReportKey) -> StoreResult<Option<CompanyReport>>;

    async fn list_reports(&self) -> StoreResult<Vec<CompanyReport>>;

    async fn list_reports_by_users(&self, user_ids: &[i32]) -> StoreResult<Vec<CompanyReport>>;

    async fn delete_report(&self, report_id: i32) -> StoreResult<()>;

    async fn count_reports(&self) -> StoreResult<i64>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Appends a ledger entry and debits its cost from the channel balance
    /// in the same transaction.
    async fn record_transaction(
        &self,
        transaction: NewReportTransaction,
    ) -> StoreResult<ReportTransaction>;

    async fn list_transactions(&self) -> StoreResult<Vec<ReportTransaction>>;

    /// Newest first.
    async fn list_transactions_by_channel(
        &self,
        channel_id: i32,
        limit: Option<i64>,
    ) -> StoreResult<Vec<ReportTransaction>>;

    async fn channel_stats(&self, channel_id: i32) -> StoreResult<TransactionStats>;

    async fn user_stats(&self, user_id: i32) -> StoreResult<TransactionStats>;
}

pub trait Store: UserStore + ChannelStore + CompanyStore + ReportStore + LedgerStore {}

impl<T> Store for T where T: UserStore + ChannelStore + CompanyStore + ReportStore + LedgerStore {}

pub(crate) fn summarize<'a>(
    transactions: impl IntoIterator<Item = &'a ReportTransaction>,
) -> TransactionStats {
    let mut stats = TransactionStats::default();
    for tx in transactions {
        match tx.transaction_type.as_str() {
            "upload" => stats.total_uploads += 1,
            "download" => stats.total_downloads += 1,
            _ => {}
        }
        stats.total_cost += &tx.cost;
    }
    stats
}
