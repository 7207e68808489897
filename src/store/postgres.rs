//! Postgres store. Diesel is synchronous, so every call hops onto the
//! blocking pool with its own pooled connection.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel::PgConnection;

use super::{
    summarize, ChannelStore, CompanyStore, LedgerStore, ReportStore, StoreResult, UpsertedReport,
    UserStore,
};
use crate::core::error::TaxError;
use crate::core::shared::models::{
    channels, company_info, company_reports, report_transactions, users, Channel,
    ChannelChanges, CompanyInfo, CompanyReport, NewChannel, NewCompanyInfo, NewCompanyReport,
    NewReportTransaction, NewUser, ReportKey, ReportTransaction, TransactionStats, User,
    UserChanges,
};
use crate::core::shared::utils::DbPool;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}

fn affected_or_not_found(affected: usize, what: String) -> StoreResult<()> {
    if affected == 0 {
        Err(TaxError::NotFound(format!("{what} not found")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.run(move |conn| {
            diesel::insert_into(users::table)
                .values(&user)
                .returning(User::as_returning())
                .get_result(conn)
                .map_err(TaxError::from)
        })
        .await
    }

    async fn get_user(&self, user_id: i32) -> StoreResult<Option<User>> {
        self.run(move |conn| {
            users::table
                .find(user_id)
                .select(User::as_select())
                .first(conn)
                .optional()
                .map_err(TaxError::from)
        })
        .await
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let username = username.to_string();
        self.run(move |conn| {
            users::table
                .filter(users::username.eq(username))
                .select(User::as_select())
                .first(conn)
                .optional()
                .map_err(TaxError::from)
        })
        .await
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.run(|conn| {
            users::table
                .order(users::id.asc())
                .select(User::as_select())
                .load(conn)
                .map_err(TaxError::from)
        })
        .await
    }

    async fn list_users_by_channel(&self, channel_id: i32) -> StoreResult<Vec<User>> {
        self.run(move |conn| {
            users::table
                .filter(users::channel_id.eq(channel_id))
                .order(users::id.asc())
                .select(User::as_select())
                .load(conn)
                .map_err(TaxError::from)
        })
        .await
    }

    async fn update_user(&self, user_id: i32, changes: UserChanges) -> StoreResult<User> {
        self.run(move |conn| {
            diesel::update(users::table.find(user_id))
                .set(&changes)
                .returning(User::as_returning())
                .get_result(conn)
                .optional()?
                .ok_or_else(|| TaxError::NotFound(format!("User {user_id} not found")))
        })
        .await
    }

    async fn delete_user(&self, user_id: i32) -> StoreResult<()> {
        // company_info, company_reports and report_transactions cascade in the schema
        self.run(move |conn| {
            let affected = diesel::delete(users::table.find(user_id)).execute(conn)?;
            affected_or_not_found(affected, format!("User {user_id}"))
        })
        .await
    }

    async fn first_admin(&self) -> StoreResult<Option<User>> {
        self.run(|conn| {
            users::table
                .filter(users::is_admin.eq(true))
                .order(users::id.asc())
                .select(User::as_select())
                .first(conn)
                .optional()
                .map_err(TaxError::from)
        })
        .await
    }

    async fn count_users(&self) -> StoreResult<i64> {
        self.run(|conn| users::table.count().get_result(conn).map_err(TaxError::from))
            .await
    }
}

#[async_trait]
impl ChannelStore for PgStore {
    async fn create_channel(&self, channel: NewChannel) -> StoreResult<Channel> {
        self.run(move |conn| {
            diesel::insert_into(channels::table)
                .values(&channel)
                .returning(Channel::as_returning())
                .get_result(conn)
                .map_err(TaxError::from)
        })
        .await
    }

    async fn get_channel(&self, channel_id: i32) -> StoreResult<Option<Channel>> {
        self.run(move |conn| {
            channels::table
                .find(channel_id)
                .select(Channel::as_select())
                .first(conn)
                .optional()
                .map_err(TaxError::from)
        })
        .await
    }

    async fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        self.run(|conn| {
            channels::table
                .order(channels::id.asc())
                .select(Channel::as_select())
                .load(conn)
                .map_err(TaxError::from)
        })
        .await
    }

    async fn update_channel(
        &self,
        channel_id: i32,
        changes: ChannelChanges,
    ) -> StoreResult<Channel> {
        self.run(move |conn| {
            diesel::update(channels::table.find(channel_id))
                .set(&changes)
                .returning(Channel::as_returning())
                .get_result(conn)
                .optional()?
                .ok_or_else(|| TaxError::NotFound(format!("Channel {channel_id} not found")))
        })
        .await
    }

    async fn delete_channel(&self, channel_id: i32) -> StoreResult<()> {
        self.run(move |conn| {
            let affected = diesel::delete(channels::table.find(channel_id)).execute(conn)?;
            affected_or_not_found(affected, format!("Channel {channel_id}"))
        })
        .await
    }

    async fn adjust_balance(&self, channel_id: i32, delta: BigDecimal) -> StoreResult<Channel> {
        self.run(move |conn| {
            conn.transaction(|conn| adjust_balance_in(conn, channel_id, &delta))
        })
        .await
    }

    async fn count_channels(&self) -> StoreResult<i64> {
        self.run(|conn| {
            channels::table
                .count()
                .get_result(conn)
                .map_err(TaxError::from)
        })
        .await
    }
}

/// Guarded update: the WHERE clause refuses to take the balance below zero.
fn adjust_balance_in(
    conn: &mut PgConnection,
    channel_id: i32,
    delta: &BigDecimal,
) -> StoreResult<Channel> {
    let updated = diesel::update(
        channels::table
            .find(channel_id)
            .filter((channels::balance + delta.clone()).ge(BigDecimal::from(0))),
    )
    .set(channels::balance.eq(channels::balance + delta.clone()))
    .returning(Channel::as_returning())
    .get_result(conn)
    .optional()?;

    match updated {
        Some(channel) => Ok(channel),
        None => {
            let exists: i64 = channels::table
                .find(channel_id)
                .count()
                .get_result(conn)?;
            if exists == 0 {
                Err(TaxError::NotFound(format!("Channel {channel_id} not found")))
            } else {
                Err(TaxError::Validation("Insufficient channel balance".into()))
            }
        }
    }
}

#[async_trait]
impl CompanyStore for PgStore {
    async fn create_company_info(&self, info: NewCompanyInfo) -> StoreResult<CompanyInfo> {
        self.run(move |conn| {
            diesel::insert_into(company_info::table)
                .values(&info)
                .returning(CompanyInfo::as_returning())
                .get_result(conn)
                .map_err(TaxError::from)
        })
        .await
    }

    async fn get_company_info(&self, id: i32) -> StoreResult<Option<CompanyInfo>> {
        self.run(move |conn| {
            company_info::table
                .find(id)
                .select(CompanyInfo::as_select())
                .first(conn)
                .optional()
                .map_err(TaxError::from)
        })
        .await
    }

    async fn latest_company_info(&self, tax_number: &str) -> StoreResult<Option<CompanyInfo>> {
        let tax_number = tax_number.to_string();
        self.run(move |conn| {
            company_info::table
                .filter(company_info::tax_number.eq(tax_number))
                .order((company_info::created_at.desc(), company_info::id.desc()))
                .select(CompanyInfo::as_select())
                .first(conn)
                .optional()
                .map_err(TaxError::from)
        })
        .await
    }

    async fn list_company_info(&self) -> StoreResult<Vec<CompanyInfo>> {
        self.run(|conn| {
            company_info::table
                .order(company_info::id.asc())
                .select(CompanyInfo::as_select())
                .load(conn)
                .map_err(TaxError::from)
        })
        .await
    }

    async fn list_company_info_by_user(&self, user_id: i32) -> StoreResult<Vec<CompanyInfo>> {
        self.run(move |conn| {
            company_info::table
                .filter(company_info::user_id.eq(user_id))
                .order(company_info::id.asc())
                .select(CompanyInfo::as_select())
                .load(conn)
                .map_err(TaxError::from)
        })
        .await
    }

    async fn delete_company_info(&self, id: i32) -> StoreResult<()> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let tax_number: String = diesel::delete(company_info::table.find(id))
                    .returning(company_info::tax_number)
                    .get_result(conn)
                    .optional()?
                    .ok_or_else(|| TaxError::NotFound(format!("Company info {id} not found")))?;

                let remaining: i64 = company_info::table
                    .filter(company_info::tax_number.eq(&tax_number))
                    .count()
                    .get_result(conn)?;
                if remaining == 0 {
                    diesel::delete(
                        company_reports::table
                            .filter(company_reports::company_tax_number.eq(&tax_number)),
                    )
                    .execute(conn)?;
                }
                Ok(())
            })
        })
        .await
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn upsert_report(
        &self,
        key: &ReportKey,
        report_data: serde_json::Value,
        processing_user_id: i32,
    ) -> StoreResult<UpsertedReport> {
        let row = NewCompanyReport::from_key(key, report_data, processing_user_id);
        self.run(move |conn| {
            let report: CompanyReport = diesel::insert_into(company_reports::table)
                .values(&row)
                .on_conflict((
                    company_reports::company_tax_number,
                    company_reports::report_type,
                    company_reports::year,
                    company_reports::period,
                ))
                .do_update()
                .set((
                    company_reports::report_data.eq(&row.report_data),
                    company_reports::updated_at.eq(diesel::dsl::now),
                ))
                .returning(CompanyReport::as_returning())
                .get_result(conn)?;

            // NOW() is fixed per transaction, so a fresh insert has equal timestamps
            let created = report.created_at == report.updated_at;
            Ok(UpsertedReport { report, created })
        })
        .await
    }

    async fn get_report(&self, report_id: i32) -> StoreResult<Option<CompanyReport>> {
        self.run(move |conn| {
            company_reports::table
                .find(report_id)
                .select(CompanyReport::as_select())
                .first(conn)
                .optional()
                .map_err(TaxError::from)
        })
        .await
    }

    async fn find_report(&self, key: &ReportKey) -> StoreResult<Option<CompanyReport>> {
        let key = key.clone();
        self.run(move |conn| {
            company_reports::table
                .filter(company_reports::company_tax_number.eq(&key.tax_number))
                .filter(company_reports::report_type.eq(key.report_type.as_str()))
                .filter(company_reports::year.eq(key.year))
                .filter(company_reports::period.eq(key.period))
                .select(CompanyReport::as_select())
                .first(conn)
                .optional()
                .map_err(TaxError::from)
        })
        .await
    }

    async fn list_reports(&self) -> StoreResult<Vec<CompanyReport>> {
        self.run(|conn| {
            company_reports::table
                .order(company_reports::updated_at.desc())
                .select(CompanyReport::as_select())
                .load(conn)
                .map_err(TaxError::from)
        })
        .await
    }

    async fn list_reports_by_users(&self, user_ids: &[i32]) -> StoreResult<Vec<CompanyReport>> {
        let user_ids = user_ids.to_vec();
        self.run(move |conn| {
            company_reports::table
                .filter(company_reports::user_id.eq_any(user_ids))
                .order(company_reports::updated_at.desc())
                .select(CompanyReport::as_select())
                .load(conn)
                .map_err(TaxError::from)
        })
        .await
    }

    async fn delete_report(&self, report_id: i32) -> StoreResult<()> {
        self.run(move |conn| {
            let affected = diesel::delete(company_reports::table.find(report_id)).execute(conn)?;
            affected_or_not_found(affected, format!("Report {report_id}"))
        })
        .await
    }

    async fn count_reports(&self) -> StoreResult<i64> {
        self.run(|conn| {
            company_reports::table
                .count()
                .get_result(conn)
                .map_err(TaxError::from)
        })
        .await
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn record_transaction(
        &self,
        transaction: NewReportTransaction,
    ) -> StoreResult<ReportTransaction> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let debit = -transaction.cost.clone();
                adjust_balance_in(conn, transaction.channel_id, &debit)?;
                diesel::insert_into(report_transactions::table)
                    .values(&transaction)
                    .returning(ReportTransaction::as_returning())
                    .get_result(conn)
                    .map_err(TaxError::from)
            })
        })
        .await
    }

    async fn list_transactions(&self) -> StoreResult<Vec<ReportTransaction>> {
        self.run(|conn| {
            report_transactions::table
                .order((
                    report_transactions::created_at.desc(),
                    report_transactions::id.desc(),
                ))
                .select(ReportTransaction::as_select())
                .load(conn)
                .map_err(TaxError::from)
        })
        .await
    }

    async fn list_transactions_by_channel(
        &self,
        channel_id: i32,
        limit: Option<i64>,
    ) -> StoreResult<Vec<ReportTransaction>> {
        self.run(move |conn| {
            let mut query = report_transactions::table
                .filter(report_transactions::channel_id.eq(channel_id))
                .order((
                    report_transactions::created_at.desc(),
                    report_transactions::id.desc(),
                ))
                .select(ReportTransaction::as_select())
                .into_boxed();
            if let Some(n) = limit {
                query = query.limit(n);
            }
            query.load(conn).map_err(TaxError::from)
        })
        .await
    }

    async fn channel_stats(&self, channel_id: i32) -> StoreResult<TransactionStats> {
        let transactions: Vec<ReportTransaction> =
            self.list_transactions_by_channel(channel_id, None).await?;
        Ok(summarize(&transactions))
    }

    async fn user_stats(&self, user_id: i32) -> StoreResult<TransactionStats> {
        let transactions: Vec<ReportTransaction> = self
            .run(move |conn| {
                report_transactions::table
                    .filter(report_transactions::user_id.eq(user_id))
                    .select(ReportTransaction::as_select())
                    .load(conn)
                    .map_err(TaxError::from)
            })
            .await?;
        Ok(summarize(&transactions))
    }
}
