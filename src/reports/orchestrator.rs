//! Upload and report-download flows.
//!
//! Upload: authenticate, load the cached session, validate the file set,
//! submit once, then record company info, upload parameters and the ledger
//! entry. Download: authenticate, load the session, query the remote report,
//! then upsert it and record the ledger entry. Everything that can be
//! checked locally is checked before the remote call.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::validation::{report_key_for, validate_period_params, validate_upload};
use crate::cache::{SessionCredential, TokenCache, UploadParams};
use crate::core::config::{BillingConfig, GatewayConfig};
use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::{
    NewCompanyInfo, NewReportTransaction, ReportKey, ReportType, TransactionKind, User,
};
use crate::gateway::{FileUpload, QueryOutcome, ReportQuery, TaxGateway, UploadParameters};
use crate::security::IdentityResolver;
use crate::store::{ChannelStore, LedgerStore, Store};

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub params: UploadParameters,
    pub files: Vec<FileUpload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub status: i64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub company_info_ids: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub date_source: i32,
    pub date_time: String,
    pub date_type: i32,
    pub year: i32,
    pub report_type: ReportType,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReceipt {
    pub status: i64,
    pub msg: String,
    pub data: serde_json::Value,
    pub report_id: i32,
    pub created: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            retries: config.query_retries,
            backoff: config.retry_backoff(),
        }
    }
}

#[derive(Clone)]
pub struct ReportOrchestrator {
    store: Arc<dyn Store>,
    cache: TokenCache,
    gateway: Arc<dyn TaxGateway>,
    identity: IdentityResolver,
    billing: BillingConfig,
    retry: RetryPolicy,
}

impl ReportOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        cache: TokenCache,
        gateway: Arc<dyn TaxGateway>,
        identity: IdentityResolver,
        billing: BillingConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            gateway,
            identity,
            billing,
            retry,
        }
    }

    /// Authenticated and TokenCached states shared by both flows.
    async fn open_session(
        &self,
        local_user_id: i32,
        system_user_id: i64,
    ) -> TaxResult<(User, SessionCredential)> {
        let session = self.identity.verify_pair(local_user_id, system_user_id).await?;
        let credential = session.credential;

        if credential.token.is_empty() || credential.taxpayer_no.is_empty() {
            return Err(TaxError::RemoteUnauthenticated(
                "Session credential is incomplete. Please register again.".into(),
            ));
        }

        match self.cache.find_by_token(&credential.token).await? {
            Some(indexed) if indexed.system_user_id == system_user_id => {}
            _ => {
                return Err(TaxError::Unauthenticated(
                    "Invalid or expired token. Please login again.".into(),
                ))
            }
        }

        Ok((session.user, credential))
    }

    /// Channel to bill, after checking it can cover `cost`. Users outside any
    /// channel can only perform free operations and leave no ledger entry.
    async fn billing_channel(&self, user: &User, cost: &BigDecimal) -> TaxResult<Option<i32>> {
        let Some(channel_id) = user.channel_id else {
            if cost.is_zero() {
                return Ok(None);
            }
            return Err(TaxError::Validation(
                "User is not assigned to a channel and cannot be billed".into(),
            ));
        };

        let channel = self
            .store
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| TaxError::NotFound(format!("Channel {channel_id} not found")))?;
        if &channel.balance < cost {
            return Err(TaxError::Validation(format!(
                "Insufficient channel balance: {} available, {} required",
                channel.balance, cost
            )));
        }
        Ok(Some(channel_id))
    }

    async fn record_charge(
        &self,
        user: &User,
        channel_id: Option<i32>,
        report_id: Option<i32>,
        kind: TransactionKind,
        cost: &BigDecimal,
    ) -> TaxResult<()> {
        let Some(channel_id) = channel_id else {
            return Ok(());
        };
        let transaction = self
            .store
            .record_transaction(NewReportTransaction {
                user_id: user.id,
                channel_id,
                report_id,
                transaction_type: kind.as_str().to_string(),
                cost: cost.clone(),
            })
            .await?;
        info!(
            "Recorded {} transaction {} for user {} on channel {channel_id} (cost {cost})",
            kind.as_str(),
            transaction.id,
            user.id
        );
        Ok(())
    }

    pub async fn upload(
        &self,
        local_user_id: i32,
        system_user_id: i64,
        request: UploadRequest,
    ) -> TaxResult<UploadReceipt> {
        let (user, credential) = self.open_session(local_user_id, system_user_id).await?;

        validate_upload(request.params, &request.files)?;
        let cost = self.billing.upload_cost.clone();
        let channel_id = self.billing_channel(&user, &cost).await?;

        let outcome = self
            .gateway
            .submit_files(
                &credential.token,
                &credential.taxpayer_no,
                request.params,
                &request.files,
            )
            .await?;
        info!(
            "Upload accepted for taxpayer {} by system user {system_user_id}: {}",
            credential.taxpayer_no, outcome.message
        );

        let now = Utc::now();
        let upload_params = UploadParams {
            date_source: request.params.date_source,
            date_type: request.params.date_type,
            year: request.params.year,
            timestamp: now,
        };
        let filenames: Vec<serde_json::Value> = request
            .files
            .iter()
            .map(|f| serde_json::Value::String(f.filename.clone()))
            .collect();

        let registration = self.cache.get_registration(system_user_id).await?;
        let mut info = NewCompanyInfo::placeholder(&credential.taxpayer_no, user.id);
        if let Some(meta) = registration {
            info.company_name = meta.company_name;
            info.industry = Some(meta.industry);
            info.registration_type = Some(meta.registration_type);
            info.taxpayer_nature = Some(meta.taxpayer_nature);
            info.index_standard_type = Some(meta.index_standard_type);
        } else {
            warn!("No registration metadata cached for system user {system_user_id}");
        }
        info.uploaded_files = serde_json::Value::Array(filenames);
        info.upload_params = Some(serde_json::to_value(&upload_params)?);
        info.status = "uploaded".into();

        let company = self.store.create_company_info(info).await?;
        self.cache.put_upload_params(user.id, &upload_params).await?;
        self.record_charge(&user, channel_id, None, TransactionKind::Upload, &cost)
            .await?;

        Ok(UploadReceipt {
            status: outcome.status,
            message: outcome.message,
            timestamp: now,
            company_info_ids: vec![company.id],
        })
    }

    async fn query_with_retry(
        &self,
        credential: &SessionCredential,
        query: &ReportQuery,
    ) -> TaxResult<QueryOutcome> {
        let mut attempt = 0;
        loop {
            match self
                .gateway
                .query_report(&credential.token, &credential.taxpayer_no, query)
                .await
            {
                Err(e) if e.is_retryable() && attempt < self.retry.retries => {
                    attempt += 1;
                    warn!(
                        "Report query failed ({}), retry {attempt}/{}",
                        e.message(),
                        self.retry.retries
                    );
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                result => return result,
            }
        }
    }

    /// Makes sure some CompanyInfo row carries `key.tax_number`.
    async fn ensure_company_info(
        &self,
        key: &ReportKey,
        user: &User,
        system_user_id: i64,
    ) -> TaxResult<()> {
        if self
            .store
            .latest_company_info(&key.tax_number)
            .await?
            .is_some()
        {
            return Ok(());
        }
        let mut info = NewCompanyInfo::placeholder(&key.tax_number, user.id);
        if let Some(meta) = self.cache.get_registration(system_user_id).await? {
            info.company_name = meta.company_name;
            info.industry = Some(meta.industry);
            info.registration_type = Some(meta.registration_type);
            info.taxpayer_nature = Some(meta.taxpayer_nature);
            info.index_standard_type = Some(meta.index_standard_type);
        }
        self.store.create_company_info(info).await?;
        Ok(())
    }

    pub async fn download(
        &self,
        local_user_id: i32,
        system_user_id: i64,
        request: DownloadRequest,
    ) -> TaxResult<DownloadReceipt> {
        let (user, credential) = self.open_session(local_user_id, system_user_id).await?;

        validate_period_params(request.date_source, request.date_type, request.year)?;
        let key = report_key_for(
            &credential.taxpayer_no,
            request.report_type,
            request.year,
            &request.date_time,
        )?;
        let cost = self.billing.download_cost.clone();
        let channel_id = self.billing_channel(&user, &cost).await?;

        let query = ReportQuery {
            date_source: request.date_source,
            date_type: request.date_type,
            year: request.year,
            date_time: request.date_time.clone(),
            report_type: key.report_type,
            period: key.month().or(key.quarter()),
        };
        let outcome = self.query_with_retry(&credential, &query).await?;

        self.ensure_company_info(&key, &user, system_user_id).await?;
        let upserted = self
            .store
            .upsert_report(&key, outcome.payload.clone(), user.id)
            .await?;
        info!(
            "{} {} report {} for taxpayer {} ({} period {})",
            if upserted.created { "Stored" } else { "Refreshed" },
            key.report_type,
            upserted.report.id,
            key.tax_number,
            key.year,
            key.period
        );

        self.record_charge(
            &user,
            channel_id,
            Some(upserted.report.id),
            TransactionKind::Download,
            &cost,
        )
        .await?;

        Ok(DownloadReceipt {
            status: outcome.status,
            msg: outcome.message,
            data: outcome.payload,
            report_id: upserted.report.id,
            created: upserted.created,
            timestamp: Utc::now(),
        })
    }
}
