//! Client for the remote tax-risk reporting API.
//!
//! Every remote reply is the envelope `{status, msg, data}`. The gateway
//! validates it into typed results and never retries on its own.

mod envelope;
mod http;

pub use envelope::{parse_expiration_time, RemoteEnvelope};
pub use http::HttpTaxGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::TaxResult;
use crate::core::shared::models::ReportType;

/// Company classification sent when registering a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRegistration {
    pub company_name: String,
    pub index_standard_type: i32,
    pub industry: i32,
    pub registration_type: i32,
    pub taxpayer_nature: i32,
    pub taxpayer_no: String,
    pub user_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredTenant {
    pub token: String,
    pub system_user_id: i64,
    pub tenant_id: String,
    pub expiration_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParameters {
    pub date_source: i32,
    pub date_type: i32,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportQuery {
    pub date_source: i32,
    pub date_type: i32,
    pub year: i32,
    /// Raw period value as the caller sent it.
    pub date_time: String,
    pub report_type: ReportType,
    /// Month or quarter, `None` for annual reports.
    pub period: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitOutcome {
    pub status: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub status: i64,
    pub message: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait TaxGateway: Send + Sync {
    async fn register_tenant(&self, registration: &TenantRegistration)
        -> TaxResult<RegisteredTenant>;

    /// Caller must have validated the file set; this is a single POST.
    async fn submit_files(
        &self,
        token: &str,
        taxpayer_no: &str,
        params: UploadParameters,
        files: &[FileUpload],
    ) -> TaxResult<SubmitOutcome>;

    async fn query_report(
        &self,
        token: &str,
        taxpayer_no: &str,
        query: &ReportQuery,
    ) -> TaxResult<QueryOutcome>;
}
