use log::info;
use serde::{Deserialize, Serialize};

use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::{NewCompanyInfo, NewUser, ReportKey, ReportType, User, UserRole};
use crate::store::{CompanyStore, ReportStore, Store, UserStore};

#[derive(Debug, Clone, Deserialize)]
pub struct StoreReportRequest {
    /// External system user the report was produced for.
    pub user_id: i64,
    pub company_tax_number: String,
    pub report_type: String,
    pub year: i32,
    pub month: Option<i32>,
    pub quarter: Option<i32>,
    pub report_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredReport {
    pub message: String,
    pub report_id: i32,
    pub created: bool,
}

fn key_from_request(request: &StoreReportRequest) -> TaxResult<ReportKey> {
    let report_type: ReportType = request
        .report_type
        .parse()
        .map_err(|_| TaxError::Validation("Invalid report type".into()))?;
    let period = match report_type {
        ReportType::Annual => None,
        ReportType::Monthly => request.month,
        ReportType::Quarterly => request.quarter,
    };
    ReportKey::new(&request.company_tax_number, report_type, request.year, period)
}

/// Picks the local user a manually stored report is attributed to: whoever
/// initiated the latest company info for the tax number, else the first
/// admin, else a dedicated system account.
async fn processing_user(
    store: &dyn Store,
    tax_number: &str,
    system_user_id: i64,
) -> TaxResult<(User, bool)> {
    if let Some(info) = store.latest_company_info(tax_number).await? {
        if let Some(user) = store.get_user(info.user_id).await? {
            return Ok((user, true));
        }
    }
    if let Some(admin) = store.first_admin().await? {
        return Ok((admin, false));
    }

    let username = format!("system_user_{system_user_id}");
    if let Some(existing) = store.get_user_by_username(&username).await? {
        return Ok((existing, false));
    }
    let user = store
        .create_user(NewUser {
            username,
            email: format!("system_{system_user_id}@system.local"),
            password_hash: String::new(),
            first_name: None,
            last_name: None,
            role: UserRole::System.as_str().into(),
            is_admin: false,
            is_top_level_admin: false,
            first_level_channel_id: None,
            channel_id: None,
        })
        .await?;
    info!("Created system user {} for manual report storage", user.id);
    Ok((user, false))
}

pub async fn store_report(store: &dyn Store, request: StoreReportRequest) -> TaxResult<StoredReport> {
    let key = key_from_request(&request)?;
    if !request.report_data.is_object() {
        return Err(TaxError::Validation("report_data must be a JSON object".into()));
    }

    let (user, has_company) =
        processing_user(store, &key.tax_number, request.user_id).await?;
    if !has_company && store.latest_company_info(&key.tax_number).await?.is_none() {
        store
            .create_company_info(NewCompanyInfo::placeholder(&key.tax_number, user.id))
            .await?;
    }

    let upserted = store
        .upsert_report(&key, request.report_data, user.id)
        .await?;
    let message = if upserted.created {
        "Report stored successfully"
    } else {
        "Report updated successfully"
    };
    Ok(StoredReport {
        message: message.into(),
        report_id: upserted.report.id,
        created: upserted.created,
    })
}
