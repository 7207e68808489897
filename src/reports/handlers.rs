use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use chrono::{Datelike, Utc};
use log::info;
use serde::Deserialize;
use serde_json::Value;

use super::manual::{store_report as store_report_service, StoreReportRequest, StoredReport};
use super::orchestrator::{DownloadReceipt, DownloadRequest, UploadReceipt, UploadRequest};
use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::ReportType;
use crate::core::shared::state::AppState;
use crate::gateway::{FileUpload, UploadParameters};
use crate::security::AuthenticatedUser;

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    #[serde(alias = "dateSource")]
    pub date_source: Option<i32>,
    #[serde(alias = "dateType")]
    pub date_type: Option<i32>,
    pub year: Option<i32>,
}

fn form_int(name: &str, raw: &str) -> TaxResult<i32> {
    raw.trim()
        .parse()
        .map_err(|_| TaxError::Validation(format!("{name} must be an integer, got {raw:?}")))
}

pub async fn upload_company_info(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(system_user_id): Path<i64>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> TaxResult<Json<UploadReceipt>> {
    let mut date_source = query.date_source;
    let mut date_type = query.date_type;
    let mut year = query.year;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                files.push(FileUpload {
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "date_source" | "dateSource" | "date_type" | "dateType" | "year" => {
                let text = field.text().await?;
                let value = Some(form_int(&name, &text)?);
                match name.as_str() {
                    "date_source" | "dateSource" => date_source = value,
                    "date_type" | "dateType" => date_type = value,
                    _ => year = value,
                }
            }
            _ => {}
        }
    }

    let missing = |field: &str| TaxError::Validation(format!("{field} is required"));
    let params = UploadParameters {
        date_source: date_source.ok_or_else(|| missing("date_source"))?,
        date_type: date_type.ok_or_else(|| missing("date_type"))?,
        year: year.ok_or_else(|| missing("year"))?,
    };
    info!(
        "User {} uploading {} files for system user {system_user_id}",
        user.id,
        files.len()
    );

    let receipt = state
        .orchestrator()
        .upload(user.id, system_user_id, UploadRequest { params, files })
        .await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadBody {
    pub date_source: Option<Value>,
    pub date_time: Option<Value>,
    pub date_type: Option<Value>,
    pub year: Option<Value>,
    pub report_type: Option<String>,
}

/// Remote clients send these as numbers or numeric strings.
fn json_int(name: &str, value: Option<&Value>, default: i32) -> TaxResult<i32> {
    match value {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| TaxError::Validation(format!("{name} is out of range"))),
        Some(Value::String(s)) => form_int(name, s),
        Some(_) => Err(TaxError::Validation(format!("{name} must be an integer"))),
    }
}

fn json_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "0".into(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl DownloadBody {
    pub fn into_request(self) -> TaxResult<DownloadRequest> {
        let report_type = match self.report_type.as_deref() {
            None | Some("") => ReportType::Annual,
            Some(raw) => raw.parse()?,
        };
        Ok(DownloadRequest {
            date_source: json_int("dateSource", self.date_source.as_ref(), 0)?,
            date_time: json_text(self.date_time.as_ref()),
            date_type: json_int("dateType", self.date_type.as_ref(), 0)?,
            year: json_int("year", self.year.as_ref(), Utc::now().year())?,
            report_type,
        })
    }
}

pub async fn download_report(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(system_user_id): Path<i64>,
    Json(body): Json<DownloadBody>,
) -> TaxResult<Json<DownloadReceipt>> {
    let request = body.into_request()?;
    let receipt = state
        .orchestrator()
        .download(user.id, system_user_id, request)
        .await?;
    Ok(Json(receipt))
}

pub async fn store_report(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(request): Json<StoreReportRequest>,
) -> TaxResult<Json<StoredReport>> {
    info!(
        "User {} storing {} report for taxpayer {}",
        user.id, request.report_type, request.company_tax_number
    );
    let stored = store_report_service(state.store.as_ref(), request).await?;
    Ok(Json(stored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_download_body_accepts_strings_and_numbers() {
        let body: DownloadBody = serde_json::from_value(json!({
            "dateSource": "1",
            "dateTime": 3,
            "dateType": 2,
            "year": "2024",
            "reportType": "monthly"
        }))
        .unwrap();
        let request = body.into_request().unwrap();
        assert_eq!(request.date_source, 1);
        assert_eq!(request.date_time, "3");
        assert_eq!(request.date_type, 2);
        assert_eq!(request.year, 2024);
        assert_eq!(request.report_type, ReportType::Monthly);
    }

    #[test]
    fn test_download_body_defaults() {
        let body: DownloadBody = serde_json::from_value(json!({})).unwrap();
        let request = body.into_request().unwrap();
        assert_eq!(request.report_type, ReportType::Annual);
        assert_eq!(request.date_source, 0);
        assert_eq!(request.year, Utc::now().year());
    }

    #[test]
    fn test_download_body_rejects_unknown_report_type() {
        let body: DownloadBody =
            serde_json::from_value(json!({"reportType": "weekly"})).unwrap();
        assert!(matches!(body.into_request(), Err(TaxError::Validation(_))));
    }
}
