use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{multipart, Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::envelope::{parse_expiration_time, RemoteEnvelope};
use super::{
    FileUpload, QueryOutcome, RegisteredTenant, ReportQuery, SubmitOutcome, TaxGateway,
    TenantRegistration, UploadParameters,
};
use crate::core::config::GatewayConfig;
use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::ReportType;
use crate::core::shared::utils::token_preview;

const XLS_CONTENT_TYPE: &str = "application/vnd.ms-excel";

/// One reqwest client per operation so each keeps its own timeouts.
pub struct HttpTaxGateway {
    config: GatewayConfig,
    register_client: Client,
    upload_client: Client,
    query_client: Client,
}

fn build_client(timeout_secs: u64, connect_timeout_secs: u64) -> TaxResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .build()
        .map_err(|e| TaxError::Internal(format!("Failed to build HTTP client: {e}")))
}

fn transport_error(operation: &str, e: reqwest::Error) -> TaxError {
    if e.is_timeout() {
        TaxError::RemoteUnavailable(format!("{operation} request to external API timed out"))
    } else if e.is_connect() {
        TaxError::RemoteUnavailable(format!("Could not connect to external API: {e}"))
    } else {
        TaxError::RemoteUnavailable(format!("{operation} request failed: {e}"))
    }
}

impl HttpTaxGateway {
    pub fn new(config: GatewayConfig) -> TaxResult<Self> {
        Ok(Self {
            register_client: build_client(
                config.register_timeout_secs,
                config.register_connect_timeout_secs,
            )?,
            upload_client: build_client(
                config.upload_timeout_secs,
                config.upload_connect_timeout_secs,
            )?,
            query_client: build_client(
                config.query_timeout_secs,
                config.query_connect_timeout_secs,
            )?,
            config,
        })
    }

    /// Sends the request and returns the validated success envelope.
    async fn exchange(
        &self,
        operation: &str,
        request: RequestBuilder,
        fallback: &str,
    ) -> TaxResult<RemoteEnvelope> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(operation, e))?;
        debug!("{operation} response: HTTP {status}, {} bytes", body.len());

        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            warn!("{operation}: external API unavailable (HTTP {status})");
            return Err(TaxError::RemoteUnavailable(format!(
                "External API unavailable (HTTP {status})"
            )));
        }

        if !status.is_success() {
            error!("{operation}: external API returned HTTP {status}");
            return Err(TaxError::RemoteRejected(format!(
                "External API returned HTTP {status}"
            )));
        }

        let envelope = RemoteEnvelope::parse(&body).map_err(|e| {
            error!("{operation}: {e}");
            e
        })?;

        envelope.into_success(fallback).map_err(|e| {
            warn!("{operation} rejected by external API: {}", e.message());
            e
        })
    }
}

/// Remote JSON body for a report query. Every value is sent as a string.
fn query_body(query: &ReportQuery) -> Value {
    let mut body = json!({
        "dateSource": query.date_source.to_string(),
        "dateTime": query.date_time,
        "dateType": query.date_type.to_string(),
        "year": query.year.to_string(),
    });
    let period_field = match query.report_type {
        ReportType::Monthly => Some("month"),
        ReportType::Quarterly => Some("quarter"),
        ReportType::Annual => None,
    };
    if let (Some(field), Some(period), Some(map)) =
        (period_field, query.period, body.as_object_mut())
    {
        map.insert(field.to_string(), Value::String(period.to_string()));
    }
    body
}

fn field_as_string(data: &Value, field: &str) -> Option<String> {
    match data.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_registered_tenant(data: &Value) -> TaxResult<RegisteredTenant> {
    let missing = |field: &str| {
        TaxError::MalformedResponse(format!("Registration response is missing {field}"))
    };
    let token = field_as_string(data, "token").ok_or_else(|| missing("token"))?;
    let system_user_id = field_as_string(data, "systemUserId")
        .and_then(|id| id.parse::<i64>().ok())
        .ok_or_else(|| missing("systemUserId"))?;
    let tenant_id = field_as_string(data, "tenantId").ok_or_else(|| missing("tenantId"))?;
    let expiration_time = field_as_string(data, "expirationTime")
        .ok_or_else(|| missing("expirationTime"))
        .and_then(|raw| parse_expiration_time(&raw))?;

    Ok(RegisteredTenant {
        token,
        system_user_id,
        tenant_id,
        expiration_time,
    })
}

#[async_trait]
impl TaxGateway for HttpTaxGateway {
    async fn register_tenant(
        &self,
        registration: &TenantRegistration,
    ) -> TaxResult<RegisteredTenant> {
        let url = self.config.endpoint(&self.config.register_path);
        info!(
            "Registering tenant for taxpayer {} (user {})",
            registration.taxpayer_no, registration.user_id
        );

        let request = self.register_client.post(&url).json(registration);
        let envelope = self
            .exchange("Register", request, "Registration failed")
            .await?;
        let tenant = parse_registered_tenant(&envelope.data)?;

        info!(
            "Registered tenant {} as system user {}, token {} expires {}",
            tenant.tenant_id,
            tenant.system_user_id,
            token_preview(&tenant.token),
            tenant.expiration_time
        );
        Ok(tenant)
    }

    async fn submit_files(
        &self,
        token: &str,
        taxpayer_no: &str,
        params: UploadParameters,
        files: &[FileUpload],
    ) -> TaxResult<SubmitOutcome> {
        let url = self.config.endpoint(&self.config.upload_path);

        let mut form = multipart::Form::new();
        for file in files {
            let content_type = file.content_type.as_deref().unwrap_or(XLS_CONTENT_TYPE);
            let part = multipart::Part::bytes(file.bytes.clone())
                .file_name(file.filename.clone())
                .mime_str(content_type)
                .map_err(|e| {
                    TaxError::Validation(format!(
                        "Invalid content type for {}: {e}",
                        file.filename
                    ))
                })?;
            form = form.part("files", part);
        }

        info!(
            "Submitting {} files for taxpayer {taxpayer_no} (dateSource={}, dateType={}, year={}, token {})",
            files.len(),
            params.date_source,
            params.date_type,
            params.year,
            token_preview(token)
        );

        let request = self
            .upload_client
            .post(&url)
            .query(&[
                ("dateSource", params.date_source.to_string()),
                ("dateType", params.date_type.to_string()),
                ("year", params.year.to_string()),
            ])
            .header("token", token)
            .multipart(form);

        let envelope = self.exchange("Upload", request, "Upload failed").await?;
        Ok(SubmitOutcome {
            status: envelope.status,
            message: envelope.msg,
        })
    }

    async fn query_report(
        &self,
        token: &str,
        taxpayer_no: &str,
        query: &ReportQuery,
    ) -> TaxResult<QueryOutcome> {
        let url = self.config.endpoint(&self.config.query_path);
        let body = query_body(query);
        info!(
            "Querying {} report for taxpayer {taxpayer_no}: {body} (token {})",
            query.report_type,
            token_preview(token)
        );

        let request = self
            .query_client
            .post(&url)
            .header("token", token)
            .header("Accept", "application/json")
            .json(&body);

        let envelope = self.exchange("Query", request, "Query failed").await?;
        Ok(QueryOutcome {
            status: envelope.status,
            message: envelope.msg,
            payload: envelope.data,
        })
    }
}
