pub mod handlers;
pub mod manual;
pub mod orchestrator;
pub mod validation;

use axum::{extract::DefaultBodyLimit, routing::post, Router};

use crate::core::shared::state::AppState;

pub use manual::{store_report, StoreReportRequest, StoredReport};
pub use orchestrator::{
    DownloadReceipt, DownloadRequest, ReportOrchestrator, RetryPolicy, UploadReceipt,
    UploadRequest,
};

/// `max_upload_bytes` replaces axum's 2 MiB default on the upload route only.
pub fn configure(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/upload-company-info/:system_user_id",
            post(handlers::upload_company_info).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/api/v1/download-report/:system_user_id",
            post(handlers::download_report),
        )
        .route("/api/v1/store-report", post(handlers::store_report))
}
