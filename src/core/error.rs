use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

pub type TaxResult<T> = Result<T, TaxError>;

#[derive(Debug, thiserror::Error)]
pub enum TaxError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
    /// The external session is missing pieces; the caller has to register again.
    #[error("Remote session unavailable: {0}")]
    RemoteUnauthenticated(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Credential already expired: {0}")]
    ExpiredCredential(String),
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
    #[error("Remote service unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("Remote service rejected the request: {0}")]
    RemoteRejected(String),
    #[error("Malformed response from remote service: {0}")]
    MalformedResponse(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaxError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::RemoteUnauthenticated(_) => "remote_unauthenticated",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::ExpiredCredential(_) => "expired_credential",
            Self::CacheUnavailable(_) => "cache_unavailable",
            Self::RemoteUnavailable(_) => "remote_unavailable",
            Self::RemoteRejected(_) => "remote_rejected",
            Self::MalformedResponse(_) => "malformed_response",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Conflict(_) => "conflict",
            Self::Database(_) => "database",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::RemoteRejected(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_)
            | Self::RemoteUnauthenticated(_)
            | Self::ExpiredCredential(_) => StatusCode::UNAUTHORIZED,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RemoteUnavailable(_) | Self::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message without the kind prefix added by `Display`.
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(msg)
            | Self::Unauthenticated(msg)
            | Self::RemoteUnauthenticated(msg)
            | Self::Unauthorized(msg)
            | Self::NotFound(msg)
            | Self::ExpiredCredential(msg)
            | Self::CacheUnavailable(msg)
            | Self::RemoteUnavailable(msg)
            | Self::RemoteRejected(msg)
            | Self::MalformedResponse(msg)
            | Self::PayloadTooLarge(msg)
            | Self::Conflict(msg)
            | Self::Database(msg)
            | Self::Internal(msg) => msg,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }
}

impl IntoResponse for TaxError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{} request failed: {}", self.kind(), self.message());
        }
        (
            status,
            Json(serde_json::json!({
                "status": status.as_u16(),
                "error": self.kind(),
                "message": self.message(),
            })),
        )
            .into_response()
    }
}

impl From<diesel::result::Error> for TaxError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match e {
            Error::NotFound => Self::NotFound("Record not found".into()),
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::Conflict(info.message().to_string())
            }
            Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                Self::Validation(info.message().to_string())
            }
            Error::DatabaseError(DatabaseErrorKind::CheckViolation, info) => {
                Self::Validation(info.message().to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for TaxError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(format!(
                "Upload exceeds the request size limit: {}",
                e.body_text()
            ))
        } else {
            Self::Validation(format!("Invalid multipart body: {}", e.body_text()))
        }
    }
}

impl From<diesel::r2d2::PoolError> for TaxError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::Database(format!("Database connection error: {e}"))
    }
}

impl From<tokio::task::JoinError> for TaxError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Task join error: {e}"))
    }
}

impl From<serde_json::Error> for TaxError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("Serialization error: {e}"))
    }
}
