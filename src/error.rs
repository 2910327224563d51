use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

/// Startup failures. Both kinds are fatal: the server never binds with a
/// configuration that produced one of these.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("configuration error: {variable}: {reason}")]
    Configuration { variable: &'static str, reason: String },
    #[error("crypto provisioning error: {0}")]
    CryptoProvisioning(String),
}

impl ConfigError {
    pub fn configuration(variable: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Configuration { variable, reason: reason.into() }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("invalid database location: {0}")]
    InvalidLocation(String),
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("authentication required")] Unauthorized,
    #[error("csrf token missing or invalid")] Forbidden,
    #[error("rate limit exceeded")] TooManyRequests,
    #[error("internal error")] Internal,
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if matches!(self, ApiError::Unauthorized) {
            builder.insert_header((actix_web::http::header::LOCATION, crate::session::LOGIN_VIEW));
        }
        builder.json(ApiErrorBody { error: self.to_string() })
    }

    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
