use crate::models::credential::InvalidReason;
use rocket::http::{ContentType, Header, Status};
use rocket::response::Responder;
use rocket::{Request, Response};
use rocket_okapi::OpenApiError;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::response::OpenApiResponderInner;
use serde::Serialize;
use std::io::Cursor;
use thiserror::Error;
use tracing::{error, warn};
use validator::ValidationErrors;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid credential: {0}")]
    InvalidCredential(InvalidReason),
    #[error("Already redeemed for this session today")]
    DuplicateRedemption,
    #[error("Too many redemption attempts, retry in {retry_after_secs}s")]
    Throttled { retry_after_secs: u64 },
    #[error("Storage unavailable")]
    StoreUnavailable {
        message: String,
        #[source]
        source: BoxedSource,
    },
    #[error("Deadline exceeded; outcome unknown")]
    DeadlineExceeded,
    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationErrors),
    #[error("Internal server error")]
    ConfigurationError {
        message: String,
        #[source]
        source: figment::Error,
    },
}

/// Stable, transport-independent name for each failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Unauthorized,
    InvalidArgument,
    InvalidState,
    InvalidCredential,
    DuplicateRedemption,
    Throttled,
    StoreUnavailable,
    DeadlineExceeded,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InvalidCredential => "invalid_credential",
            ErrorKind::DuplicateRedemption => "duplicate_redemption",
            ErrorKind::Throttled => "throttled",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Configuration => "configuration",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<InvalidReason>,
    retryable: bool,
}

impl AppError {
    pub fn store(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::Unauthorized => ErrorKind::Unauthorized,
            AppError::InvalidArgument(_) | AppError::ValidationError(_) => ErrorKind::InvalidArgument,
            AppError::InvalidState(_) => ErrorKind::InvalidState,
            AppError::InvalidCredential(_) => ErrorKind::InvalidCredential,
            AppError::DuplicateRedemption => ErrorKind::DuplicateRedemption,
            AppError::Throttled { .. } => ErrorKind::Throttled,
            AppError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            AppError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            AppError::ConfigurationError { .. } => ErrorKind::Configuration,
        }
    }

    /// Only these outcomes warrant a caller-side retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable { .. } | AppError::DeadlineExceeded)
    }

    fn reason(&self) -> Option<InvalidReason> {
        match self {
            AppError::InvalidCredential(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl From<&AppError> for Status {
    fn from(e: &AppError) -> Self {
        match e {
            AppError::NotFound(_) => Status::NotFound,
            AppError::Forbidden(_) => Status::Forbidden,
            AppError::Unauthorized => Status::Unauthorized,
            AppError::InvalidArgument(_) => Status::BadRequest,
            AppError::ValidationError(_) => Status::BadRequest,
            AppError::InvalidState(_) => Status::Conflict,
            AppError::InvalidCredential(_) => Status::BadRequest,
            AppError::DuplicateRedemption => Status::Conflict,
            AppError::Throttled { .. } => Status::TooManyRequests,
            AppError::StoreUnavailable { .. } => Status::ServiceUnavailable,
            AppError::DeadlineExceeded => Status::GatewayTimeout,
            AppError::ConfigurationError { .. } => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &Request<'_>) -> rocket::response::Result<'static> {
        let method = req.method();
        let uri = req.uri();

        let request_id = req
            .local_cache(|| None::<crate::middleware::RequestId>)
            .as_ref()
            .map(|r| r.0.as_str())
            .unwrap_or("unknown");

        let user_id = req
            .local_cache(|| None::<crate::auth::CurrentUser>)
            .as_ref()
            .map(|u| u.id.to_string())
            .unwrap_or_else(|| "anonymous".to_string());

        let status = Status::from(&self);
        let kind = self.kind();

        // Client-side outcomes (duplicates, throttles, bad codes) log at warn.
        if status.class().is_server_error() {
            error!(
                error = ?self,
                kind = kind.as_str(),
                request_id = %request_id,
                user_id = %user_id,
                method = %method,
                uri = %uri,
                "request failed"
            );
        } else {
            warn!(
                kind = kind.as_str(),
                request_id = %request_id,
                user_id = %user_id,
                method = %method,
                uri = %uri,
                "request rejected"
            );
        }

        let body = ErrorBody {
            error: kind.as_str(),
            message: self.to_string(),
            reason: self.reason(),
            retryable: self.is_retryable(),
        };
        let body = serde_json::to_string(&body).unwrap_or_else(|_| format!("{{\"error\":\"{}\"}}", kind.as_str()));

        let mut response = Response::build();
        response.status(status).header(ContentType::JSON);
        if let AppError::Throttled { retry_after_secs } = &self {
            response.header(Header::new("Retry-After", retry_after_secs.to_string()));
        }
        response.sized_body(body.len(), Cursor::new(body)).ok()
    }
}

impl OpenApiResponderInner for AppError {
    fn responses(_gen: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse};
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Bad Request or invalid credential"),
            ("401", "Unauthorized"),
            ("403", "Forbidden"),
            ("404", "Not Found"),
            ("409", "Already redeemed or invalid state"),
            ("429", "Too Many Requests"),
            ("503", "Storage unavailable, retry with backoff"),
            ("504", "Deadline exceeded, outcome unknown"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::ConfigurationError {
            message: "Failed to read configuration".to_string(),
            source: e,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            _ => AppError::store("Database error", e),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::store("Rate limit cache error", e)
    }
}
