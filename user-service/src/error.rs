use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use common_auth::{AuthError, GuardError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::passwords::PasswordError;
use crate::store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest { code: &'static str, message: String },
    #[error("{message}")]
    Unauthorized { code: &'static str, message: String },
    #[error("{message}")]
    Forbidden { code: &'static str, message: String },
    #[error("{message}")]
    NotFound { code: &'static str, message: String },
    #[error("{message}")]
    Conflict { code: &'static str, message: String },
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            code,
            message: message.into(),
        }
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::Forbidden {
            code,
            message: message.into(),
        }
    }

    pub fn user_not_found(id: i64) -> Self {
        Self::NotFound {
            code: "USER_NOT_FOUND",
            message: format!("User with id {id} not found"),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest { code, .. } => (StatusCode::BAD_REQUEST, *code),
            ApiError::Unauthorized { code, .. } => (StatusCode::UNAUTHORIZED, *code),
            ApiError::Forbidden { code, .. } => (StatusCode::FORBIDDEN, *code),
            ApiError::NotFound { code, .. } => (StatusCode::NOT_FOUND, *code),
            ApiError::Conflict { code, .. } => (StatusCode::CONFLICT, *code),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR"),
            ApiError::Auth(err) => err.status_and_code(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::DuplicateEmail(email) => ApiError::Conflict {
                code: "EMAIL_TAKEN",
                message: format!("Email {email} is already registered"),
            },
            StoreError::MissingRole(role) => ApiError::bad_request(
                "ROLE_NOT_FOUND",
                format!("Role {role} is not defined"),
            ),
            StoreError::Database(err) => {
                error!(error = ?err, "User store query failed");
                ApiError::internal("Database error")
            }
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(value: GuardError) -> Self {
        let (_, message) = value.into_response();
        ApiError::forbidden("FORBIDDEN", message)
    }
}

impl From<PasswordError> for ApiError {
    fn from(value: PasswordError) -> Self {
        match value {
            PasswordError::Blank => {
                ApiError::bad_request("INVALID_PASSWORD", "Password must not be blank")
            }
            other => {
                error!(error = %other, "Password hashing failed");
                ApiError::internal("Unable to hash password")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if let ApiError::Internal(message) = &self {
            error!(code, message = %message, "Request failed");
        }
        let body = ErrorBody {
            code: code.to_string(),
            message: self.to_string(),
        };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}
