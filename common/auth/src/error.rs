use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::errors::ErrorKind;
use serde::Serialize;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no signing secret registered for kid '{0}'")]
    UnknownKeyId(String),
    #[error("signing secret for kid '{0}' is shorter than {1} bytes")]
    WeakSecret(String, usize),
    #[error("failed to decode token header: {0}")]
    InvalidHeader(String),
    #[error("token expired")]
    Expired,
    #[error("token verification failed: {0}")]
    Verification(String),
    #[error("invalid claim '{0}' with value '{1}'")]
    InvalidClaim(&'static str, String),
    #[error("malformed claim payload: {0}")]
    InvalidJson(String),
    #[error("authorization header missing")]
    MissingAuthorization,
    #[error("authorization header malformed")]
    InvalidAuthorization,
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        match value.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Verification(value.to_string()),
        }
    }
}

impl AuthError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AuthError::MissingAuthorization | AuthError::InvalidAuthorization => {
                (StatusCode::UNAUTHORIZED, "AUTH_HEADER")
            }
            AuthError::UnknownKeyId(_)
            | AuthError::Expired
            | AuthError::InvalidHeader(_)
            | AuthError::Verification(_) => (StatusCode::UNAUTHORIZED, "AUTH_TOKEN"),
            AuthError::InvalidClaim(_, _) | AuthError::InvalidJson(_) => {
                (StatusCode::BAD_REQUEST, "AUTH_CLAIMS")
            }
            AuthError::WeakSecret(_, _) => (StatusCode::INTERNAL_SERVER_ERROR, "AUTH_CONFIG"),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorBody {
            code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
