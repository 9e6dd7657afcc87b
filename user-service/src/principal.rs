use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common_auth::{ensure_role, AuthContext, Claims, ROLE_ADMIN};
use tracing::warn;

use crate::app::AppState;
use crate::error::ApiError;
use crate::models::UserRecord;

/// Authenticated account behind the bearer token of the current request.
///
/// Authorities come from the stored account, so role changes apply to
/// tokens issued before the change.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: UserRecord,
    pub claims: Claims,
}

impl CurrentUser {
    pub fn id(&self) -> i64 {
        self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.user.has_role(ROLE_ADMIN)
    }

    pub fn ensure_admin(&self) -> Result<(), ApiError> {
        ensure_role(&self.user.role_names(), &[ROLE_ADMIN])?;
        Ok(())
    }

    pub fn ensure_self_or_admin(&self, user_id: i64) -> Result<(), ApiError> {
        if self.user.id == user_id {
            return Ok(());
        }
        self.ensure_admin()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let context = AuthContext::from_request_parts(parts, state).await?;
        let claims = context.into_claims();

        let user = state
            .store
            .find_by_email(claims.email())
            .await?
            .ok_or_else(|| {
                warn!(subject = %claims.subject, "Token subject has no account");
                ApiError::unauthorized("UNKNOWN_PRINCIPAL", "Unknown user")
            })?;

        if !user.active {
            return Err(ApiError::forbidden(
                "ACCOUNT_DISABLED",
                "This account is not active",
            ));
        }

        Ok(Self { user, claims })
    }
}
