use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Application-focused representation of verified JWT claims.
///
/// The subject is the account email; it is the only identity the token
/// carries. Roles are informational, authorities are resolved from the
/// user store when the principal is loaded.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub subject: String,
    pub roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub issuer: Option<String>,
    pub raw: serde_json::Value,
}

impl Claims {
    /// Convenience helper for role checks.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|value| value == role)
    }

    pub fn email(&self) -> &str {
        &self.subject
    }
}

#[derive(Debug, Deserialize)]
struct ClaimsRepr {
    sub: String,
    #[serde(default)]
    roles: Vec<String>,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    iss: Option<String>,
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let subject = value.sub.trim();
        if subject.is_empty() {
            return Err(AuthError::InvalidClaim("sub", value.sub.clone()));
        }

        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("exp", value.exp.to_string()))?;

        let issued_at = match value.iat {
            Some(iat) => Some(
                Utc.timestamp_opt(iat, 0)
                    .single()
                    .ok_or_else(|| AuthError::InvalidClaim("iat", iat.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            subject: subject.to_string(),
            roles: value.roles,
            expires_at,
            issued_at,
            issuer: value.iss,
            raw: serde_json::Value::Null,
        })
    }
}

impl TryFrom<serde_json::Value> for Claims {
    type Error = AuthError;

    fn try_from(value: serde_json::Value) -> AuthResult<Self> {
        let repr: ClaimsRepr = serde_json::from_value(value.clone())
            .map_err(|err| AuthError::InvalidJson(err.to_string()))?;
        let mut claims = Claims::try_from(repr)?;
        claims.raw = value;
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn claims_without_roles_default_to_empty() {
        let claims = Claims::try_from(json!({
            "sub": "ada@example.com",
            "exp": 1_900_000_000_i64,
        }))
        .expect("claims");

        assert_eq!(claims.email(), "ada@example.com");
        assert!(claims.roles.is_empty());
        assert!(claims.issued_at.is_none());
        assert!(claims.issuer.is_none());
        assert_eq!(claims.raw["sub"], "ada@example.com");
    }

    #[test]
    fn blank_subject_is_rejected() {
        let err = Claims::try_from(json!({ "sub": "   ", "exp": 1_900_000_000_i64 }))
            .expect_err("blank subject");
        assert!(matches!(err, AuthError::InvalidClaim("sub", _)));
    }

    #[test]
    fn missing_expiry_is_malformed() {
        let err = Claims::try_from(json!({ "sub": "ada@example.com" })).expect_err("no exp");
        assert!(matches!(err, AuthError::InvalidJson(_)));
    }

    #[test]
    fn has_role_matches_exact_names() {
        let claims = Claims::try_from(json!({
            "sub": "ada@example.com",
            "exp": 1_900_000_000_i64,
            "roles": ["ROLE_USER", "ROLE_ADMIN"],
        }))
        .expect("claims");

        assert!(claims.has_role("ROLE_ADMIN"));
        assert!(!claims.has_role("ADMIN"));
    }
}
