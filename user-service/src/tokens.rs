use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use common_auth::MIN_SECRET_BYTES;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

pub const DEFAULT_TTL_SECONDS: i64 = 3_600;
/// One year.
pub const MAX_TTL_SECONDS: i64 = 365 * 24 * 3_600;

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub issuer: Option<String>,
    pub ttl_seconds: i64,
    /// Emitted as the `kid` header when set.
    pub key_id: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            key_id: None,
        }
    }
}

pub struct TokenSigner {
    config: TokenConfig,
    encoding_key: EncodingKey,
}

pub struct IssuedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
    pub token_type: &'static str,
}

#[derive(Serialize)]
struct AccessClaims<'a> {
    sub: &'a str,
    roles: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    iss: Option<&'a str>,
    exp: i64,
    iat: i64,
}

impl TokenSigner {
    pub fn new(config: TokenConfig, secret: &[u8]) -> Result<Self> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(anyhow!(
                "JWT secret must be at least {MIN_SECRET_BYTES} bytes"
            ));
        }
        if !(1..=MAX_TTL_SECONDS).contains(&config.ttl_seconds) {
            return Err(anyhow!(
                "token lifetime must be between 1 and {MAX_TTL_SECONDS} seconds"
            ));
        }
        Ok(Self {
            config,
            encoding_key: EncodingKey::from_secret(secret),
        })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Signs an access token for `email` carrying `roles` as granted right now.
    pub fn issue(&self, email: &str, roles: &[String]) -> Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = Duration::try_seconds(self.config.ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| anyhow!("token lifetime {}s overflows", self.config.ttl_seconds))?;

        let claims = AccessClaims {
            sub: email,
            roles,
            iss: self.config.issuer.as_deref(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = self.config.key_id.clone();

        let access_token = encode(&header, &claims, &self.encoding_key)
            .map_err(|err| anyhow!("Failed to sign access token: {err}"))?;

        Ok(IssuedToken {
            access_token,
            expires_at,
            expires_in: self.config.ttl_seconds,
            token_type: "Bearer",
        })
    }
}
