use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::debug;

use crate::claims::Claims;
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};

/// Key id used for tokens that carry no `kid` header.
pub const DEFAULT_KEY_ID: &str = "default";

/// HS256 secrets shorter than this are refused.
pub const MIN_SECRET_BYTES: usize = 32;

/// Thread-safe store for HMAC decoding keys, addressed by key id.
#[derive(Clone, Default)]
pub struct InMemoryKeyStore {
    inner: Arc<RwLock<HashMap<String, DecodingKey>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&self, kid: impl Into<String>, key: DecodingKey) {
        let mut guard = self.inner.write().expect("rwlock poisoned");
        guard.insert(kid.into(), key);
    }

    pub fn insert_secret(&self, kid: impl Into<String>, secret: &[u8]) -> AuthResult<()> {
        let kid = kid.into();
        if secret.len() < MIN_SECRET_BYTES {
            return Err(AuthError::WeakSecret(kid, MIN_SECRET_BYTES));
        }
        self.insert_key(kid, DecodingKey::from_secret(secret));
        Ok(())
    }

    pub fn get(&self, kid: &str) -> Option<DecodingKey> {
        let guard = self.inner.read().expect("rwlock poisoned");
        guard.get(kid).cloned()
    }

    pub fn contains(&self, kid: &str) -> bool {
        let guard = self.inner.read().expect("rwlock poisoned");
        guard.contains_key(kid)
    }
}

#[derive(Clone)]
pub struct JwtVerifier {
    config: JwtConfig,
    store: InMemoryKeyStore,
}

impl JwtVerifier {
    pub fn with_store(config: JwtConfig, store: InMemoryKeyStore) -> Self {
        Self { config, store }
    }

    pub fn builder(config: JwtConfig) -> JwtVerifierBuilder {
        JwtVerifierBuilder::new(config)
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub fn store(&self) -> &InMemoryKeyStore {
        &self.store
    }

    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let header =
            decode_header(token).map_err(|err| AuthError::InvalidHeader(err.to_string()))?;
        let kid = header.kid.unwrap_or_else(|| DEFAULT_KEY_ID.to_string());
        let key = self
            .store
            .get(&kid)
            .ok_or_else(|| AuthError::UnknownKeyId(kid.clone()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }
        validation.leeway = self.config.leeway_seconds.into();

        let token_data = decode::<Value>(token, &key, &validation)?;
        let claims = Claims::try_from(token_data.claims)?;
        debug!(kid, "verified JWT successfully");
        Ok(claims)
    }
}

pub struct JwtVerifierBuilder {
    config: JwtConfig,
    store: InMemoryKeyStore,
}

impl JwtVerifierBuilder {
    fn new(config: JwtConfig) -> Self {
        Self {
            config,
            store: InMemoryKeyStore::new(),
        }
    }

    /// Secret used for tokens without a `kid` header.
    pub fn with_secret(self, secret: &[u8]) -> AuthResult<Self> {
        self.store.insert_secret(DEFAULT_KEY_ID, secret)?;
        Ok(self)
    }

    /// Additional secret selected by the token's `kid` header, e.g. during rotation.
    pub fn with_keyed_secret(self, kid: impl Into<String>, secret: &[u8]) -> AuthResult<Self> {
        self.store.insert_secret(kid, secret)?;
        Ok(self)
    }

    pub fn build(self) -> JwtVerifier {
        JwtVerifier {
            config: self.config,
            store: self.store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &[u8] = b"verifier-test-secret-0123456789abcdef";

    fn sign(header: &Header, claims: &Value, secret: &[u8]) -> String {
        encode(header, claims, &EncodingKey::from_secret(secret)).expect("sign token")
    }

    fn fresh_claims(extra: Value) -> Value {
        let now = Utc::now().timestamp();
        let mut claims = json!({
            "sub": "grace@example.com",
            "roles": ["ROLE_USER"],
            "iat": now,
            "exp": now + 600,
        });
        if let (Some(target), Some(source)) = (claims.as_object_mut(), extra.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        claims
    }

    fn verifier(config: JwtConfig) -> JwtVerifier {
        JwtVerifier::builder(config)
            .with_secret(SECRET)
            .expect("secret accepted")
            .build()
    }

    #[test]
    fn key_store_refuses_short_secrets() {
        let store = InMemoryKeyStore::new();
        let err = store
            .insert_secret("short", b"too-short")
            .expect_err("weak secret");
        assert!(matches!(err, AuthError::WeakSecret(kid, MIN_SECRET_BYTES) if kid == "short"));
        assert!(!store.contains("short"));

        store.insert_secret("long", SECRET).expect("long secret");
        assert!(store.contains("long"));
        assert!(store.get("long").is_some());
    }

    #[test]
    fn verifier_accepts_token_without_kid() {
        let token = sign(&Header::default(), &fresh_claims(json!({})), SECRET);
        let claims = verifier(JwtConfig::new()).verify(&token).expect("valid");

        assert_eq!(claims.subject, "grace@example.com");
        assert_eq!(claims.roles, vec!["ROLE_USER".to_string()]);
        assert!(claims.issued_at.is_some());
    }

    #[test]
    fn verifier_selects_keyed_secret() {
        let rotated = b"rotated-secret-abcdefghijklmnopqrstuvwxyz";
        let verifier = JwtVerifier::builder(JwtConfig::new())
            .with_secret(SECRET)
            .and_then(|builder| builder.with_keyed_secret("2024-rotation", rotated))
            .expect("secrets")
            .build();

        let mut header = Header::default();
        header.kid = Some("2024-rotation".to_string());
        let token = sign(&header, &fresh_claims(json!({})), rotated);
        assert!(verifier.verify(&token).is_ok());

        header.kid = Some("retired".to_string());
        let token = sign(&header, &fresh_claims(json!({})), rotated);
        match verifier.verify(&token) {
            Err(AuthError::UnknownKeyId(kid)) => assert_eq!(kid, "retired"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn verifier_rejects_foreign_signature() {
        let token = sign(
            &Header::default(),
            &fresh_claims(json!({})),
            b"someone-elses-secret-0123456789abcdef",
        );
        let err = verifier(JwtConfig::new())
            .verify(&token)
            .expect_err("bad signature");
        assert!(matches!(err, AuthError::Verification(_)));
    }

    #[test]
    fn verifier_rejects_expired_token_beyond_leeway() {
        let past = Utc::now().timestamp() - 3_600;
        let token = sign(
            &Header::default(),
            &fresh_claims(json!({ "iat": past - 60, "exp": past })),
            SECRET,
        );
        let err = verifier(JwtConfig::new().with_leeway(5))
            .verify(&token)
            .expect_err("expired");
        assert!(matches!(err, AuthError::Expired));
    }

    #[test]
    fn verifier_enforces_configured_issuer() {
        let config = JwtConfig::new().with_issuer("user-service");
        let good = sign(
            &Header::default(),
            &fresh_claims(json!({ "iss": "user-service" })),
            SECRET,
        );
        let bad = sign(
            &Header::default(),
            &fresh_claims(json!({ "iss": "somewhere-else" })),
            SECRET,
        );

        let verifier = verifier(config);
        assert_eq!(
            verifier.verify(&good).expect("issuer matches").issuer.as_deref(),
            Some("user-service")
        );
        assert!(matches!(
            verifier.verify(&bad),
            Err(AuthError::Verification(_))
        ));
    }

    #[test]
    fn verifier_rejects_garbage() {
        let err = verifier(JwtConfig::new())
            .verify("not-a-jwt")
            .expect_err("garbage");
        assert!(matches!(err, AuthError::InvalidHeader(_)));
    }
}
