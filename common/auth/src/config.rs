/// Runtime configuration for JWT verification.
#[derive(Debug, Clone, Default)]
pub struct JwtConfig {
    /// Expected issuer claim (iss). Tokens are accepted without an issuer check when unset.
    pub issuer: Option<String>,
    /// Allowable clock skew in seconds when validating exp/nbf.
    pub leeway_seconds: u32,
}

impl JwtConfig {
    /// Construct config with sensible defaults (no issuer check, 30 second leeway).
    pub fn new() -> Self {
        Self {
            issuer: None,
            leeway_seconds: 30,
        }
    }

    /// Require tokens to carry the given issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Adjust the allowed leeway.
    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }
}
