pub mod claims;
pub mod config;
pub mod error;
pub mod extractors;
pub mod guards;
pub mod roles;
pub mod verifier;

pub use claims::Claims;
pub use config::JwtConfig;
pub use error::{AuthError, AuthResult};
pub use extractors::AuthContext;
pub use guards::{ensure_role, has_any_role, GuardError};
pub use roles::{normalize_role_name, ROLE_ADMIN, ROLE_PREFIX, ROLE_USER};
pub use verifier::{InMemoryKeyStore, JwtVerifier, JwtVerifierBuilder, DEFAULT_KEY_ID, MIN_SECRET_BYTES};
