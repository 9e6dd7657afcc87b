use bcrypt::BcryptError;
use thiserror::Error;

pub const DEFAULT_COST: u32 = 10;
const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password must not be blank")]
    Blank,
    #[error("bcrypt cost {0} is outside 4..=31")]
    InvalidCost(u32),
    #[error("failed to hash password: {0}")]
    Hash(#[from] BcryptError),
}

/// bcrypt hashing with a fixed work factor.
#[derive(Debug, Clone, Copy)]
pub struct PasswordEncoder {
    cost: u32,
}

impl Default for PasswordEncoder {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

impl PasswordEncoder {
    pub fn new(cost: u32) -> Result<Self, PasswordError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(PasswordError::InvalidCost(cost));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn encode(&self, raw: &str) -> Result<String, PasswordError> {
        if raw.trim().is_empty() {
            return Err(PasswordError::Blank);
        }
        Ok(bcrypt::hash(raw, self.cost)?)
    }

    /// `false` for a wrong password and for a hash bcrypt cannot parse.
    pub fn matches(&self, raw: &str, hash: &str) -> bool {
        bcrypt::verify(raw, hash).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> PasswordEncoder {
        PasswordEncoder::new(4).expect("cost")
    }

    #[test]
    fn encode_then_match() {
        let encoder = encoder();
        let hash = encoder.encode("correct horse").expect("hash");
        assert!(hash.starts_with("$2"));
        assert_ne!(hash, "correct horse");
        assert!(encoder.matches("correct horse", &hash));
        assert!(!encoder.matches("battery staple", &hash));
    }

    #[test]
    fn blank_passwords_are_refused() {
        assert!(matches!(encoder().encode("   "), Err(PasswordError::Blank)));
    }

    #[test]
    fn malformed_hash_never_matches() {
        assert!(!encoder().matches("anything", "plain-text"));
    }

    #[test]
    fn cost_is_bounded() {
        assert!(matches!(PasswordEncoder::new(3), Err(PasswordError::InvalidCost(3))));
        assert!(matches!(PasswordEncoder::new(32), Err(PasswordError::InvalidCost(32))));
        assert_eq!(PasswordEncoder::default().cost(), DEFAULT_COST);
    }
}
