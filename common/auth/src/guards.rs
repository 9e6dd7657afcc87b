use axum::http::StatusCode;

#[derive(Debug, Clone)]
pub enum GuardError {
    Forbidden { required: Vec<String> },
}

impl GuardError {
    pub fn into_response(self) -> (StatusCode, String) {
        match self {
            GuardError::Forbidden { required } => (
                StatusCode::FORBIDDEN,
                if required.is_empty() {
                    "Insufficient role".to_string()
                } else {
                    format!(
                        "Insufficient role. Required one of: {}",
                        required.join(", ")
                    )
                },
            ),
        }
    }
}

impl From<GuardError> for (StatusCode, String) {
    fn from(value: GuardError) -> Self {
        value.into_response()
    }
}

pub fn has_any_role(granted: &[String], allowed: &[&str]) -> bool {
    granted
        .iter()
        .any(|role| allowed.iter().any(|required| role == required))
}

pub fn ensure_role(granted: &[String], allowed: &[&str]) -> Result<(), GuardError> {
    if allowed.is_empty() || has_any_role(granted, allowed) {
        Ok(())
    } else {
        Err(GuardError::Forbidden {
            required: allowed.iter().map(|value| value.to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::{ROLE_ADMIN, ROLE_USER};

    #[test]
    fn ensure_role_accepts_any_matching_role() {
        let granted = vec![ROLE_USER.to_string(), ROLE_ADMIN.to_string()];
        assert!(ensure_role(&granted, &[ROLE_ADMIN]).is_ok());
        assert!(ensure_role(&granted, &[]).is_ok());
    }

    #[test]
    fn ensure_role_lists_required_roles_on_failure() {
        let granted = vec![ROLE_USER.to_string()];
        let err = ensure_role(&granted, &[ROLE_ADMIN]).expect_err("forbidden");
        let (status, message) = err.into_response();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(message.contains(ROLE_ADMIN));
    }
}
