pub const ROLE_PREFIX: &str = "ROLE_";
pub const ROLE_USER: &str = "ROLE_USER";
pub const ROLE_ADMIN: &str = "ROLE_ADMIN";

/// Canonical form of a role name: trimmed, upper-case, `ROLE_` prefixed.
///
/// Returns `None` for blank input so callers can drop it.
pub fn normalize_role_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }
    let upper = trimmed.to_ascii_uppercase();
    if upper.starts_with(ROLE_PREFIX) {
        if upper.len() == ROLE_PREFIX.len() {
            return None;
        }
        Some(upper)
    } else {
        Some(format!("{ROLE_PREFIX}{upper}"))
    }
}

/// Role name without the `ROLE_` prefix, e.g. `ADMIN` for `ROLE_ADMIN`.
pub fn display_name(name: &str) -> &str {
    name.strip_prefix(ROLE_PREFIX).unwrap_or(name)
}
