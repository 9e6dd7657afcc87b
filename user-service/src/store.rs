use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_auth::ROLE_USER;
use thiserror::Error;

use crate::models::{Role, UserRecord};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a user with email '{0}' already exists")]
    DuplicateEmail(String),
    #[error("role '{0}' is not defined")]
    MissingRole(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Account to insert. The store assigns the id and creation timestamp.
#[derive(Debug, Clone)]
pub struct NewUserRecord {
    pub email: String,
    pub password_hash: String,
    pub username: Option<String>,
    pub phone_number: Option<String>,
    pub active: bool,
    pub roles: Vec<String>,
}

impl NewUserRecord {
    /// Self-service registration: inactive until an administrator activates it,
    /// holding only the default role.
    pub fn registration(
        email: String,
        password_hash: String,
        username: Option<String>,
        phone_number: Option<String>,
    ) -> Self {
        Self {
            email,
            password_hash,
            username,
            phone_number,
            active: false,
            roles: vec![ROLE_USER.to_string()],
        }
    }
}

/// Profile fields to overwrite; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone_number: Option<String>,
}

/// Conjunctive search criteria. Absent criteria do not restrict the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserSearch {
    /// Case-insensitive substring of the email.
    pub email: Option<String>,
    /// Case-insensitive substring of the username.
    pub username: Option<String>,
    /// Case-sensitive substring of the phone number.
    pub phone_number: Option<String>,
    pub active: Option<bool>,
    /// Lower bound (inclusive) on the creation timestamp.
    pub created_from: Option<DateTime<Utc>>,
    /// Exact role name the user must hold.
    pub role_name: Option<String>,
}

impl UserSearch {
    /// Drops blank text criteria.
    pub fn normalized(self) -> Self {
        Self {
            email: non_blank(self.email),
            username: non_blank(self.username),
            phone_number: non_blank(self.phone_number),
            active: self.active,
            created_from: self.created_from,
            role_name: non_blank(self.role_name),
        }
    }

    pub fn matches(&self, user: &UserRecord) -> bool {
        if let Some(term) = &self.email {
            if !contains_ignore_case(&user.email, term) {
                return false;
            }
        }
        if let Some(term) = &self.username {
            match &user.username {
                Some(username) if contains_ignore_case(username, term) => {}
                _ => return false,
            }
        }
        if let Some(term) = &self.phone_number {
            match &user.phone_number {
                Some(phone) if phone.contains(term.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(active) = self.active {
            if user.active != active {
                return false;
            }
        }
        if let Some(from) = self.created_from {
            if user.date_of_created < from {
                return false;
            }
        }
        if let Some(role) = &self.role_name {
            if !user.has_role(role) {
                return false;
            }
        }
        true
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// `%term%` with LIKE wildcards in `term` escaped, so user input matches literally.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Outcome of replacing a user's role set.
#[derive(Debug)]
pub enum RoleAssignment {
    Updated(UserRecord),
    UserNotFound,
    NoMatchingRoles,
}

/// Persistence seam for accounts and roles.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UserRecord>>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>>;

    async fn exists(&self, id: i64) -> StoreResult<bool>;

    async fn create(&self, user: NewUserRecord) -> StoreResult<UserRecord>;

    async fn update_profile(
        &self,
        id: i64,
        update: ProfileUpdate,
    ) -> StoreResult<Option<UserRecord>>;

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> StoreResult<bool>;

    async fn set_active(&self, id: i64, active: bool) -> StoreResult<Option<UserRecord>>;

    /// Replaces the user's roles with the known roles among `role_names`.
    /// Unknown names are ignored.
    async fn replace_roles(&self, id: i64, role_names: &[String]) -> StoreResult<RoleAssignment>;

    async fn delete(&self, id: i64) -> StoreResult<bool>;

    /// All users ordered by id.
    async fn list_all(&self) -> StoreResult<Vec<UserRecord>>;

    /// Distinct users matching every criterion, ordered by id.
    async fn search(&self, criteria: &UserSearch) -> StoreResult<Vec<UserRecord>>;

    async fn list_by_role(&self, role_name: &str) -> StoreResult<Vec<UserRecord>>;

    async fn list_roles(&self) -> StoreResult<Vec<Role>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(email: &str, username: Option<&str>, phone: Option<&str>) -> UserRecord {
        UserRecord {
            id: 1,
            email: email.to_string(),
            password_hash: String::new(),
            username: username.map(str::to_string),
            phone_number: phone.map(str::to_string),
            active: true,
            date_of_created: Utc::now(),
            roles: vec![Role {
                id: 1,
                name: ROLE_USER.to_string(),
            }],
        }
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ada"), "%ada%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn normalized_drops_blank_terms() {
        let search = UserSearch {
            email: Some("  ".to_string()),
            username: Some(String::new()),
            phone_number: Some("555".to_string()),
            role_name: Some(" ".to_string()),
            ..Default::default()
        }
        .normalized();

        assert_eq!(search.email, None);
        assert_eq!(search.username, None);
        assert_eq!(search.phone_number.as_deref(), Some("555"));
        assert_eq!(search.role_name, None);
    }

    #[test]
    fn text_criteria_follow_case_rules() {
        let record = user("Ada.Lovelace@Example.com", Some("Countess"), Some("+44-555"));

        let by_email = UserSearch {
            email: Some("lovelace@example".to_string()),
            ..Default::default()
        };
        assert!(by_email.matches(&record));

        let by_username = UserSearch {
            username: Some("COUNT".to_string()),
            ..Default::default()
        };
        assert!(by_username.matches(&record));

        let phone_is_case_sensitive = UserSearch {
            phone_number: Some("+44".to_string()),
            ..Default::default()
        };
        assert!(phone_is_case_sensitive.matches(&record));

        let missing_username = user("x@example.com", None, None);
        assert!(!by_username.matches(&missing_username));
    }

    #[test]
    fn flag_date_and_role_criteria_must_all_hold() {
        let record = user("ada@example.com", None, None);

        let matching = UserSearch {
            active: Some(true),
            created_from: Some(record.date_of_created - Duration::minutes(1)),
            role_name: Some(ROLE_USER.to_string()),
            ..Default::default()
        };
        assert!(matching.matches(&record));

        let too_late = UserSearch {
            created_from: Some(record.date_of_created + Duration::minutes(1)),
            ..matching.clone()
        };
        assert!(!too_late.matches(&record));

        let wrong_role = UserSearch {
            role_name: Some("ROLE_ADMIN".to_string()),
            ..matching
        };
        assert!(!wrong_role.matches(&record));
    }
}
