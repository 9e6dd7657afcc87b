use chrono::{DateTime, Utc};
use common_auth::roles::display_name;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Named authorization grant, e.g. `ROLE_USER`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: i32,
    pub name: String,
}

impl Role {
    pub fn display_name(&self) -> &str {
        display_name(&self.name)
    }
}

/// Persisted account as held by a [`crate::store::UserStore`].
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub username: Option<String>,
    pub phone_number: Option<String>,
    pub active: bool,
    pub date_of_created: DateTime<Utc>,
    /// Sorted by role id.
    pub roles: Vec<Role>,
}

impl UserRecord {
    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|role| role.name.clone()).collect()
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.name == name)
    }

    pub fn to_dto(&self) -> UserDto {
        UserDto {
            id: self.id,
            email: self.email.clone(),
            username: self.username.clone(),
            phone_number: self.phone_number.clone(),
            active: self.active,
            date_of_created: self.date_of_created,
            roles: self.roles.iter().map(RoleDto::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: i64,
    pub email: String,
    pub username: Option<String>,
    pub phone_number: Option<String>,
    pub active: bool,
    pub date_of_created: DateTime<Utc>,
    pub roles: Vec<RoleDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDto {
    pub id: i32,
    pub name: String,
}

impl From<&Role> for RoleDto {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dto_omits_password_hash_and_uses_camel_case() {
        let user = UserRecord {
            id: 7,
            email: "ada@example.com".to_string(),
            password_hash: "$2b$04$secret".to_string(),
            username: Some("ada".to_string()),
            phone_number: None,
            active: true,
            date_of_created: Utc::now(),
            roles: vec![Role {
                id: 1,
                name: "ROLE_USER".to_string(),
            }],
        };

        let json = serde_json::to_value(user.to_dto()).expect("serialize");
        assert_eq!(json["phoneNumber"], serde_json::Value::Null);
        assert!(json.get("dateOfCreated").is_some());
        assert_eq!(json["roles"][0]["name"], "ROLE_USER");
        assert!(!json.to_string().contains("secret"));
        assert_eq!(user.roles[0].display_name(), "USER");
    }
}
