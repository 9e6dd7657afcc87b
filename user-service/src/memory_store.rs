use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_auth::{ROLE_ADMIN, ROLE_USER};
use tokio::sync::RwLock;

use crate::models::{Role, UserRecord};
use crate::store::{
    NewUserRecord, ProfileUpdate, RoleAssignment, StoreError, StoreResult, UserSearch, UserStore,
};

struct StoredUser {
    id: i64,
    email: String,
    password_hash: String,
    username: Option<String>,
    phone_number: Option<String>,
    active: bool,
    date_of_created: DateTime<Utc>,
    role_ids: BTreeSet<i32>,
}

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, StoredUser>,
    roles: BTreeMap<i32, Role>,
    next_user_id: i64,
}

impl Tables {
    fn role_id(&self, name: &str) -> Option<i32> {
        self.roles
            .values()
            .find(|role| role.name == name)
            .map(|role| role.id)
    }

    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|user| user.email == email && Some(user.id) != except)
    }

    fn record(&self, user: &StoredUser) -> UserRecord {
        UserRecord {
            id: user.id,
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            username: user.username.clone(),
            phone_number: user.phone_number.clone(),
            active: user.active,
            date_of_created: user.date_of_created,
            roles: user
                .role_ids
                .iter()
                .filter_map(|id| self.roles.get(id).cloned())
                .collect(),
        }
    }

    fn records_where(&self, predicate: impl Fn(&UserRecord) -> bool) -> Vec<UserRecord> {
        self.users
            .values()
            .map(|user| self.record(user))
            .filter(|record| predicate(record))
            .collect()
    }
}

/// Process-local [`UserStore`] with the same semantics as the Postgres store.
///
/// Seeded with `ROLE_USER` and `ROLE_ADMIN`, like the initial migration.
pub struct InMemoryUserStore {
    tables: RwLock<Tables>,
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::with_roles(&[ROLE_USER, ROLE_ADMIN])
    }

    pub fn with_roles(names: &[&str]) -> Self {
        let mut tables = Tables::default();
        for (index, name) in names.iter().enumerate() {
            let id = index as i32 + 1;
            tables.roles.insert(
                id,
                Role {
                    id,
                    name: (*name).to_string(),
                },
            );
        }
        Self {
            tables: RwLock::new(tables),
        }
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UserRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).map(|user| tables.record(user)))
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.email == email)
            .map(|user| tables.record(user)))
    }

    async fn exists(&self, id: i64) -> StoreResult<bool> {
        Ok(self.tables.read().await.users.contains_key(&id))
    }

    async fn create(&self, user: NewUserRecord) -> StoreResult<UserRecord> {
        let mut tables = self.tables.write().await;
        if tables.email_taken(&user.email, None) {
            return Err(StoreError::DuplicateEmail(user.email));
        }

        let mut role_ids = BTreeSet::new();
        for name in &user.roles {
            let id = tables
                .role_id(name)
                .ok_or_else(|| StoreError::MissingRole(name.clone()))?;
            role_ids.insert(id);
        }

        tables.next_user_id += 1;
        let id = tables.next_user_id;
        let stored = StoredUser {
            id,
            email: user.email,
            password_hash: user.password_hash,
            username: user.username,
            phone_number: user.phone_number,
            active: user.active,
            date_of_created: Utc::now(),
            role_ids,
        };
        let record = tables.record(&stored);
        tables.users.insert(id, stored);
        Ok(record)
    }

    async fn update_profile(
        &self,
        id: i64,
        update: ProfileUpdate,
    ) -> StoreResult<Option<UserRecord>> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&id) {
            return Ok(None);
        }
        if let Some(email) = &update.email {
            if tables.email_taken(email, Some(id)) {
                return Err(StoreError::DuplicateEmail(email.clone()));
            }
        }

        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(username) = update.username {
            user.username = Some(username);
        }
        if let Some(phone_number) = update.phone_number {
            user.phone_number = Some(phone_number);
        }

        Ok(tables.users.get(&id).map(|user| tables.record(user)))
    }

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_active(&self, id: i64, active: bool) -> StoreResult<Option<UserRecord>> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&id) {
            Some(user) => user.active = active,
            None => return Ok(None),
        }
        Ok(tables.users.get(&id).map(|user| tables.record(user)))
    }

    async fn replace_roles(&self, id: i64, role_names: &[String]) -> StoreResult<RoleAssignment> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&id) {
            return Ok(RoleAssignment::UserNotFound);
        }

        let role_ids: BTreeSet<i32> = role_names
            .iter()
            .filter_map(|name| tables.role_id(name))
            .collect();
        if role_ids.is_empty() {
            return Ok(RoleAssignment::NoMatchingRoles);
        }

        if let Some(user) = tables.users.get_mut(&id) {
            user.role_ids = role_ids;
        }
        Ok(match tables.users.get(&id) {
            Some(user) => RoleAssignment::Updated(tables.record(user)),
            None => RoleAssignment::UserNotFound,
        })
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        Ok(self.tables.write().await.users.remove(&id).is_some())
    }

    async fn list_all(&self) -> StoreResult<Vec<UserRecord>> {
        Ok(self.tables.read().await.records_where(|_| true))
    }

    async fn search(&self, criteria: &UserSearch) -> StoreResult<Vec<UserRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.records_where(|record| criteria.matches(record)))
    }

    async fn list_by_role(&self, role_name: &str) -> StoreResult<Vec<UserRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.records_where(|record| record.has_role(role_name)))
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        Ok(self.tables.read().await.roles.values().cloned().collect())
    }
}
