use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder};

use crate::models::{Role, UserRecord};
use crate::store::{
    like_pattern, NewUserRecord, ProfileUpdate, RoleAssignment, StoreError, StoreResult,
    UserSearch, UserStore,
};

const USER_COLUMNS: &str =
    "u.id, u.email, u.password, u.username, u.phone_number, u.active, u.date_of_created";
const RETURNING_COLUMNS: &str =
    "id, email, password, username, phone_number, active, date_of_created";

#[derive(FromRow)]
struct UserRow {
    id: i64,
    email: String,
    password: String,
    username: Option<String>,
    phone_number: Option<String>,
    active: bool,
    date_of_created: DateTime<Utc>,
}

impl UserRow {
    fn into_record(self, roles: Vec<Role>) -> UserRecord {
        UserRecord {
            id: self.id,
            email: self.email,
            password_hash: self.password,
            username: self.username,
            phone_number: self.phone_number,
            active: self.active,
            date_of_created: self.date_of_created,
            roles,
        }
    }
}

#[derive(FromRow)]
struct UserRoleRow {
    user_id: i64,
    id: i32,
    name: String,
}

/// [`UserStore`] backed by the `users`, `roles` and `users_roles` tables.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn hydrate(&self, rows: Vec<UserRow>) -> StoreResult<Vec<UserRecord>> {
        let mut conn = self.pool.acquire().await?;
        hydrate(&mut conn, rows).await
    }

    async fn hydrate_one(&self, row: Option<UserRow>) -> StoreResult<Option<UserRecord>> {
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

async fn load_roles(
    conn: &mut PgConnection,
    user_ids: &[i64],
) -> StoreResult<HashMap<i64, Vec<Role>>> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, UserRoleRow>(
        "SELECT ur.user_id, r.id, r.name
         FROM users_roles ur
         JOIN roles r ON r.id = ur.role_id
         WHERE ur.user_id = ANY($1)
         ORDER BY ur.user_id, r.id",
    )
    .bind(user_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut roles: HashMap<i64, Vec<Role>> = HashMap::new();
    for row in rows {
        roles.entry(row.user_id).or_default().push(Role {
            id: row.id,
            name: row.name,
        });
    }
    Ok(roles)
}

async fn hydrate(conn: &mut PgConnection, rows: Vec<UserRow>) -> StoreResult<Vec<UserRecord>> {
    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
    let mut roles = load_roles(conn, &ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let user_roles = roles.remove(&row.id).unwrap_or_default();
            row.into_record(user_roles)
        })
        .collect())
}

async fn fetch_user(conn: &mut PgConnection, id: i64) -> StoreResult<Option<UserRecord>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(hydrate(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn map_email_conflict(err: sqlx::Error, email: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::DuplicateEmail(email.to_string())
    } else {
        StoreError::Database(err)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UserRecord>> {
        let mut conn = self.pool.acquire().await?;
        fetch_user(&mut conn, id).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        self.hydrate_one(row).await
    }

    async fn exists(&self, id: i64) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn create(&self, user: NewUserRecord) -> StoreResult<UserRecord> {
        let mut tx = self.pool.begin().await?;

        let roles = sqlx::query_as::<_, Role>(
            "SELECT id, name FROM roles WHERE name = ANY($1) ORDER BY id",
        )
        .bind(&user.roles)
        .fetch_all(&mut *tx)
        .await?;
        if let Some(missing) = user
            .roles
            .iter()
            .find(|name| !roles.iter().any(|role| &role.name == *name))
        {
            return Err(StoreError::MissingRole(missing.clone()));
        }

        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (email, password, username, phone_number, active)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.username)
        .bind(&user.phone_number)
        .bind(user.active)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| map_email_conflict(err, &user.email))?;

        let role_ids: Vec<i32> = roles.iter().map(|role| role.id).collect();
        sqlx::query(
            "INSERT INTO users_roles (user_id, role_id) SELECT $1, UNNEST($2::int[])",
        )
        .bind(row.id)
        .bind(&role_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into_record(roles))
    }

    async fn update_profile(
        &self,
        id: i64,
        update: ProfileUpdate,
    ) -> StoreResult<Option<UserRecord>> {
        let email = update.email.clone();
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users
             SET email = COALESCE($2, email),
                 username = COALESCE($3, username),
                 phone_number = COALESCE($4, phone_number)
             WHERE id = $1
             RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(id)
        .bind(&update.email)
        .bind(&update.username)
        .bind(&update.phone_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| map_email_conflict(err, email.as_deref().unwrap_or_default()))?;

        self.hydrate_one(row).await
    }

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET password = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_active(&self, id: i64, active: bool) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET active = $2 WHERE id = $1 RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;
        self.hydrate_one(row).await
    }

    async fn replace_roles(&self, id: i64, role_names: &[String]) -> StoreResult<RoleAssignment> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Ok(RoleAssignment::UserNotFound);
        }

        let role_ids = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM roles WHERE name = ANY($1) ORDER BY id",
        )
        .bind(role_names)
        .fetch_all(&mut *tx)
        .await?;
        if role_ids.is_empty() {
            return Ok(RoleAssignment::NoMatchingRoles);
        }

        sqlx::query("DELETE FROM users_roles WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO users_roles (user_id, role_id) SELECT $1, UNNEST($2::int[])",
        )
        .bind(id)
        .bind(&role_ids)
        .execute(&mut *tx)
        .await?;

        let user = fetch_user(&mut *tx, id).await?;
        tx.commit().await?;

        Ok(match user {
            Some(user) => RoleAssignment::Updated(user),
            None => RoleAssignment::UserNotFound,
        })
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self) -> StoreResult<Vec<UserRecord>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users u ORDER BY u.id"
        ))
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn search(&self, criteria: &UserSearch) -> StoreResult<Vec<UserRecord>> {
        let mut builder = search_query(criteria);
        let rows = builder
            .build_query_as::<UserRow>()
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    async fn list_by_role(&self, role_name: &str) -> StoreResult<Vec<UserRecord>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS}
             FROM users u
             WHERE EXISTS (
                 SELECT 1 FROM users_roles ur
                 JOIN roles r ON r.id = ur.role_id
                 WHERE ur.user_id = u.id AND r.name = $1
             )
             ORDER BY u.id"
        ))
        .bind(role_name)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>("SELECT id, name FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }
}

fn search_query(criteria: &UserSearch) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "SELECT DISTINCT {USER_COLUMNS} FROM users u \
         LEFT JOIN users_roles ur ON ur.user_id = u.id \
         LEFT JOIN roles r ON r.id = ur.role_id \
         WHERE 1 = 1"
    ));

    if let Some(email) = &criteria.email {
        builder
            .push(" AND LOWER(u.email) LIKE ")
            .push_bind(like_pattern(&email.to_lowercase()))
            .push(" ESCAPE '\\'");
    }
    if let Some(username) = &criteria.username {
        builder
            .push(" AND LOWER(u.username) LIKE ")
            .push_bind(like_pattern(&username.to_lowercase()))
            .push(" ESCAPE '\\'");
    }
    if let Some(phone) = &criteria.phone_number {
        builder
            .push(" AND u.phone_number LIKE ")
            .push_bind(like_pattern(phone))
            .push(" ESCAPE '\\'");
    }
    if let Some(active) = criteria.active {
        builder.push(" AND u.active = ").push_bind(active);
    }
    if let Some(from) = criteria.created_from {
        builder.push(" AND u.date_of_created >= ").push_bind(from);
    }
    if let Some(role) = &criteria.role_name {
        builder.push(" AND r.name = ").push_bind(role.clone());
    }

    builder.push(" ORDER BY u.id");
    builder
}
