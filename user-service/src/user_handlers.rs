use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use common_auth::normalize_role_name;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::models::{RoleDto, UserDto, UserRecord};
use crate::principal::CurrentUser;
use crate::store::{NewUserRecord, ProfileUpdate, RoleAssignment, StoreError, UserSearch};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub expires_at: String,
    pub user: UserDto,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone_number: Option<String>,
    pub active: Option<bool>,
    pub date_of_created: Option<String>,
    pub role_name: Option<String>,
}

pub async fn register_user(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<UserDto>)> {
    let RegisterRequest {
        email,
        password,
        username,
        phone_number,
    } = request;

    let email = match normalize_email(&email) {
        Ok(email) => email,
        Err(err) => {
            state.metrics.registration("invalid");
            return Err(err);
        }
    };
    let password_hash = match state.passwords.encode(&password) {
        Ok(hash) => hash,
        Err(err) => {
            state.metrics.registration("invalid");
            return Err(err.into());
        }
    };

    let record = NewUserRecord::registration(
        email,
        password_hash,
        non_blank(username),
        non_blank(phone_number),
    );
    let user = match state.store.create(record).await {
        Ok(user) => user,
        Err(err) => {
            let outcome = match err {
                StoreError::DuplicateEmail(_) => "duplicate",
                _ => "error",
            };
            state.metrics.registration(outcome);
            return Err(err.into());
        }
    };

    state.metrics.registration("created");
    info!(user_id = user.id, "Registered new user");
    Ok((StatusCode::CREATED, Json(user.to_dto())))
}

pub async fn login_user(
    State(state): State<AppState>,
    ApiJson(login): ApiJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let LoginRequest { email, password } = login;
    let email = email.trim();

    let Some(user) = state.store.find_by_email(email).await? else {
        warn!(email = %email, "Login rejected: unknown email");
        state.record_login_metric("unknown_user");
        return Err(invalid_credentials());
    };

    if !state.passwords.matches(&password, &user.password_hash) {
        warn!(user_id = user.id, "Login rejected: wrong password");
        state.record_login_metric("invalid_password");
        return Err(invalid_credentials());
    }

    if !user.active {
        warn!(user_id = user.id, "Login rejected: account disabled");
        state.record_login_metric("disabled");
        return Err(ApiError::forbidden(
            "ACCOUNT_DISABLED",
            "This account is not active",
        ));
    }

    let issued = state
        .token_signer
        .issue(&user.email, &user.role_names())
        .map_err(|err| {
            error!(user_id = user.id, error = ?err, "Failed to issue token");
            ApiError::internal("Unable to issue authentication token.")
        })?;

    state.record_login_metric("success");
    Ok(Json(LoginResponse {
        access_token: issued.access_token,
        token_type: issued.token_type,
        expires_in: issued.expires_in,
        expires_at: issued
            .expires_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        user: user.to_dto(),
    }))
}

pub async fn current_user(current: CurrentUser) -> Json<UserDto> {
    Json(current.user.to_dto())
}

pub async fn list_users(State(state): State<AppState>, current: CurrentUser) -> ApiResult<Response> {
    current.ensure_admin()?;
    let users = state.store.list_all().await?;
    Ok(list_response(users))
}

pub async fn search_users(
    State(state): State<AppState>,
    current: CurrentUser,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> ApiResult<Response> {
    current.ensure_admin()?;

    let created_from = params
        .date_of_created
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(parse_timestamp)
        .transpose()?;
    let role_name = params.role_name;

    let criteria = UserSearch {
        email: params.email,
        username: params.username,
        phone_number: params.phone_number,
        active: params.active,
        created_from,
        role_name,
    }
    .normalized();

    let users = state.store.search(&criteria).await?;
    Ok(list_response(users))
}

pub async fn list_users_by_role(
    State(state): State<AppState>,
    current: CurrentUser,
    ApiPath(role): ApiPath<String>,
) -> ApiResult<Response> {
    current.ensure_admin()?;
    let role = normalize_role_name(&role)
        .ok_or_else(|| ApiError::bad_request("INVALID_ROLE", "Role name must not be blank"))?;
    let users = state.store.list_by_role(&role).await?;
    Ok(list_response(users))
}

pub async fn list_roles(
    State(state): State<AppState>,
    _current: CurrentUser,
) -> ApiResult<Json<Vec<RoleDto>>> {
    let roles = state.store.list_roles().await?;
    Ok(Json(roles.iter().map(RoleDto::from).collect()))
}

pub async fn get_user_by_email(
    State(state): State<AppState>,
    _current: CurrentUser,
    ApiPath(email): ApiPath<String>,
) -> ApiResult<Json<UserDto>> {
    let email = email.trim();
    let user = state.store.find_by_email(email).await?.ok_or_else(|| {
        ApiError::not_found("USER_NOT_FOUND", format!("User with email {email} not found"))
    })?;
    Ok(Json(user.to_dto()))
}

pub async fn get_user_by_id(
    State(state): State<AppState>,
    _current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<UserDto>> {
    let user = state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::user_not_found(id))?;
    Ok(Json(user.to_dto()))
}

pub async fn user_exists(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<bool>> {
    Ok(Json(state.store.exists(id).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> ApiResult<Json<UserDto>> {
    current.ensure_self_or_admin(id)?;

    let email = match request.email {
        Some(raw) => Some(normalize_email(&raw)?),
        None => None,
    };
    let update = ProfileUpdate {
        email,
        username: non_blank(request.username),
        phone_number: non_blank(request.phone_number),
    };

    let user = state
        .store
        .update_profile(id, update)
        .await?
        .ok_or_else(|| ApiError::user_not_found(id))?;

    state.record_account_change("update");
    info!(user_id = id, actor_id = current.id(), "Updated user profile");
    Ok(Json(user.to_dto()))
}

pub async fn change_password(
    State(state): State<AppState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    current.ensure_self_or_admin(id)?;

    let user = state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::user_not_found(id))?;

    if !state
        .passwords
        .matches(&request.old_password, &user.password_hash)
    {
        return Err(ApiError::bad_request(
            "INVALID_PASSWORD",
            "Old password is incorrect",
        ));
    }

    let password_hash = state.passwords.encode(&request.new_password)?;
    if !state.store.set_password_hash(id, &password_hash).await? {
        return Err(ApiError::user_not_found(id));
    }

    state.record_account_change("change_password");
    info!(user_id = id, actor_id = current.id(), "Changed user password");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate_user(
    State(state): State<AppState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<UserDto>> {
    set_active(state, current, id, true).await
}

pub async fn deactivate_user(
    State(state): State<AppState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<UserDto>> {
    set_active(state, current, id, false).await
}

async fn set_active(
    state: AppState,
    current: CurrentUser,
    id: i64,
    active: bool,
) -> ApiResult<Json<UserDto>> {
    current.ensure_admin()?;

    let user = state
        .store
        .set_active(id, active)
        .await?
        .ok_or_else(|| ApiError::user_not_found(id))?;

    let action = if active { "activate" } else { "deactivate" };
    state.record_account_change(action);
    info!(user_id = id, actor_id = current.id(), action, "Changed account status");
    Ok(Json(user.to_dto()))
}

pub async fn update_roles(
    State(state): State<AppState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(names): ApiJson<Vec<String>>,
) -> ApiResult<Json<UserDto>> {
    current.ensure_admin()?;

    let names: Vec<String> = names
        .iter()
        .filter_map(|name| normalize_role_name(name))
        .collect();

    match state.store.replace_roles(id, &names).await? {
        RoleAssignment::Updated(user) => {
            state.record_account_change("roles");
            info!(
                user_id = id,
                actor_id = current.id(),
                roles = ?user.role_names(),
                "Replaced user roles"
            );
            Ok(Json(user.to_dto()))
        }
        RoleAssignment::UserNotFound => Err(ApiError::user_not_found(id)),
        RoleAssignment::NoMatchingRoles => Err(ApiError::bad_request(
            "NO_MATCHING_ROLES",
            "None of the requested roles exist",
        )),
    }
}

pub async fn delete_user(
    State(state): State<AppState>,
    current: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<StatusCode> {
    current.ensure_admin()?;

    if !state.store.delete(id).await? {
        return Err(ApiError::user_not_found(id));
    }

    state.record_account_change("delete");
    info!(user_id = id, actor_id = current.id(), "Deleted user");
    Ok(StatusCode::NO_CONTENT)
}

fn invalid_credentials() -> ApiError {
    ApiError::unauthorized(
        "INVALID_CREDENTIALS",
        "Invalid credentials. Please try again.",
    )
}

/// 204 for an empty result, otherwise the users as JSON.
fn list_response(users: Vec<UserRecord>) -> Response {
    if users.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }
    let dtos: Vec<UserDto> = users.iter().map(UserRecord::to_dto).collect();
    Json(dtos).into_response()
}

pub(crate) fn normalize_email(raw: &str) -> ApiResult<String> {
    let email = raw.trim().to_string();
    if email.is_empty() {
        return Err(ApiError::bad_request(
            "INVALID_EMAIL",
            "Email must not be blank",
        ));
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(ApiError::bad_request(
            "INVALID_EMAIL",
            format!("'{email}' is not a valid email address"),
        ));
    }
    Ok(email)
}

/// RFC 3339, a naive ISO date-time, or a plain date; naive values are UTC.
pub(crate) fn parse_timestamp(raw: &str) -> ApiResult<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = raw.parse::<NaiveDateTime>() {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Some(midnight) = raw
        .parse::<NaiveDate>()
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&midnight));
    }
    Err(ApiError::bad_request(
        "INVALID_DATE",
        format!("Cannot parse dateOfCreated '{raw}'"),
    ))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
