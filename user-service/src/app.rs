use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::{FromRef, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use common_auth::{JwtVerifier, ROLE_ADMIN, ROLE_USER};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};

use crate::config::BootstrapAdmin;
use crate::metrics::UserMetrics;
use crate::passwords::PasswordEncoder;
use crate::store::{NewUserRecord, RoleAssignment, UserStore};
use crate::tokens::TokenSigner;
use crate::user_handlers::{
    activate_user, change_password, current_user, deactivate_user, delete_user,
    get_user_by_email, get_user_by_id, list_roles, list_users, list_users_by_role, login_user,
    register_user, search_users, update_roles, update_user, user_exists,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub jwt_verifier: Arc<JwtVerifier>,
    pub token_signer: Arc<TokenSigner>,
    pub passwords: PasswordEncoder,
    pub metrics: Arc<UserMetrics>,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_verifier.clone()
    }
}

impl AppState {
    pub fn record_login_metric(&self, outcome: &str) {
        self.metrics.login_attempt(outcome);
    }

    pub fn record_account_change(&self, action: &str) {
        self.metrics.account_change(action);
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/users/register", post(register_user))
        .route("/users/login", post(login_user))
        .route("/users/user", get(current_user))
        .route("/users", get(list_users))
        .route("/users/", get(list_users))
        .route("/users/search", get(search_users))
        .route("/users/roles", get(list_roles))
        .route("/users/role/:role", get(list_users_by_role))
        .route("/users/email/:email", get(get_user_by_email))
        .route(
            "/users/:id",
            get(get_user_by_id).put(update_user).delete(delete_user),
        )
        .route("/users/:id/exists", get(user_exists))
        .route("/users/:id/change-password", put(change_password))
        .route("/users/:id/activate", put(activate_user))
        .route("/users/:id/deactivate", put(deactivate_user))
        .route("/users/:id/roles", put(update_roles))
        .with_state(state)
}

pub fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .with_context(|| format!("Invalid CORS origin '{origin}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION]))
}

/// Makes sure `admin` exists, is active and holds `ROLE_ADMIN`.
pub async fn ensure_bootstrap_admin(state: &AppState, admin: &BootstrapAdmin) -> Result<()> {
    let email = admin.email.trim().to_string();
    let existing = state.store.find_by_email(&email).await?;

    let Some(user) = existing else {
        let password_hash = state.passwords.encode(&admin.password)?;
        let created = state
            .store
            .create(NewUserRecord {
                email: email.clone(),
                password_hash,
                username: None,
                phone_number: None,
                active: true,
                roles: vec![ROLE_USER.to_string(), ROLE_ADMIN.to_string()],
            })
            .await?;
        info!(user_id = created.id, email = %email, "Created bootstrap administrator");
        return Ok(());
    };

    if !user.active {
        state.store.set_active(user.id, true).await?;
        info!(user_id = user.id, "Re-activated bootstrap administrator");
    }
    if !user.has_role(ROLE_ADMIN) {
        let mut roles = user.role_names();
        roles.push(ROLE_ADMIN.to_string());
        match state.store.replace_roles(user.id, &roles).await? {
            RoleAssignment::Updated(_) => {
                info!(user_id = user.id, "Granted ROLE_ADMIN to bootstrap administrator")
            }
            other => return Err(anyhow!("Unable to grant ROLE_ADMIN: {other:?}")),
        }
    }
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(response) => response,
        Err(err) => {
            error!(error = ?err, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
