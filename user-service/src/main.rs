use std::sync::Arc;

use anyhow::Context;
use common_auth::{JwtConfig, JwtVerifier};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use user_service::app::{build_router, cors_layer, ensure_bootstrap_admin, AppState};
use user_service::config::{load_service_config, StoreBackend};
use user_service::metrics::UserMetrics;
use user_service::passwords::PasswordEncoder;
use user_service::tokens::{TokenConfig, TokenSigner};
use user_service::{InMemoryUserStore, PgUserStore, UserStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_service_config()?;

    let store: Arc<dyn UserStore> = match &config.store {
        StoreBackend::Postgres { database_url } => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("Failed to connect to Postgres")?;
            if config.run_migrations {
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .context("Failed to run database migrations")?;
            }
            Arc::new(PgUserStore::new(pool))
        }
        StoreBackend::Memory => {
            info!("Using in-memory user store; data is lost on restart");
            Arc::new(InMemoryUserStore::new())
        }
    };

    let mut jwt_config = JwtConfig::new().with_leeway(config.jwt_leeway_seconds);
    if let Some(issuer) = &config.jwt_issuer {
        jwt_config = jwt_config.with_issuer(issuer.clone());
    }
    let jwt_verifier = JwtVerifier::builder(jwt_config)
        .with_secret(config.jwt_secret.as_bytes())
        .context("Invalid JWT_SECRET")?
        .build();

    let token_signer = TokenSigner::new(
        TokenConfig {
            issuer: config.jwt_issuer.clone(),
            ttl_seconds: config.jwt_ttl_seconds,
            key_id: None,
        },
        config.jwt_secret.as_bytes(),
    )?;

    let state = AppState {
        store,
        jwt_verifier: Arc::new(jwt_verifier),
        token_signer: Arc::new(token_signer),
        passwords: PasswordEncoder::new(config.bcrypt_cost)?,
        metrics: Arc::new(UserMetrics::new()?),
    };

    if let Some(admin) = &config.bootstrap_admin {
        ensure_bootstrap_admin(&state, admin)
            .await
            .context("Failed to provision bootstrap administrator")?;
    }

    let app = build_router(state).layer(cors_layer(&config.cors_allowed_origins)?);

    let addr = config.bind_addr()?;
    info!(%addr, "starting user-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
