#![allow(dead_code)]

use std::{env, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use common_auth::{JwtConfig, JwtVerifier};
use pg_embed::pg_enums::PgAuthMethod;
use pg_embed::pg_fetch::{PgFetchSettings, PG_V13};
use pg_embed::postgres::{PgEmbed, PgSettings};
use portpicker::pick_unused_port;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tempfile::{tempdir, TempDir};
use user_service::metrics::UserMetrics;
use user_service::models::UserRecord;
use user_service::passwords::PasswordEncoder;
use user_service::store::NewUserRecord;
use user_service::tokens::{TokenConfig, TokenSigner};
use user_service::{AppState, UserStore};

pub const TEST_SECRET: &[u8] = b"user-service-test-secret-0123456789abcdef";
pub const TEST_PASSWORD: &str = "CorrectHorseBatteryStaple!";

pub struct TestDatabase {
    pool: PgPool,
    embedded: Option<EmbeddedPg>,
}

impl TestDatabase {
    /// `None` unless `USER_TEST_DATABASE_URL` or `USER_TEST_USE_EMBED` is set.
    pub async fn setup() -> Result<Option<Self>> {
        let (database_url, embedded) = match env::var("USER_TEST_DATABASE_URL") {
            Ok(url) => (url, None),
            Err(_) if env_flag_enabled("USER_TEST_USE_EMBED") => {
                let embedded = EmbeddedPg::start().await?;
                (embedded.database_url(), Some(embedded))
            }
            Err(_) => {
                eprintln!(
                    "Skipping Postgres store tests: set USER_TEST_DATABASE_URL or USER_TEST_USE_EMBED=1 to run them.",
                );
                return Ok(None);
            }
        };

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        reset_tables(&pool).await?;

        Ok(Some(Self { pool, embedded }))
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    pub async fn teardown(self) -> Result<()> {
        self.pool.close().await;
        if let Some(mut embedded) = self.embedded {
            let _ = embedded.pg.stop_db().await;
        }
        Ok(())
    }
}

struct EmbeddedPg {
    pg: PgEmbed,
    _data_dir: TempDir,
}

impl EmbeddedPg {
    async fn start() -> Result<Self> {
        let data_dir = tempdir()?;
        let port = pick_unused_port().context("no free port for embedded Postgres")?;
        let mut fetch = PgFetchSettings::default();
        fetch.version = PG_V13;

        let mut pg = PgEmbed::new(
            PgSettings {
                database_dir: data_dir.path().to_path_buf(),
                port,
                user: "postgres".to_string(),
                password: "postgres".to_string(),
                auth_method: PgAuthMethod::Plain,
                persistent: false,
                timeout: Some(Duration::from_secs(30)),
                migration_dir: None,
            },
            fetch,
        )
        .await?;
        pg.setup().await?;
        pg.start_db().await?;

        Ok(Self {
            pg,
            _data_dir: data_dir,
        })
    }

    fn database_url(&self) -> String {
        format!("{}/postgres", self.pg.db_uri)
    }
}

/// Removes accounts left by earlier runs against an external database.
async fn reset_tables(pool: &PgPool) -> Result<()> {
    sqlx::query("TRUNCATE users RESTART IDENTITY CASCADE")
        .execute(pool)
        .await?;
    Ok(())
}

pub fn password_encoder() -> PasswordEncoder {
    PasswordEncoder::new(4).expect("bcrypt cost")
}

pub fn test_state(store: Arc<dyn UserStore>) -> AppState {
    let verifier = JwtVerifier::builder(JwtConfig::new())
        .with_secret(TEST_SECRET)
        .expect("secret")
        .build();
    let signer = TokenSigner::new(TokenConfig::default(), TEST_SECRET).expect("signer");

    AppState {
        store,
        jwt_verifier: Arc::new(verifier),
        token_signer: Arc::new(signer),
        passwords: password_encoder(),
        metrics: Arc::new(UserMetrics::new().expect("metrics")),
    }
}

/// Inserts an account with [`TEST_PASSWORD`].
pub async fn seed_user(
    store: &dyn UserStore,
    email: &str,
    roles: &[&str],
    active: bool,
) -> Result<UserRecord> {
    let password_hash = password_encoder().encode(TEST_PASSWORD)?;
    let user = store
        .create(NewUserRecord {
            email: email.to_string(),
            password_hash,
            username: None,
            phone_number: None,
            active,
            roles: roles.iter().map(|role| role.to_string()).collect(),
        })
        .await?;
    Ok(user)
}

fn env_flag_enabled(key: &str) -> bool {
    env::var(key).is_ok_and(|value| matches!(value.trim(), "1" | "true" | "yes" | "on"))
}
