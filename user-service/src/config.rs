use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::{IpAddr, SocketAddr};

use crate::passwords::DEFAULT_COST;
use crate::tokens::{DEFAULT_TTL_SECONDS, MAX_TTL_SECONDS};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8086;
const DEFAULT_LEEWAY_SECONDS: u32 = 30;
const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:4200",
    "http://localhost:5173",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { database_url: String },
    Memory,
}

#[derive(Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

/// Runtime settings read from the environment at startup.
#[derive(Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub run_migrations: bool,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_ttl_seconds: i64,
    pub jwt_leeway_seconds: u32,
    pub bcrypt_cost: u32,
    pub cors_allowed_origins: Vec<String>,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl ServiceConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid HOST '{}'", self.host))?;
        Ok(SocketAddr::from((ip, self.port)))
    }
}

pub fn load_service_config() -> Result<ServiceConfig> {
    config_from(|key| env::var(key).ok())
}

pub(crate) fn config_from<F>(lookup: F) -> Result<ServiceConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let optional = |key: &str| lookup(key).and_then(|value| normalize_optional(&value));

    let host = optional("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = parse_or("PORT", optional("PORT"), DEFAULT_PORT)?;

    let store = match optional("USER_STORE").map(|value| value.to_ascii_lowercase()) {
        Some(kind) if kind == "memory" => StoreBackend::Memory,
        Some(kind) if kind != "postgres" => {
            return Err(anyhow!(
                "Unsupported USER_STORE '{kind}'. Use postgres or memory."
            ))
        }
        _ => StoreBackend::Postgres {
            database_url: optional("DATABASE_URL")
                .ok_or_else(|| anyhow!("DATABASE_URL must be set"))?,
        },
    };
    let run_migrations = optional("RUN_MIGRATIONS")
        .map(|value| parse_bool(&value))
        .unwrap_or(true);

    let jwt_secret = optional("JWT_SECRET").ok_or_else(|| anyhow!("JWT_SECRET must be set"))?;
    let jwt_issuer = optional("JWT_ISSUER");
    let jwt_ttl_seconds = parse_or(
        "JWT_TTL_SECONDS",
        optional("JWT_TTL_SECONDS"),
        DEFAULT_TTL_SECONDS,
    )?;
    if !(1..=MAX_TTL_SECONDS).contains(&jwt_ttl_seconds) {
        return Err(anyhow!(
            "JWT_TTL_SECONDS must be between 1 and {MAX_TTL_SECONDS}, got {jwt_ttl_seconds}"
        ));
    }
    let jwt_leeway_seconds = parse_or(
        "JWT_LEEWAY_SECONDS",
        optional("JWT_LEEWAY_SECONDS"),
        DEFAULT_LEEWAY_SECONDS,
    )?;
    let bcrypt_cost = parse_or("BCRYPT_COST", optional("BCRYPT_COST"), DEFAULT_COST)?;

    let cors_allowed_origins = optional("CORS_ALLOWED_ORIGINS")
        .map(|value| parse_list(&value))
        .unwrap_or_else(|| {
            DEFAULT_CORS_ORIGINS
                .iter()
                .map(|origin| origin.to_string())
                .collect()
        });

    let bootstrap_admin = match (
        optional("BOOTSTRAP_ADMIN_EMAIL"),
        optional("BOOTSTRAP_ADMIN_PASSWORD"),
    ) {
        (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
        (None, None) => None,
        _ => {
            return Err(anyhow!(
                "BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together"
            ))
        }
    };

    Ok(ServiceConfig {
        host,
        port,
        store,
        run_migrations,
        jwt_secret,
        jwt_issuer,
        jwt_ttl_seconds,
        jwt_leeway_seconds,
        bcrypt_cost,
        cors_allowed_origins,
        bootstrap_admin,
    })
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|err| anyhow!("Failed to parse {key} '{raw}': {err}")),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(|c| c == ',' || c == ';' || c == ' ')
        .filter_map(normalize_optional)
        .collect()
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
