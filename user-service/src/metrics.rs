use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct UserMetrics {
    registry: Registry,
    login_attempts: IntCounterVec,
    registrations: IntCounterVec,
    account_changes: IntCounterVec,
}

impl UserMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let login_attempts = IntCounterVec::new(
            Opts::new(
                "user_login_attempts_total",
                "Count of login attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(login_attempts.clone()))?;

        let registrations = IntCounterVec::new(
            Opts::new(
                "user_registrations_total",
                "Count of self-service registrations grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(registrations.clone()))?;

        let account_changes = IntCounterVec::new(
            Opts::new(
                "user_account_changes_total",
                "Count of account mutations grouped by action",
            ),
            &["action"],
        )?;
        registry.register(Box::new(account_changes.clone()))?;

        Ok(Self {
            registry,
            login_attempts,
            registrations,
            account_changes,
        })
    }

    pub fn login_attempt(&self, outcome: &str) {
        self.login_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn registration(&self, outcome: &str) {
        self.registrations.with_label_values(&[outcome]).inc();
    }

    pub fn account_change(&self, action: &str) {
        self.account_changes.with_label_values(&[action]).inc();
    }

    pub fn encode_text(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    pub fn render(&self) -> Result<Response> {
        let buffer = self.encode_text()?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
