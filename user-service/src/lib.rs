pub mod app;
pub mod config;
pub mod error;
pub mod extract;
pub mod memory_store;
pub mod metrics;
pub mod models;
pub mod passwords;
pub mod pg_store;
pub mod principal;
pub mod store;
pub mod tokens;
pub mod user_handlers;

pub use app::{build_router, AppState};
pub use memory_store::InMemoryUserStore;
pub use pg_store::PgUserStore;
pub use store::UserStore;
