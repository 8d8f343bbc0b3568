//! Configuration for the runtime broker.
//!
//! Everything is read from environment variables with `envy`. A `.env`
//! file is loaded first when present.

mod app;
mod database;

pub use app::{AppConfig, StorageBackend};
pub use database::DatabaseConfig;
