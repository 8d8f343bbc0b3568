//! PostgreSQL persistence for operations.

pub mod operations;
pub mod pool;

pub use operations::PostgresOperations;
pub use pool::{create_pool, health_check, run_migrations, DbPool};
