//! HTTP handlers for the broker API.

pub mod health;
pub mod instances;

pub use health::{api_health, health_check};
pub use instances::{deprovision, last_operation, provision};
