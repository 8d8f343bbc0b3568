//! Runtime Broker Library
//!
//! Accepts provisioning and deprovisioning requests for managed Kubernetes
//! runtimes and drives them to completion through staged pipelines:
//!
//! - **Provisioning**: validate the request, create the runtime through the
//!   provisioner, wait for it and label it
//! - **Deprovisioning**: remove the runtime and wait for the removal
//! - **Status**: report the last operation of an instance
//!
//! Every request becomes an operation record. The pipelines resume from the
//! stages and steps already recorded on it, so a restarted broker picks up
//! where it left off.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`db`]: Postgres operation storage
//! - [`provisioner`]: Client for the runtime provisioner
//! - [`provisioning`], [`deprovisioning`]: Pipeline steps
//! - [`pipelines`]: Stage layout of both pipelines
//! - [`handlers`], [`routes`]: HTTP API
//! - [`state`]: Shared application state

pub mod config;
pub mod db;
pub mod deprovisioning;
pub mod error;
pub mod handlers;
pub mod pipelines;
pub mod provisioner;
pub mod provisioning;
pub mod result_ext;
pub mod routes;
pub mod state;

pub use error::{AppError, AppResult};
pub use result_ext::ResultExt;
pub use routes::build_router;
