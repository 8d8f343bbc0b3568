//! Deprovisioning steps.
//!
//! A deprovisioning operation starts with the instance details of the last
//! provisioning operation, minus its provisioner operation id.

mod check_removal;
mod remove_runtime;

pub use check_removal::CheckRuntimeRemovalStep;
pub use remove_runtime::RemoveRuntimeStep;
