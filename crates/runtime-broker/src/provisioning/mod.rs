//! Provisioning steps.

mod apply_labels;
mod check_runtime;
mod create_runtime;
mod finish;
mod validate;

pub use apply_labels::ApplyLabelsStep;
pub use check_runtime::CheckRuntimeStep;
pub use create_runtime::CreateRuntimeStep;
pub use finish::FinishStep;
pub use validate::ValidateParametersStep;
