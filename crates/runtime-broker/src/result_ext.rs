//! Error logging helper for results.

use std::fmt::Display;

/// Adds `log` to `Result`: logs the error with the caller location and
/// returns the result unchanged.
pub trait ResultExt<T, E> {
    fn log<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let location = std::panic::Location::caller();
            tracing::error!(
                target: "runtime_broker",
                error = %e,
                file = %format!("{}:{}", location.file(), location.line()),
                context = %context.to_string(),
                "Call failed"
            );
        }
        self
    }
}
