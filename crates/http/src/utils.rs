//! Utility macros used internally by the crate.

/// Returns early with an error if a condition is not met.
///
/// Like `assert!`, but produces `Err($error)` instead of panicking.
///
/// ```ignore
/// ensure!(StatusCode::from_u16(code).is_ok(), ResponseError::InvalidStatus(code));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
