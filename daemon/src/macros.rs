//! Custom macros for reducing code repetition in clipdeck

/// Log an error and continue execution (non-fatal error handling)
///
/// # Example
/// ```ignore
/// log_and_continue!(std::fs::remove_file(&socket_path), "remove stale socket");
/// ```
#[macro_export]
macro_rules! log_and_continue {
    ($expr:expr, $context:expr) => {
        if let Err(e) = $expr {
            log::error!("Failed to {}: {}", $context, e);
        }
    };
}

/// Validate an enum-like string value
///
/// # Example
/// ```ignore
/// validate_enum!(level, "trace", "debug", "info", "warn", "error");
/// validate_enum!(preload, "none", "metadata", "auto");
/// ```
#[macro_export]
macro_rules! validate_enum {
    ($value:expr, $($variant:expr),+) => {
        match $value {
            $($variant)|+ => Ok(()),
            _ => anyhow::bail!("Invalid value: {} (expected one of: {})", $value, [$($variant),+].join(", ")),
        }
    };
}

/// Look up a mounted element or return a `NotFound` error from the
/// enclosing function
///
/// # Example
/// ```ignore
/// let element = require_mounted!(self.elements, &id);
/// ```
#[macro_export]
macro_rules! require_mounted {
    ($elements:expr, $id:expr) => {
        match $elements.get($id) {
            Some(element) => element.clone(),
            None => {
                return Err(common::ClipdeckError::NotFound(format!(
                    "No mounted video with id '{}'",
                    $id
                )))
            }
        }
    };
}
