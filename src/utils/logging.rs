//! Logging macros gated on a module-level `ENABLE_LOGS` flag.
//!
//! The poll loop, the fetcher and the sync engine log every cycle. Flipping
//! the flag in one of those modules silences its per-cycle chatter without
//! touching the global `RUST_LOG` filter.
//!
//! Usage:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_info, log_warn, log_error};
//!
//! log_info!("cycle finished in {}ms", elapsed_ms);
//! ```

/// Conditional `log::debug!`. Requires `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Conditional `log::info!`. Requires `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Conditional `log::warn!`. Requires `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Conditional `log::error!`. Requires `ENABLE_LOGS` in the calling module.
///
/// Exhausted retries and abandoned cycles go through here, so keep the flag on
/// in production modules.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
