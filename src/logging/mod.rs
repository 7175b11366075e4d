// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compile-time configurable logging system.
//!
//! Five severity levels: `debug!`, `info!`, `warn!`, `security!`, `error!`.
//! `security!` is for packet-level drops (auth failure, foreign ring, truncated
//! frame) that an operator wants to audit separately from ordinary warnings.
//!
//! Zero-cost when the `logging` feature is disabled: every macro expands to
//! nothing.

#[cfg(feature = "logging")]
pub mod logger;
#[cfg(feature = "logging")]
mod output;

#[cfg(feature = "logging")]
pub use logger::{flush_logger, init_logger};
#[cfg(feature = "logging")]
pub use output::{ConsoleOutput, FileOutput, LogLevel, Output};

/// Debug-level log message.
#[macro_export]
#[cfg(feature = "logging")]
macro_rules! debug {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Debug,
            &format!($($arg)*),
        );
    };
}

/// Info-level log message.
#[macro_export]
#[cfg(feature = "logging")]
macro_rules! info {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Info,
            &format!($($arg)*),
        );
    };
}

/// Warning-level log message.
#[macro_export]
#[cfg(feature = "logging")]
macro_rules! warn {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Warning,
            &format!($($arg)*),
        );
    };
}

/// Security-level log message: packet dropped due to auth failure, foreign
/// ring, or truncation.
#[macro_export]
#[cfg(feature = "logging")]
macro_rules! security {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Security,
            &format!($($arg)*),
        );
    };
}

/// Error-level log message.
#[macro_export]
#[cfg(feature = "logging")]
macro_rules! error {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Error,
            &format!($($arg)*),
        );
    };
}

#[macro_export]
#[cfg(not(feature = "logging"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[macro_export]
#[cfg(not(feature = "logging"))]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[macro_export]
#[cfg(not(feature = "logging"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[macro_export]
#[cfg(not(feature = "logging"))]
macro_rules! security {
    ($($arg:tt)*) => {};
}
#[macro_export]
#[cfg(not(feature = "logging"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
