// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors surfaced by the Totem embedding API (§7 of the protocol design).
//!
//! Most failure modes inside the protocol (auth failures, duplicate tokens,
//! foreign ring ids) are absorbed internally and never reach this enum —
//! they are logged at `LogLevel::Security`/`Warning` and handled by the
//! retransmission machinery instead. `Error` covers only what a caller of
//! the embedding API in §6.1 can observe.

use std::fmt;

/// Errors returned by Totem embedding API operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // API misuse
    // ========================================================================
    /// The handle does not refer to an initialized instance.
    NotInitialized,
    /// The handle value is not recognized (double-finalize, stale handle).
    InvalidHandle,
    /// The callback id does not refer to a registered callback.
    UnknownCallback,

    // ========================================================================
    // Resource errors
    // ========================================================================
    /// `submit_mcast` was called with the origin queue already at capacity.
    QueueFull,

    // ========================================================================
    // Persistence
    // ========================================================================
    /// Ring-sequence file could not be read or written. Fatal: the protocol
    /// cannot guarantee `ring_seq` monotonicity across a restart without it.
    PersistenceFailed(String),

    // ========================================================================
    // Wire framing (surfaced only to callers that call the framer directly;
    // the protocol's own receive path absorbs these per §7).
    // ========================================================================
    /// Packet digest did not match; packet was dropped.
    AuthFailed,
    /// Packet shorter than the fixed security header.
    Truncated,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotInitialized => write!(f, "instance not initialized"),
            Error::InvalidHandle => write!(f, "invalid or stale handle"),
            Error::UnknownCallback => write!(f, "unknown callback id"),
            Error::QueueFull => write!(f, "origin queue full, retry later"),
            Error::PersistenceFailed(msg) => write!(f, "ring-id persistence failed: {}", msg),
            Error::AuthFailed => write!(f, "packet authentication failed"),
            Error::Truncated => write!(f, "packet shorter than security header"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
