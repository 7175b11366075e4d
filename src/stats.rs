// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Latency-friendly counters updated by the token and membership machines to
//! track protocol-level outcomes (§8 "Testable properties" observability).
//!
//! All fields use relaxed atomics which is sufficient because consumers only
//! need monotonic snapshots for observability.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct Stats {
    /// Messages delivered to the application.
    pub msgs_delivered: AtomicU64,
    /// Rotations this processor has originated the token for.
    pub token_rotations: AtomicU64,
    /// Rotations during which this processor's `my_aru` advanced.
    pub aru_advances: AtomicU64,
    /// Retransmitted messages sent in response to an `rtr_list` entry.
    pub retransmits_sent: AtomicU64,
    /// Packets dropped because the security digest did not match.
    pub auth_failures: AtomicU64,
    /// Packets dropped because they carried a foreign ring id.
    pub foreign_ring_drops: AtomicU64,
    /// Number of times this processor has re-entered GATHER.
    pub membership_changes: AtomicU64,
    /// Number of times recovery completed and OPERATIONAL was reached.
    pub recoveries_completed: AtomicU64,
}

impl Stats {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            msgs_delivered: AtomicU64::new(0),
            token_rotations: AtomicU64::new(0),
            aru_advances: AtomicU64::new(0),
            retransmits_sent: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            foreign_ring_drops: AtomicU64::new(0),
            membership_changes: AtomicU64::new(0),
            recoveries_completed: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_delivered(&self, count: u64) {
        self.msgs_delivered.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rotation(&self) {
        self.token_rotations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_aru_advance(&self) {
        self.aru_advances.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retransmit(&self) {
        self.retransmits_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_foreign_ring_drop(&self) {
        self.foreign_ring_drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_membership_change(&self) {
        self.membership_changes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_recovery_completed(&self) {
        self.recoveries_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters without synchronisation penalties.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            msgs_delivered: self.msgs_delivered.load(Ordering::Relaxed),
            token_rotations: self.token_rotations.load(Ordering::Relaxed),
            aru_advances: self.aru_advances.load(Ordering::Relaxed),
            retransmits_sent: self.retransmits_sent.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            foreign_ring_drops: self.foreign_ring_drops.load(Ordering::Relaxed),
            membership_changes: self.membership_changes.load(Ordering::Relaxed),
            recoveries_completed: self.recoveries_completed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub msgs_delivered: u64,
    pub token_rotations: u64,
    pub aru_advances: u64,
    pub retransmits_sent: u64,
    pub auth_failures: u64,
    pub foreign_ring_drops: u64,
    pub membership_changes: u64,
    pub recoveries_completed: u64,
}
