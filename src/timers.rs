// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named one-shot timers (§4.9).
//!
//! All timers are one-shot, keyed by symbolic name: arming a name that is
//! already pending deletes the old entry first (delete-before-rearm). The
//! reactor's poll step reports timer expiries one at a time; there is no
//! background thread, so `Timers` is plain reactor-owned state.
//!
//! The merge-detect timer is the only one allowed to re-arm itself while
//! its own expiry handler runs (§4.9); every other timer must be explicitly
//! rearmed by its caller after firing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Symbolic timer identity. Distinct from [`crate::wire::MessageType`]; this
/// names *why* the reactor should wake, not a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerName {
    TokenLoss,
    Retransmit,
    Hold,
    GatherJoin,
    GatherConsensus,
    MergeDetect,
    Downcheck,
}

/// Reactor-owned timer wheel: a name maps to at most one pending deadline.
#[derive(Debug, Default)]
pub struct Timers {
    pending: HashMap<TimerName, Instant>,
}

impl Timers {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Arm `name` to fire after `period`, replacing any existing pending
    /// deadline for the same name (delete-before-rearm).
    pub fn arm(&mut self, name: TimerName, period: Duration) {
        self.pending.insert(name, Instant::now() + period);
    }

    /// Cancel `name` if pending. No-op if it was not armed.
    pub fn cancel(&mut self, name: TimerName) {
        self.pending.remove(&name);
    }

    #[must_use]
    pub fn is_armed(&self, name: TimerName) -> bool {
        self.pending.contains_key(&name)
    }

    /// Deadline the reactor's poll step should block until, the earliest of
    /// all pending timers. `None` means block indefinitely for I/O.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Drain every timer whose deadline has passed `now`, removing them from
    /// the pending set (one-shot: a fired timer is no longer armed until
    /// explicitly rearmed, except `MergeDetect` which callers rearm inline
    /// from within its own expiry handling).
    pub fn take_expired(&mut self, now: Instant) -> Vec<TimerName> {
        let expired: Vec<TimerName> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(name, _)| *name)
            .collect();
        for name in &expired {
            self.pending.remove(name);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_then_canceling_clears_pending() {
        let mut timers = Timers::new();
        timers.arm(TimerName::TokenLoss, Duration::from_millis(10));
        assert!(timers.is_armed(TimerName::TokenLoss));
        timers.cancel(TimerName::TokenLoss);
        assert!(!timers.is_armed(TimerName::TokenLoss));
    }

    #[test]
    fn rearming_same_name_replaces_deadline() {
        let mut timers = Timers::new();
        timers.arm(TimerName::Retransmit, Duration::from_secs(100));
        let long_deadline = timers.next_deadline().unwrap();
        timers.arm(TimerName::Retransmit, Duration::from_millis(1));
        let short_deadline = timers.next_deadline().unwrap();
        assert!(short_deadline < long_deadline);
    }

    #[test]
    fn expired_timers_are_removed_once_taken() {
        let mut timers = Timers::new();
        timers.arm(TimerName::Hold, Duration::from_millis(0));
        let now = Instant::now() + Duration::from_millis(1);
        let expired = timers.take_expired(now);
        assert_eq!(expired, vec![TimerName::Hold]);
        assert!(!timers.is_armed(TimerName::Hold));
        assert!(timers.take_expired(now).is_empty());
    }

    #[test]
    fn unexpired_timers_are_not_reported() {
        let mut timers = Timers::new();
        timers.arm(TimerName::Downcheck, Duration::from_secs(60));
        assert!(timers.take_expired(Instant::now()).is_empty());
    }
}
