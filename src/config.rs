// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Totem Global Configuration — Single Source of Truth.
//!
//! Centralizes protocol constants and runtime-tunable knobs. **Never
//! hardcode these elsewhere.**
//!
//! - **Level 1 (Static)**: compile-time protocol constants (§6.2 of the
//!   design: timers, MTU, list caps).
//! - **Level 2 (Dynamic)**: [`RuntimeConfig`] for values an embedder may
//!   override per deployment (flow-control budget, timer periods).

use std::time::Duration;

// =======================================================================
// Protocol constants (§6.2)
// =======================================================================

/// Maximum transmission unit. Fragmentation above this is the caller's
/// responsibility (out of scope for this crate).
pub const MTU: usize = 2000;

/// Endian-detector magic written into every packet header.
pub const ENDIAN_DETECTOR: u16 = 0xff22;
/// Byte-swapped form of [`ENDIAN_DETECTOR`] seen when the peer's endianness
/// differs from the local one.
pub const ENDIAN_DETECTOR_SWAPPED: u16 = 0x22ff;

/// Default token rotation period (ms).
pub const TOKEN_MS: u64 = 200;
/// Number of retransmits tolerated before the token is declared lost.
pub const RETRANSMITS_BEFORE_LOSS: u32 = 4;
/// `GATHER` join timer period (ms).
pub const GATHER_JOIN_MS: u64 = 100;
/// `GATHER` consensus timer period (ms).
pub const GATHER_CONSENSUS_MS: u64 = 200;
/// Merge-detect heartbeat period (ms).
pub const MERGE_MS: u64 = 200;
/// Downcheck timer period (ms) — allows a minority partition to install a
/// singleton ring if no merge occurs.
pub const DOWNCHECK_MS: u64 = 1000;
/// Consecutive rotations with an unmoving ARU before the `aru_addr`
/// processor is declared failed.
pub const FAIL_TO_RECV_CONST: u32 = 250;
/// Consecutive unchanged `token.seq` rotations before token-hold engages.
pub const SEQNO_UNCHANGED_CONST: u32 = 20;
/// `token.seq - my_aru` window beyond which new originations are suppressed
/// for the rotation (too many outstanding unacknowledged messages).
pub const MISSING_MCAST_WINDOW: u32 = 128;
/// Maximum live entries in a single ORF token's RTR list.
pub const RETRANSMIT_ENTRIES_MAX: usize = 30;
/// Maximum new multicasts originated per token rotation (flow control).
pub const MCASTS_PER_ROTATION_MAX: u32 = 30;
/// Consecutive rotations with `retrans_flg == 0` before install-seq snapshot.
pub const RETRANS_FLG_QUIET_COUNT: u32 = 2;
/// Consecutive quiet rotations with `token.aru >= my_install_seq` required
/// before `my_rotation_counter` starts incrementing toward OPERATIONAL.
pub const RETRANS_FLG_INSTALL_COUNT: u32 = 3;
/// Number of rotations `my_rotation_counter` must reach to enter OPERATIONAL.
pub const ROTATIONS_TO_OPERATIONAL: u32 = 2;
/// Default worker-pool size for packet sealing/sending.
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Derive the retransmit timer period from the token period, per §4.9:
/// `retransmit = token / (retransmits_before_loss + 0.2)`.
pub fn default_retransmit_ms(token_ms: u64) -> u64 {
    let denom = RETRANSMITS_BEFORE_LOSS as f64 + 0.2;
    (token_ms as f64 / denom).round() as u64
}

/// Derive the token-hold retransmit period, per §4.9: `hold ~= 0.8 * retransmit`.
pub fn default_hold_ms(retransmit_ms: u64) -> u64 {
    ((retransmit_ms as f64) * 0.8).round() as u64
}

/// Runtime-tunable protocol configuration.
///
/// Constructed once at [`crate::instance::Instance`] init; immutable
/// thereafter (the reactor thread is the only reader, so no synchronization
/// is needed).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub token_period: Duration,
    pub retransmit_period: Duration,
    pub hold_period: Duration,
    pub join_period: Duration,
    pub consensus_period: Duration,
    pub merge_period: Duration,
    pub downcheck_period: Duration,
    pub fail_to_recv_const: u32,
    pub seqno_unchanged_const: u32,
    pub missing_mcast_window: u32,
    pub rtr_entries_max: usize,
    pub mcasts_per_rotation_max: u32,
    pub worker_count: usize,
}

impl RuntimeConfig {
    /// Default configuration: every knob set to the spec's §6.2 defaults.
    #[must_use]
    pub fn new() -> Self {
        let retransmit_ms = default_retransmit_ms(TOKEN_MS);
        let hold_ms = default_hold_ms(retransmit_ms);
        Self {
            token_period: Duration::from_millis(TOKEN_MS),
            retransmit_period: Duration::from_millis(retransmit_ms),
            hold_period: Duration::from_millis(hold_ms),
            join_period: Duration::from_millis(GATHER_JOIN_MS),
            consensus_period: Duration::from_millis(GATHER_CONSENSUS_MS),
            merge_period: Duration::from_millis(MERGE_MS),
            downcheck_period: Duration::from_millis(DOWNCHECK_MS),
            fail_to_recv_const: FAIL_TO_RECV_CONST,
            seqno_unchanged_const: SEQNO_UNCHANGED_CONST,
            missing_mcast_window: MISSING_MCAST_WINDOW,
            rtr_entries_max: RETRANSMIT_ENTRIES_MAX,
            mcasts_per_rotation_max: MCASTS_PER_ROTATION_MAX,
            worker_count: DEFAULT_WORKER_COUNT,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retransmit_period_matches_spec_formula() {
        // token=200ms, retransmits_before_loss=4 -> 200 / 4.2 ~= 48ms
        assert_eq!(default_retransmit_ms(200), 48);
    }

    #[test]
    fn hold_period_is_eighty_percent_of_retransmit() {
        assert_eq!(default_hold_ms(48), 38);
    }

    #[test]
    fn default_runtime_config_uses_spec_constants() {
        let cfg = RuntimeConfig::new();
        assert_eq!(cfg.token_period, Duration::from_millis(200));
        assert_eq!(cfg.rtr_entries_max, 30);
        assert_eq!(cfg.mcasts_per_rotation_max, 30);
    }
}
