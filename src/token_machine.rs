// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Token machine (§4.3): the nine-step handling of an ORF token receipt.
//!
//! `TokenMachine` owns only the counters described in §4.3; the sort queue,
//! origin queues, and membership snapshot it needs are borrowed in via
//! [`TokenContext`] for the duration of a single [`TokenMachine::on_token`]
//! call, keeping this module free of any socket or transport concern.

use crate::config::RuntimeConfig;
use crate::identity::{self, ProcessorId};
use crate::queue::{MsgQueue, SortQueue};
use crate::ring_id::RingId;
use crate::stats::Stats;
use crate::wire::{McastHeader, MessageItem, OrfToken, RtrEntry};

/// An application payload waiting for origination budget, as queued by
/// `submit_mcast` (§6.1).
#[derive(Debug, Clone)]
pub struct SubmittedMcast {
    pub payload: Vec<u8>,
    pub guarantee: u8,
}

/// Borrowed state the token machine needs for one rotation.
pub struct TokenContext<'a> {
    pub self_id: ProcessorId,
    pub ring_id: RingId,
    pub members: &'a [ProcessorId],
    pub regular_sort_queue: &'a mut SortQueue,
    pub origin_queue: &'a mut MsgQueue<SubmittedMcast>,
    pub retrans_message_queue: &'a mut MsgQueue<MessageItem>,
    pub stats: &'a Stats,
    pub config: &'a RuntimeConfig,
    /// True while membership is GATHER/COMMIT with old-ring state saved —
    /// step 6 must not originate new multicasts in that window.
    pub origination_blocked: bool,
    /// True only in RECOVERY; install detection (step 8) is a no-op
    /// otherwise.
    pub in_recovery: bool,
}

/// What the reactor should do with this rotation's token after processing.
pub enum TokenAction {
    /// Ring filter or duplicate filter rejected the token; nothing changes.
    Dropped,
    /// Ring is idle; token kept locally, hold-retransmit timer resends it
    /// to self rather than forwarding.
    Held(OrfToken),
    /// Normal case: forward `token` to `next_hop`.
    Forward { token: OrfToken, next_hop: ProcessorId },
    /// The `aru_addr` processor has not acknowledged in too many rotations;
    /// membership should restore old-ring state and enter GATHER.
    MemberFailed { failed: ProcessorId, token: OrfToken },
}

pub struct TokenOutcome {
    pub action: TokenAction,
    /// New/re-originated items the caller must seal (via the worker pool)
    /// and emit on the wire before forwarding.
    pub to_emit: Vec<MessageItem>,
    /// Install detection (step 8) concluded `my_rotation_counter` reached
    /// [`crate::config::ROTATIONS_TO_OPERATIONAL`]; membership should leave
    /// RECOVERY for OPERATIONAL.
    pub enter_operational: bool,
}

/// Per-§4.3 counters, reset whenever a new ring is installed.
#[derive(Debug, Default)]
pub struct TokenMachine {
    /// Highest accepted `token.token_seq`. `None` until the first token is
    /// accepted, so the very first rotation is never mistaken for a
    /// duplicate.
    my_token_seq: Option<u64>,
    last_seen_seq: u32,
    seq_unchanged: u32,
    my_aru: u32,
    my_high_seq_received: u32,
    my_last_aru: u32,
    my_aru_count: u32,
    my_retrans_flg_count: u32,
    my_install_seq: Option<u32>,
    my_rotation_counter: u32,
    my_origin_seq: u32,
}

impl TokenMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all counters for a fresh ring (§4.6 RECOVERY entry: "Reset
    /// ARU/high/install counters to zero").
    pub fn reset_for_new_ring(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn my_aru(&self) -> u32 {
        self.my_aru
    }

    #[must_use]
    pub fn my_high_seq_received(&self) -> u32 {
        self.my_high_seq_received
    }

    /// Feed in a message observed via the multicast receive path (§4.4), so
    /// the token machine's `my_aru`/`my_high_seq_received` stay current
    /// without waiting for the next token visit.
    pub fn note_received(&mut self, aru: u32, high_seq_received: u32) {
        self.my_aru = self.my_aru.max(aru);
        self.my_high_seq_received = self.my_high_seq_received.max(high_seq_received);
    }

    /// Build the initial token a new ring's representative sends (§4.6
    /// RECOVERY entry).
    #[must_use]
    pub fn initial_token(&self, ring_id: RingId, representative: ProcessorId) -> OrfToken {
        OrfToken::initial(ring_id, representative)
    }

    /// Process one ORF token receipt end to end (§4.3 steps 1-9).
    pub fn on_token(&mut self, mut token: OrfToken, ctx: &mut TokenContext<'_>) -> TokenOutcome {
        if let Some(action) = self.ring_filter(&token, ctx) {
            return TokenOutcome {
                action,
                to_emit: Vec::new(),
                enter_operational: false,
            };
        }
        if let Some(action) = self.duplicate_filter(&token) {
            return TokenOutcome {
                action,
                to_emit: Vec::new(),
                enter_operational: false,
            };
        }

        // Only the ring representative ever suppresses forwarding on an idle
        // ring; every other member always forwards regardless of how long
        // `token.seq` has sat unchanged, or the token would stall at the
        // first non-representative member that notices the idle ring.
        let held = self.activity_detection(&token) && ctx.self_id == ctx.ring_id.representative;

        self.service_rtr(&mut token, ctx);
        let mut to_emit = self.service_new_mcast(&mut token, ctx);

        let member_failed = self.update_aru(&mut token, ctx);

        let enter_operational = if ctx.in_recovery {
            self.install_detection(&mut token, ctx)
        } else {
            false
        };

        self.my_token_seq = Some(token.token_seq);
        self.last_seen_seq = token.seq;

        if let Some(failed) = member_failed {
            return TokenOutcome {
                action: TokenAction::MemberFailed { failed, token },
                to_emit,
                enter_operational,
            };
        }

        if held {
            return TokenOutcome {
                action: TokenAction::Held(token),
                to_emit,
                enter_operational,
            };
        }

        token.token_seq += 1;
        let Some(next_hop) = identity::ring_successor(ctx.self_id, ctx.members) else {
            // No other members: nothing to forward to; treat as held.
            to_emit.clear();
            return TokenOutcome {
                action: TokenAction::Held(token),
                to_emit,
                enter_operational,
            };
        };

        TokenOutcome {
            action: TokenAction::Forward { token, next_hop },
            to_emit,
            enter_operational,
        }
    }

    /// Step 3: tokens for a foreign ring are dropped outright.
    fn ring_filter(&self, token: &OrfToken, ctx: &TokenContext<'_>) -> Option<TokenAction> {
        (token.ring_id != ctx.ring_id).then_some(TokenAction::Dropped)
    }

    /// Step 4: a token we have already seen (or an older one) is dropped.
    /// The caller is expected to reset the retransmit timer regardless of
    /// rotation outcome, so this filter only decides acceptance.
    fn duplicate_filter(&self, token: &OrfToken) -> Option<TokenAction> {
        match self.my_token_seq {
            Some(seen) if seen >= token.token_seq => Some(TokenAction::Dropped),
            _ => None,
        }
    }

    /// Step 1: activity detection. Returns `true` if the ring should be
    /// held (idle beyond `seqno_unchanged_const` rotations).
    fn activity_detection(&mut self, token: &OrfToken) -> bool {
        if token.seq == self.last_seen_seq {
            self.seq_unchanged += 1;
        } else {
            self.seq_unchanged = 0;
        }
        self.seq_unchanged >= crate::config::SEQNO_UNCHANGED_CONST
    }

    /// Step 5: retransmit service (`orf_token_rtr`).
    fn service_rtr(&mut self, token: &mut OrfToken, ctx: &mut TokenContext<'_>) {
        let mut serviced = 0u32;
        let mut remaining = Vec::with_capacity(token.rtr_list.len());
        for entry in token.rtr_list.drain(..) {
            if entry.ring_id != ctx.ring_id || serviced >= ctx.config.mcasts_per_rotation_max {
                remaining.push(entry);
                continue;
            }
            if ctx.regular_sort_queue.in_use(entry.seq) {
                ctx.stats.record_retransmit();
                serviced += 1;
                // Entry serviced: drop it from the list (retransmit is
                // dispatched by the caller from the sort queue contents).
            } else {
                remaining.push(entry);
            }
        }

        for seq in (self.my_aru + 1)..=self.my_high_seq_received {
            if remaining.len() >= ctx.config.rtr_entries_max {
                break;
            }
            if !ctx.regular_sort_queue.in_use(seq)
                && !remaining.iter().any(|e| e.seq == seq && e.ring_id == ctx.ring_id)
            {
                remaining.push(RtrEntry {
                    ring_id: ctx.ring_id,
                    seq,
                });
            }
        }
        remaining.truncate(ctx.config.rtr_entries_max);
        token.rtr_list = remaining;
    }

    /// Step 6: new-multicast service (`orf_token_mcast`). Re-originated
    /// recovery messages are drained ahead of newly submitted ones so
    /// in-flight state from the previous ring clears first.
    fn service_new_mcast(&mut self, token: &mut OrfToken, ctx: &mut TokenContext<'_>) -> Vec<MessageItem> {
        let mut emitted = Vec::new();
        if ctx.origination_blocked {
            return emitted;
        }
        if self.my_aru + ctx.config.missing_mcast_window < token.seq {
            return emitted;
        }

        let mut budget = ctx.config.mcasts_per_rotation_max;
        while budget > 0 {
            let Some(mut item) = ctx.retrans_message_queue.pop() else {
                break;
            };
            token.seq += 1;
            item.header.seq = token.seq;
            ctx.regular_sort_queue.add(token.seq, item.clone());
            emitted.push(item);
            budget -= 1;
        }
        while budget > 0 {
            let Some(submitted) = ctx.origin_queue.pop() else {
                break;
            };
            token.seq += 1;
            self.my_origin_seq += 1;
            let item = MessageItem {
                header: McastHeader {
                    ring_id: ctx.ring_id,
                    seq: token.seq,
                    origin_seq: self.my_origin_seq,
                    guarantee: submitted.guarantee,
                    source: ctx.self_id,
                    encapsulated: false,
                },
                payload: submitted.payload,
            };
            ctx.regular_sort_queue.add(token.seq, item.clone());
            emitted.push(item);
            budget -= 1;
        }

        if !emitted.is_empty() {
            // An origination is this node's own copy of the packet; there is
            // no network round trip back to self to drive `note_received`,
            // so fold the sort queue forward here exactly as
            // `multicast::on_mcast_receive` would on actual receipt.
            self.my_high_seq_received = self.my_high_seq_received.max(token.seq);
            while ctx.regular_sort_queue.in_use(self.my_aru + 1) {
                self.my_aru += 1;
            }
        }
        emitted
    }

    /// Step 7: ARU update and failure detection.
    fn update_aru(&mut self, token: &mut OrfToken, ctx: &TokenContext<'_>) -> Option<ProcessorId> {
        if self.my_aru < token.aru || token.aru_addr == Some(ctx.self_id) || token.aru_addr.is_none() {
            token.aru = self.my_aru;
        }
        token.aru_addr = if token.aru == token.seq {
            None
        } else {
            Some(ctx.self_id)
        };

        if token.aru == self.my_last_aru && token.aru_addr.is_some() {
            self.my_aru_count += 1;
        } else {
            self.my_aru_count = 0;
        }
        self.my_last_aru = token.aru;

        if self.my_aru_count > ctx.config.fail_to_recv_const && token.aru_addr != Some(ctx.self_id) {
            return token.aru_addr;
        }
        None
    }

    /// Step 8: install detection, active only in RECOVERY.
    fn install_detection(&mut self, token: &mut OrfToken, ctx: &TokenContext<'_>) -> bool {
        let has_backlog = !ctx.retrans_message_queue.is_empty() || self.my_aru != self.my_high_seq_received;
        token.retrans_flg = has_backlog;

        if token.retrans_flg {
            self.my_retrans_flg_count = 0;
            self.my_install_seq = None;
            return false;
        }

        self.my_retrans_flg_count += 1;
        if self.my_retrans_flg_count == crate::config::RETRANS_FLG_QUIET_COUNT {
            self.my_install_seq = Some(token.seq);
        }
        if self.my_retrans_flg_count >= crate::config::RETRANS_FLG_INSTALL_COUNT {
            if let Some(install_seq) = self.my_install_seq {
                if token.aru >= install_seq {
                    self.my_rotation_counter += 1;
                    return self.my_rotation_counter >= crate::config::ROTATIONS_TO_OPERATIONAL;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use std::net::SocketAddr;

    fn pid(o: u8) -> ProcessorId {
        ProcessorId::new(SocketAddr::from(([10, 0, 0, o], 5405)))
    }

    fn ctx<'a>(
        ring_id: RingId,
        members: &'a [ProcessorId],
        regular: &'a mut SortQueue,
        origin: &'a mut MsgQueue<SubmittedMcast>,
        retrans: &'a mut MsgQueue<MessageItem>,
        stats: &'a Stats,
        config: &'a RuntimeConfig,
    ) -> TokenContext<'a> {
        TokenContext {
            self_id: members[0],
            ring_id,
            members,
            regular_sort_queue: regular,
            origin_queue: origin,
            retrans_message_queue: retrans,
            stats,
            config,
            origination_blocked: false,
            in_recovery: false,
        }
    }

    #[test]
    fn foreign_ring_id_is_dropped() {
        let mut tm = TokenMachine::new();
        let ring_id = RingId::new(pid(1), 4);
        let members = vec![pid(1), pid(2)];
        let mut regular = SortQueue::new();
        let mut origin = MsgQueue::new(8);
        let mut retrans = MsgQueue::new(8);
        let stats = Stats::new();
        let config = RuntimeConfig::new();
        let mut c = ctx(ring_id, &members, &mut regular, &mut origin, &mut retrans, &stats, &config);

        let foreign_token = OrfToken::initial(RingId::new(pid(2), 4), pid(2));
        let outcome = tm.on_token(foreign_token, &mut c);
        assert!(matches!(outcome.action, TokenAction::Dropped));
    }

    #[test]
    fn duplicate_token_seq_is_dropped() {
        let mut tm = TokenMachine::new();
        let ring_id = RingId::new(pid(1), 4);
        let members = vec![pid(1), pid(2)];
        let mut regular = SortQueue::new();
        let mut origin = MsgQueue::new(8);
        let mut retrans = MsgQueue::new(8);
        let stats = Stats::new();
        let config = RuntimeConfig::new();

        {
            let mut c = ctx(ring_id, &members, &mut regular, &mut origin, &mut retrans, &stats, &config);
            let token = OrfToken::initial(ring_id, pid(1));
            let outcome = tm.on_token(token, &mut c);
            assert!(matches!(outcome.action, TokenAction::Forward { .. }));
        }
        {
            let mut c = ctx(ring_id, &members, &mut regular, &mut origin, &mut retrans, &stats, &config);
            let stale = OrfToken::initial(ring_id, pid(1));
            let outcome = tm.on_token(stale, &mut c);
            assert!(matches!(outcome.action, TokenAction::Dropped));
        }
    }

    #[test]
    fn new_submission_is_originated_and_forwarded() {
        let mut tm = TokenMachine::new();
        let ring_id = RingId::new(pid(1), 4);
        let members = vec![pid(1), pid(2)];
        let mut regular = SortQueue::new();
        let mut origin = MsgQueue::new(8);
        origin
            .push(SubmittedMcast {
                payload: b"hello".to_vec(),
                guarantee: 0,
            })
            .unwrap();
        let mut retrans = MsgQueue::new(8);
        let stats = Stats::new();
        let config = RuntimeConfig::new();
        let mut c = ctx(ring_id, &members, &mut regular, &mut origin, &mut retrans, &stats, &config);

        let token = OrfToken::initial(ring_id, pid(1));
        let outcome = tm.on_token(token, &mut c);
        assert_eq!(outcome.to_emit.len(), 1);
        assert_eq!(outcome.to_emit[0].payload, b"hello");
        match outcome.action {
            TokenAction::Forward { token, next_hop } => {
                assert_eq!(token.seq, 1);
                assert_eq!(next_hop, pid(2));
            }
            _ => panic!("expected Forward"),
        }
        assert!(regular.in_use(1));
    }

    #[test]
    fn origination_blocked_during_gather_or_commit() {
        let mut tm = TokenMachine::new();
        let ring_id = RingId::new(pid(1), 4);
        let members = vec![pid(1), pid(2)];
        let mut regular = SortQueue::new();
        let mut origin = MsgQueue::new(8);
        origin
            .push(SubmittedMcast {
                payload: b"hello".to_vec(),
                guarantee: 0,
            })
            .unwrap();
        let mut retrans = MsgQueue::new(8);
        let stats = Stats::new();
        let config = RuntimeConfig::new();
        let mut c = ctx(ring_id, &members, &mut regular, &mut origin, &mut retrans, &stats, &config);
        c.origination_blocked = true;

        let token = OrfToken::initial(ring_id, pid(1));
        let outcome = tm.on_token(token, &mut c);
        assert!(outcome.to_emit.is_empty());
        assert_eq!(origin.len(), 1);
    }

    #[test]
    fn idle_ring_enters_held_state() {
        let mut tm = TokenMachine::new();
        let ring_id = RingId::new(pid(1), 4);
        let members = vec![pid(1), pid(2)];
        let mut regular = SortQueue::new();
        let mut origin = MsgQueue::new(8);
        let mut retrans = MsgQueue::new(8);
        let stats = Stats::new();
        let config = RuntimeConfig::new();

        let mut held = false;
        for i in 0..=crate::config::SEQNO_UNCHANGED_CONST {
            let mut c = ctx(ring_id, &members, &mut regular, &mut origin, &mut retrans, &stats, &config);
            let mut token = OrfToken::initial(ring_id, pid(1));
            token.seq = 5;
            token.token_seq = i as u64;
            let outcome = tm.on_token(token, &mut c);
            if matches!(outcome.action, TokenAction::Held(_)) {
                held = true;
                break;
            }
        }
        assert!(held, "ring should enter held state once seq_unchanged reaches the threshold");
    }

    #[test]
    fn non_representative_never_holds_an_idle_ring() {
        let mut tm = TokenMachine::new();
        let ring_id = RingId::new(pid(1), 4); // pid(1) is the representative
        let members = vec![pid(1), pid(2)];
        let mut regular = SortQueue::new();
        let mut origin = MsgQueue::new(8);
        let mut retrans = MsgQueue::new(8);
        let stats = Stats::new();
        let config = RuntimeConfig::new();

        for i in 0..=(crate::config::SEQNO_UNCHANGED_CONST * 2) {
            let mut c = ctx(ring_id, &members, &mut regular, &mut origin, &mut retrans, &stats, &config);
            c.self_id = pid(2); // not the representative
            let mut token = OrfToken::initial(ring_id, pid(1));
            token.seq = 5;
            token.token_seq = i as u64;
            let outcome = tm.on_token(token, &mut c);
            assert!(
                matches!(outcome.action, TokenAction::Forward { .. }),
                "non-representative must keep forwarding an idle ring, not hold it"
            );
        }
    }
}
