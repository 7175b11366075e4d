// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The embedding API (§6.1), folded into a single owned value per the
//! "handle table → owned value" redesign note (§9): `initialize` in the
//! original design returned an opaque handle into a global table; here it
//! simply returns an `Instance` the embedder owns directly, so double-free
//! and use-after-finalize bugs are ruled out by the borrow checker instead
//! of a handle-validity check.
//!
//! `Instance` is the reactor-exclusive owner of every piece of protocol
//! state (§5): token machine, membership machine, sort queues, timers,
//! callbacks. The embedder feeds it three kinds of event — an inbound
//! packet, an expired timer, or an application submission — and it drives
//! the §4 state machines to completion before returning.

use crate::callbacks::{CallbackHandle, CallbackList};
use crate::config::RuntimeConfig;
use crate::crypto::{Framer, FramerPool, PRIVATE_KEY_LEN};
use crate::error::{Error, Result};
use crate::identity::{self, ProcessorId};
use crate::membership::{self, JoinEffect, Membership, State};
use crate::multicast::{self, ReceiveOutcome};
use crate::persistence::RingSeqStore;
use crate::queue::{MsgQueue, SortQueue};
use crate::recovery;
use crate::ring_id::RingId;
use crate::stats::{Stats, StatsSnapshot};
use crate::timers::{TimerName, Timers};
use crate::token_machine::{SubmittedMcast, TokenContext, TokenMachine, TokenOutcome};
use crate::token_machine::TokenAction;
use crate::transport::Transport;
use crate::wire::{CommitToken, MembJoin, MergeDetect, MessageItem, OrfToken};
use crate::dispatch::{self, Decoded};
use crate::worker_pool::{WorkItem, WorkerPool};
use std::sync::Arc;

/// Default bound on each worker's pending-send queue.
const WORKER_QUEUE_CAPACITY: usize = 64;

/// Which callback list a registration targets (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Received,
    Sent,
}

/// Configuration delivery phase (§6.1 `on_confchg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfchgKind {
    Transitional,
    Regular,
}

type DeliverFn = Box<dyn FnMut(ProcessorId, Vec<u8>, bool) + Send>;
type ConfchgFn = Box<dyn FnMut(ConfchgKind, Vec<ProcessorId>, Vec<ProcessorId>, Vec<ProcessorId>, RingId) + Send>;

/// One running Totem instance (§6.1).
pub struct Instance {
    self_id: ProcessorId,
    config: RuntimeConfig,
    stats: Arc<Stats>,

    membership: Membership,
    token_machine: TokenMachine,
    timers: Timers,

    origin_queue: MsgQueue<SubmittedMcast>,
    regular_sort_queue: SortQueue,
    high_delivered: u32,

    framer: Framer,
    worker_pool: WorkerPool,
    ring_seq_store: Box<dyn RingSeqStore>,

    received_callbacks: CallbackList,
    sent_callbacks: CallbackList,
    hold_cancel_requested: bool,

    on_deliver: DeliverFn,
    on_confchg: ConfchgFn,
}

impl Instance {
    /// `initialize(reactor, config, on_deliver, on_confchg)` (§6.1). The
    /// externally-driven reactor itself is not modeled here — the embedder
    /// calls [`Instance::on_packet`]/[`Instance::on_timer_fired`] from its own
    /// poll loop instead of this crate owning one (§6 "External interfaces").
    pub fn new(
        self_id: ProcessorId,
        seed_members: Vec<ProcessorId>,
        private_key: [u8; crate::crypto::PRIVATE_KEY_LEN],
        ring_seq_store: Box<dyn RingSeqStore>,
        transport: Arc<dyn Transport>,
        config: RuntimeConfig,
        on_deliver: DeliverFn,
        on_confchg: ConfchgFn,
    ) -> Result<Self> {
        let persisted_seq = ring_seq_store.load()?;
        let initial_ring_id = RingId::new(self_id, persisted_seq);
        let mut membership = Membership::new(self_id, initial_ring_id, config.missing_mcast_window as usize);
        membership.my_proc_list = seed_members;
        if !membership.my_proc_list.contains(&self_id) {
            membership.my_proc_list.push(self_id);
        }

        let mut timers = Timers::new();
        membership.enter_gather(&mut timers, config.join_period, config.consensus_period);
        timers.arm(TimerName::MergeDetect, config.merge_period);
        timers.arm(TimerName::Downcheck, config.downcheck_period);

        let framer = Framer::new(private_key);
        let framer_pool = FramerPool::new(private_key);
        let worker_pool = WorkerPool::new(config.worker_count, WORKER_QUEUE_CAPACITY, framer_pool, transport);

        let mut instance = Self {
            self_id,
            config,
            stats: Arc::new(Stats::new()),
            membership,
            token_machine: TokenMachine::new(),
            timers,
            origin_queue: MsgQueue::new(256),
            regular_sort_queue: SortQueue::new(),
            high_delivered: 0,
            framer,
            worker_pool,
            ring_seq_store,
            received_callbacks: CallbackList::new(),
            sent_callbacks: CallbackList::new(),
            hold_cancel_requested: false,
            on_deliver,
            on_confchg,
        };
        instance.broadcast_join();
        Ok(instance)
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn self_id(&self) -> ProcessorId {
        self.self_id
    }

    // ===================================================================
    // §6.1 embedding API
    // ===================================================================

    /// `submit_mcast(handle, iovec, guarantee)`.
    pub fn submit_mcast(&mut self, payload: Vec<u8>, guarantee: u8) -> Result<()> {
        self.origin_queue
            .push(SubmittedMcast { payload, guarantee })
            .map_err(|_| Error::QueueFull)
    }

    /// `submit_signal(handle)`: cancel a held token so it forwards this
    /// rotation instead of waiting out the hold-retransmit timer.
    pub fn submit_signal(&mut self) {
        self.hold_cancel_requested = true;
    }

    /// `available(handle) -> count`: remaining origin-queue slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.origin_queue.capacity() - self.origin_queue.len()
    }

    /// `register_token_callback(handle, type, once, fn, user) -> cb_handle`.
    pub fn register_token_callback(
        &mut self,
        kind: CallbackKind,
        once: bool,
        f: Box<dyn FnMut() -> bool + Send>,
    ) -> CallbackHandle {
        match kind {
            CallbackKind::Received => self.received_callbacks.register(once, f),
            CallbackKind::Sent => self.sent_callbacks.register(once, f),
        }
    }

    /// `unregister(cb_handle)`.
    pub fn unregister(&mut self, kind: CallbackKind, handle: CallbackHandle) -> bool {
        match kind {
            CallbackKind::Received => self.received_callbacks.unregister(handle),
            CallbackKind::Sent => self.sent_callbacks.unregister(handle),
        }
    }

    /// `finalize(handle)`: nothing further to do beyond dropping `self` —
    /// the framer zeroizes its key, and the worker pool's `Drop` signals
    /// shutdown and joins its threads (§5, §9 "RAII ownership").
    pub fn finalize(self) {}

    // ===================================================================
    // Reactor-driven events
    // ===================================================================

    /// Feed one inbound datagram, already off the socket. Auth failures,
    /// truncation, and malformed bodies are absorbed here per §7 — nothing
    /// is surfaced to the caller.
    pub fn on_packet(&mut self, from: ProcessorId, raw: &[u8]) {
        let plaintext = match self.framer.open(raw) {
            Ok(p) => p,
            Err(_) => {
                self.stats.record_auth_failure();
                crate::security!("dropping packet from {from}: auth failure");
                return;
            }
        };
        let Some(message) = dispatch::decode(&plaintext) else {
            crate::security!("dropping malformed packet from {from}");
            return;
        };

        match message {
            Decoded::OrfToken(token) => self.handle_orf_token(token),
            Decoded::Mcast(item) => self.handle_mcast(item),
            Decoded::MembMergeDetect(m) => self.handle_merge_detect(m, from),
            Decoded::MembJoin(join) => self.handle_memb_join(join, from),
            Decoded::MembCommitToken(token) => self.handle_commit_token(token),
            Decoded::TokenHoldCancel => self.hold_cancel_requested = true,
        }
    }

    /// Feed one expired timer, as reported by the embedder's poll loop
    /// (§4.9). `TimerName::MergeDetect` rearms itself inline; every other
    /// timer is the caller's responsibility to rearm if still relevant.
    pub fn on_timer_fired(&mut self, name: TimerName) {
        match name {
            TimerName::GatherConsensus => {
                membership::handle_consensus_timeout(
                    &mut self.membership,
                    &mut self.timers,
                    self.config.join_period,
                    self.config.consensus_period,
                );
                self.broadcast_join();
            }
            TimerName::GatherJoin => {
                self.broadcast_join();
                self.timers.arm(TimerName::GatherJoin, self.config.join_period);
            }
            TimerName::MergeDetect => {
                self.broadcast_merge_detect();
                self.timers.arm(TimerName::MergeDetect, self.config.merge_period);
            }
            TimerName::TokenLoss | TimerName::Retransmit | TimerName::Hold | TimerName::Downcheck => {
                // No socket-driven retransmit of the token itself is modeled
                // here (§6 "out of scope": UDP/multicast plumbing); an
                // embedder wiring in a real transport re-sends the last
                // token it saw when this fires.
            }
        }
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    // ===================================================================
    // ORF token path (§4.3)
    // ===================================================================

    fn handle_orf_token(&mut self, token: OrfToken) {
        if token.ring_id != self.membership.my_ring_id {
            self.stats.record_foreign_ring_drop();
            return;
        }
        let members = self.membership.active_members();
        let origination_blocked = matches!(self.membership.state, State::Gather | State::Commit);
        let in_recovery = self.membership.state == State::Recovery;

        let mut ctx = TokenContext {
            self_id: self.self_id,
            ring_id: self.membership.my_ring_id,
            members: &members,
            regular_sort_queue: &mut self.regular_sort_queue,
            origin_queue: &mut self.origin_queue,
            retrans_message_queue: &mut self.membership.retrans_message_queue,
            stats: &self.stats,
            config: &self.config,
            origination_blocked,
            in_recovery,
        };
        let TokenOutcome {
            action,
            to_emit,
            enter_operational,
        } = self.token_machine.on_token(token, &mut ctx);

        self.received_callbacks.invoke_all();
        let originated_this_rotation = !to_emit.is_empty();
        for item in to_emit {
            self.broadcast_mcast(item);
        }
        if originated_this_rotation {
            self.sent_callbacks.invoke_all();
        }
        // Barrier: let every packet originated this rotation finish sealing
        // and sending before the token itself moves on (§5 "Suspension
        // points").
        self.worker_pool.wait();

        if enter_operational {
            self.complete_recovery_to_operational();
        }

        // Unconditional post-rotation delivery pass (§4.5): the sort queue
        // may now hold newly-contiguous payloads this node originated
        // itself — `broadcast`/`broadcast_mcast` never loop a copy back to
        // `self_id`, so self-delivery of this node's own originations
        // happens only here, not via the network receive path.
        if self.membership.state == State::Operational {
            self.deliver_regular(false);
        }

        match action {
            TokenAction::Dropped => {}
            TokenAction::Held(token) => {
                self.maybe_forward_held(token);
            }
            TokenAction::Forward { token, next_hop } => {
                self.stats.record_rotation();
                self.unicast(next_hop, Decoded::OrfToken(token));
            }
            TokenAction::MemberFailed { failed, token } => {
                self.stats.record_membership_change();
                if !self.membership.my_failed_list.contains(&failed) {
                    self.membership.my_failed_list.push(failed);
                }
                self.membership
                    .enter_gather(&mut self.timers, self.config.join_period, self.config.consensus_period);
                self.broadcast_join();
                let _ = token;
            }
        }
    }

    /// A held token forwards immediately if `submit_signal` requested a
    /// cancel; otherwise it is re-sent to self after `hold_period` by the
    /// embedder's timer loop picking up `TimerName::Hold`.
    fn maybe_forward_held(&mut self, token: OrfToken) {
        if self.hold_cancel_requested {
            self.hold_cancel_requested = false;
            let members = self.membership.active_members();
            if let Some(next_hop) = identity::ring_successor(self.self_id, &members) {
                self.unicast(next_hop, Decoded::OrfToken(token));
                return;
            }
        }
        self.timers.arm(TimerName::Hold, self.config.hold_period);
    }

    // ===================================================================
    // Multicast receive / delivery (§4.4, §4.5)
    // ===================================================================

    fn handle_mcast(&mut self, item: MessageItem) {
        if item.header.encapsulated && self.membership.state == State::Recovery {
            let mut my_aru = self.token_machine.my_aru();
            let mut my_high = self.token_machine.my_high_seq_received();
            let outcome = multicast::on_mcast_receive(
                item,
                self.membership.my_ring_id,
                &mut my_aru,
                &mut my_high,
                &mut self.membership.recovery_sort_queue,
            );
            self.token_machine.note_received(my_aru, my_high);
            self.handle_receive_outcome(outcome);
            return;
        }

        let mut my_aru = self.token_machine.my_aru();
        let mut my_high = self.token_machine.my_high_seq_received();
        let outcome = multicast::on_mcast_receive(
            item,
            self.membership.my_ring_id,
            &mut my_aru,
            &mut my_high,
            &mut self.regular_sort_queue,
        );
        self.token_machine.note_received(my_aru, my_high);
        let advanced = matches!(outcome, ReceiveOutcome::Accepted { aru_advanced: true });
        self.handle_receive_outcome(outcome);

        if advanced && self.membership.state == State::Operational {
            self.deliver_regular(false);
        }
    }

    fn handle_receive_outcome(&mut self, outcome: ReceiveOutcome) {
        if let ReceiveOutcome::ForeignRing { source } = outcome {
            self.stats.record_foreign_ring_drop();
            if self.membership.state == State::Operational || self.membership.state == State::Gather {
                self.merge_foreign_sighting(source);
            }
            // COMMIT/RECOVERY: discarded, per §4.4.
        }
    }

    fn deliver_regular(&mut self, skip: bool) {
        let end = self.token_machine.my_aru();
        let (items, cursor) = multicast::messages_deliver_to_app(
            &self.regular_sort_queue,
            self.high_delivered,
            end,
            skip,
            &self.membership.my_deliver_memb_list,
            &self.stats,
        );
        self.high_delivered = cursor;
        for item in items {
            (self.on_deliver)(item.header.source, item.payload, false);
        }
    }

    // ===================================================================
    // Membership machine (§4.6)
    // ===================================================================

    fn merge_foreign_sighting(&mut self, source: ProcessorId) {
        if !self.membership.my_proc_list.contains(&source) {
            self.membership.my_proc_list.push(source);
        }
        self.stats.record_membership_change();
        self.membership
            .enter_gather(&mut self.timers, self.config.join_period, self.config.consensus_period);
        self.broadcast_join();
    }

    fn handle_merge_detect(&mut self, heartbeat: MergeDetect, source: ProcessorId) {
        if heartbeat.ring_id != self.membership.my_ring_id {
            self.merge_foreign_sighting(source);
        }
    }

    fn handle_memb_join(&mut self, join: MembJoin, sender: ProcessorId) {
        let persisted_seq = self.ring_seq_store.load().unwrap_or(0);
        let effect = membership::handle_memb_join(
            &mut self.membership,
            &join,
            sender,
            persisted_seq,
            &mut self.timers,
            self.config.join_period,
            self.config.consensus_period,
        );
        match effect {
            JoinEffect::None => {}
            JoinEffect::EnteredGather => {
                self.stats.record_membership_change();
                self.broadcast_join();
            }
            JoinEffect::EnteredCommit { new_ring_id, token } => {
                let _ = self.ring_seq_store.store(new_ring_id.seq);
                self.begin_commit(new_ring_id, token);
            }
        }
    }

    /// The representative's own path into COMMIT (§4.6 "construct a commit
    /// token and enter COMMIT"): write this processor's own slot, restart
    /// the token timers, and start the commit token circulating. A
    /// singleton ring completes the token on this very write, so this
    /// mirrors [`Self::handle_commit_token`]'s lap-0-complete branch rather
    /// than unconditionally forwarding.
    fn begin_commit(&mut self, new_ring_id: RingId, token: CommitToken) {
        self.membership.commit_token = Some(token);
        let my_aru = self.token_machine.my_aru();
        let my_high = self.token_machine.my_high_seq_received();
        let received_flg = my_aru == my_high;
        self.membership.enter_commit(
            new_ring_id,
            my_aru,
            my_high,
            self.high_delivered,
            received_flg,
            &mut self.timers,
            self.config.token_period,
            self.config.retransmit_period,
        );
        let mut token = self.membership.commit_token.clone().expect("just written");
        if token.is_complete() {
            token.token_seq = 1;
            token.memb_index = token.members.len().saturating_sub(2) as u32;
            self.membership.commit_token = Some(token.clone());
            self.enter_recovery_from_commit();
            if token.members.len() > 1 {
                self.forward_commit_token(token);
            }
            return;
        }
        self.forward_commit_token(token);
    }

    /// Commit token receipt (§4.6 COMMIT entry, §3 "Commit token"). Runs a
    /// two-lap circulation: lap 0 (`token_seq == 0`) collects every
    /// member's slot; the member who writes the final slot (the
    /// "completer") switches the token to lap 1 (`token_seq == 1`), enters
    /// RECOVERY for itself immediately, and forwards once more so every
    /// other member — including the original proposer — also learns the
    /// record set is final before entering RECOVERY with accurate low/high
    /// watermarks.
    ///
    /// Lap 1 reuses `memb_index` as a plain forward countdown rather than
    /// walking the ring a second time by identity comparison (there is no
    /// wire-format impact: `memb_index` has no further meaning once the
    /// token is complete), so it terminates after exactly `members.len() -
    /// 1` hops regardless of ring order.
    fn handle_commit_token(&mut self, mut token: CommitToken) {
        if token.token_seq == 0 {
            if self.membership.state == State::Gather {
                let my_aru = self.token_machine.my_aru();
                let my_high = self.token_machine.my_high_seq_received();
                let received_flg = my_aru == my_high;
                self.membership.commit_token = Some(token.clone());
                self.membership.enter_commit(
                    token.new_ring_id,
                    my_aru,
                    my_high,
                    self.high_delivered,
                    received_flg,
                    &mut self.timers,
                    self.config.token_period,
                    self.config.retransmit_period,
                );
                token = self.membership.commit_token.clone().expect("just written");
            }
            if token.is_complete() {
                token.token_seq = 1;
                token.memb_index = token.members.len().saturating_sub(2) as u32;
                self.membership.commit_token = Some(token.clone());
                self.enter_recovery_from_commit();
                if token.members.len() > 1 {
                    self.forward_commit_token(token);
                }
                return;
            }
            self.forward_commit_token(token);
            return;
        }

        // Lap 1: every member but the completer still needs to see the
        // finished record set before leaving COMMIT.
        if self.membership.state == State::Commit {
            self.membership.commit_token = Some(token.clone());
            self.enter_recovery_from_commit();
        }
        if token.memb_index > 0 {
            token.memb_index -= 1;
            self.forward_commit_token(token);
        }
    }

    fn enter_recovery_from_commit(&mut self) {
        self.membership.enter_recovery(&self.regular_sort_queue);
        // The old ring's regular queue has now been mined for
        // re-origination; clear it so the new ring's seq space (which also
        // starts counting from 1) never collides with leftover old-ring
        // entries.
        self.regular_sort_queue.reset();
        self.token_machine.reset_for_new_ring();
        // The delivery cursor is a position in the *old* ring's seq space;
        // the new ring's queue and ARU counters both restart at 0, so the
        // cursor must too, or `deliver_regular`'s walk range sits entirely
        // above the new ring's tiny `aru` and never delivers again.
        self.high_delivered = 0;
        if self.membership.is_representative() {
            let ring_id = self.membership.my_ring_id;
            let initial = self.token_machine.initial_token(ring_id, self.self_id);
            self.broadcast_orf_token(initial);
        }
    }

    /// §4.6 OPERATIONAL entry and §4.7 recovery-to-regular transfer: move
    /// recovered old-ring messages into the regular sort queue, fire the
    /// TRANSITIONAL confchg, deliver remaining old-ring messages
    /// (gap-skipping, source-filtered), install the new membership, then
    /// fire the REGULAR confchg and deliver anything further.
    fn complete_recovery_to_operational(&mut self) {
        let my_aru = self.token_machine.my_aru();
        recovery::transfer_recovery_to_regular(
            &self.membership.recovery_sort_queue,
            my_aru,
            self.membership.my_old_ring_id,
            &mut self.regular_sort_queue,
        );

        let old_members = self.membership.my_memb_list.clone();
        let new_members = self.membership.my_new_memb_list.clone();
        let left: Vec<_> = old_members.iter().filter(|p| !new_members.contains(p)).copied().collect();
        (self.on_confchg)(
            ConfchgKind::Transitional,
            new_members.clone(),
            left,
            Vec::new(),
            self.membership.my_ring_id,
        );

        self.deliver_regular(true);

        self.membership.enter_operational();
        self.stats.record_recovery_completed();

        let joined: Vec<_> = new_members.iter().filter(|p| !old_members.contains(p)).copied().collect();
        (self.on_confchg)(
            ConfchgKind::Regular,
            new_members,
            Vec::new(),
            joined,
            self.membership.my_ring_id,
        );

        self.deliver_regular(false);
    }

    // ===================================================================
    // Outbound helpers
    // ===================================================================

    fn unicast(&self, destination: ProcessorId, message: Decoded) {
        let plaintext = dispatch::encode(&message);
        let _ = self.worker_pool.add(WorkItem { destination, plaintext });
    }

    fn broadcast(&self, message: Decoded) {
        let plaintext = dispatch::encode(&message);
        for member in &self.membership.my_proc_list {
            if *member != self.self_id {
                let _ = self.worker_pool.add(WorkItem {
                    destination: *member,
                    plaintext: plaintext.clone(),
                });
            }
        }
    }

    fn broadcast_orf_token(&self, token: OrfToken) {
        let members = self.membership.active_members();
        if let Some(next_hop) = identity::ring_successor(self.self_id, &members) {
            self.unicast(next_hop, Decoded::OrfToken(token));
        }
    }

    fn broadcast_mcast(&self, item: MessageItem) {
        self.broadcast(Decoded::Mcast(item));
    }

    fn forward_commit_token(&self, token: CommitToken) {
        if let Some(next_hop) = identity::ring_successor(self.self_id, &token.members) {
            self.unicast(next_hop, Decoded::MembCommitToken(token));
        }
    }

    fn broadcast_join(&self) {
        let join = MembJoin {
            proc_list: self.membership.my_proc_list.clone(),
            failed_list: self.membership.my_failed_list.clone(),
            ring_seq: self.membership.my_ring_id.seq,
        };
        self.broadcast(Decoded::MembJoin(join));
    }

    fn broadcast_merge_detect(&self) {
        self.broadcast(Decoded::MembMergeDetect(MergeDetect {
            ring_id: self.membership.my_ring_id,
        }));
    }
}
