// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Membership state machine (§4.6): states and their entry actions.

use crate::identity::{self, ProcessorId};
use crate::queue::{MsgQueue, SortQueue};
use crate::recovery;
use crate::ring_id::RingId;
use crate::stats::Stats;
use crate::timers::{TimerName, Timers};
use crate::wire::CommitToken;
use std::collections::HashSet;
use std::time::Duration;

/// The four membership states named in §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Operational,
    Gather,
    Commit,
    Recovery,
}

/// Snapshot of a previously installed ring, saved across a membership
/// change so recovery can re-originate messages the old ring accepted but
/// had not yet delivered (§4.6 RECOVERY entry, §4.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct OldRingState {
    pub aru: u32,
    pub high_seq_received: u32,
}

/// All state the membership machine owns. Reactor-exclusive, per §5.
pub struct Membership {
    pub state: State,
    pub self_id: ProcessorId,

    pub my_ring_id: RingId,
    pub my_old_ring_id: Option<RingId>,
    pub old_ring_state: OldRingState,
    pub old_ring_state_saved: bool,

    /// Current best knowledge of ring membership, used while in GATHER.
    pub my_proc_list: Vec<ProcessorId>,
    pub my_failed_list: Vec<ProcessorId>,
    /// Members consenting to the current `(proc, failed)` proposal.
    pub consenting: HashSet<ProcessorId>,

    /// Installed membership (post-OPERATIONAL-entry).
    pub my_memb_list: Vec<ProcessorId>,
    /// Proposed new membership carried by the commit token.
    pub my_new_memb_list: Vec<ProcessorId>,
    /// `my_new_memb_list ∩ my_memb_list`, used to gate transitional delivery.
    pub my_deliver_memb_list: Vec<ProcessorId>,

    pub commit_token: Option<CommitToken>,
    pub token_ring_id_seq: u64,

    pub recovery_sort_queue: SortQueue,
    pub retrans_message_queue: MsgQueue<crate::wire::MessageItem>,
}

impl Membership {
    #[must_use]
    pub fn new(self_id: ProcessorId, initial_ring_id: RingId, retrans_capacity: usize) -> Self {
        Self {
            state: State::Gather,
            self_id,
            my_ring_id: initial_ring_id,
            my_old_ring_id: None,
            old_ring_state: OldRingState::default(),
            old_ring_state_saved: false,
            my_proc_list: vec![self_id],
            my_failed_list: Vec::new(),
            consenting: HashSet::new(),
            my_memb_list: Vec::new(),
            my_new_memb_list: Vec::new(),
            my_deliver_memb_list: Vec::new(),
            commit_token: None,
            token_ring_id_seq: initial_ring_id.seq,
            recovery_sort_queue: SortQueue::new(),
            retrans_message_queue: MsgQueue::new(retrans_capacity),
        }
    }

    /// `my_proc_list \ my_failed_list`, the quorum GATHER consensus is over.
    #[must_use]
    pub fn active_members(&self) -> Vec<ProcessorId> {
        self.my_proc_list
            .iter()
            .filter(|p| !self.my_failed_list.contains(p))
            .copied()
            .collect()
    }

    #[must_use]
    pub fn consensus_achieved(&self) -> bool {
        self.active_members()
            .iter()
            .all(|p| self.consenting.contains(p))
    }

    /// GATHER entry (§4.6): merge self, broadcast is the caller's job (it
    /// owns the transport), arm join/consensus timers, cancel token timers,
    /// reset consensus.
    pub fn enter_gather(&mut self, timers: &mut Timers, join_period: Duration, consensus_period: Duration) {
        self.state = State::Gather;
        if !self.my_proc_list.contains(&self.self_id) {
            self.my_proc_list.push(self.self_id);
        }
        timers.cancel(TimerName::TokenLoss);
        timers.cancel(TimerName::Retransmit);
        timers.cancel(TimerName::MergeDetect);
        timers.arm(TimerName::GatherJoin, join_period);
        timers.arm(TimerName::GatherConsensus, consensus_period);
        self.consenting.clear();
        self.consenting.insert(self.self_id);
    }

    /// COMMIT entry (§4.6): save old-ring state, write this processor's
    /// commit-token slot, persist the proposed ring id, restart token
    /// timers. The caller is responsible for forwarding the written token
    /// and for persistence (`RingSeqStore`).
    pub fn enter_commit(
        &mut self,
        new_ring_id: RingId,
        current_aru: u32,
        current_high_seq_received: u32,
        high_delivered: u32,
        received_flg: bool,
        timers: &mut Timers,
        token_loss_period: Duration,
        retransmit_period: Duration,
    ) {
        self.state = State::Commit;
        self.my_old_ring_id = Some(self.my_ring_id);
        self.old_ring_state = OldRingState {
            aru: current_aru,
            high_seq_received: current_high_seq_received,
        };
        self.old_ring_state_saved = true;

        if let Some(token) = self.commit_token.as_mut() {
            token.write_self_and_advance(
                self.self_id,
                crate::wire::MemberRecord {
                    old_ring_id: self.my_old_ring_id,
                    aru: current_aru,
                    high_delivered,
                    received_flg,
                },
            );
        }

        self.my_ring_id = new_ring_id;

        timers.cancel(TimerName::GatherJoin);
        timers.cancel(TimerName::GatherConsensus);
        timers.arm(TimerName::TokenLoss, token_loss_period);
        timers.arm(TimerName::Retransmit, retransmit_period);
    }

    /// RECOVERY entry (§4.6): install new/transitional membership from the
    /// commit token, compute `low_ring_aru`/`high_ring_delivered`, and
    /// re-originate in-flight old-ring messages. Returns the initial ORF
    /// token the representative should send if `self` is the representative
    /// of the new ring.
    pub fn enter_recovery(&mut self, regular_sort_queue: &SortQueue) {
        self.state = State::Recovery;
        self.recovery_sort_queue.reset();
        self.retrans_message_queue = MsgQueue::new(self.retrans_message_queue_capacity());

        let token = self
            .commit_token
            .take()
            .expect("RECOVERY is only entered after a completed commit token");
        self.my_new_memb_list = token.members.clone();
        self.my_deliver_memb_list = self
            .my_new_memb_list
            .iter()
            .filter(|p| self.my_memb_list.contains(p))
            .copied()
            .collect();

        let old_ring_id = self.my_old_ring_id;
        let subset: Vec<_> = token
            .records
            .iter()
            .filter(|r| r.old_ring_id == old_ring_id)
            .collect();
        let low_ring_aru = subset.iter().map(|r| r.aru).min().unwrap_or(0);
        let high_ring_delivered = subset.iter().map(|r| r.high_delivered).max().unwrap_or(0);

        recovery::reoriginate_old_ring_messages(
            regular_sort_queue,
            low_ring_aru,
            self.old_ring_state.high_seq_received.max(high_ring_delivered),
            self.my_ring_id,
            &mut self.retrans_message_queue,
        );
    }

    fn retrans_message_queue_capacity(&self) -> usize {
        crate::config::MISSING_MCAST_WINDOW as usize
    }

    /// OPERATIONAL entry (§4.6): install `my_new_memb_list`, reset old-ring
    /// bookkeeping. Transitional/regular configuration delivery and the
    /// recovery-to-regular transfer (§4.7) are driven by the caller, which
    /// has access to both sort queues and the application callback.
    pub fn enter_operational(&mut self) {
        self.state = State::Operational;
        self.old_ring_state_saved = false;
        self.my_memb_list = self.my_new_memb_list.clone();
    }

    /// §4.6 join-process "construct a commit token and enter COMMIT":
    /// proposes the next ring id from the persisted sequence and builds the
    /// commit token the caller will forward.
    pub fn propose_commit(&mut self, persisted_seq: u64) -> (RingId, CommitToken) {
        let new_ring_id = RingId::propose(self.self_id, persisted_seq);
        let members = self.active_members();
        let token = CommitToken::new(new_ring_id, members);
        self.commit_token = Some(token.clone());
        (new_ring_id, token)
    }

    /// True if self is the lowest identity among `active_members()`.
    #[must_use]
    pub fn is_representative(&self) -> bool {
        identity::representative(&self.my_proc_list, &self.my_failed_list) == Some(self.self_id)
    }
}
