// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `MEMB_JOIN` processing and the join-process rules (§4.6).

use crate::identity::ProcessorId;
use crate::membership::state::{Membership, State};
use crate::ring_id::RingId;
use crate::timers::{TimerName, Timers};
use crate::wire::{CommitToken, MembJoin};
use std::collections::HashSet;
use std::time::Duration;

/// What handling a `MEMB_JOIN` (or a consensus timeout) changed.
pub enum JoinEffect {
    None,
    EnteredGather,
    EnteredCommit { new_ring_id: RingId, token: CommitToken },
}

fn as_set(list: &[ProcessorId]) -> HashSet<ProcessorId> {
    list.iter().copied().collect()
}

/// The join-process rules shared by the OPERATIONAL, GATHER, COMMIT, and
/// RECOVERY receipt paths.
fn join_process(
    m: &mut Membership,
    their_proc: &[ProcessorId],
    their_failed: &[ProcessorId],
    sender: ProcessorId,
    persisted_seq: u64,
) -> JoinEffect {
    let my_proc = as_set(&m.my_proc_list);
    let my_failed = as_set(&m.my_failed_list);
    let their_proc_set = as_set(their_proc);
    let their_failed_set = as_set(their_failed);

    if their_proc_set == my_proc && their_failed_set == my_failed {
        m.consenting.insert(sender);
        if m.consensus_achieved() && m.is_representative() {
            let (new_ring_id, token) = m.propose_commit(persisted_seq);
            return JoinEffect::EnteredCommit { new_ring_id, token };
        }
        return JoinEffect::None;
    }

    if their_proc_set.is_subset(&my_proc) && their_failed_set.is_subset(&my_failed) {
        return JoinEffect::None;
    }

    if m.my_failed_list.contains(&sender) {
        return JoinEffect::None;
    }

    for p in their_proc {
        if !m.my_proc_list.contains(p) {
            m.my_proc_list.push(*p);
        }
    }
    if m.my_failed_list.contains(&m.self_id) {
        if !m.my_failed_list.contains(&sender) {
            m.my_failed_list.push(sender);
        }
    } else {
        for p in their_failed {
            if !m.my_failed_list.contains(p) {
                m.my_failed_list.push(*p);
            }
        }
    }
    JoinEffect::EnteredGather
}

/// `MEMB_JOIN` receipt (§4.6 "JOIN processing", rules 1-4).
#[allow(clippy::too_many_arguments)]
pub fn handle_memb_join(
    m: &mut Membership,
    join: &MembJoin,
    sender: ProcessorId,
    persisted_seq: u64,
    timers: &mut Timers,
    join_period: Duration,
    consensus_period: Duration,
) -> JoinEffect {
    m.token_ring_id_seq = m.token_ring_id_seq.max(join.ring_seq);

    match m.state {
        State::Operational => {
            let effect = join_process(m, &join.proc_list, &join.failed_list, sender, persisted_seq);
            if matches!(effect, JoinEffect::None) {
                m.enter_gather(timers, join_period, consensus_period);
                return JoinEffect::EnteredGather;
            }
            effect
        }
        State::Gather => join_process(m, &join.proc_list, &join.failed_list, sender, persisted_seq),
        State::Commit | State::Recovery => {
            let sender_current = m.my_new_memb_list.contains(&sender);
            let seq_ok = join.ring_seq >= m.my_ring_id.seq;
            if sender_current && seq_ok {
                if m.state == State::Recovery {
                    m.old_ring_state_saved = true;
                }
                let effect = join_process(m, &join.proc_list, &join.failed_list, sender, persisted_seq);
                m.enter_gather(timers, join_period, consensus_period);
                let _ = effect;
                JoinEffect::EnteredGather
            } else {
                JoinEffect::None
            }
        }
    }
}

/// Consensus timeout expiry (§4.6): if consensus was already reached, just
/// keep waiting; otherwise fail every non-consenting active member and
/// re-enter GATHER.
pub fn handle_consensus_timeout(
    m: &mut Membership,
    timers: &mut Timers,
    join_period: Duration,
    consensus_period: Duration,
) {
    if m.consensus_achieved() {
        timers.arm(TimerName::GatherConsensus, consensus_period);
        return;
    }
    let stragglers: Vec<ProcessorId> = m
        .active_members()
        .into_iter()
        .filter(|p| !m.consenting.contains(p))
        .collect();
    for p in stragglers {
        if !m.my_failed_list.contains(&p) {
            m.my_failed_list.push(p);
        }
    }
    m.enter_gather(timers, join_period, consensus_period);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_id::RingId;
    use std::net::SocketAddr;

    fn pid(o: u8) -> ProcessorId {
        ProcessorId::new(SocketAddr::from(([10, 0, 0, o], 5405)))
    }

    fn membership(self_id: ProcessorId, proc_list: Vec<ProcessorId>) -> Membership {
        let mut m = Membership::new(self_id, RingId::new(proc_list[0], 0), 128);
        m.my_proc_list = proc_list;
        m.state = State::Gather;
        m
    }

    #[test]
    fn matching_proposal_marks_consenting() {
        let mut m = membership(pid(1), vec![pid(1), pid(2)]);
        let mut timers = Timers::new();
        let join = MembJoin {
            proc_list: vec![pid(1), pid(2)],
            failed_list: vec![],
            ring_seq: 0,
        };
        let effect = handle_memb_join(
            &mut m,
            &join,
            pid(2),
            0,
            &mut timers,
            Duration::from_millis(100),
            Duration::from_millis(200),
        );
        assert!(matches!(effect, JoinEffect::None));
        assert!(m.consenting.contains(&pid(2)));
    }

    #[test]
    fn consensus_from_lowest_identity_enters_commit() {
        let mut m = membership(pid(1), vec![pid(1), pid(2)]);
        m.consenting.insert(pid(1));
        let mut timers = Timers::new();
        let join = MembJoin {
            proc_list: vec![pid(1), pid(2)],
            failed_list: vec![],
            ring_seq: 0,
        };
        let effect = handle_memb_join(
            &mut m,
            &join,
            pid(2),
            12,
            &mut timers,
            Duration::from_millis(100),
            Duration::from_millis(200),
        );
        assert!(matches!(effect, JoinEffect::EnteredCommit { .. }));
    }

    #[test]
    fn superset_proposal_merges_and_reenters_gather() {
        let mut m = membership(pid(1), vec![pid(1), pid(2)]);
        let mut timers = Timers::new();
        let join = MembJoin {
            proc_list: vec![pid(1), pid(2), pid(3)],
            failed_list: vec![],
            ring_seq: 0,
        };
        let effect = handle_memb_join(
            &mut m,
            &join,
            pid(3),
            0,
            &mut timers,
            Duration::from_millis(100),
            Duration::from_millis(200),
        );
        assert!(matches!(effect, JoinEffect::EnteredGather));
        assert!(m.my_proc_list.contains(&pid(3)));
    }

    #[test]
    fn consensus_timeout_fails_stragglers_when_not_achieved() {
        let mut m = membership(pid(1), vec![pid(1), pid(2), pid(3)]);
        m.consenting.insert(pid(1));
        let mut timers = Timers::new();
        handle_consensus_timeout(
            &mut m,
            &mut timers,
            Duration::from_millis(100),
            Duration::from_millis(200),
        );
        assert!(m.my_failed_list.contains(&pid(2)));
        assert!(m.my_failed_list.contains(&pid(3)));
    }
}
