// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Recovery re-origination (§4.6 RECOVERY entry) and the recovery-to-regular
//! transfer (§4.7).
//!
//! An old-ring message re-originated under a new ring is encapsulated: the
//! new [`MessageItem`] carries the new ring id and `encapsulated = true`,
//! and its payload is the *entire encoded old-ring item* (old header plus
//! old payload). On the far side, once the new ring reaches OPERATIONAL,
//! [`transfer_recovery_to_regular`] strips that outer layer back out.

use crate::queue::{MsgQueue, SortQueue};
use crate::ring_id::RingId;
use crate::wire::{McastHeader, MessageItem};

/// §4.6 RECOVERY entry: for every old-ring seq in `(low_ring_aru,
/// high_ring_state_high_seq_received]` present in `old_regular_queue`,
/// wrap it for re-origination under `new_ring_id` and enqueue it on
/// `retrans_message_queue`. Messages that do not fit (queue full) are
/// dropped; the application will re-submit via the normal retransmission
/// path once the old item's loss is detected under the new ring — matching
/// the protocol's general policy that delivery acceptance is decoupled
/// from queue-capacity failures.
pub fn reoriginate_old_ring_messages(
    old_regular_queue: &SortQueue,
    low_ring_aru: u32,
    high_ring_state_high_seq_received: u32,
    new_ring_id: RingId,
    retrans_message_queue: &mut MsgQueue<MessageItem>,
) {
    if high_ring_state_high_seq_received <= low_ring_aru {
        return;
    }
    for seq in (low_ring_aru + 1)..=high_ring_state_high_seq_received {
        let Some(item) = old_regular_queue.get(seq) else {
            continue;
        };
        let inner_bytes = item.encode();
        let wrapped = MessageItem {
            header: McastHeader {
                ring_id: new_ring_id,
                seq: 0,
                origin_seq: item.header.origin_seq,
                guarantee: item.header.guarantee,
                source: item.header.source,
                encapsulated: true,
            },
            payload: inner_bytes,
        };
        let _ = retrans_message_queue.push(wrapped);
    }
}

/// §4.7: walk `1..=my_aru` in the recovery sort queue, unwrap each
/// encapsulated item, and insert the recovered old-ring message into
/// `regular_queue` when its inner ring id matches `my_old_ring_id`.
///
/// The recovered item is re-keyed by its *outer* (new-ring) seq — the
/// position it holds in `recovery_queue` — rather than the old ring's
/// inner seq. The outer seq is the one global counter every member's
/// recovery-round origination (re-originated old-ring messages and fresh
/// submissions alike) draws from via `TokenMachine::service_new_mcast`, so
/// it is the only key space `regular_queue` can safely merge into without
/// two unrelated messages landing on the same seq: the old ring's inner
/// numbering restarts at 1 independently of it and would otherwise collide
/// with new-ring-native entries already written into the same queue.
/// Returns the new high-seq watermark in that outer key space.
pub fn transfer_recovery_to_regular(
    recovery_queue: &SortQueue,
    my_aru: u32,
    my_old_ring_id: Option<RingId>,
    regular_queue: &mut SortQueue,
) -> u32 {
    let mut high_seq_received = 0u32;
    for seq in 1..=my_aru {
        let Some(item) = recovery_queue.get(seq) else {
            continue;
        };
        if !item.header.encapsulated {
            // Source marks a non-encapsulated single-iovec recovery item as
            // unreachable in practice; log and drop rather than guess.
            crate::security!(
                "recovery transfer: dropping non-encapsulated item at seq {}",
                seq
            );
            continue;
        }
        let Some(inner) = MessageItem::decode(&item.payload, false) else {
            continue;
        };
        if Some(inner.header.ring_id) == my_old_ring_id {
            high_seq_received = high_seq_received.max(seq);
            regular_queue.add(seq, inner);
        }
    }
    high_seq_received
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProcessorId;
    use std::net::SocketAddr;

    fn pid(o: u8) -> ProcessorId {
        ProcessorId::new(SocketAddr::from(([10, 0, 0, o], 5405)))
    }

    fn item(ring_id: RingId, seq: u32) -> MessageItem {
        MessageItem {
            header: McastHeader {
                ring_id,
                seq,
                origin_seq: seq,
                guarantee: 0,
                source: pid(1),
                encapsulated: false,
            },
            payload: vec![seq as u8],
        }
    }

    #[test]
    fn reoriginate_wraps_messages_in_window() {
        let old_ring = RingId::new(pid(1), 4);
        let new_ring = RingId::new(pid(1), 8);
        let mut old_queue = SortQueue::new();
        old_queue.add(5, item(old_ring, 5));
        old_queue.add(6, item(old_ring, 6));
        old_queue.add(10, item(old_ring, 10)); // outside window, ignored

        let mut retrans = MsgQueue::new(16);
        reoriginate_old_ring_messages(&old_queue, 4, 6, new_ring, &mut retrans);

        let drained = retrans.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|i| i.header.ring_id == new_ring));
        assert!(drained.iter().all(|i| i.header.encapsulated));
    }

    #[test]
    fn transfer_unwraps_matching_ring_and_skips_others() {
        let old_ring = RingId::new(pid(1), 4);
        let other_ring = RingId::new(pid(2), 4);
        let new_ring = RingId::new(pid(1), 8);

        let inner_match = item(old_ring, 7);
        let inner_other = item(other_ring, 9);

        let mut recovery_queue = SortQueue::new();
        recovery_queue.add(
            1,
            MessageItem {
                header: McastHeader {
                    ring_id: new_ring,
                    seq: 1,
                    origin_seq: 1,
                    guarantee: 0,
                    source: pid(1),
                    encapsulated: true,
                },
                payload: inner_match.encode(),
            },
        );
        recovery_queue.add(
            2,
            MessageItem {
                header: McastHeader {
                    ring_id: new_ring,
                    seq: 2,
                    origin_seq: 2,
                    guarantee: 0,
                    source: pid(1),
                    encapsulated: true,
                },
                payload: inner_other.encode(),
            },
        );

        let mut regular_queue = SortQueue::new();
        let watermark =
            transfer_recovery_to_regular(&recovery_queue, 2, Some(old_ring), &mut regular_queue);

        // Re-keyed by outer (new-ring) seq, not the old ring's inner seq, so
        // a concurrently-written new-ring-native entry at inner seq 7 or 9
        // can never collide with this recovered item.
        assert_eq!(watermark, 1);
        assert!(regular_queue.in_use(1));
        assert!(!regular_queue.in_use(2));
    }

    #[test]
    fn non_encapsulated_recovery_item_is_dropped() {
        let new_ring = RingId::new(pid(1), 8);
        let mut recovery_queue = SortQueue::new();
        recovery_queue.add(1, item(new_ring, 1));
        let mut regular_queue = SortQueue::new();
        let watermark =
            transfer_recovery_to_regular(&recovery_queue, 1, Some(new_ring), &mut regular_queue);
        assert_eq!(watermark, 0);
        assert!(regular_queue.is_empty());
    }
}
