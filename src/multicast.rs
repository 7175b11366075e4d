// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast receive (§4.4) and the delivery engine (§4.5).

use crate::identity::ProcessorId;
use crate::queue::SortQueue;
use crate::ring_id::RingId;
use crate::stats::Stats;
use crate::wire::MessageItem;

/// Outcome of receiving one MCAST packet (§4.4).
pub enum ReceiveOutcome {
    /// Message belonged to a foreign ring; the caller should merge the
    /// sender into `my_proc_list` and (re-)enter GATHER, unless currently in
    /// COMMIT/RECOVERY where it is simply discarded.
    ForeignRing { source: ProcessorId },
    /// Message accepted (or already known); `aru_advanced` tells the
    /// caller whether new contiguous payloads may now be deliverable.
    Accepted { aru_advanced: bool },
}

/// Receive one MCAST payload into the appropriate sort queue (§4.4).
///
/// `queue` must already be the right one (`recovery` if
/// `item.header.encapsulated`, else `regular` — selecting between them is
/// the caller's job since it also owns which queue is "regular" right now).
pub fn on_mcast_receive(
    item: MessageItem,
    local_ring_id: RingId,
    my_aru: &mut u32,
    my_high_seq_received: &mut u32,
    queue: &mut SortQueue,
) -> ReceiveOutcome {
    if item.header.ring_id != local_ring_id {
        return ReceiveOutcome::ForeignRing {
            source: item.header.source,
        };
    }

    let seq = item.header.seq;
    if seq <= *my_aru || queue.in_use(seq) {
        return ReceiveOutcome::Accepted {
            aru_advanced: false,
        };
    }

    queue.add(seq, item);
    *my_high_seq_received = (*my_high_seq_received).max(seq);

    let before = *my_aru;
    while queue.in_use(*my_aru + 1) {
        *my_aru += 1;
    }
    ReceiveOutcome::Accepted {
        aru_advanced: *my_aru != before,
    }
}

/// `messages_deliver_to_app(skip, end)` (§4.5): walk
/// `my_high_delivered + 1 ..= end` in `queue`. Without `skip`, a gap stops
/// delivery; with `skip` (transitional delivery), gaps are skipped over and
/// items whose source is outside `deliver_memb_list` are also skipped,
/// without stopping the walk.
///
/// Returns the delivered items in order and the updated `my_high_delivered`
/// cursor; the caller invokes the application callback for each and updates
/// `stats_delv`.
pub fn messages_deliver_to_app(
    queue: &SortQueue,
    my_high_delivered: u32,
    end: u32,
    skip: bool,
    deliver_memb_list: &[ProcessorId],
    stats: &Stats,
) -> (Vec<MessageItem>, u32) {
    let mut delivered = Vec::new();
    let mut cursor = my_high_delivered;

    let mut seq = my_high_delivered + 1;
    while seq <= end {
        match queue.get(seq) {
            Some(item) => {
                cursor = seq;
                if !(skip && !deliver_memb_list.contains(&item.header.source)) {
                    delivered.push(item.clone());
                }
            }
            None => {
                if !skip {
                    break;
                }
                cursor = seq;
            }
        }
        seq += 1;
    }

    stats.record_delivered(delivered.len() as u64);
    (delivered, cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::McastHeader;
    use std::net::SocketAddr;

    fn pid(o: u8) -> ProcessorId {
        ProcessorId::new(SocketAddr::from(([10, 0, 0, o], 5405)))
    }

    fn item(ring_id: RingId, seq: u32, source: ProcessorId) -> MessageItem {
        MessageItem {
            header: McastHeader {
                ring_id,
                seq,
                origin_seq: seq,
                guarantee: 0,
                source,
                encapsulated: false,
            },
            payload: vec![seq as u8],
        }
    }

    #[test]
    fn foreign_ring_is_reported_without_touching_queues() {
        let local = RingId::new(pid(1), 4);
        let foreign = RingId::new(pid(2), 4);
        let mut queue = SortQueue::new();
        let mut my_aru = 0;
        let mut my_high = 0;
        let outcome = on_mcast_receive(
            item(foreign, 1, pid(2)),
            local,
            &mut my_aru,
            &mut my_high,
            &mut queue,
        );
        assert!(matches!(outcome, ReceiveOutcome::ForeignRing { source } if source == pid(2)));
        assert!(queue.is_empty());
    }

    #[test]
    fn contiguous_receipt_advances_aru() {
        let ring = RingId::new(pid(1), 4);
        let mut queue = SortQueue::new();
        let mut my_aru = 0;
        let mut my_high = 0;

        on_mcast_receive(item(ring, 1, pid(2)), ring, &mut my_aru, &mut my_high, &mut queue);
        assert_eq!(my_aru, 1);
        on_mcast_receive(item(ring, 3, pid(2)), ring, &mut my_aru, &mut my_high, &mut queue);
        assert_eq!(my_aru, 1, "gap at 2 should stop the fold");
        assert_eq!(my_high, 3);
        on_mcast_receive(item(ring, 2, pid(2)), ring, &mut my_aru, &mut my_high, &mut queue);
        assert_eq!(my_aru, 3, "filling the gap folds through 2 and 3");
    }

    #[test]
    fn delivery_stops_at_gap_without_skip() {
        let ring = RingId::new(pid(1), 4);
        let mut queue = SortQueue::new();
        queue.add(1, item(ring, 1, pid(1)));
        queue.add(3, item(ring, 3, pid(1)));
        let stats = Stats::new();
        let (delivered, cursor) = messages_deliver_to_app(&queue, 0, 3, false, &[], &stats);
        assert_eq!(delivered.len(), 1);
        assert_eq!(cursor, 1);
    }

    #[test]
    fn transitional_delivery_skips_gaps_and_non_member_sources() {
        let ring = RingId::new(pid(1), 4);
        let mut queue = SortQueue::new();
        queue.add(1, item(ring, 1, pid(1)));
        queue.add(3, item(ring, 3, pid(9))); // source outside deliver list
        let stats = Stats::new();
        let (delivered, cursor) = messages_deliver_to_app(&queue, 0, 3, true, &[pid(1)], &stats);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].header.seq, 1);
        assert_eq!(cursor, 3, "skip mode advances the cursor through gaps");
    }
}
