// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sort queue: sparse sequence-indexed message store (§4.4 "Multicast
//! receive", §4.5 "Delivery").
//!
//! Messages may arrive out of order (via retransmit) relative to `seq`.
//! The sort queue holds at most [`crate::config::MISSING_MCAST_WINDOW`]
//! outstanding slots and lets the delivery engine pull a contiguous prefix
//! once gaps fill in.

use crate::wire::MessageItem;
use std::collections::BTreeMap;

/// Sparse store keyed by absolute sequence number. A slot is either empty
/// (not yet received) or holds a received [`MessageItem`] awaiting delivery.
#[derive(Debug, Default)]
pub struct SortQueue {
    slots: BTreeMap<u32, MessageItem>,
}

impl SortQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    /// Insert `item` at `seq`. Does nothing if the slot is already filled
    /// (a duplicate retransmit never overwrites).
    pub fn add(&mut self, seq: u32, item: MessageItem) {
        self.slots.entry(seq).or_insert(item);
    }

    #[must_use]
    pub fn get(&self, seq: u32) -> Option<&MessageItem> {
        self.slots.get(&seq)
    }

    #[must_use]
    pub fn in_use(&self, seq: u32) -> bool {
        self.slots.contains_key(&seq)
    }

    /// Remove and return the slot at `seq` once delivered.
    pub fn release(&mut self, seq: u32) -> Option<MessageItem> {
        self.slots.remove(&seq)
    }

    /// Lowest seq still held, if any (used to find the delivery cursor).
    #[must_use]
    pub fn lowest(&self) -> Option<u32> {
        self.slots.keys().next().copied()
    }

    /// Number of slots currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Copy the contents of `self` into `other`, preserving seq keys. Used
    /// when re-sequencing a sort queue across a ring-id change (§4.7
    /// recovery-to-regular transfer).
    pub fn copy_into(&self, other: &mut SortQueue) {
        for (seq, item) in &self.slots {
            other.slots.insert(*seq, item.clone());
        }
    }

    /// Drop every slot, returning the queue to its freshly-created state
    /// (§4.6 RECOVERY entry: sort queues are reset for the new ring).
    pub fn reset(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::McastHeader;
    use crate::{identity::ProcessorId, ring_id::RingId};
    use std::net::SocketAddr;

    fn item(seq: u32) -> MessageItem {
        let pid = ProcessorId::new(SocketAddr::from(([10, 0, 0, 1], 5405)));
        MessageItem {
            header: McastHeader {
                ring_id: RingId::new(pid, 4),
                seq,
                origin_seq: seq,
                guarantee: 0,
                source: pid,
                encapsulated: false,
            },
            payload: vec![1, 2, 3],
        }
    }

    #[test]
    fn add_then_get_then_release() {
        let mut q = SortQueue::new();
        q.add(5, item(5));
        assert!(q.in_use(5));
        assert_eq!(q.get(5).unwrap().header.seq, 5);
        let released = q.release(5).unwrap();
        assert_eq!(released.header.seq, 5);
        assert!(!q.in_use(5));
    }

    #[test]
    fn duplicate_add_does_not_overwrite() {
        let mut q = SortQueue::new();
        q.add(1, item(1));
        let mut dup = item(1);
        dup.payload = vec![9, 9, 9];
        q.add(1, dup);
        assert_eq!(q.get(1).unwrap().payload, vec![1, 2, 3]);
    }

    #[test]
    fn lowest_tracks_sparse_gaps() {
        let mut q = SortQueue::new();
        q.add(10, item(10));
        q.add(7, item(7));
        assert_eq!(q.lowest(), Some(7));
        q.release(7);
        assert_eq!(q.lowest(), Some(10));
    }

    #[test]
    fn reset_clears_all_slots() {
        let mut q = SortQueue::new();
        q.add(1, item(1));
        q.add(2, item(2));
        q.reset();
        assert!(q.is_empty());
    }

    #[test]
    fn copy_into_preserves_keys() {
        let mut src = SortQueue::new();
        src.add(3, item(3));
        src.add(4, item(4));
        let mut dst = SortQueue::new();
        src.copy_into(&mut dst);
        assert_eq!(dst.len(), 2);
        assert!(dst.in_use(3) && dst.in_use(4));
    }
}
