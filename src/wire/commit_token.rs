// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Commit token wire format (§3 "Commit token").
//!
//! Circulates once during COMMIT to collect each proposed member's old-ring
//! state before RECOVERY begins (Glossary: "Commit token").

use crate::identity::ProcessorId;
use crate::ring_id::RingId;
use crate::wire::header::{decode_addr, encode_addr, ADDR_LEN};

/// Per-member record collected as the commit token circulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemberRecord {
    /// The member's ring id before the pending membership change. `None`
    /// until that member has written its slot.
    pub old_ring_id: Option<RingId>,
    pub aru: u32,
    pub high_delivered: u32,
    pub received_flg: bool,
}

const RECORD_LEN: usize = 1 + ADDR_LEN + 8 + 4 + 4 + 1;

impl MemberRecord {
    fn encode(&self, buf: &mut Vec<u8>) {
        match self.old_ring_id {
            Some(rid) => {
                buf.push(1);
                buf.extend_from_slice(&encode_addr(rid.representative));
                buf.extend_from_slice(&rid.seq.to_le_bytes());
            }
            None => {
                buf.push(0);
                buf.extend_from_slice(&[0u8; ADDR_LEN]);
                buf.extend_from_slice(&0u64.to_le_bytes());
            }
        }
        buf.extend_from_slice(&self.aru.to_le_bytes());
        buf.extend_from_slice(&self.high_delivered.to_le_bytes());
        buf.push(u8::from(self.received_flg));
    }

    fn decode(buf: &[u8], swap: bool) -> Option<Self> {
        if buf.len() < RECORD_LEN {
            return None;
        }
        let has_ring = buf[0] != 0;
        let mut off = 1;
        let representative = decode_addr(&buf[off..off + ADDR_LEN])?;
        off += ADDR_LEN;
        let seq = read_u64(&buf[off..off + 8], swap);
        off += 8;
        let old_ring_id = has_ring.then(|| RingId::new(representative, seq));
        let aru = read_u32(&buf[off..off + 4], swap);
        off += 4;
        let high_delivered = read_u32(&buf[off..off + 4], swap);
        off += 4;
        let received_flg = buf[off] != 0;
        Some(Self {
            old_ring_id,
            aru,
            high_delivered,
            received_flg,
        })
    }
}

/// One-shot commit token (§3). Exists only during COMMIT traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitToken {
    pub new_ring_id: RingId,
    pub token_seq: u64,
    /// Position currently being written (§4.6 COMMIT entry).
    pub memb_index: u32,
    /// Proposed members, sorted by identity.
    pub members: Vec<ProcessorId>,
    /// Parallel per-member records, same length/order as `members`.
    pub records: Vec<MemberRecord>,
}

impl CommitToken {
    /// Build a fresh commit token for `members` (sorted) with empty records,
    /// ready to begin COMMIT traversal at index 0 (§4.6 join-process:
    /// "construct a commit token and enter COMMIT").
    #[must_use]
    pub fn new(new_ring_id: RingId, mut members: Vec<ProcessorId>) -> Self {
        members.sort();
        let records = vec![MemberRecord::default(); members.len()];
        Self {
            new_ring_id,
            token_seq: 0,
            memb_index: 0,
            members,
            records,
        }
    }

    /// Write `record` into this processor's own slot and advance
    /// `memb_index` (§4.6 COMMIT entry: "update the commit token's slot for
    /// self... forward it to the next member").
    pub fn write_self_and_advance(&mut self, self_id: ProcessorId, record: MemberRecord) {
        if let Some(idx) = self.members.iter().position(|m| *m == self_id) {
            self.records[idx] = record;
        }
        self.memb_index = self.memb_index.saturating_add(1);
    }

    /// True once every member has written a slot.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.memb_index as usize >= self.members.len()
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.members.len() * (ADDR_LEN + RECORD_LEN));
        buf.extend_from_slice(&encode_addr(self.new_ring_id.representative));
        buf.extend_from_slice(&self.new_ring_id.seq.to_le_bytes());
        buf.extend_from_slice(&self.token_seq.to_le_bytes());
        buf.extend_from_slice(&self.memb_index.to_le_bytes());
        let count = self.members.len() as u32;
        buf.extend_from_slice(&count.to_le_bytes());
        for member in &self.members {
            buf.extend_from_slice(&encode_addr(*member));
        }
        for record in &self.records {
            record.encode(&mut buf);
        }
        buf
    }

    #[must_use]
    pub fn decode(buf: &[u8], swap: bool) -> Option<Self> {
        let mut off = 0;
        let representative = decode_addr(&buf[off..off + ADDR_LEN])?;
        off += ADDR_LEN;
        let seq = read_u64(&buf[off..off + 8], swap);
        off += 8;
        let token_seq = read_u64(&buf[off..off + 8], swap);
        off += 8;
        let memb_index = read_u32(&buf[off..off + 4], swap);
        off += 4;
        let count = read_u32(&buf[off..off + 4], swap) as usize;
        off += 4;

        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            members.push(decode_addr(&buf[off..off + ADDR_LEN])?);
            off += ADDR_LEN;
        }
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(MemberRecord::decode(&buf[off..], swap)?);
            off += RECORD_LEN;
        }

        Some(Self {
            new_ring_id: RingId::new(representative, seq),
            token_seq,
            memb_index,
            members,
            records,
        })
    }
}

fn read_u32(buf: &[u8], swap: bool) -> u32 {
    let v = u32::from_le_bytes(buf.try_into().unwrap());
    if swap {
        v.swap_bytes()
    } else {
        v
    }
}

fn read_u64(buf: &[u8], swap: bool) -> u64 {
    let v = u64::from_le_bytes(buf.try_into().unwrap());
    if swap {
        v.swap_bytes()
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn pid(o: u8) -> ProcessorId {
        ProcessorId::new(SocketAddr::from(([10, 0, 0, o], 5405)))
    }

    #[test]
    fn commit_token_roundtrips() {
        let mut token = CommitToken::new(RingId::new(pid(1), 20), vec![pid(3), pid(1), pid(2)]);
        assert_eq!(token.members, vec![pid(1), pid(2), pid(3)]);

        token.write_self_and_advance(
            pid(1),
            MemberRecord {
                old_ring_id: Some(RingId::new(pid(1), 16)),
                aru: 3,
                high_delivered: 3,
                received_flg: true,
            },
        );
        assert!(!token.is_complete());
        token.write_self_and_advance(pid(2), MemberRecord::default());
        token.write_self_and_advance(pid(3), MemberRecord::default());
        assert!(token.is_complete());

        let encoded = token.encode();
        let decoded = CommitToken::decode(&encoded, false).unwrap();
        assert_eq!(decoded, token);
    }
}
