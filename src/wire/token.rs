// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ORF token wire format (§3 "ORF token (on wire)").

use crate::identity::ProcessorId;
use crate::ring_id::RingId;
use crate::wire::header::{decode_addr, encode_addr, is_zero_addr, ADDR_LEN};

/// One entry of the token's retransmission-request list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtrEntry {
    pub ring_id: RingId,
    pub seq: u32,
}

const RTR_ENTRY_LEN: usize = ADDR_LEN + 8 + 4;

impl RtrEntry {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&encode_addr(self.ring_id.representative));
        buf.extend_from_slice(&self.ring_id.seq.to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
    }

    fn decode(buf: &[u8], swap: bool) -> Option<Self> {
        if buf.len() < RTR_ENTRY_LEN {
            return None;
        }
        let representative = decode_addr(&buf[0..ADDR_LEN])?;
        let ring_seq = read_u64(&buf[ADDR_LEN..ADDR_LEN + 8], swap);
        let seq = read_u32(&buf[ADDR_LEN + 8..ADDR_LEN + 12], swap);
        Some(Self {
            ring_id: RingId::new(representative, ring_seq),
            seq,
        })
    }
}

/// The ORF (Ordering, Reliability, Flow-control) token (§3, §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrfToken {
    pub ring_id: RingId,
    /// Highest `seq` assigned so far in this ring.
    pub seq: u32,
    /// Token rotation number, incremented on every forward.
    pub token_seq: u64,
    /// Ring-wide all-received-up-to.
    pub aru: u32,
    /// Processor that last lowered `aru`; `None` when `aru == seq`.
    pub aru_addr: Option<ProcessorId>,
    /// Remaining flow-control budget for this rotation.
    pub fcc: u32,
    pub retrans_flg: bool,
    /// Capped at [`crate::config::RETRANSMIT_ENTRIES_MAX`] entries.
    pub rtr_list: Vec<RtrEntry>,
}

impl OrfToken {
    /// The initial token sent by the ring representative on RECOVERY entry
    /// (§4.6): `seq=0, token_seq=0, retrans_flg=1, aru=0, aru_addr=self`.
    #[must_use]
    pub fn initial(ring_id: RingId, representative: ProcessorId) -> Self {
        Self {
            ring_id,
            seq: 0,
            token_seq: 0,
            aru: 0,
            aru_addr: Some(representative),
            fcc: 0,
            retrans_flg: true,
            rtr_list: Vec::new(),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.rtr_list.len() * RTR_ENTRY_LEN);
        buf.extend_from_slice(&encode_addr(self.ring_id.representative));
        buf.extend_from_slice(&self.ring_id.seq.to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.token_seq.to_le_bytes());
        buf.extend_from_slice(&self.aru.to_le_bytes());
        match self.aru_addr {
            Some(addr) => buf.extend_from_slice(&encode_addr(addr)),
            None => buf.extend_from_slice(&[0u8; ADDR_LEN]),
        }
        buf.extend_from_slice(&self.fcc.to_le_bytes());
        buf.push(u8::from(self.retrans_flg));
        let count = self.rtr_list.len() as u32;
        buf.extend_from_slice(&count.to_le_bytes());
        for entry in &self.rtr_list {
            entry.encode(&mut buf);
        }
        buf
    }

    #[must_use]
    pub fn decode(buf: &[u8], swap: bool) -> Option<Self> {
        let mut off = 0;
        let representative = decode_addr(&buf[off..off + ADDR_LEN])?;
        off += ADDR_LEN;
        let ring_seq = read_u64(&buf[off..off + 8], swap);
        off += 8;
        let seq = read_u32(&buf[off..off + 4], swap);
        off += 4;
        let token_seq = read_u64(&buf[off..off + 8], swap);
        off += 8;
        let aru = read_u32(&buf[off..off + 4], swap);
        off += 4;
        let aru_addr = if is_zero_addr(&buf[off..off + ADDR_LEN]) {
            None
        } else {
            Some(decode_addr(&buf[off..off + ADDR_LEN])?)
        };
        off += ADDR_LEN;
        let fcc = read_u32(&buf[off..off + 4], swap);
        off += 4;
        let retrans_flg = *buf.get(off)? != 0;
        off += 1;
        let count = read_u32(&buf[off..off + 4], swap) as usize;
        off += 4;

        let mut rtr_list = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = RtrEntry::decode(&buf[off..], swap)?;
            rtr_list.push(entry);
            off += RTR_ENTRY_LEN;
        }

        Some(Self {
            ring_id: RingId::new(representative, ring_seq),
            seq,
            token_seq,
            aru,
            aru_addr,
            fcc,
            retrans_flg,
            rtr_list,
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
    fn token_roundtrips_with_rtr_list() {
        let ring_id = RingId::new(pid(1), 16);
        let token = OrfToken {
            ring_id,
            seq: 42,
            token_seq: 7,
            aru: 40,
            aru_addr: Some(pid(2)),
            fcc: 10,
            retrans_flg: true,
            rtr_list: vec![
                RtrEntry { ring_id, seq: 41 },
                RtrEntry { ring_id, seq: 39 },
            ],
        };
        let encoded = token.encode();
        let decoded = OrfToken::decode(&encoded, false).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn aru_addr_zero_sentinel_decodes_to_none() {
        let ring_id = RingId::new(pid(1), 16);
        let token = OrfToken {
            ring_id,
            seq: 5,
            token_seq: 1,
            aru: 5,
            aru_addr: None,
            fcc: 30,
            retrans_flg: false,
            rtr_list: Vec::new(),
        };
        let encoded = token.encode();
        let decoded = OrfToken::decode(&encoded, false).unwrap();
        assert_eq!(decoded.aru_addr, None);
    }

    #[test]
    fn token_decodes_with_byteswap() {
        let ring_id = RingId::new(pid(1), 0x0102030405060708);
        let token = OrfToken::initial(ring_id, pid(1));
        let mut encoded = token.encode();
        // flip the endian detector analog: byte-swap the multi-byte fields
        // a peer with mismatched endianness would see — simulate by
        // manually swapping the ring_seq field and decoding with swap=true.
        let off = ADDR_LEN;
        encoded[off..off + 8].reverse();
        let decoded = OrfToken::decode(&encoded, true).unwrap();
        assert_eq!(decoded.ring_id.seq, ring_id.seq);
    }
}
