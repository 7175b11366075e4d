// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `MEMB_JOIN` wire message (§4.6 "JOIN processing").

use crate::identity::ProcessorId;
use crate::wire::header::{decode_addr, encode_addr, ADDR_LEN};

/// `(their_proc, their_failed, ring_seq)` as received in `MEMB_JOIN` (§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembJoin {
    pub proc_list: Vec<ProcessorId>,
    pub failed_list: Vec<ProcessorId>,
    pub ring_seq: u64,
}

impl MembJoin {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            8 + 4 + 4 + (self.proc_list.len() + self.failed_list.len()) * ADDR_LEN,
        );
        buf.extend_from_slice(&self.ring_seq.to_le_bytes());
        buf.extend_from_slice(&(self.proc_list.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.failed_list.len() as u32).to_le_bytes());
        for p in &self.proc_list {
            buf.extend_from_slice(&encode_addr(*p));
        }
        for p in &self.failed_list {
            buf.extend_from_slice(&encode_addr(*p));
        }
        buf
    }

    #[must_use]
    pub fn decode(buf: &[u8], swap: bool) -> Option<Self> {
        if buf.len() < 16 {
            return None;
        }
        let ring_seq = read_u64(&buf[0..8], swap);
        let proc_count = read_u32(&buf[8..12], swap) as usize;
        let failed_count = read_u32(&buf[12..16], swap) as usize;
        let mut off = 16;

        let mut proc_list = Vec::with_capacity(proc_count);
        for _ in 0..proc_count {
            proc_list.push(decode_addr(&buf[off..off + ADDR_LEN])?);
            off += ADDR_LEN;
        }
        let mut failed_list = Vec::with_capacity(failed_count);
        for _ in 0..failed_count {
            failed_list.push(decode_addr(&buf[off..off + ADDR_LEN])?);
            off += ADDR_LEN;
        }

        Some(Self {
            proc_list,
            failed_list,
            ring_seq,
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
    fn memb_join_roundtrips() {
        let join = MembJoin {
            proc_list: vec![pid(1), pid(2), pid(3)],
            failed_list: vec![pid(2)],
            ring_seq: 16,
        };
        let encoded = join.encode();
        let decoded = MembJoin::decode(&encoded, false).unwrap();
        assert_eq!(decoded, join);
    }
}
