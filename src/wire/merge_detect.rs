// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `MEMB_MERGE_DETECT` heartbeat (§4.6 "MERGE-DETECT").
//!
//! Carries nothing but the sender's current ring id; a receiver that sees a
//! different ring id reacts exactly as the foreign-processor-sighting case
//! of §4.4.

use crate::ring_id::RingId;
use crate::wire::header::{decode_addr, encode_addr, ADDR_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeDetect {
    pub ring_id: RingId,
}

impl MergeDetect {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ADDR_LEN + 8);
        buf.extend_from_slice(&encode_addr(self.ring_id.representative));
        buf.extend_from_slice(&self.ring_id.seq.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn decode(buf: &[u8], swap: bool) -> Option<Self> {
        if buf.len() < ADDR_LEN + 8 {
            return None;
        }
        let representative = decode_addr(&buf[0..ADDR_LEN])?;
        let raw = u64::from_le_bytes(buf[ADDR_LEN..ADDR_LEN + 8].try_into().unwrap());
        let seq = if swap { raw.swap_bytes() } else { raw };
        Some(Self {
            ring_id: RingId::new(representative, seq),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProcessorId;
    use std::net::SocketAddr;

    #[test]
    fn merge_detect_roundtrips() {
        let ring_id = RingId::new(
            ProcessorId::new(SocketAddr::from(([10, 0, 0, 1], 5405))),
            12,
        );
        let m = MergeDetect { ring_id };
        let encoded = m.encode();
        let decoded = MergeDetect::decode(&encoded, false).unwrap();
        assert_eq!(decoded, m);
    }
}
