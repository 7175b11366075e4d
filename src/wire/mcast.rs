// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast application message: fixed-layout header plus payload (§3
//! "Message item").

use crate::identity::ProcessorId;
use crate::ring_id::RingId;
use crate::wire::header::{decode_addr, encode_addr, ADDR_LEN};

/// Fixed-layout multicast header (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McastHeader {
    pub ring_id: RingId,
    pub seq: u32,
    /// Per-origin sequence number assigned by the originating processor,
    /// independent of the ring-wide `seq`.
    pub origin_seq: u32,
    /// Application-requested delivery guarantee, carried verbatim (§ Glossary).
    pub guarantee: u8,
    pub source: ProcessorId,
    pub encapsulated: bool,
}

/// Encoded length of [`McastHeader`]: rep-addr(18) + ring_seq(8) + seq(4)
/// + origin_seq(4) + guarantee(1) + source-addr(18) + encapsulated(1).
pub const MCAST_HEADER_LEN: usize = ADDR_LEN + 8 + 4 + 4 + 1 + ADDR_LEN + 1;

impl McastHeader {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MCAST_HEADER_LEN);
        buf.extend_from_slice(&encode_addr(self.ring_id.representative));
        buf.extend_from_slice(&self.ring_id.seq.to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.origin_seq.to_le_bytes());
        buf.push(self.guarantee);
        buf.extend_from_slice(&encode_addr(self.source));
        buf.push(u8::from(self.encapsulated));
        buf
    }

    #[must_use]
    pub fn decode(buf: &[u8], swap: bool) -> Option<(Self, usize)> {
        if buf.len() < MCAST_HEADER_LEN {
            return None;
        }
        let mut off = 0;
        let representative = decode_addr(&buf[off..off + ADDR_LEN])?;
        off += ADDR_LEN;
        let ring_seq = read_u64(&buf[off..off + 8], swap);
        off += 8;
        let seq = read_u32(&buf[off..off + 4], swap);
        off += 4;
        let origin_seq = read_u32(&buf[off..off + 4], swap);
        off += 4;
        let guarantee = buf[off];
        off += 1;
        let source = decode_addr(&buf[off..off + ADDR_LEN])?;
        off += ADDR_LEN;
        let encapsulated = buf[off] != 0;
        off += 1;

        Some((
            Self {
                ring_id: RingId::new(representative, ring_seq),
                seq,
                origin_seq,
                guarantee,
                source,
                encapsulated,
            },
            off,
        ))
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

/// An application payload together with its multicast header, owned
/// end-to-end (§9 Design Notes: "sort-queue entries own the underlying
/// buffers").
#[derive(Debug, Clone)]
pub struct MessageItem {
    pub header: McastHeader,
    pub payload: Vec<u8>,
}

impl MessageItem {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.header.encode();
        buf.extend_from_slice(&self.payload);
        buf
    }

    #[must_use]
    pub fn decode(buf: &[u8], swap: bool) -> Option<Self> {
        let (header, consumed) = McastHeader::decode(buf, swap)?;
        Some(Self {
            header,
            payload: buf[consumed..].to_vec(),
        })
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
    fn mcast_header_roundtrips() {
        let header = McastHeader {
            ring_id: RingId::new(pid(1), 16),
            seq: 7,
            origin_seq: 3,
            guarantee: 1,
            source: pid(2),
            encapsulated: true,
        };
        let encoded = header.encode();
        let (decoded, consumed) = McastHeader::decode(&encoded, false).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(consumed, MCAST_HEADER_LEN);
    }

    #[test]
    fn message_item_roundtrips_with_payload() {
        let item = MessageItem {
            header: McastHeader {
                ring_id: RingId::new(pid(1), 16),
                seq: 1,
                origin_seq: 1,
                guarantee: 0,
                source: pid(1),
                encapsulated: false,
            },
            payload: b"hello".to_vec(),
        };
        let encoded = item.encode();
        let decoded = MessageItem::decode(&encoded, false).unwrap();
        assert_eq!(decoded.payload, b"hello");
        assert_eq!(decoded.header, item.header);
    }
}
