// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatch and endian adaptation (§4.2).
//!
//! Every message begins with a one-byte type and a two-byte endian
//! detector; [`decode`] reads that prefix once and routes the remainder to
//! the matching wire codec with the detected swap applied uniformly.

use crate::wire::header::{PacketHeader, HEADER_LEN};
use crate::wire::{CommitToken, MembJoin, MergeDetect, MessageItem, MessageType, OrfToken};

/// A fully decoded application-level message, demultiplexed by type.
#[derive(Debug, Clone)]
pub enum Decoded {
    OrfToken(OrfToken),
    Mcast(MessageItem),
    MembMergeDetect(MergeDetect),
    MembJoin(MembJoin),
    MembCommitToken(CommitToken),
    TokenHoldCancel,
}

/// Decode a framer-opened plaintext buffer into a [`Decoded`] message.
/// Returns `None` on a malformed or truncated body — the caller treats
/// this the same as an auth failure (silently dropped, §7).
#[must_use]
pub fn decode(plaintext: &[u8]) -> Option<Decoded> {
    let header = PacketHeader::decode(plaintext)?;
    let body = &plaintext[HEADER_LEN..];
    match header.msg_type {
        MessageType::OrfToken => OrfToken::decode(body, header.swap).map(Decoded::OrfToken),
        MessageType::Mcast => MessageItem::decode(body, header.swap).map(Decoded::Mcast),
        MessageType::MembMergeDetect => {
            MergeDetect::decode(body, header.swap).map(Decoded::MembMergeDetect)
        }
        MessageType::MembJoin => MembJoin::decode(body, header.swap).map(Decoded::MembJoin),
        MessageType::MembCommitToken => {
            CommitToken::decode(body, header.swap).map(Decoded::MembCommitToken)
        }
        MessageType::TokenHoldCancel => Some(Decoded::TokenHoldCancel),
    }
}

/// Encode `message` with its type-specific [`PacketHeader`] prefix, ready
/// for the crypto framer's `seal`.
#[must_use]
pub fn encode(message: &Decoded) -> Vec<u8> {
    let (msg_type, encapsulated, body) = match message {
        Decoded::OrfToken(t) => (MessageType::OrfToken, false, t.encode()),
        Decoded::Mcast(item) => (
            MessageType::Mcast,
            item.header.encapsulated,
            item.encode(),
        ),
        Decoded::MembMergeDetect(m) => (MessageType::MembMergeDetect, false, m.encode()),
        Decoded::MembJoin(j) => (MessageType::MembJoin, false, j.encode()),
        Decoded::MembCommitToken(t) => (MessageType::MembCommitToken, false, t.encode()),
        Decoded::TokenHoldCancel => (MessageType::TokenHoldCancel, false, Vec::new()),
    };
    let header = PacketHeader::new(msg_type, encapsulated);
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&body);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProcessorId;
    use crate::ring_id::RingId;
    use std::net::SocketAddr;

    fn pid(o: u8) -> ProcessorId {
        ProcessorId::new(SocketAddr::from(([10, 0, 0, o], 5405)))
    }

    #[test]
    fn orf_token_roundtrips_through_dispatch() {
        let ring_id = RingId::new(pid(1), 4);
        let token = OrfToken::initial(ring_id, pid(1));
        let encoded = encode(&Decoded::OrfToken(token.clone()));
        match decode(&encoded) {
            Some(Decoded::OrfToken(decoded)) => assert_eq!(decoded, token),
            other => panic!("expected OrfToken, got {other:?}"),
        }
    }

    #[test]
    fn token_hold_cancel_has_empty_body() {
        let encoded = encode(&Decoded::TokenHoldCancel);
        assert_eq!(encoded.len(), HEADER_LEN);
        assert!(matches!(decode(&encoded), Some(Decoded::TokenHoldCancel)));
    }

    #[test]
    fn truncated_body_fails_to_decode() {
        let mut encoded = encode(&Decoded::MembJoin(MembJoin {
            proc_list: vec![pid(1)],
            failed_list: vec![],
            ring_seq: 1,
        }));
        encoded.truncate(HEADER_LEN + 2);
        assert!(decode(&encoded).is_none());
    }
}
