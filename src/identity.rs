// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Processor identity (§3: "Identities are totally ordered; the
//! 'representative' of a ring is the lowest identity in that ring.")

use std::fmt;
use std::net::SocketAddr;

/// A processor's network address, totally ordered so "lowest identity"
/// (ring representative, §4.6) is a plain minimum over a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessorId(SocketAddr);

impl ProcessorId {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for ProcessorId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Find the representative (lowest identity) of `members \ failed`.
///
/// Returns `None` if every member is failed (empty quorum).
pub fn representative<'a>(
    members: impl IntoIterator<Item = &'a ProcessorId>,
    failed: &[ProcessorId],
) -> Option<ProcessorId> {
    members
        .into_iter()
        .filter(|p| !failed.contains(p))
        .min()
        .copied()
}

/// Sorted ring successor of `self_id` within `members` (wraps to the first
/// member after the last). Used to forward the ORF token (§4.3 step 9) and
/// the commit token (§4.6 COMMIT entry).
#[must_use]
pub fn ring_successor(self_id: ProcessorId, members: &[ProcessorId]) -> Option<ProcessorId> {
    if members.is_empty() {
        return None;
    }
    let mut sorted: Vec<ProcessorId> = members.to_vec();
    sorted.sort();
    let idx = sorted.iter().position(|p| *p == self_id)?;
    Some(sorted[(idx + 1) % sorted.len()])
}
