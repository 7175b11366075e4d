// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pooled, per-worker framer variant (§5 "Worker pool").
//!
//! The worker pool seals and opens bulk mcast payloads off the reactor
//! thread. Each worker keeps its own [`WorkerFramer`] so no framer state is
//! shared across threads; the only per-thread state is an independent PRNG
//! used for salt generation, since the private key itself is immutable and
//! cheap to clone.

use crate::crypto::{self, PRIVATE_KEY_LEN};
use crate::error::Result;
use ring::rand::SystemRandom;
use zeroize::Zeroize;

/// Shared, cloneable handle from which each worker thread derives its own
/// [`WorkerFramer`].
#[derive(Clone)]
pub struct FramerPool {
    private_key: [u8; PRIVATE_KEY_LEN],
}

impl FramerPool {
    #[must_use]
    pub fn new(private_key: [u8; PRIVATE_KEY_LEN]) -> Self {
        Self { private_key }
    }

    /// Build a framer for a newly spawned worker thread, with a fresh PRNG.
    #[must_use]
    pub fn worker_framer(&self) -> WorkerFramer {
        WorkerFramer {
            private_key: self.private_key,
            rng: SystemRandom::new(),
        }
    }
}

impl Drop for FramerPool {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// Stateless (beyond its own PRNG) framer owned by a single worker thread.
pub struct WorkerFramer {
    private_key: [u8; PRIVATE_KEY_LEN],
    rng: SystemRandom,
}

impl WorkerFramer {
    #[must_use]
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        crypto::seal(&self.private_key, &self.rng, plaintext)
    }

    pub fn open(&self, packet: &[u8]) -> Result<Vec<u8>> {
        crypto::open(&self.private_key, packet)
    }
}

impl Drop for WorkerFramer {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_workers_interoperate() {
        let pool = FramerPool::new([5u8; PRIVATE_KEY_LEN]);
        let a = pool.worker_framer();
        let b = pool.worker_framer();
        let packet = a.seal(b"mcast payload");
        assert_eq!(b.open(&packet).unwrap(), b"mcast payload");
    }
}
