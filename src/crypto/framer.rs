// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-instance stateful framer, owned by the token-handling path.

use crate::crypto::{self, PRIVATE_KEY_LEN};
use crate::error::Result;
use ring::rand::SystemRandom;
use zeroize::Zeroize;

/// Seals and opens wire packets for a single totem instance. One `Framer`
/// is owned by the reactor thread that drives the token state machine, so
/// it never needs to be `Sync`.
pub struct Framer {
    private_key: [u8; PRIVATE_KEY_LEN],
    rng: SystemRandom,
}

impl Framer {
    #[must_use]
    pub fn new(private_key: [u8; PRIVATE_KEY_LEN]) -> Self {
        Self {
            private_key,
            rng: SystemRandom::new(),
        }
    }

    #[must_use]
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        crypto::seal(&self.private_key, &self.rng, plaintext)
    }

    pub fn open(&self, packet: &[u8]) -> Result<Vec<u8>> {
        crypto::open(&self.private_key, packet)
    }
}

impl Drop for Framer {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}
