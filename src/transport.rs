// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport seam (§6 "External interfaces").
//!
//! Socket plumbing — binding a multicast group, driving the reactor's poll
//! step, demultiplexing read-ready events — is explicitly out of scope:
//! `initialize` takes an already-running `reactor` from the embedder. What
//! this crate owns is the one primitive the worker pool and token path need
//! to emit a sealed packet: `send_to`.

use crate::identity::ProcessorId;

/// Hands a sealed, wire-ready packet off to the network. Implementations
/// typically wrap a connected or multicast UDP socket; sending is always
/// non-blocking and errors are swallowed here — the protocol's own
/// retransmission machinery recovers from loss (§5 "Suspension points", §7
/// "SendFailed — logged at NOTICE").
pub trait Transport: Send + Sync {
    fn send_to(&self, destination: ProcessorId, bytes: &[u8]);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// In-memory transport used by unit and integration tests: records every
    /// send rather than touching a real socket.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(ProcessorId, Vec<u8>)>>,
    }

    impl Transport for RecordingTransport {
        fn send_to(&self, destination: ProcessorId, bytes: &[u8]) {
            self.sent.lock().unwrap().push((destination, bytes.to_vec()));
        }
    }
}
