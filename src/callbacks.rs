// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Token callbacks (§4.8, §6.1 `register_token_callback`/`unregister`).
//!
//! Two independent lists, `received` and `sent`. A single-shot callback is
//! unlinked before it runs; if it reports failure it is re-linked so the
//! next rotation retries it. Persistent callbacks run every rotation
//! regardless of their return value.

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle returned by `register`, needed by `unregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u64);

struct Entry {
    id: u64,
    once: bool,
    f: Box<dyn FnMut() -> bool + Send>,
}

/// A single callback list (`received` or `sent`).
#[derive(Default)]
pub struct CallbackList {
    entries: Vec<Entry>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl CallbackList {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn register(&mut self, once: bool, f: Box<dyn FnMut() -> bool + Send>) -> CallbackHandle {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        self.entries.push(Entry { id, once, f });
        CallbackHandle(id)
    }

    /// Returns `true` if a matching callback was found and removed.
    pub fn unregister(&mut self, handle: CallbackHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != handle.0);
        self.entries.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invoke every registered callback once, applying §4.8's single-shot
    /// unlink/re-link semantics.
    pub fn invoke_all(&mut self) {
        let pending = std::mem::take(&mut self.entries);
        let mut still_pending = Vec::with_capacity(pending.len());

        for mut entry in pending {
            if entry.once {
                let succeeded = (entry.f)();
                if !succeeded {
                    still_pending.push(entry);
                }
            } else {
                let _ = (entry.f)();
                still_pending.push(entry);
            }
        }
        self.entries = still_pending;
    }
}
