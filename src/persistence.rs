// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Durable per-processor ring-sequence store (§6.3).
//!
//! One file per processor identity, holding a 64-bit little-endian ring
//! sequence. Loaded at startup, overwritten on every COMMIT entry with the
//! newly agreed ring sequence. Missing file means `seq = 0`; an unreadable
//! (but present) file is fatal — the protocol cannot preserve ring-sequence
//! monotonicity across a restart otherwise (§3 invariant 6).
//!
//! Backend-agnostic trait mirrors the teacher's `PersistenceStore`
//! abstraction (`hdds-persistence::store`) so an embedder can swap in a
//! different backend (e.g. a shared KV store) without touching the protocol
//! core.

use crate::error::{Error, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Backend-agnostic ring-sequence persistence.
pub trait RingSeqStore: Send + Sync {
    /// Load the persisted sequence, or 0 if none exists yet.
    fn load(&self) -> Result<u64>;
    /// Overwrite the persisted sequence.
    fn store(&self, seq: u64) -> Result<()>;
}

/// File-backed `RingSeqStore` at a configurable path (§9 Design Notes:
/// "the source hard-codes `/tmp/ringid_<ip>`...this must be a configurable
/// durable path; treat as an injected dependency").
pub struct FileRingSeqStore {
    path: PathBuf,
}

impl FileRingSeqStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RingSeqStore for FileRingSeqStore {
    fn load(&self) -> Result<u64> {
        let mut file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(persistence_error(&self.path, &e)),
        };

        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)
            .map_err(|e| persistence_error(&self.path, &e))?;
        Ok(u64::from_le_bytes(buf))
    }

    fn store(&self, seq: u64) -> Result<()> {
        let mut file =
            fs::File::create(&self.path).map_err(|e| persistence_error(&self.path, &e))?;
        file.write_all(&seq.to_le_bytes())
            .map_err(|e| persistence_error(&self.path, &e))?;
        file.sync_all().map_err(|e| persistence_error(&self.path, &e))
    }
}

fn persistence_error(path: &Path, e: &io::Error) -> Error {
    Error::PersistenceFailed(format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRingSeqStore::new(dir.path().join("ringid_10.0.0.1"));
        assert_eq!(store.load().unwrap(), 0);
    }

    #[test]
    fn store_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRingSeqStore::new(dir.path().join("ringid_10.0.0.1"));
        store.store(16).unwrap();
        assert_eq!(store.load().unwrap(), 16);
        store.store(20).unwrap();
        assert_eq!(store.load().unwrap(), 20);
    }

    #[test]
    fn truncated_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ringid_10.0.0.1");
        fs::write(&path, [1, 2, 3]).unwrap();
        let store = FileRingSeqStore::new(path);
        assert!(matches!(store.load(), Err(Error::PersistenceFailed(_))));
    }
}
