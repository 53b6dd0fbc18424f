//! In-memory sector fetcher
//!
//! Used for testing and development. Supports injecting per-root failures
//! to exercise the streamer's degraded paths.

use crate::fetcher::SectorFetcherSync;
use bytes::Bytes;
use parking_lot::RwLock;
use sialink_core::error::{Result, SialinkError};
use sialink_core::link::SectorRoot;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory sector fetcher backed by a hash map.
pub struct MemoryFetcher {
    /// Stored pieces by root
    sectors: RwLock<HashMap<SectorRoot, Bytes>>,

    /// Roots whose fetches are forced to fail
    failing: RwLock<HashSet<SectorRoot>>,

    /// Operation counters
    fetches: AtomicU64,
    releases: AtomicU64,
}

impl MemoryFetcher {
    /// Create an empty fetcher
    pub fn new() -> Self {
        Self {
            sectors: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            fetches: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    /// Store piece data under an explicit root
    pub fn insert(&self, root: SectorRoot, data: impl Into<Bytes>) {
        self.sectors.write().insert(root, data.into());
    }

    /// Store piece data under its content address and return the root
    pub fn insert_sector(&self, data: impl Into<Bytes>) -> SectorRoot {
        let data = data.into();
        let root = SectorRoot::compute(&data);
        self.sectors.write().insert(root, data);
        root
    }

    /// Force every fetch of `root` to fail
    pub fn fail_root(&self, root: SectorRoot) {
        self.failing.write().insert(root);
    }

    /// Number of fetch attempts observed
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of release calls observed
    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }
}

impl Default for MemoryFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SectorFetcherSync for MemoryFetcher {
    fn fetch_piece(&self, root: SectorRoot, _chunk_index: u64, _piece_index: u64) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        if self.failing.read().contains(&root) {
            return Err(SialinkError::Fetcher(format!("piece {root} unavailable")));
        }
        self.sectors
            .read()
            .get(&root)
            .cloned()
            .ok_or_else(|| SialinkError::Fetcher(format!("no sector with root {root}")))
    }

    fn release(&self, _root: SectorRoot) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }
}
