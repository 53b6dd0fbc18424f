//! Sector fetcher capability interface
//!
//! The streamer consumes sectors through this trait; the transport and
//! repair machinery behind it lives outside this crate. Retry policy belongs
//! to the implementation, the streamer treats every call as one attempt.

use bytes::Bytes;
use sialink_core::error::Result;
use sialink_core::link::SectorRoot;
use std::future::Future;
use std::pin::Pin;

/// Async sector fetcher trait
///
/// Implementations must be Send + Sync for use in async contexts.
pub trait SectorFetcher: Send + Sync {
    /// Fetch the piece stored under `root`. The chunk and piece indices are
    /// scheduling hints; the payload is at most one sector plus cipher
    /// framing.
    fn fetch_piece<'a>(
        &'a self,
        root: SectorRoot,
        chunk_index: u64,
        piece_index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + 'a>>;

    /// Release any resources held on behalf of `root`, cancelling fetches
    /// still in flight. Releasing a root that holds nothing is a no-op.
    fn release(&self, root: SectorRoot);
}

/// Synchronous fetcher trait (for simpler implementations)
pub trait SectorFetcherSync: Send + Sync {
    /// Fetch the piece stored under `root`.
    fn fetch_piece(&self, root: SectorRoot, chunk_index: u64, piece_index: u64) -> Result<Bytes>;

    /// Release any resources held on behalf of `root`.
    fn release(&self, root: SectorRoot);
}

/// Wrapper to convert a sync fetcher to async
pub struct AsyncWrapper<T: SectorFetcherSync>(pub T);

impl<T: SectorFetcherSync + 'static> SectorFetcher for AsyncWrapper<T> {
    fn fetch_piece<'a>(
        &'a self,
        root: SectorRoot,
        chunk_index: u64,
        piece_index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + 'a>> {
        Box::pin(async move { self.0.fetch_piece(root, chunk_index, piece_index) })
    }

    fn release(&self, root: SectorRoot) {
        self.0.release(root)
    }
}
