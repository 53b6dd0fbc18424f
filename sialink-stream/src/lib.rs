//! Sialink Streaming
//!
//! Reconstructs the file behind a sialink from erasure-coded, encrypted
//! pieces. This crate provides:
//! - The sector fetcher capability interface the streamer consumes
//! - An in-memory fetcher for tests and development
//! - The stream buffer layer (chunk caching, cross-reader deduplication)
//! - The fanout streamer and the [`open_link`] entry point
//!
//! Transport, repair and sector discovery live behind the fetcher trait and
//! are not named here.

pub mod buffer;
pub mod fetcher;
pub mod memory;
pub mod streamer;

pub use buffer::{ChunkSource, Stream, StreamBufferSet};
pub use fetcher::{AsyncWrapper, SectorFetcher, SectorFetcherSync};
pub use memory::MemoryFetcher;
pub use streamer::{open_link, FanoutStreamer};
