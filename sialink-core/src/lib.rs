//! Sialink Core Library
//!
//! Codecs for the sialink content-addressed link scheme.
//! This crate provides:
//! - Tiered bitfield encoding of (offset, length) sector sub-ranges
//! - The `sia://` textual link format
//! - The linkfile layout header and fanout chunk table
//! - Cipher and erasure primitives used to recover linkfile data
//!
//! Everything in this crate is pure: no I/O, no blocking, safe to call from
//! any thread. The streaming side lives in `sialink-stream`.

pub mod bitfield;
pub mod crypto;
pub mod erasure;
pub mod error;
pub mod fanout;
pub mod layout;
pub mod link;

pub use crypto::{CipherType, MasterKey};
pub use erasure::ErasureCoder;
pub use error::{Result, SialinkError};
pub use fanout::{decode_fanout, encode_fanout};
pub use layout::{Layout, LAYOUT_SIZE};
pub use link::{LinkData, SectorRoot, StreamId, LINK_SCHEME};

/// Size of a sector, the fixed unit of content-addressed storage.
pub const SECTOR_SIZE: u64 = 1 << 22; // 4 MiB

/// Size of a merkle root hash in bytes.
pub const HASH_SIZE: usize = 32;
