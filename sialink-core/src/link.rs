//! The sialink textual link format
//!
//! A sialink binds a sector merkle root to a sub-range of that sector and a
//! format version. Textual form: `sia://` followed by 52 url-safe base64
//! characters, 58 characters in all. Query parameters after the first `&` or
//! `?` are tolerated and ignored when parsing.

use crate::bitfield;
use crate::error::{Result, SialinkError};
use crate::HASH_SIZE;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scheme prefix of a textual sialink.
pub const LINK_SCHEME: &str = "sia://";

/// Raw size of an encoded link: version byte, bitfield, merkle root and a
/// reserved zero tail that pads the base64 form to its fixed width.
pub const RAW_LINK_SIZE: usize = 39;

/// Number of characters in the base64 portion of a sialink.
pub const ENCODED_LINK_SIZE: usize = 52;

const RESERVED_LINK_BYTES: usize = 4;

/// Content-addressed sector identifier: a 32-byte merkle root.
///
/// The all-zero root is a sentinel for an absent piece in a fanout.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorRoot([u8; HASH_SIZE]);

impl SectorRoot {
    /// Create a root from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Compute the root of a blob of sector data (content-addressing).
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether this is the all-zero sentinel root.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_SIZE]
    }
}

impl fmt::Debug for SectorRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SectorRoot({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for SectorRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Identifier of a stream data source: the hash of the link text. Concurrent
/// readers of the same link share buffers under this key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId([u8; HASH_SIZE]);

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", &hex::encode(self.0)[..16])
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &hex::encode(self.0)[..16])
    }
}

/// The data encoded in a sialink.
///
/// An immutable triple of version, sub-range bitfield and sector merkle
/// root. The version lives in the low bits of the bitfield; see
/// [`crate::bitfield`] for the sub-range encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LinkData {
    bitfield: u16,
    merkle_root: SectorRoot,
}

impl LinkData {
    /// Create a link addressing `length` bytes at `offset` within the sector
    /// under `merkle_root`. The length is rounded up by the bitfield codec.
    pub fn new(merkle_root: SectorRoot, offset: u64, length: u64) -> Result<Self> {
        let bitfield = bitfield::set_offset_and_len(0, offset, length)?;
        Ok(Self {
            bitfield,
            merkle_root,
        })
    }

    /// Assemble a link from an already-encoded bitfield.
    pub fn from_parts(bitfield: u16, merkle_root: SectorRoot) -> Self {
        Self {
            bitfield,
            merkle_root,
        }
    }

    /// The format version, 1 through 8.
    pub fn version(&self) -> u8 {
        bitfield::version(self.bitfield)
    }

    /// Set the format version. Version 0 is reserved.
    pub fn set_version(&mut self, version: u8) -> Result<()> {
        self.bitfield = bitfield::set_version(self.bitfield, version)?;
        Ok(())
    }

    /// The raw 16-bit bitfield.
    pub fn bitfield(&self) -> u16 {
        self.bitfield
    }

    /// The root of the sector this link points into.
    pub fn merkle_root(&self) -> SectorRoot {
        self.merkle_root
    }

    /// The sub-range addressed by this link.
    pub fn offset_and_len(&self) -> (u64, u64) {
        bitfield::offset_and_len(self.bitfield)
    }

    /// Re-point this link at `length` bytes from `offset`, keeping version
    /// and root.
    pub fn set_offset_and_len(&mut self, offset: u64, length: u64) -> Result<()> {
        self.bitfield = bitfield::set_offset_and_len(self.bitfield, offset, length)?;
        Ok(())
    }

    /// Identifier for buffer sharing across readers of the same link.
    pub fn stream_id(&self) -> StreamId {
        StreamId(*blake3::hash(self.to_uri().as_bytes()).as_bytes())
    }

    /// Serialize to the textual `sia://` form.
    pub fn to_uri(&self) -> String {
        let mut raw = [0u8; RAW_LINK_SIZE];
        raw[0] = self.version();
        raw[1..3].copy_from_slice(&self.bitfield.to_le_bytes());
        raw[3..3 + HASH_SIZE].copy_from_slice(self.merkle_root.as_bytes());
        // The reserved tail stays zero.
        format!("{}{}", LINK_SCHEME, URL_SAFE_NO_PAD.encode(raw))
    }

    /// Parse from the textual form.
    ///
    /// The `sia://` prefix is optional and anything after the first `&` or
    /// `?` is dropped. The remainder must be exactly
    /// [`ENCODED_LINK_SIZE`] characters of url-safe base64.
    pub fn from_uri(s: &str) -> Result<Self> {
        let base = s.strip_prefix(LINK_SCHEME).unwrap_or(s);
        let base = match base.find(['&', '?']) {
            Some(pos) => &base[..pos],
            None => base,
        };

        if base.len() != ENCODED_LINK_SIZE {
            return Err(SialinkError::WrongLength {
                expected: ENCODED_LINK_SIZE,
                actual: base.len(),
            });
        }

        let raw = URL_SAFE_NO_PAD
            .decode(base)
            .map_err(|e| SialinkError::MalformedLink(e.to_string()))?;
        if raw.len() != RAW_LINK_SIZE {
            return Err(SialinkError::MalformedLink(format!(
                "decoded to {} bytes, expected {}",
                raw.len(),
                RAW_LINK_SIZE
            )));
        }
        if raw[RAW_LINK_SIZE - RESERVED_LINK_BYTES..]
            .iter()
            .any(|&b| b != 0)
        {
            return Err(SialinkError::MalformedLink(
                "non-zero reserved bytes".to_string(),
            ));
        }

        let link_bitfield = u16::from_le_bytes([raw[1], raw[2]]);
        let mut root = [0u8; HASH_SIZE];
        root.copy_from_slice(&raw[3..3 + HASH_SIZE]);

        let ld = Self {
            bitfield: link_bitfield,
            merkle_root: SectorRoot::from_bytes(root),
        };
        if raw[0] != ld.version() {
            return Err(SialinkError::MalformedLink(
                "version byte disagrees with the bitfield".to_string(),
            ));
        }
        if ld.version() != 1 {
            return Err(SialinkError::UnsupportedVersion(ld.version()));
        }
        Ok(ld)
    }
}

impl fmt::Display for LinkData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

impl FromStr for LinkData {
    type Err = SialinkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_uri(s)
    }
}
