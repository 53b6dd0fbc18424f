//! Linkfile layout header
//!
//! The fixed-size header at the start of a linkfile sector sub-range. It
//! names the file size, the size of the metadata and fanout regions that
//! follow it, and the cipher and erasure parameters needed to recover the
//! file data. Multi-byte integers are little-endian at fixed offsets.
//!
//! The codec validates field widths only; whether the cipher or erasure
//! parameters are usable surfaces later, when they are acted on.

use crate::crypto::{CipherType, CIPHER_KEY_SIZE, CIPHER_TYPE_SIZE};
use crate::error::{Result, SialinkError};
use crate::SECTOR_SIZE;
use std::fmt;

/// Size of the fixed layout header.
pub const LAYOUT_SIZE: usize = 99;

/// Fixed-size header describing how a linkfile's data is stored.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub version: u8,
    pub filesize: u64,
    pub metadata_size: u16,
    pub fanout_size: u16,
    pub fanout_data_pieces: u8,
    pub fanout_parity_pieces: u8,
    pub cipher_type: CipherType,
    pub cipher_key: [u8; CIPHER_KEY_SIZE],
}

impl Layout {
    /// Serialize the header. The 12 trailing bytes are reserved and zero.
    pub fn encode(&self) -> [u8; LAYOUT_SIZE] {
        let mut buf = [0u8; LAYOUT_SIZE];
        buf[0] = self.version;
        buf[1..9].copy_from_slice(&self.filesize.to_le_bytes());
        buf[9..11].copy_from_slice(&self.metadata_size.to_le_bytes());
        buf[11..13].copy_from_slice(&self.fanout_size.to_le_bytes());
        buf[13] = self.fanout_data_pieces;
        buf[14] = self.fanout_parity_pieces;
        buf[15..15 + CIPHER_TYPE_SIZE].copy_from_slice(self.cipher_type.as_bytes());
        buf[23..23 + CIPHER_KEY_SIZE].copy_from_slice(&self.cipher_key);
        buf
    }

    /// Extract the header from the first [`LAYOUT_SIZE`] bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < LAYOUT_SIZE {
            return Err(SialinkError::LayoutTruncated {
                expected: LAYOUT_SIZE,
                actual: data.len(),
            });
        }

        let mut filesize = [0u8; 8];
        filesize.copy_from_slice(&data[1..9]);
        let mut cipher_type = [0u8; CIPHER_TYPE_SIZE];
        cipher_type.copy_from_slice(&data[15..15 + CIPHER_TYPE_SIZE]);
        let mut cipher_key = [0u8; CIPHER_KEY_SIZE];
        cipher_key.copy_from_slice(&data[23..23 + CIPHER_KEY_SIZE]);

        Ok(Self {
            version: data[0],
            filesize: u64::from_le_bytes(filesize),
            metadata_size: u16::from_le_bytes([data[9], data[10]]),
            fanout_size: u16::from_le_bytes([data[11], data[12]]),
            fanout_data_pieces: data[13],
            fanout_parity_pieces: data[14],
            cipher_type: CipherType::from_bytes(cipher_type),
            cipher_key,
        })
    }

    /// Whether the fanout uses the compact one-root-per-chunk form. Only
    /// unencrypted 1-of-N files qualify: every piece of such a chunk is
    /// identical.
    pub fn compact_fanout(&self) -> bool {
        self.fanout_data_pieces == 1 && self.cipher_type.is_plain()
    }

    /// Bytes of file data per chunk.
    pub fn chunk_size(&self) -> u64 {
        SECTOR_SIZE * u64::from(self.fanout_data_pieces)
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layout")
            .field("version", &self.version)
            .field("filesize", &self.filesize)
            .field("metadata_size", &self.metadata_size)
            .field("fanout_size", &self.fanout_size)
            .field("fanout_data_pieces", &self.fanout_data_pieces)
            .field("fanout_parity_pieces", &self.fanout_parity_pieces)
            .field("cipher_type", &self.cipher_type)
            .field("cipher_key", &"[REDACTED]")
            .finish()
    }
}
