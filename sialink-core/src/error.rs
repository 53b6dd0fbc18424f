//! Error types for sialink
//!
//! Provides a unified error type shared by the codecs and the streamer.

use thiserror::Error;

/// Result type alias for sialink operations
pub type Result<T> = std::result::Result<T, SialinkError>;

/// Unified error type for sialink operations
#[derive(Error, Debug)]
pub enum SialinkError {
    // ===== Link Parse Errors =====
    #[error("Malformed link: {0}")]
    MalformedLink(String),

    #[error("Unsupported link version: {0}")]
    UnsupportedVersion(u8),

    #[error("Wrong link length: expected {expected} characters, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    // ===== Bitfield Errors =====
    #[error("Version {0} is reserved")]
    ReservedVersion(u8),

    #[error("Length 0 is only valid at offset 0, got offset {0}")]
    LengthZero(u64),

    #[error("Offset {offset} is not aligned to {align}")]
    UnalignedOffset { offset: u64, align: u64 },

    #[error("Offset index {index} out of range (max: {max})")]
    OffsetOutOfRange { index: u64, max: u64 },

    #[error("Length too large: {length} bytes (max: {max})")]
    LengthTooLarge { length: u64, max: u64 },

    // ===== Layout Errors =====
    #[error("Layout truncated: need {expected} bytes, got {actual}")]
    LayoutTruncated { expected: usize, actual: usize },

    #[error("Unsupported cipher type: {0}")]
    UnsupportedCipher(String),

    #[error("Unsupported erasure parameters: {data} data, {parity} parity")]
    UnsupportedErasureParams { data: u8, parity: u8 },

    // ===== Fanout Errors =====
    #[error("Fanout size {len} is not a multiple of the chunk stride {stride}")]
    FanoutSize { len: usize, stride: usize },

    #[error("Chunk {0} has no fetchable pieces")]
    EmptyChunk(u64),

    // ===== Read Errors =====
    #[error("Cannot read from a negative offset: {0}")]
    NegativeOffset(i64),

    #[error("Read of {len} bytes exceeds the request size {max}")]
    OversizedRead { len: usize, max: u64 },

    #[error("Read offset {offset} is not aligned to the request size {align}")]
    UnalignedRead { offset: u64, align: u64 },

    #[error("Read of {len} bytes at offset {offset} goes past the file size {filesize}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        filesize: u64,
    },

    #[error("Insufficient pieces: have {available}, need {required}")]
    InsufficientPieces { available: usize, required: usize },

    #[error("Streamer is closed")]
    Closed,

    // ===== Transport Errors =====
    #[error("Fetcher error: {0}")]
    Fetcher(String),

    // ===== Cryptography Errors =====
    #[error("Decryption error: {0}")]
    Decryption(String),

    // ===== Erasure Coding Errors =====
    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),
}

impl From<reed_solomon_erasure::Error> for SialinkError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        SialinkError::ErasureCoding(err.to_string())
    }
}
