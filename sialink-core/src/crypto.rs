//! Cipher primitives for linkfile recovery
//!
//! Provides:
//! - The cipher type tag stored in a linkfile layout
//! - Per-piece key derivation from the 64-byte master key (Blake3 keyed)
//! - AES-256-GCM piece encryption with the nonce prepended to the ciphertext

use crate::error::{Result, SialinkError};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use bytes::Bytes;
use std::fmt;

/// AES-256-GCM key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Width of the cipher type tag in the layout header.
pub const CIPHER_TYPE_SIZE: usize = 8;

/// Width of the cipher key field in the layout header.
pub const CIPHER_KEY_SIZE: usize = 64;

/// Cipher identifier as stored in the layout header: an 8-byte ASCII tag,
/// NUL padded.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherType([u8; CIPHER_TYPE_SIZE]);

impl CipherType {
    /// Pieces are stored without encryption.
    pub const PLAIN: CipherType = CipherType(*b"plain\0\0\0");

    /// Pieces are AES-256-GCM encrypted under per-piece derived keys.
    pub const AES_GCM: CipherType = CipherType(*b"aes-gcm\0");

    /// Create from the raw tag bytes.
    pub fn from_bytes(bytes: [u8; CIPHER_TYPE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw tag bytes.
    pub fn as_bytes(&self) -> &[u8; CIPHER_TYPE_SIZE] {
        &self.0
    }

    /// Whether this is the plaintext cipher.
    pub fn is_plain(&self) -> bool {
        *self == Self::PLAIN
    }
}

impl fmt::Debug for CipherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherType({self})")
    }
}

impl fmt::Display for CipherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(self.0.len());
        match std::str::from_utf8(&self.0[..end]) {
            Ok(tag) => write!(f, "{tag}"),
            Err(_) => write!(f, "0x{}", hex::encode(self.0)),
        }
    }
}

/// Master cipher key recovered from a linkfile layout.
///
/// Each (chunk, piece) pair decrypts under its own key derived from the
/// master key, so identical plaintext pieces never share ciphertext.
pub struct MasterKey {
    cipher_type: CipherType,
    key: [u8; CIPHER_KEY_SIZE],
}

impl MasterKey {
    /// Build a key from a layout's cipher fields. Unknown cipher tags are
    /// rejected here rather than at layout decode.
    pub fn new(cipher_type: CipherType, key: [u8; CIPHER_KEY_SIZE]) -> Result<Self> {
        if cipher_type != CipherType::PLAIN && cipher_type != CipherType::AES_GCM {
            return Err(SialinkError::UnsupportedCipher(cipher_type.to_string()));
        }
        Ok(Self { cipher_type, key })
    }

    /// Generate a random master key for the given cipher.
    pub fn generate(cipher_type: CipherType) -> Result<Self> {
        use rand::RngCore;
        let mut key = [0u8; CIPHER_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self::new(cipher_type, key)
    }

    /// The cipher this key belongs to.
    pub fn cipher_type(&self) -> CipherType {
        self.cipher_type
    }

    /// The raw key material, as stored in a layout header.
    pub fn as_bytes(&self) -> &[u8; CIPHER_KEY_SIZE] {
        &self.key
    }

    /// Derive the key for one piece: a Blake3 keyed hash of the chunk and
    /// piece indices under the first 32 bytes of the master key.
    fn derive_piece_key(&self, chunk_index: u64, piece_index: u64) -> [u8; KEY_SIZE] {
        let mut base = [0u8; KEY_SIZE];
        base.copy_from_slice(&self.key[..KEY_SIZE]);

        let mut hasher = blake3::Hasher::new_keyed(&base);
        hasher.update(&chunk_index.to_le_bytes());
        hasher.update(&piece_index.to_le_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Decrypt a fetched piece. Plain pieces pass through untouched;
    /// encrypted pieces carry their nonce in the first [`NONCE_SIZE`] bytes
    /// and the GCM tag at the end.
    pub fn decrypt_piece(&self, data: Bytes, chunk_index: u64, piece_index: u64) -> Result<Bytes> {
        if self.cipher_type.is_plain() {
            return Ok(data);
        }
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SialinkError::Decryption(
                "piece too short for encrypted content".to_string(),
            ));
        }

        let key = self.derive_piece_key(chunk_index, piece_index);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SialinkError::Decryption(e.to_string()))?;
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        let plaintext = cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|_| SialinkError::Decryption("authentication failed".to_string()))?;
        Ok(Bytes::from(plaintext))
    }

    /// Encrypt a piece in the form [`decrypt_piece`](Self::decrypt_piece)
    /// expects: nonce prepended, tag appended. Used when building linkfile
    /// sectors.
    pub fn encrypt_piece(
        &self,
        plaintext: &[u8],
        chunk_index: u64,
        piece_index: u64,
    ) -> Result<Vec<u8>> {
        if self.cipher_type.is_plain() {
            return Ok(plaintext.to_vec());
        }

        use rand::RngCore;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = self.derive_piece_key(chunk_index, piece_index);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SialinkError::Decryption(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SialinkError::Decryption(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey({}, [REDACTED])", self.cipher_type)
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        // Zeroize key material on drop.
        self.key.iter_mut().for_each(|b| *b = 0);
    }
}
