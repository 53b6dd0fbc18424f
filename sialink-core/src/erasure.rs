//! Erasure coding for fanout chunk recovery
//!
//! Wraps Reed-Solomon reconstruction sized from a layout's fanout
//! parameters. Files with a single data piece need no matrix at all: every
//! piece is a full copy of the chunk, so any one piece recovers it.

use crate::error::{Result, SialinkError};
use bytes::Bytes;
use reed_solomon_erasure::galois_8::ReedSolomon;

/// Reed-Solomon coder for one linkfile's chunks.
pub struct ErasureCoder {
    data_pieces: usize,
    parity_pieces: usize,
    codec: Option<ReedSolomon>,
}

impl ErasureCoder {
    /// Build a coder from a layout's piece counts.
    ///
    /// A file must have at least one data piece, and the Reed-Solomon
    /// backend cannot express parity-free striping, so `data > 1` requires
    /// `parity >= 1`.
    pub fn new(data_pieces: u8, parity_pieces: u8) -> Result<Self> {
        if data_pieces == 0 || (data_pieces > 1 && parity_pieces == 0) {
            return Err(SialinkError::UnsupportedErasureParams {
                data: data_pieces,
                parity: parity_pieces,
            });
        }

        let codec = if data_pieces > 1 {
            Some(ReedSolomon::new(
                usize::from(data_pieces),
                usize::from(parity_pieces),
            )?)
        } else {
            None
        };

        Ok(Self {
            data_pieces: usize::from(data_pieces),
            parity_pieces: usize::from(parity_pieces),
            codec,
        })
    }

    /// Number of pieces required to recover a chunk.
    pub fn min_pieces(&self) -> usize {
        self.data_pieces
    }

    /// Total pieces per chunk, data plus parity.
    pub fn total_pieces(&self) -> usize {
        self.data_pieces + self.parity_pieces
    }

    /// Split chunk data into `total_pieces` equally sized pieces, padding
    /// the tail with zeros and filling in parity. Used when building
    /// linkfile sectors; recovery is [`recover`](Self::recover).
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let codec = match &self.codec {
            Some(codec) => codec,
            // 1-of-N: every piece is a full copy.
            None => return Ok(vec![data.to_vec(); self.total_pieces().max(1)]),
        };

        let piece_size = data.len().div_ceil(self.data_pieces);
        let mut padded = data.to_vec();
        padded.resize(piece_size * self.data_pieces, 0);

        let mut pieces: Vec<Vec<u8>> = padded.chunks(piece_size).map(|c| c.to_vec()).collect();
        for _ in 0..self.parity_pieces {
            pieces.push(vec![0u8; piece_size]);
        }
        codec.encode(&mut pieces)?;
        Ok(pieces)
    }

    /// Recover a chunk from fetched pieces. `pieces[i]` holds piece `i` when
    /// it was fetched and decrypted, `None` otherwise; the slice must have
    /// one slot per piece. Returns the concatenated data pieces.
    pub fn recover(&self, pieces: &mut [Option<Vec<u8>>]) -> Result<Bytes> {
        let available = pieces.iter().filter(|piece| piece.is_some()).count();
        if available < self.data_pieces {
            return Err(SialinkError::InsufficientPieces {
                available,
                required: self.data_pieces,
            });
        }

        let codec = match &self.codec {
            Some(codec) => codec,
            None => {
                // Any piece is the chunk.
                return match pieces.iter_mut().find_map(Option::take) {
                    Some(piece) => Ok(Bytes::from(piece)),
                    None => Err(SialinkError::InsufficientPieces {
                        available: 0,
                        required: 1,
                    }),
                };
            }
        };

        if pieces.len() != self.total_pieces() {
            return Err(SialinkError::ErasureCoding(format!(
                "expected {} piece slots, got {}",
                self.total_pieces(),
                pieces.len()
            )));
        }

        codec.reconstruct(pieces)?;

        let mut chunk = Vec::new();
        for piece in pieces.iter().take(self.data_pieces) {
            match piece {
                Some(data) => chunk.extend_from_slice(data),
                None => {
                    return Err(SialinkError::ErasureCoding(
                        "reconstruction left a data piece empty".to_string(),
                    ))
                }
            }
        }
        Ok(Bytes::from(chunk))
    }
}
