//! Fanout reconstruction
//!
//! The fanout is the concatenated list of piece roots for every chunk of a
//! linkfile, stored in the sector after the layout header and metadata:
//! piece 0 of chunk 0 first, then piece 1 of chunk 0, and so on. Unencrypted
//! 1-of-N files use a compact form carrying a single root per chunk, because
//! every piece of such a chunk is identical.

use crate::error::{Result, SialinkError};
use crate::layout::Layout;
use crate::link::SectorRoot;
use crate::HASH_SIZE;

/// Number of roots stored per chunk for this layout.
pub fn pieces_per_chunk(layout: &Layout) -> usize {
    if layout.compact_fanout() {
        1
    } else {
        usize::from(layout.fanout_data_pieces) + usize::from(layout.fanout_parity_pieces)
    }
}

/// Convert raw fanout bytes into per-chunk lists of piece roots.
///
/// The byte length must be an exact multiple of the chunk stride. An
/// all-zero root marks an absent piece; chunks with no fetchable piece are
/// only rejected when a read actually needs them.
pub fn decode_fanout(layout: &Layout, fanout_bytes: &[u8]) -> Result<Vec<Vec<SectorRoot>>> {
    if layout.fanout_data_pieces == 0 {
        return Err(SialinkError::UnsupportedErasureParams {
            data: 0,
            parity: layout.fanout_parity_pieces,
        });
    }

    let stride = HASH_SIZE * pieces_per_chunk(layout);
    if fanout_bytes.len() % stride != 0 {
        return Err(SialinkError::FanoutSize {
            len: fanout_bytes.len(),
            stride,
        });
    }

    let chunks = fanout_bytes
        .chunks_exact(stride)
        .map(|chunk_bytes| {
            chunk_bytes
                .chunks_exact(HASH_SIZE)
                .map(|root_bytes| {
                    let mut root = [0u8; HASH_SIZE];
                    root.copy_from_slice(root_bytes);
                    SectorRoot::from_bytes(root)
                })
                .collect()
        })
        .collect();
    Ok(chunks)
}

/// Serialize per-chunk piece roots into fanout bytes, the inverse of
/// [`decode_fanout`].
///
/// In the general form every chunk contributes one root per piece, absent
/// pieces as the zero root. In the compact form only the first non-zero root
/// of each chunk is written, and a chunk with no non-zero root is an error
/// since nothing could ever recover it.
pub fn encode_fanout(layout: &Layout, chunks: &[Vec<SectorRoot>]) -> Result<Vec<u8>> {
    if layout.fanout_data_pieces == 0 {
        return Err(SialinkError::UnsupportedErasureParams {
            data: 0,
            parity: layout.fanout_parity_pieces,
        });
    }

    if layout.compact_fanout() {
        let mut fanout = Vec::with_capacity(chunks.len() * HASH_SIZE);
        for (i, chunk) in chunks.iter().enumerate() {
            let root = chunk
                .iter()
                .find(|root| !root.is_zero())
                .ok_or(SialinkError::EmptyChunk(i as u64))?;
            fanout.extend_from_slice(root.as_bytes());
        }
        return Ok(fanout);
    }

    let pieces = pieces_per_chunk(layout);
    let mut fanout = Vec::with_capacity(chunks.len() * pieces * HASH_SIZE);
    for chunk in chunks {
        for piece in 0..pieces {
            let root = chunk.get(piece).copied().unwrap_or_default();
            fanout.extend_from_slice(root.as_bytes());
        }
    }
    Ok(fanout)
}
