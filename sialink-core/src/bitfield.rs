//! Bitfield codec for sialink sub-range addressing
//!
//! A sialink carries a 16-bit bitfield. The low 3 bits hold `version - 1`;
//! the 13 high bits address an (offset, length) pair inside a 4 MiB sector
//! under a tiered alignment grid. Small ranges round up to 4 KiB steps; each
//! successive mode doubles both alignments and the band of lengths it
//! covers, trading addressable offsets for reach. A single fixed alignment
//! would either waste bits on small ranges or fail to address large ones.

use crate::error::{Result, SialinkError};
use crate::SECTOR_SIZE;

/// Number of low bitfield bits reserved for the version.
pub const VERSION_BITS: u32 = 3;

const VERSION_MASK: u16 = (1 << VERSION_BITS) - 1;

/// Number of length buckets in each mode.
const BUCKETS_PER_MODE: u64 = 8;

/// One row of the alignment grid.
///
/// The 13-bit payload is read LSB first: `prefix_len` bits identifying the
/// mode, 3 bucket bits, then `offset_bits` bits of offset index.
struct Mode {
    /// Added to the decoded length so this mode's band starts where the
    /// previous one ends.
    shift: u64,
    /// Offsets must be multiples of this.
    offset_align: u64,
    /// Lengths above `shift` round up to the next multiple of this.
    length_align: u64,
    /// Mode tag bit pattern, LSB first.
    prefix: u16,
    /// Number of payload bits consumed by the tag.
    prefix_len: u32,
    /// Number of payload bits holding the offset index.
    offset_bits: u32,
}

/// The eight-mode alignment grid. Mode m is tagged with m one-bits and a
/// terminating zero; mode 7 omits the terminator. The offset-index widths
/// shrink as the tags grow, so each row packs into exactly 13 bits and the
/// rows together exhaust the payload space: decoding is total and
/// encode/decode is a bijection on the legal grid.
#[rustfmt::skip]
const MODES: [Mode; 8] = [
    Mode { shift: 0,       offset_align: 1 << 12, length_align: 1 << 12, prefix: 0b0000000, prefix_len: 1, offset_bits: 9 },
    Mode { shift: 1 << 15, offset_align: 1 << 13, length_align: 1 << 12, prefix: 0b0000001, prefix_len: 2, offset_bits: 8 },
    Mode { shift: 1 << 16, offset_align: 1 << 14, length_align: 1 << 13, prefix: 0b0000011, prefix_len: 3, offset_bits: 7 },
    Mode { shift: 1 << 17, offset_align: 1 << 15, length_align: 1 << 14, prefix: 0b0000111, prefix_len: 4, offset_bits: 6 },
    Mode { shift: 1 << 18, offset_align: 1 << 16, length_align: 1 << 15, prefix: 0b0001111, prefix_len: 5, offset_bits: 5 },
    Mode { shift: 1 << 19, offset_align: 1 << 17, length_align: 1 << 16, prefix: 0b0011111, prefix_len: 6, offset_bits: 4 },
    Mode { shift: 1 << 20, offset_align: 1 << 18, length_align: 1 << 17, prefix: 0b0111111, prefix_len: 7, offset_bits: 3 },
    Mode { shift: 1 << 21, offset_align: 1 << 19, length_align: 1 << 18, prefix: 0b1111111, prefix_len: 7, offset_bits: 3 },
];

/// Encode `(offset, length)` into the 13 high bits of `bitfield`, leaving
/// the 3 version bits untouched.
///
/// The length is rounded up to the smallest bucket that covers it; the
/// offset must be aligned to the selected mode's offset alignment and its
/// index must fit the mode's offset bits. Length 0 is only legal at offset 0
/// and encodes as a 4 KiB range.
pub fn set_offset_and_len(bitfield: u16, offset: u64, length: u64) -> Result<u16> {
    if length == 0 && offset != 0 {
        return Err(SialinkError::LengthZero(offset));
    }
    let length = length.max(1);

    for mode in &MODES {
        if length > mode.shift + mode.length_align * BUCKETS_PER_MODE {
            continue;
        }

        // Round the length up to the containing bucket.
        let bucket = (length - mode.shift - 1) / mode.length_align;

        if offset % mode.offset_align != 0 {
            return Err(SialinkError::UnalignedOffset {
                offset,
                align: mode.offset_align,
            });
        }
        let index = offset / mode.offset_align;
        let max_index = (1u64 << mode.offset_bits) - 1;
        if index > max_index {
            return Err(SialinkError::OffsetOutOfRange {
                index,
                max: max_index,
            });
        }

        let mut payload = mode.prefix;
        payload |= (bucket as u16) << mode.prefix_len;
        payload |= (index as u16) << (mode.prefix_len + 3);
        return Ok((payload << VERSION_BITS) | (bitfield & VERSION_MASK));
    }

    Err(SialinkError::LengthTooLarge {
        length,
        max: SECTOR_SIZE,
    })
}

/// Decode the sub-range addressed by `bitfield`.
///
/// Total: every 13-bit payload names exactly one legal (offset, length)
/// pair, so no error path exists here. Version handling is separate.
pub fn offset_and_len(bitfield: u16) -> (u64, u64) {
    let payload = bitfield >> VERSION_BITS;

    // Any payload not matching modes 0..=6 has seven low one-bits: mode 7.
    let mode = MODES
        .iter()
        .find(|m| payload & ((1 << m.prefix_len) - 1) == m.prefix)
        .unwrap_or(&MODES[7]);

    let rest = payload >> mode.prefix_len;
    let bucket = (rest & 0b111) as u64;
    let index = (rest >> 3) as u64;

    let offset = mode.offset_align * index;
    let length = mode.shift + mode.length_align * (bucket + 1);
    (offset, length)
}

/// Extract the link version from the low bitfield bits.
pub fn version(bitfield: u16) -> u8 {
    (bitfield & VERSION_MASK) as u8 + 1
}

/// Store `version` in the low bitfield bits. Versions 1 through 8 are
/// representable; 0 is reserved.
pub fn set_version(bitfield: u16, version: u8) -> Result<u16> {
    if version == 0 || u16::from(version) > VERSION_MASK + 1 {
        return Err(SialinkError::ReservedVersion(version));
    }
    Ok((bitfield & !VERSION_MASK) | (u16::from(version) - 1))
}
