// crates/model-gate-probes/src/crc32c.rs
// ============================================================================
// Module: CRC-32C
// Description: Castagnoli CRC used by sorted tables and tensor bundles.
// Purpose: Verify block trailers and tensor slice checksums.
// Dependencies: None.
// ============================================================================

//! ## Overview
//! Table-driven CRC-32C (polynomial `0x82F63B78`) plus the LevelDB-style
//! masking applied to checksums that are stored next to the data they cover.

/// Delta added when masking a checksum.
const MASK_DELTA: u32 = 0xa282_ead8;

/// Lookup table for the reflected Castagnoli polynomial.
const TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i: u32 = 0;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x82F6_3B78;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// Extends a running CRC-32C with `data`.
#[must_use]
pub fn extend(crc: u32, data: &[u8]) -> u32 {
    let mut crc = !crc;
    for &byte in data {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[idx];
    }
    !crc
}

/// Computes the CRC-32C of `data`.
#[must_use]
pub fn value(data: &[u8]) -> u32 {
    extend(0, data)
}

/// Masks a checksum for storage alongside the bytes it covers.
#[must_use]
pub const fn mask(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Reverses [`mask`].
#[must_use]
pub const fn unmask(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}
