// crates/model-gate-probes/src/table.rs
// ============================================================================
// Module: Sorted Table Reader
// Description: Reader for immutable sorted string tables (tensor bundle index).
// Purpose: Decode and checksum-verify `variables.index` files.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! A sorted string table is a sequence of checksummed blocks followed by a
//! fixed-size footer. The footer locates the index block, whose entries map
//! the last key of each data block to that block's handle. Data blocks hold
//! prefix-compressed key/value entries and a restart array.
//!
//! [`read_table`] walks the whole file and returns every entry in key order.
//! Checksums are verified for every block; keys must be strictly increasing.
//!
//! ## Invariants
//! - Only uncompressed blocks are accepted.
//! - Every block handle lies within the file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::crc32c;
use crate::wire::read_varint;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Magic number in the last eight bytes of a table.
pub const TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;
/// Encoded footer length: two padded handles plus the magic number.
pub const FOOTER_LEN: usize = 48;
/// Block trailer length: compression type plus masked CRC.
pub const BLOCK_TRAILER_LEN: usize = 5;
/// Compression type byte for uncompressed blocks.
const NO_COMPRESSION: u8 = 0;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Location of a block within the table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    /// Byte offset of the block contents.
    pub offset: u64,
    /// Length of the block contents, excluding the trailer.
    pub size: u64,
}

impl BlockHandle {
    /// Decodes a handle from the start of `buf`, advancing `pos`.
    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, TableError> {
        let offset = read_varint(buf, pos).map_err(|_| TableError::Corrupt("bad block handle"))?;
        let size = read_varint(buf, pos).map_err(|_| TableError::Corrupt("bad block handle"))?;
        Ok(Self {
            offset,
            size,
        })
    }
}

/// One key/value entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// Entry key.
    pub key: Vec<u8>,
    /// Entry value.
    pub value: Vec<u8>,
}

/// Table decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// The file is shorter than a footer.
    #[error("table is {0} bytes, shorter than the footer")]
    TooShort(usize),
    /// The footer magic number is wrong.
    #[error("bad table magic number {0:#018x}")]
    BadMagic(u64),
    /// A block handle points outside the file.
    #[error("block at offset {offset} with size {size} lies outside the table")]
    OutOfRange {
        /// Block offset.
        offset: u64,
        /// Block size.
        size: u64,
    },
    /// A block checksum does not match its contents.
    #[error("block checksum mismatch at offset {offset}")]
    Checksum {
        /// Block offset.
        offset: u64,
    },
    /// A block uses an unsupported compression type.
    #[error("unsupported block compression type {0}")]
    Compression(u8),
    /// Block contents are malformed.
    #[error("corrupt table: {0}")]
    Corrupt(&'static str),
    /// Keys are not strictly increasing.
    #[error("table keys are out of order")]
    Unsorted,
}

// ============================================================================
// SECTION: Reading
// ============================================================================

/// Reads every entry of a sorted table held in memory.
///
/// # Errors
///
/// Returns [`TableError`] when the footer, any block, or the key order is
/// invalid.
pub fn read_table(file: &[u8]) -> Result<Vec<TableEntry>, TableError> {
    if file.len() < FOOTER_LEN {
        return Err(TableError::TooShort(file.len()));
    }
    let footer = &file[file.len() - FOOTER_LEN ..];
    let mut magic_bytes = [0u8; 8];
    magic_bytes.copy_from_slice(&footer[FOOTER_LEN - 8 ..]);
    let magic = u64::from_le_bytes(magic_bytes);
    if magic != TABLE_MAGIC {
        return Err(TableError::BadMagic(magic));
    }
    let mut pos = 0;
    let metaindex = BlockHandle::decode(footer, &mut pos)?;
    let index = BlockHandle::decode(footer, &mut pos)?;
    if pos > FOOTER_LEN - 8 {
        return Err(TableError::Corrupt("footer handles overrun the magic number"));
    }

    block_entries(read_block(file, metaindex)?)?;
    let index_entries = block_entries(read_block(file, index)?)?;

    let mut entries: Vec<TableEntry> = Vec::new();
    for index_entry in index_entries {
        let mut pos = 0;
        let handle = BlockHandle::decode(&index_entry.value, &mut pos)?;
        for entry in block_entries(read_block(file, handle)?)? {
            if entries.last().is_some_and(|last| last.key >= entry.key) {
                return Err(TableError::Unsorted);
            }
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Returns the verified contents of the block at `handle`.
fn read_block(file: &[u8], handle: BlockHandle) -> Result<&[u8], TableError> {
    let out_of_range = TableError::OutOfRange {
        offset: handle.offset,
        size: handle.size,
    };
    let start = usize::try_from(handle.offset).map_err(|_| out_of_range.clone())?;
    let size = usize::try_from(handle.size).map_err(|_| out_of_range.clone())?;
    let end = start
        .checked_add(size)
        .and_then(|end| end.checked_add(BLOCK_TRAILER_LEN))
        .ok_or_else(|| out_of_range.clone())?;
    if end > file.len() - FOOTER_LEN {
        return Err(out_of_range);
    }
    let contents = &file[start .. start + size];
    let trailer = &file[start + size .. end];
    let compression = trailer[0];
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&trailer[1 ..]);
    let expected = crc32c::unmask(u32::from_le_bytes(stored));
    let actual = crc32c::extend(crc32c::value(contents), &[compression]);
    if expected != actual {
        return Err(TableError::Checksum {
            offset: handle.offset,
        });
    }
    if compression != NO_COMPRESSION {
        return Err(TableError::Compression(compression));
    }
    Ok(contents)
}

/// Decodes the prefix-compressed entries of one block.
fn block_entries(block: &[u8]) -> Result<Vec<TableEntry>, TableError> {
    if block.len() < 4 {
        return Err(TableError::Corrupt("block shorter than its restart count"));
    }
    let num_restarts = u32_at(block, block.len() - 4);
    let restart_bytes = usize::try_from(num_restarts)
        .ok()
        .and_then(|count| count.checked_add(1))
        .and_then(|count| count.checked_mul(4))
        .filter(|bytes| *bytes <= block.len())
        .ok_or(TableError::Corrupt("restart array exceeds block"))?;
    let data_end = block.len() - restart_bytes;
    for index in 0 .. restart_bytes / 4 - 1 {
        let restart = u32_at(block, data_end + index * 4);
        if !usize::try_from(restart).is_ok_and(|restart| restart <= data_end) {
            return Err(TableError::Corrupt("restart point outside block data"));
        }
    }

    let data = &block[.. data_end];
    let mut entries: Vec<TableEntry> = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let shared = entry_len(data, &mut pos)?;
        let non_shared = entry_len(data, &mut pos)?;
        let value_len = entry_len(data, &mut pos)?;
        let prefix = match entries.last() {
            Some(previous) if shared <= previous.key.len() => &previous.key[.. shared],
            None if shared == 0 => &[][..],
            _ => return Err(TableError::Corrupt("shared key prefix exceeds previous key")),
        };
        let key_end = pos
            .checked_add(non_shared)
            .filter(|end| *end <= data.len())
            .ok_or(TableError::Corrupt("entry key exceeds block"))?;
        let value_end = key_end
            .checked_add(value_len)
            .filter(|end| *end <= data.len())
            .ok_or(TableError::Corrupt("entry value exceeds block"))?;
        let mut key = Vec::with_capacity(shared + non_shared);
        key.extend_from_slice(prefix);
        key.extend_from_slice(&data[pos .. key_end]);
        let value = data[key_end .. value_end].to_vec();
        pos = value_end;
        entries.push(TableEntry {
            key,
            value,
        });
    }
    Ok(entries)
}

/// Reads a varint length field of a block entry.
fn entry_len(data: &[u8], pos: &mut usize) -> Result<usize, TableError> {
    let value = read_varint(data, pos).map_err(|_| TableError::Corrupt("bad entry header"))?;
    usize::try_from(value).map_err(|_| TableError::Corrupt("entry length overflows"))
}

/// Reads a little-endian `u32` at `offset`.
fn u32_at(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset .. offset + 4]);
    u32::from_le_bytes(bytes)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::TableError;
    use super::read_table;

    #[test]
    fn short_file_is_rejected() {
        assert_eq!(read_table(&[0u8; 10]), Err(TableError::TooShort(10)));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        assert!(matches!(read_table(&[0u8; 48]), Err(TableError::BadMagic(0))));
    }
}
