// crates/model-gate-probes/src/pytorch.rs
// ============================================================================
// Module: PyTorch Probe
// Description: Weights-only load of `.pt`/`.pth` checkpoints.
// Purpose: Detect truncated archives, bad checksums, and unsafe pickles.
// Dependencies: zip
// ============================================================================

//! ## Overview
//! Two container layouts are accepted:
//! - The zip archive written by current `torch.save`: every record is read
//!   to its end (verifying the stored CRC-32), the `data.pkl` program is run
//!   through the restricted unpickler, and every storage it references must
//!   be present at full size under `data/`.
//! - The legacy sequential stream: five pickles (magic number, protocol
//!   version, system info, payload, storage keys) followed by each storage's
//!   element count and raw bytes.
//!
//! TorchScript archives are rejected because they cannot be loaded
//! weights-only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;

use zip::ZipArchive;

use crate::pickle;
use crate::pickle::PickleError;
use crate::pickle::PickleLoad;
use crate::pickle::PickleValue;
use crate::pickle::StorageRef;
use crate::smoke::ArtifactError;
use crate::smoke::ArtifactSummary;
use crate::smoke::CheckpointFormat;
use crate::smoke::SmokeLimits;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Local file header signature that opens a zip archive.
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
/// Legacy magic number `0x1950a86a20f9469cfc6c`, little-endian.
pub const LEGACY_MAGIC: [u8; 10] = [0x6c, 0xfc, 0x9c, 0x46, 0xf9, 0x20, 0x6a, 0xa8, 0x50, 0x19];
/// Legacy serialization protocol version.
pub const LEGACY_PROTOCOL_VERSION: i64 = 1001;
/// Upper bound for small text records (`version`, `byteorder`).
const MAX_TEXT_RECORD_BYTES: u64 = 64;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Loads one checkpoint weights-only and verifies its storages.
///
/// # Errors
///
/// Returns [`ArtifactError`] when the checkpoint is truncated, fails a
/// checksum, references forbidden globals, or lacks storage bytes.
pub fn check_checkpoint(path: &Path, limits: &SmokeLimits) -> Result<ArtifactSummary, ArtifactError> {
    let mut file = File::open(path).map_err(io_error)?;
    let mut head = Vec::with_capacity(ZIP_MAGIC.len());
    (&mut file).take(4).read_to_end(&mut head).map_err(io_error)?;
    file.seek(SeekFrom::Start(0)).map_err(io_error)?;
    if head == ZIP_MAGIC {
        check_zip(file, limits)
    } else {
        check_legacy(file, limits)
    }
}

// ============================================================================
// SECTION: Zip Archives
// ============================================================================

/// Checks a zip-format checkpoint.
fn check_zip(file: File, limits: &SmokeLimits) -> Result<ArtifactSummary, ArtifactError> {
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(archive_error)?;

    let mut records: BTreeMap<String, u64> = BTreeMap::new();
    for index in 0 .. archive.len() {
        let mut entry = archive.by_index(index).map_err(archive_error)?;
        let name = entry.name().to_string();
        let size = io::copy(&mut entry, &mut io::sink())
            .map_err(|err| ArtifactError::Archive(format!("record {name}: {err}")))?;
        records.insert(name, size);
    }

    let prefix = archive_prefix(&records)?;
    if records.contains_key(&format!("{prefix}/constants.pkl")) {
        return Err(ArtifactError::Invalid(
            "TorchScript archives cannot be loaded weights-only".to_string(),
        ));
    }

    let version_record = [format!("{prefix}/.data/version"), format!("{prefix}/version")]
        .into_iter()
        .find(|name| records.contains_key(name))
        .ok_or_else(|| ArtifactError::Invalid(format!("archive has no {prefix}/version record")))?;
    let version = read_text_record(&mut archive, &version_record)?;
    if version.parse::<u64>().is_err() {
        return Err(ArtifactError::Invalid(format!("archive version record is not a number: {version}")));
    }

    let byteorder_record = format!("{prefix}/byteorder");
    if records.contains_key(&byteorder_record) {
        let byteorder = read_text_record(&mut archive, &byteorder_record)?;
        if byteorder != "little" && byteorder != "big" {
            return Err(ArtifactError::Invalid(format!("unknown byteorder: {byteorder}")));
        }
    }

    let data_record = format!("{prefix}/data.pkl");
    let load = {
        let mut entry = archive.by_name(&data_record).map_err(archive_error)?;
        pickle::load(&mut entry, limits.max_pickle_bytes)?
    };

    let mut storage_bytes: u64 = 0;
    for (key, storage) in &load.storages {
        let record = format!("{prefix}/data/{key}");
        let available = records
            .get(&record)
            .copied()
            .ok_or_else(|| ArtifactError::Invalid(format!("missing storage record {record}")))?;
        let needed = storage_len(storage)?;
        if available < needed {
            return Err(ArtifactError::Invalid(format!(
                "storage record {record} holds {available} bytes but {} of {} needs {needed}",
                storage.numel, storage.storage_type
            )));
        }
        storage_bytes = storage_bytes.saturating_add(needed);
    }
    Ok(summary(CheckpointFormat::Zip, &load, storage_bytes))
}

/// Returns the record prefix that holds `data.pkl`.
fn archive_prefix(records: &BTreeMap<String, u64>) -> Result<String, ArtifactError> {
    let mut prefixes = records
        .keys()
        .filter_map(|name| name.strip_suffix("/data.pkl"))
        .filter(|prefix| !prefix.is_empty() && !prefix.contains('/'));
    let Some(prefix) = prefixes.next() else {
        return Err(ArtifactError::Invalid("archive has no data.pkl record".to_string()));
    };
    if prefixes.next().is_some() {
        return Err(ArtifactError::Invalid("archive has more than one data.pkl record".to_string()));
    }
    Ok(prefix.to_string())
}

/// Reads a short text record and trims surrounding whitespace.
fn read_text_record<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String, ArtifactError> {
    let entry = archive.by_name(name).map_err(archive_error)?;
    let mut bytes = Vec::new();
    entry
        .take(MAX_TEXT_RECORD_BYTES)
        .read_to_end(&mut bytes)
        .map_err(|err| ArtifactError::Archive(format!("record {name}: {err}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| ArtifactError::Invalid(format!("record {name} is not valid UTF-8")))?;
    Ok(text.trim().to_string())
}

// ============================================================================
// SECTION: Legacy Streams
// ============================================================================

/// Checks a legacy sequential checkpoint.
fn check_legacy(file: File, limits: &SmokeLimits) -> Result<ArtifactSummary, ArtifactError> {
    let mut reader = BufReader::new(file);
    let mut budget = PickleBudget::new(limits.max_pickle_bytes);

    let magic = budget.load(&mut reader)?.value;
    if !matches!(&magic, PickleValue::BigInt(bytes) if bytes.as_ref() == LEGACY_MAGIC) {
        return Err(ArtifactError::Invalid("invalid magic number; corrupt file?".to_string()));
    }
    let protocol = budget.load(&mut reader)?.value;
    if protocol.as_int() != Some(LEGACY_PROTOCOL_VERSION) {
        return Err(ArtifactError::Invalid(format!(
            "invalid protocol version: expected {LEGACY_PROTOCOL_VERSION}, found {}",
            protocol.kind()
        )));
    }
    let sys_info = budget.load(&mut reader)?.value;
    if !matches!(sys_info, PickleValue::Dict(_)) {
        return Err(ArtifactError::Invalid(format!(
            "system info must be a dict, found {}",
            sys_info.kind()
        )));
    }
    let payload = budget.load(&mut reader)?;
    let keys = match budget.load(&mut reader)?.value {
        PickleValue::List(keys) => keys,
        other => {
            return Err(ArtifactError::Invalid(format!(
                "storage key list must be a list, found {}",
                other.kind()
            )));
        }
    };

    let mut storage_bytes: u64 = 0;
    for key in keys.iter() {
        let key = key
            .as_str()
            .ok_or_else(|| ArtifactError::Invalid("storage keys must be strings".to_string()))?;
        let storage = payload.storages.get(key).ok_or_else(|| {
            ArtifactError::Invalid(format!("storage '{key}' is not referenced by the checkpoint"))
        })?;
        let mut count = [0u8; 8];
        reader.read_exact(&mut count).map_err(|err| truncated(key, &err))?;
        let count = i64::from_le_bytes(count);
        if u64::try_from(count).ok() != Some(storage.numel) {
            return Err(ArtifactError::Invalid(format!(
                "storage '{key}' declares {count} elements, expected {}",
                storage.numel
            )));
        }
        let needed = storage_len(storage)?;
        let copied = io::copy(&mut (&mut reader).take(needed), &mut io::sink()).map_err(io_error)?;
        if copied != needed {
            return Err(ArtifactError::Invalid(format!(
                "storage '{key}' is truncated: {copied} of {needed} bytes present"
            )));
        }
        storage_bytes = storage_bytes.saturating_add(needed);
    }
    Ok(summary(CheckpointFormat::Legacy, &payload, storage_bytes))
}

/// Byte budget shared by the consecutive pickles of a legacy checkpoint.
struct PickleBudget {
    /// Configured limit for the whole header.
    limit: u64,
    /// Bytes not yet consumed.
    remaining: u64,
}

impl PickleBudget {
    /// Creates a budget of `limit` bytes.
    const fn new(limit: u64) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    /// Loads the next pickle and charges its length to the budget.
    fn load<R: Read>(&mut self, reader: &mut R) -> Result<PickleLoad, ArtifactError> {
        let load = pickle::load(reader, self.remaining).map_err(|err| match err {
            PickleError::TooLarge {
                ..
            } => PickleError::TooLarge {
                limit: self.limit,
            },
            other => other,
        })?;
        self.remaining = self.remaining.saturating_sub(load.consumed);
        Ok(load)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns a storage's byte length.
fn storage_len(storage: &StorageRef) -> Result<u64, ArtifactError> {
    storage
        .byte_len()
        .ok_or_else(|| ArtifactError::Invalid(format!("storage '{}' size overflows", storage.key)))
}

/// Builds the artifact summary.
fn summary(format: CheckpointFormat, load: &PickleLoad, storage_bytes: u64) -> ArtifactSummary {
    ArtifactSummary::PyTorch {
        format,
        storages: load.storages.len(),
        storage_bytes,
    }
}

/// Maps a zip failure.
fn archive_error(err: zip::result::ZipError) -> ArtifactError {
    ArtifactError::Archive(err.to_string())
}

/// Maps an I/O failure.
fn io_error(err: io::Error) -> ArtifactError {
    ArtifactError::Io(err.to_string())
}

/// Maps a failed storage header read.
fn truncated(key: &str, err: &io::Error) -> ArtifactError {
    if err.kind() == ErrorKind::UnexpectedEof {
        ArtifactError::Invalid(format!("storage '{key}' is truncated"))
    } else {
        ArtifactError::Io(err.to_string())
    }
}
