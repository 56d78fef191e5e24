// crates/model-gate-core/src/metadata.rs
// ============================================================================
// Module: Metadata Loader
// Description: Reads and parses `metadata.yaml` from a model folder.
// Purpose: Produce the field mapping consumed by the contract validator.
// Dependencies: serde, serde_yaml, thiserror
// ============================================================================

//! ## Overview
//! The loader locates `metadata.yaml` inside a model folder, reads it with a
//! hard size limit, and parses it as a YAML mapping. Unquoted top-level values
//! are then typed with YAML 1.1 rules, so `yes` is a boolean and `1e10` is
//! text. Any failure is fatal for the run: callers must not attempt validation
//! without a complete mapping. Additional keys beyond the Tier-1 set are
//! retained and ignored.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::io::ErrorKind;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use serde_yaml::Mapping;
use serde_yaml::Value;
use thiserror::Error;

use crate::resolve::TIMESTAMP_TAG;
use crate::resolve::resolve_plain_scalars;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// File name of the metadata declaration inside a model folder.
pub const METADATA_FILE_NAME: &str = "metadata.yaml";
/// Default maximum size of `metadata.yaml` in bytes.
pub const DEFAULT_MAX_METADATA_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Parsed metadata declaration.
///
/// # Invariants
/// - `fields` is the top-level YAML mapping; it is never mutated after load.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataDocument {
    /// Path the declaration was read from.
    path: PathBuf,
    /// Top-level field mapping.
    fields: Mapping,
}

impl MetadataDocument {
    /// Builds a document from an already-parsed mapping.
    #[must_use]
    pub const fn from_mapping(path: PathBuf, fields: Mapping) -> Self {
        Self {
            path,
            fields,
        }
    }

    /// Returns the path of the declaration file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the raw value for a field, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns the field as text when it is a YAML string.
    #[must_use]
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Returns the number of top-level fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true when the declaration has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Fatal metadata loading failures.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// `metadata.yaml` does not exist in the folder.
    #[error("metadata.yaml not found in {}", .folder.display())]
    NotFound {
        /// Folder that was searched.
        folder: PathBuf,
    },
    /// The declaration could not be read.
    #[error("unable to read {}: {error}", .path.display())]
    Io {
        /// Declaration path.
        path: PathBuf,
        /// Underlying I/O error message.
        error: String,
    },
    /// The declaration exceeds the configured size limit.
    #[error("{} is {size} bytes (limit {limit})", .path.display())]
    TooLarge {
        /// Declaration path.
        path: PathBuf,
        /// Observed size in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: usize,
    },
    /// The declaration is not well-formed YAML.
    #[error("invalid YAML in metadata.yaml: {0}")]
    Parse(String),
    /// The declaration parsed but its top level is not a mapping.
    #[error("metadata.yaml must contain a mapping of fields, found {found}")]
    NotMapping {
        /// Kind of YAML value found at the top level.
        found: &'static str,
    },
}

// ============================================================================
// SECTION: Loader
// ============================================================================

/// Loads `metadata.yaml` from `folder`.
///
/// # Errors
///
/// Returns [`MetadataError`] when the file is missing, unreadable, oversized,
/// not valid YAML, or not a top-level mapping.
pub fn load_metadata(folder: &Path, max_bytes: usize) -> Result<MetadataDocument, MetadataError> {
    let path = folder.join(METADATA_FILE_NAME);
    let bytes = read_declaration(folder, &path, max_bytes)?;
    parse_metadata(path, &bytes)
}

/// Parses declaration bytes read from `path`.
///
/// # Errors
///
/// Returns [`MetadataError::Parse`] for malformed YAML and
/// [`MetadataError::NotMapping`] when the top level is not a mapping.
pub fn parse_metadata(path: PathBuf, bytes: &[u8]) -> Result<MetadataDocument, MetadataError> {
    let value: Value =
        serde_yaml::from_slice(bytes).map_err(|err| MetadataError::Parse(err.to_string()))?;
    let Value::Mapping(mut fields) = value else {
        return Err(MetadataError::NotMapping {
            found: value_kind(&value),
        });
    };
    resolve_plain_scalars(bytes, &mut fields)?;
    Ok(MetadataDocument::from_mapping(path, fields))
}

/// Returns the base name of a model folder used for `model_id` matching.
///
/// Folders without a final component (for example `/`) yield an empty name.
#[must_use]
pub fn folder_name(folder: &Path) -> String {
    folder.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads the declaration while enforcing a maximum byte limit.
fn read_declaration(folder: &Path, path: &Path, max_bytes: usize) -> Result<Vec<u8>, MetadataError> {
    let io_error = |err: std::io::Error| MetadataError::Io {
        path: path.to_path_buf(),
        error: err.to_string(),
    };
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(MetadataError::NotFound {
                folder: folder.to_path_buf(),
            });
        }
        Err(err) => return Err(io_error(err)),
    };
    if !metadata.is_file() {
        return Err(MetadataError::Io {
            path: path.to_path_buf(),
            error: "not a regular file".to_string(),
        });
    }
    let too_large = |size: u64| MetadataError::TooLarge {
        path: path.to_path_buf(),
        size,
        limit: max_bytes,
    };
    let limit = u64::try_from(max_bytes).map_err(|_| too_large(metadata.len()))?;
    if metadata.len() > limit {
        return Err(too_large(metadata.len()));
    }

    let file = File::open(path).map_err(io_error)?;
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes).map_err(io_error)?;
    if bytes.len() > max_bytes {
        return Err(too_large(u64::try_from(bytes.len()).unwrap_or(u64::MAX)));
    }
    Ok(bytes)
}

/// Returns a short label for the kind of a YAML value.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(tagged) if tagged.tag == TIMESTAMP_TAG => "timestamp",
        Value::Tagged(_) => "tagged value",
    }
}
