// crates/model-gate-probes/src/smoke.rs
// ============================================================================
// Module: Smoke Test Dispatch
// Description: Framework dispatch, artifact enumeration, and verdict types.
// Purpose: Run the right probe over every weight artifact in a model folder.
// Dependencies: model-gate-core, thiserror
// ============================================================================

//! ## Overview
//! [`run_smoke_test`] maps the declared framework string to a probe,
//! enumerates that framework's artifacts in the model folder (non-recursive,
//! sorted by file name), and stops at the first artifact that fails. A
//! framework string the gate does not know yields
//! [`SmokeVerdict::Unsupported`], which callers treat as a pass with a
//! warning.
//!
//! Per-artifact progress is reported through [`SmokeObserver`] so the library
//! never writes to stdout itself.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use model_gate_core::Framework;
use thiserror::Error;

use crate::onnx;
use crate::pickle::PickleError;
use crate::pytorch;
use crate::table::TableError;
use crate::tensorflow;
use crate::wire::WireError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Directory holding a TensorFlow SavedModel.
pub const SAVED_MODEL_DIR: &str = "saved_model";
/// Default cap on protobuf artifact size (the protobuf format limit).
pub const DEFAULT_MAX_PROTOBUF_BYTES: u64 = 2 * 1024 * 1024 * 1024;
/// Default cap on a pickle stream held in memory.
pub const DEFAULT_MAX_PICKLE_BYTES: u64 = 256 * 1024 * 1024;

// ============================================================================
// SECTION: Limits and Observer
// ============================================================================

/// Reader limits applied by the probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmokeLimits {
    /// Maximum size of a protobuf artifact read into memory.
    pub max_protobuf_bytes: u64,
    /// Maximum size of a pickle stream.
    pub max_pickle_bytes: u64,
}

impl Default for SmokeLimits {
    fn default() -> Self {
        Self {
            max_protobuf_bytes: DEFAULT_MAX_PROTOBUF_BYTES,
            max_pickle_bytes: DEFAULT_MAX_PICKLE_BYTES,
        }
    }
}

/// Receives smoke-test progress events.
pub trait SmokeObserver {
    /// Called before an artifact is checked.
    fn artifact_started(&mut self, framework: Framework, path: &Path);
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SmokeObserver for NoopObserver {
    fn artifact_started(&mut self, _framework: Framework, _path: &Path) {}
}

// ============================================================================
// SECTION: Verdicts
// ============================================================================

/// Outcome of a smoke test that did not find corruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmokeVerdict {
    /// Every artifact parsed.
    Passed(SmokeReport),
    /// No probe exists for the framework; the gate passes with a warning.
    Unsupported {
        /// Declared framework string.
        framework: String,
    },
}

/// Artifacts checked during a passing smoke test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeReport {
    /// Framework probed.
    pub framework: Framework,
    /// Checked artifacts in check order.
    pub artifacts: Vec<ArtifactReport>,
}

/// One checked artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReport {
    /// Artifact path.
    pub path: PathBuf,
    /// Facts gathered while parsing.
    pub summary: ArtifactSummary,
}

/// Container layout of a PyTorch checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// Zip archive written by current `torch.save`.
    Zip,
    /// Sequential pickle stream written by old `torch.save`.
    Legacy,
}

/// Facts gathered from a parsed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSummary {
    /// PyTorch checkpoint.
    PyTorch {
        /// Container layout.
        format: CheckpointFormat,
        /// Number of distinct storages.
        storages: usize,
        /// Total bytes of tensor storage.
        storage_bytes: u64,
    },
    /// TensorFlow SavedModel directory.
    TensorFlow {
        /// Number of meta graphs.
        meta_graphs: usize,
        /// Nodes across all meta graphs.
        nodes: usize,
        /// Variables verified in the tensor bundle.
        variables: usize,
    },
    /// ONNX model.
    Onnx {
        /// Declared IR version.
        ir_version: i64,
        /// Nodes in the main graph.
        nodes: usize,
        /// Initializers in the main graph.
        initializers: usize,
    },
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Smoke test failures; every variant means the artifacts are unusable.
#[derive(Debug, Error)]
pub enum SmokeError {
    /// No artifact of the expected kind exists.
    #[error("no {framework} model files ({patterns}) found")]
    NoArtifacts {
        /// Framework probed.
        framework: Framework,
        /// Accepted file patterns.
        patterns: &'static str,
    },
    /// The `saved_model/` directory is absent.
    #[error("no saved_model directory found in {}", .folder.display())]
    MissingSavedModel {
        /// Model folder.
        folder: PathBuf,
    },
    /// An artifact failed to parse.
    #[error("{}: {error}", .path.display())]
    Corrupt {
        /// Failing artifact.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        error: ArtifactError,
    },
    /// The model folder could not be listed.
    #[error("failed to list {}: {error}", .folder.display())]
    Io {
        /// Model folder.
        folder: PathBuf,
        /// Underlying I/O error.
        error: String,
    },
}

/// Reasons an individual artifact failed.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Protobuf framing is damaged.
    #[error("protobuf decode failed: {0}")]
    Wire(#[from] WireError),
    /// The checkpoint pickle failed to load.
    #[error("{0}")]
    Pickle(#[from] PickleError),
    /// The tensor bundle index is damaged.
    #[error("tensor bundle index: {0}")]
    Table(#[from] TableError),
    /// The checkpoint archive is damaged.
    #[error("archive error: {0}")]
    Archive(String),
    /// Reading the artifact failed.
    #[error("read failed: {0}")]
    Io(String),
    /// The artifact parsed but violates a structural rule.
    #[error("{0}")]
    Invalid(String),
    /// The artifact exceeds a configured reader limit.
    #[error("file is {size} bytes, exceeding the {limit}-byte limit")]
    TooLarge {
        /// Actual size.
        size: u64,
        /// Configured limit.
        limit: u64,
    },
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Runs the smoke test for `framework` over the artifacts in `folder`.
///
/// # Errors
///
/// Returns [`SmokeError`] when artifacts are missing, unreadable, or corrupt.
pub fn run_smoke_test(
    folder: &Path,
    framework: &str,
    limits: &SmokeLimits,
    observer: &mut dyn SmokeObserver,
) -> Result<SmokeVerdict, SmokeError> {
    let Some(parsed) = Framework::parse(framework) else {
        return Ok(SmokeVerdict::Unsupported {
            framework: framework.to_string(),
        });
    };
    let artifacts = match parsed {
        Framework::PyTorch => {
            check_files(folder, parsed, &PYTORCH_FILES, limits, observer, pytorch::check_checkpoint)?
        }
        Framework::Onnx => check_files(folder, parsed, &ONNX_FILES, limits, observer, onnx::check_model)?,
        Framework::TensorFlow => {
            let dir = folder.join(SAVED_MODEL_DIR);
            if !dir.is_dir() {
                return Err(SmokeError::MissingSavedModel {
                    folder: folder.to_path_buf(),
                });
            }
            observer.artifact_started(parsed, &dir);
            let summary = tensorflow::check_saved_model(&dir, limits).map_err(|error| SmokeError::Corrupt {
                path: dir.clone(),
                error,
            })?;
            vec![ArtifactReport {
                path: dir,
                summary,
            }]
        }
    };
    Ok(SmokeVerdict::Passed(SmokeReport {
        framework: parsed,
        artifacts,
    }))
}

/// Probe signature shared by file-based frameworks.
type FileProbe = fn(&Path, &SmokeLimits) -> Result<ArtifactSummary, ArtifactError>;

/// File name patterns a file-based framework accepts.
struct FileKind {
    /// Accepted extensions, without the dot.
    extensions: &'static [&'static str],
    /// Human-readable pattern list.
    patterns: &'static str,
}

/// PyTorch checkpoint files.
const PYTORCH_FILES: FileKind = FileKind {
    extensions: &["pt", "pth"],
    patterns: "*.pt/*.pth",
};

/// ONNX model files.
const ONNX_FILES: FileKind = FileKind {
    extensions: &["onnx"],
    patterns: "*.onnx",
};

/// Checks every matching file, stopping at the first failure.
fn check_files(
    folder: &Path,
    framework: Framework,
    kind: &FileKind,
    limits: &SmokeLimits,
    observer: &mut dyn SmokeObserver,
    probe: FileProbe,
) -> Result<Vec<ArtifactReport>, SmokeError> {
    let files = list_artifacts(folder, kind.extensions)?;
    if files.is_empty() {
        return Err(SmokeError::NoArtifacts {
            framework,
            patterns: kind.patterns,
        });
    }
    let mut reports = Vec::with_capacity(files.len());
    for path in files {
        observer.artifact_started(framework, &path);
        let summary = probe(&path, limits).map_err(|error| SmokeError::Corrupt {
            path: path.clone(),
            error,
        })?;
        reports.push(ArtifactReport {
            path,
            summary,
        });
    }
    Ok(reports)
}

/// Lists entries directly inside `folder` whose names end in one of
/// `extensions`, sorted by file name.
///
/// # Errors
///
/// Returns [`SmokeError::Io`] when the folder cannot be listed.
pub fn list_artifacts(folder: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, SmokeError> {
    let io_error = |err: std::io::Error| SmokeError::Io {
        folder: folder.to_path_buf(),
        error: err.to_string(),
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(folder).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let matches = extensions.iter().any(|extension| {
            name.strip_suffix(extension).is_some_and(|stem| stem.ends_with('.'))
        });
        if matches {
            files.push(entry.path());
        }
    }
    files.sort_by(|left, right| left.file_name().cmp(&right.file_name()));
    Ok(files)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads a whole file, refusing files larger than `limit` bytes.
pub(crate) fn read_bounded(path: &Path, limit: u64) -> Result<Vec<u8>, ArtifactError> {
    let file = File::open(path).map_err(|err| ArtifactError::Io(err.to_string()))?;
    let size = file.metadata().map_err(|err| ArtifactError::Io(err.to_string()))?.len();
    if size > limit {
        return Err(ArtifactError::TooLarge {
            size,
            limit,
        });
    }
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| ArtifactError::Io(err.to_string()))?;
    let read = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    if read > limit {
        return Err(ArtifactError::TooLarge {
            size: read,
            limit,
        });
    }
    Ok(bytes)
}
