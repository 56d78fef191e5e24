// crates/model-gate-probes/src/lib.rs
// ============================================================================
// Module: Model Gate Probes
// Description: Artifact smoke tests for PyTorch, TensorFlow, and ONNX weights.
// Purpose: Prove weight artifacts parse end to end without running inference.
// Dependencies: model-gate-core, thiserror, zip
// ============================================================================

//! ## Overview
//! Model Gate probes fully parse the weight artifacts of a model folder using
//! native readers for each container format: a restricted pickle machine and
//! zip reader for PyTorch checkpoints, a protobuf wire reader for ONNX models
//! and SavedModel graphs, and a sorted-table reader with CRC-32C verification
//! for TensorFlow variable bundles. Nothing here executes model code.
//!
//! ## Invariants
//! - Artifacts are checked in sorted file-name order; the first failure stops
//!   the run.
//! - Every read is bounded by [`SmokeLimits`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod crc32c;
pub mod onnx;
pub mod onnx_ops;
pub mod pickle;
pub mod pytorch;
pub mod smoke;
pub mod table;
pub mod tensorflow;
pub mod wire;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use smoke::ArtifactError;
pub use smoke::ArtifactReport;
pub use smoke::ArtifactSummary;
pub use smoke::CheckpointFormat;
pub use smoke::NoopObserver;
pub use smoke::SmokeError;
pub use smoke::SmokeLimits;
pub use smoke::SmokeObserver;
pub use smoke::SmokeReport;
pub use smoke::SmokeVerdict;
pub use smoke::list_artifacts;
pub use smoke::run_smoke_test;
