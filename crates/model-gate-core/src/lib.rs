// crates/model-gate-core/src/lib.rs
// ============================================================================
// Module: Model Gate Core Library
// Description: Public API surface for metadata loading and contract checks.
// Purpose: Expose the Tier-1 contract types, loader, and validator.
// Dependencies: crate::{contract, metadata, resolve, types}
// ============================================================================

//! ## Overview
//! Model Gate core decides whether a model folder's `metadata.yaml` satisfies
//! the Tier-1 promotion contract. It loads the declaration once, evaluates
//! every contract rule, and reports the full violation list in evaluation
//! order. Artifact integrity checks live in `model-gate-probes`.
//!
//! Invariants:
//! - Loading either yields a complete mapping or fails; there is no partial
//!   metadata state.
//! - Validation never short-circuits; all rules are evaluated per run.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod contract;
pub mod metadata;
mod resolve;
pub mod types;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use contract::ContractViolation;
pub use contract::FieldKind;
pub use contract::FieldRule;
pub use contract::TIER_ONE_FIELDS;
pub use contract::ValidationOutcome;
pub use contract::validate_contract;
pub use metadata::DEFAULT_MAX_METADATA_BYTES;
pub use metadata::METADATA_FILE_NAME;
pub use metadata::MetadataDocument;
pub use metadata::MetadataError;
pub use metadata::folder_name;
pub use metadata::load_metadata;
pub use metadata::parse_metadata;
pub use types::Framework;
pub use types::Hardware;
