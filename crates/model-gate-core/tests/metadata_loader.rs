// crates/model-gate-core/tests/metadata_loader.rs
// ============================================================================
// Module: Metadata Loader Tests
// Description: Integration tests for locating and parsing `metadata.yaml`.
// Purpose: Ensure loader failures are fatal and well-classified.
// Dependencies: model-gate-core, tempfile
// ============================================================================

//! ## Overview
//! Exercises the metadata loader against on-disk folders: missing files,
//! malformed YAML, non-mapping documents, size limits, and pass-through of
//! extra keys.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use model_gate_core::DEFAULT_MAX_METADATA_BYTES;
use model_gate_core::METADATA_FILE_NAME;
use model_gate_core::MetadataError;
use model_gate_core::folder_name;
use model_gate_core::load_metadata;
use serde_yaml::Value;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn folder_with(contents: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(METADATA_FILE_NAME), contents).unwrap();
    dir
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// Missing declarations are reported as `NotFound`.
#[test]
fn missing_metadata_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_metadata(dir.path(), DEFAULT_MAX_METADATA_BYTES).unwrap_err();
    assert!(matches!(err, MetadataError::NotFound { .. }), "unexpected error: {err:?}");
    assert!(err.to_string().contains("metadata.yaml not found"));
}

/// Malformed YAML fails with a parse error.
#[test]
fn malformed_yaml_is_parse_error() {
    let dir = folder_with("model_id: [unterminated\n");
    let err = load_metadata(dir.path(), DEFAULT_MAX_METADATA_BYTES).unwrap_err();
    assert!(matches!(err, MetadataError::Parse(_)), "unexpected error: {err:?}");
}

/// A top-level sequence is not a declaration.
#[test]
fn sequence_document_is_rejected() {
    let dir = folder_with("- model_id\n- git_hash\n");
    let err = load_metadata(dir.path(), DEFAULT_MAX_METADATA_BYTES).unwrap_err();
    assert!(matches!(err, MetadataError::NotMapping { found: "sequence" }));
}

/// Empty files never produce a document.
#[test]
fn empty_document_is_rejected() {
    let dir = folder_with("");
    assert!(load_metadata(dir.path(), DEFAULT_MAX_METADATA_BYTES).is_err());
}

/// A directory named `metadata.yaml` is an I/O failure, not a parse failure.
#[test]
fn directory_declaration_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join(METADATA_FILE_NAME)).unwrap();
    let err = load_metadata(dir.path(), DEFAULT_MAX_METADATA_BYTES).unwrap_err();
    assert!(matches!(err, MetadataError::Io { .. }), "unexpected error: {err:?}");
}

/// Oversized declarations are refused before parsing.
#[test]
fn oversized_declaration_is_rejected() {
    let dir = folder_with("model_id: model_a\ngit_hash: abc123\n");
    let err = load_metadata(dir.path(), 8).unwrap_err();
    match err {
        MetadataError::TooLarge {
            limit, ..
        } => assert_eq!(limit, 8),
        other => panic!("unexpected error: {other:?}"),
    }
}

/// Extra keys are kept and typed values are preserved.
#[test]
fn extra_fields_pass_through() {
    let dir = folder_with(
        "model_id: model_a\nmin_app_version: 1.0\nowner: ml-platform\nmetrics:\n  auc: 0.91\n",
    );
    let document = load_metadata(dir.path(), DEFAULT_MAX_METADATA_BYTES).unwrap();
    assert_eq!(document.len(), 4);
    assert_eq!(document.text("model_id"), Some("model_a"));
    assert_eq!(document.text("owner"), Some("ml-platform"));
    assert!(document.get("min_app_version").is_some());
    assert_eq!(document.text("min_app_version"), None);
    assert!(document.path().ends_with(METADATA_FILE_NAME));
}

/// Unquoted top-level values are typed with YAML 1.1 rules on load.
#[test]
fn plain_scalars_use_yaml_11_types() {
    let dir = folder_with(
        "git_hash: 1e10\nenabled: on\nmode: 0o17\nmask: 017\nseconds: 1:30\nlabel: \"off\"\nliteral: |\n  yes\n",
    );
    let document = load_metadata(dir.path(), DEFAULT_MAX_METADATA_BYTES).unwrap();
    assert_eq!(document.text("git_hash"), Some("1e10"));
    assert_eq!(document.get("enabled"), Some(&Value::Bool(true)));
    assert_eq!(document.text("mode"), Some("0o17"));
    assert_eq!(document.get("mask"), Some(&Value::from(15)));
    assert_eq!(document.get("seconds"), Some(&Value::from(90)));
    assert_eq!(document.text("label"), Some("off"));
    assert_eq!(document.text("literal"), Some("yes\n"));
}

/// Impossible dates fail the load.
#[test]
fn invalid_date_is_parse_error() {
    let dir = folder_with("model_id: model_a\nreleased: 2023-02-30\n");
    let err = load_metadata(dir.path(), DEFAULT_MAX_METADATA_BYTES).unwrap_err();
    assert!(matches!(err, MetadataError::Parse(_)), "unexpected error: {err:?}");
}

/// Folder names come from the final path component.
#[test]
fn folder_name_uses_last_component() {
    assert_eq!(folder_name(Path::new("/models/stable/model_a")), "model_a");
    assert_eq!(folder_name(Path::new("/")), "");
}
