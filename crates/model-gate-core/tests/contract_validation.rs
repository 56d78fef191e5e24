// crates/model-gate-core/tests/contract_validation.rs
// ============================================================================
// Module: Contract Validation Tests
// Description: Integration tests for Tier-1 contract evaluation.
// Purpose: Ensure all rules run, violations keep their order, and domains hold.
// Dependencies: model-gate-core, serde_yaml, proptest
// ============================================================================

//! ## Overview
//! Validates the Tier-1 contract against in-memory declarations. Covers the
//! happy path, type mismatches, identifier/folder binding, domain checks, and
//! the guarantee that every rule is evaluated in a single pass.

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

use std::path::PathBuf;

use model_gate_core::ContractViolation;
use model_gate_core::FieldKind;
use model_gate_core::Framework;
use model_gate_core::Hardware;
use model_gate_core::MetadataDocument;
use model_gate_core::parse_metadata;
use model_gate_core::validate_contract;
use proptest::prelude::*;
use serde_yaml::Mapping;
use serde_yaml::Value;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const VALID: &str = "model_id: model_a\ngit_hash: abc123\nframework: onnx\nmin_app_version: \
                     \"1.0\"\nrequired_hardware: cpu\n";

fn document(yaml: &str) -> MetadataDocument {
    parse_metadata(PathBuf::from("metadata.yaml"), yaml.as_bytes()).unwrap()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// A complete, well-typed declaration passes.
#[test]
fn valid_declaration_passes() {
    let outcome = validate_contract(&document(VALID), "model_a");
    assert!(outcome.passed(), "violations: {:?}", outcome.violations());
    assert_eq!(outcome.framework(), Some(Framework::Onnx));
    assert_eq!(outcome.hardware(), Some(Hardware::Cpu));
}

/// Identifier mismatches are reported with both names.
#[test]
fn model_id_must_match_folder() {
    let yaml = VALID.replace("model_id: model_a", "model_id: model_b");
    let outcome = validate_contract(&document(&yaml), "model_a");
    assert_eq!(
        outcome.violations(),
        &[ContractViolation::ModelIdMismatch {
            declared: Some("model_b".to_string()),
            folder: "model_a".to_string(),
        }]
    );
    let message = outcome.violations()[0].to_string();
    assert!(message.contains("model_b") && message.contains("model_a"));
}

/// Identifier comparison is case-sensitive.
#[test]
fn model_id_comparison_is_exact() {
    let yaml = VALID.replace("model_id: model_a", "model_id: Model_A");
    let outcome = validate_contract(&document(&yaml), "model_a");
    assert!(!outcome.passed());
}

/// Unquoted versions parse as numbers and violate the text type.
#[test]
fn numeric_version_is_wrong_type() {
    let yaml = VALID.replace("\"1.0\"", "1.0");
    let outcome = validate_contract(&document(&yaml), "model_a");
    assert_eq!(
        outcome.violations(),
        &[ContractViolation::WrongType {
            field: "min_app_version",
            expected: FieldKind::Text,
            found: "number",
        }]
    );
}

/// Unquoted exponent forms without a dot stay text, as YAML 1.1 types them.
#[test]
fn exponent_like_git_hash_is_text() {
    let yaml = VALID.replace("git_hash: abc123", "git_hash: 1e10");
    let doc = document(&yaml);
    assert_eq!(doc.text("git_hash"), Some("1e10"));
    assert!(validate_contract(&doc, "model_a").passed());
}

/// Unquoted `yes` is a boolean and violates the text type.
#[test]
fn yes_git_hash_is_a_boolean() {
    let yaml = VALID.replace("git_hash: abc123", "git_hash: yes");
    let outcome = validate_contract(&document(&yaml), "model_a");
    assert_eq!(
        outcome.violations(),
        &[ContractViolation::WrongType {
            field: "git_hash",
            expected: FieldKind::Text,
            found: "boolean",
        }]
    );
}

/// Quoted and explicitly tagged scalars keep their string type.
#[test]
fn quoted_and_tagged_scalars_stay_text() {
    for replacement in ["git_hash: \"yes\"", "git_hash: 'on'", "git_hash: !!str no", "git_hash: &h !!str off"] {
        let yaml = VALID.replace("git_hash: abc123", replacement);
        let doc = document(&yaml);
        assert!(doc.text("git_hash").is_some(), "{replacement}");
        assert!(validate_contract(&doc, "model_a").passed(), "{replacement}");
    }
}

/// Unquoted dates are timestamps, not text.
#[test]
fn date_version_is_a_timestamp() {
    let yaml = VALID.replace("min_app_version: \"1.0\"", "min_app_version: 2024-05-01");
    let outcome = validate_contract(&document(&yaml), "model_a");
    assert_eq!(
        outcome.violations(),
        &[ContractViolation::WrongType {
            field: "min_app_version",
            expected: FieldKind::Text,
            found: "timestamp",
        }]
    );
}

/// Nested values keep the parser's typing.
#[test]
fn nested_values_are_not_retyped() {
    let yaml = format!("{VALID}extra:\n  flag: yes\n");
    let doc = document(&yaml);
    let nested = doc.get("extra").and_then(|extra| extra.get("flag")).cloned();
    assert_eq!(nested, Some(Value::String("yes".to_string())));
}

/// Unknown frameworks fail the domain check.
#[test]
fn unknown_framework_is_rejected() {
    let yaml = VALID.replace("framework: onnx", "framework: jax");
    let outcome = validate_contract(&document(&yaml), "model_a");
    assert_eq!(
        outcome.violations(),
        &[ContractViolation::FrameworkOutOfDomain {
            declared: Some("jax".to_string()),
        }]
    );
    assert_eq!(outcome.framework(), None);
}

/// Unknown hardware fails the domain check.
#[test]
fn unknown_hardware_is_rejected() {
    let yaml = VALID.replace("required_hardware: cpu", "required_hardware: tpu");
    let outcome = validate_contract(&document(&yaml), "model_a");
    assert_eq!(
        outcome.violations(),
        &[ContractViolation::HardwareOutOfDomain {
            declared: Some("tpu".to_string()),
        }]
    );
}

/// An empty mapping reports every rule, in evaluation order.
#[test]
fn empty_declaration_reports_everything_in_order() {
    let empty = MetadataDocument::from_mapping(PathBuf::from("metadata.yaml"), Mapping::new());
    let outcome = validate_contract(&empty, "model_a");
    let violations = outcome.violations();
    assert_eq!(violations.len(), 8);
    let missing: Vec<&str> = violations[.. 5]
        .iter()
        .map(|violation| match violation {
            ContractViolation::MissingField {
                field,
            } => *field,
            other => panic!("unexpected violation: {other:?}"),
        })
        .collect();
    assert_eq!(
        missing,
        ["model_id", "git_hash", "framework", "min_app_version", "required_hardware"]
    );
    assert!(matches!(violations[5], ContractViolation::ModelIdMismatch { declared: None, .. }));
    assert!(matches!(violations[6], ContractViolation::FrameworkOutOfDomain { declared: None }));
    assert!(matches!(violations[7], ContractViolation::HardwareOutOfDomain { declared: None }));
}

/// A non-string framework is both a type and a domain violation.
#[test]
fn non_string_framework_reports_type_and_domain() {
    let yaml = VALID.replace("framework: onnx", "framework: 3");
    let outcome = validate_contract(&document(&yaml), "model_a");
    assert_eq!(outcome.violations().len(), 2);
    assert!(matches!(
        outcome.violations()[0],
        ContractViolation::WrongType {
            field: "framework",
            ..
        }
    ));
    assert!(matches!(outcome.violations()[1], ContractViolation::FrameworkOutOfDomain { .. }));
}

/// Validation is a pure function of its inputs.
#[test]
fn validation_is_idempotent() {
    let yaml = VALID.replace("framework: onnx", "framework: keras");
    let doc = document(&yaml);
    assert_eq!(validate_contract(&doc, "model_b"), validate_contract(&doc, "model_b"));
}

proptest! {
    /// Any string outside the domain is rejected.
    #[test]
    fn arbitrary_framework_labels_are_checked(label in "[a-zA-Z]{1,12}") {
        let mut fields: Mapping = serde_yaml::from_str(VALID).unwrap();
        fields.insert(Value::from("framework"), Value::from(label.clone()));
        let doc = MetadataDocument::from_mapping(PathBuf::from("metadata.yaml"), fields);
        let outcome = validate_contract(&doc, "model_a");
        prop_assert_eq!(outcome.passed(), Framework::parse(&label).is_some());
    }
}
