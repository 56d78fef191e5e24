// crates/model-gate-core/src/contract.rs
// ============================================================================
// Module: Tier-1 Contract Validator
// Description: Checks metadata against required fields, types, and domains.
// Purpose: Decide whether a model folder may proceed to the smoke test.
// Dependencies: crate::{metadata, types}, serde_yaml, thiserror
// ============================================================================

//! ## Overview
//! The Tier-1 contract is a fixed, ordered table of required fields. The
//! validator evaluates every rule and collects violations in a stable order:
//! field presence and type, then `model_id` against the folder name, then the
//! `framework` and `required_hardware` domains. A run passes only when the
//! violation list is empty.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde_yaml::Value;
use thiserror::Error;

use crate::metadata::MetadataDocument;
use crate::metadata::value_kind;
use crate::types::Framework;
use crate::types::Hardware;

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Field carrying the model identifier.
pub const MODEL_ID_FIELD: &str = "model_id";
/// Field carrying the source revision.
pub const GIT_HASH_FIELD: &str = "git_hash";
/// Field carrying the declared framework.
pub const FRAMEWORK_FIELD: &str = "framework";
/// Field carrying the minimum supported app version.
pub const MIN_APP_VERSION_FIELD: &str = "min_app_version";
/// Field carrying the required hardware target.
pub const REQUIRED_HARDWARE_FIELD: &str = "required_hardware";

/// Semantic type expected for a contract field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// YAML string scalar.
    Text,
}

impl FieldKind {
    /// Returns a stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "string",
        }
    }

    /// Returns true when `value` has this kind.
    #[must_use]
    pub const fn matches(self, value: &Value) -> bool {
        match self {
            Self::Text => matches!(value, Value::String(_)),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single required field in the Tier-1 contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    /// Field name in `metadata.yaml`.
    pub name: &'static str,
    /// Expected semantic type.
    pub kind: FieldKind,
}

/// Tier-1 required fields in evaluation order.
pub const TIER_ONE_FIELDS: &[FieldRule] = &[
    FieldRule {
        name: MODEL_ID_FIELD,
        kind: FieldKind::Text,
    },
    FieldRule {
        name: GIT_HASH_FIELD,
        kind: FieldKind::Text,
    },
    FieldRule {
        name: FRAMEWORK_FIELD,
        kind: FieldKind::Text,
    },
    FieldRule {
        name: MIN_APP_VERSION_FIELD,
        kind: FieldKind::Text,
    },
    FieldRule {
        name: REQUIRED_HARDWARE_FIELD,
        kind: FieldKind::Text,
    },
];

// ============================================================================
// SECTION: Violations
// ============================================================================

/// A single Tier-1 contract violation.
///
/// # Invariants
/// - `declared` values are rendered for display; `None` means the field was
///   absent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    /// A required field is absent.
    #[error("Missing required field: '{field}'")]
    MissingField {
        /// Field name.
        field: &'static str,
    },
    /// A required field has the wrong YAML type.
    #[error("Field '{field}' must be of type {expected} (found {found})")]
    WrongType {
        /// Field name.
        field: &'static str,
        /// Expected kind.
        expected: FieldKind,
        /// Kind of the value found.
        found: &'static str,
    },
    /// `model_id` does not equal the folder base name.
    #[error(
        "'model_id' ({}) must match folder name ({folder})",
        .declared.as_deref().unwrap_or("<missing>")
    )]
    ModelIdMismatch {
        /// Rendered declared identifier.
        declared: Option<String>,
        /// Folder base name.
        folder: String,
    },
    /// `framework` is not a recognized label.
    #[error("'framework' must be one of: {}", framework_labels())]
    FrameworkOutOfDomain {
        /// Rendered declared framework.
        declared: Option<String>,
    },
    /// `required_hardware` is not a recognized label.
    #[error("'required_hardware' must be one of: {}", hardware_labels())]
    HardwareOutOfDomain {
        /// Rendered declared hardware.
        declared: Option<String>,
    },
}

/// Returns the recognized framework labels joined for display.
#[must_use]
pub fn framework_labels() -> String {
    Framework::ALL.map(Framework::as_str).join(", ")
}

/// Returns the recognized hardware labels joined for display.
#[must_use]
pub fn hardware_labels() -> String {
    Hardware::ALL.map(Hardware::as_str).join(", ")
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result of evaluating the Tier-1 contract.
///
/// # Invariants
/// - `violations` preserve evaluation order.
/// - `framework` and `hardware` are set whenever the declared labels are in
///   their domains, independent of other violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Collected violations.
    violations: Vec<ContractViolation>,
    /// Parsed framework when in domain.
    framework: Option<Framework>,
    /// Parsed hardware when in domain.
    hardware: Option<Hardware>,
}

impl ValidationOutcome {
    /// Returns true when no violations were found.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Returns the collected violations in evaluation order.
    #[must_use]
    pub fn violations(&self) -> &[ContractViolation] {
        &self.violations
    }

    /// Returns the declared framework when it is recognized.
    #[must_use]
    pub const fn framework(&self) -> Option<Framework> {
        self.framework
    }

    /// Returns the declared hardware when it is recognized.
    #[must_use]
    pub const fn hardware(&self) -> Option<Hardware> {
        self.hardware
    }
}

// ============================================================================
// SECTION: Validator
// ============================================================================

/// Evaluates every Tier-1 rule against `metadata` for a folder named
/// `folder_name`.
#[must_use]
pub fn validate_contract(metadata: &MetadataDocument, folder_name: &str) -> ValidationOutcome {
    let mut violations = Vec::new();

    for rule in TIER_ONE_FIELDS {
        match metadata.get(rule.name) {
            None => violations.push(ContractViolation::MissingField {
                field: rule.name,
            }),
            Some(value) if !rule.kind.matches(value) => {
                violations.push(ContractViolation::WrongType {
                    field: rule.name,
                    expected: rule.kind,
                    found: value_kind(value),
                });
            }
            Some(_) => {}
        }
    }

    if metadata.text(MODEL_ID_FIELD) != Some(folder_name) {
        violations.push(ContractViolation::ModelIdMismatch {
            declared: metadata.get(MODEL_ID_FIELD).map(render_value),
            folder: folder_name.to_string(),
        });
    }

    let framework = metadata.text(FRAMEWORK_FIELD).and_then(Framework::parse);
    if framework.is_none() {
        violations.push(ContractViolation::FrameworkOutOfDomain {
            declared: metadata.get(FRAMEWORK_FIELD).map(render_value),
        });
    }

    let hardware = metadata.text(REQUIRED_HARDWARE_FIELD).and_then(Hardware::parse);
    if hardware.is_none() {
        violations.push(ContractViolation::HardwareOutOfDomain {
            declared: metadata.get(REQUIRED_HARDWARE_FIELD).map(render_value),
        });
    }

    ValidationOutcome {
        violations,
        framework,
        hardware,
    }
}

/// Renders a YAML value for inclusion in a violation message.
fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        other => format!("<{}>", value_kind(other)),
    }
}
