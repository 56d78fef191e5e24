// crates/model-gate-core/src/types.rs
// ============================================================================
// Module: Model Gate Domain Types
// Description: Closed enumerations for declared frameworks and hardware.
// Purpose: Provide stable labels for the Tier-1 value domains.
// Dependencies: Standard library formatting.
// ============================================================================

//! ## Overview
//! The Tier-1 contract restricts `framework` and `required_hardware` to small
//! closed sets. These enums carry the canonical labels used in metadata files
//! and in user-facing messages. Parsing is exact and case-sensitive.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

// ============================================================================
// SECTION: Framework
// ============================================================================

/// Model framework declared in `metadata.yaml`.
///
/// # Invariants
/// - Variants are stable; labels match the metadata wire form exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Framework {
    /// `PyTorch` checkpoints (`*.pt`, `*.pth`).
    PyTorch,
    /// `TensorFlow` `SavedModel` directories.
    TensorFlow,
    /// ONNX model files (`*.onnx`).
    Onnx,
}

impl Framework {
    /// All recognized frameworks in declaration order.
    pub const ALL: [Self; 3] = [Self::PyTorch, Self::TensorFlow, Self::Onnx];

    /// Returns the canonical metadata label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PyTorch => "pytorch",
            Self::TensorFlow => "tensorflow",
            Self::Onnx => "onnx",
        }
    }

    /// Parses an exact, case-sensitive framework label.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|framework| framework.as_str() == value)
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Hardware
// ============================================================================

/// Execution hardware the model requires.
///
/// # Invariants
/// - Variants are stable; labels match the metadata wire form exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hardware {
    /// Apple Metal Performance Shaders.
    Mps,
    /// Host CPU.
    Cpu,
    /// NVIDIA CUDA devices.
    Cuda,
}

impl Hardware {
    /// All recognized hardware targets in declaration order.
    pub const ALL: [Self; 3] = [Self::Mps, Self::Cpu, Self::Cuda];

    /// Returns the canonical metadata label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mps => "mps",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }

    /// Parses an exact, case-sensitive hardware label.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|hardware| hardware.as_str() == value)
    }
}

impl fmt::Display for Hardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::Framework;
    use super::Hardware;

    #[test]
    fn framework_labels_round_trip() {
        for framework in Framework::ALL {
            assert_eq!(Framework::parse(framework.as_str()), Some(framework));
        }
    }

    #[test]
    fn parsing_is_case_sensitive() {
        assert_eq!(Framework::parse("PyTorch"), None);
        assert_eq!(Framework::parse(" onnx"), None);
        assert_eq!(Hardware::parse("CPU"), None);
        assert_eq!(Hardware::parse("cuda"), Some(Hardware::Cuda));
    }
}
