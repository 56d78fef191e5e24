// crates/model-gate-cli/src/lib.rs
// ============================================================================
// Module: Model Gate CLI Library
// Description: Shared helpers for the model-gate binary.
// Purpose: Expose the i18n catalog and `t!` macro to the binary and tests.
// Dependencies: Standard library only.
// ============================================================================

//! ## Overview
//! Library half of the `model-gate` binary. Holds the localized message
//! catalog so the binary and integration tests render identical text.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod i18n;

#[cfg(test)]
mod tests;
