// crates/model-gate-cli/src/tests/mod.rs
// ============================================================================
// Module: CLI Unit Tests
// Description: Unit test modules for the model-gate CLI library.
// Purpose: Group crate-internal tests that need private catalog access.
// Dependencies: model-gate-cli i18n module
// ============================================================================

//! ## Overview
//! Unit tests that reach crate-private catalog helpers.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod i18n;
