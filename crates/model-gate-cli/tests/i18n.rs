// crates/model-gate-cli/tests/i18n.rs
// ============================================================================
// Module: CLI i18n Tests
// Description: Exercises the translation catalog and placeholder substitution.
// Purpose: Ensure gate output routes through stable i18n helpers.
// Dependencies: model-gate-cli i18n module and the `t!` macro.
// ============================================================================

//! ## Overview
//! Validates the public i18n surface of the CLI crate:
//! - Message arguments capture key/value substitutions.
//! - The [`t!`](model_gate_cli::t) macro formats placeholders correctly.

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

use model_gate_cli::i18n::MessageArg;
use model_gate_cli::t;

// ============================================================================
// SECTION: Tests
// ============================================================================

/// Confirms message arguments capture key/value pairs.
#[test]
fn message_arg_new_captures_key_and_value() {
    let arg = MessageArg::new("file", "model.onnx");
    assert_eq!(arg.key, "file");
    assert_eq!(arg.value, "model.onnx");
}

/// Confirms the t! macro formats named arguments.
#[test]
fn t_macro_formats_message() {
    let rendered = t!("main.version", version = "0.1.0");
    assert_eq!(rendered, "model-gate 0.1.0");
}

/// Confirms non-string arguments are rendered through `Display`.
#[test]
fn t_macro_renders_display_values() {
    let rendered = t!("smoke.failed", error = 42);
    assert_eq!(rendered, "❌ Smoke Test FAILED: 42");
}
