// crates/model-gate-config/src/lib.rs
// ============================================================================
// Module: Model Gate Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for model-gate.toml semantics.
// Dependencies: model-gate-core, serde, toml
// ============================================================================

//! ## Overview
//! `model-gate-config` defines the optional configuration file for the
//! `model-gate` CLI. Loading is strict and fail-closed: unknown keys, invalid
//! UTF-8, oversized files, and out-of-range limits are rejected before any
//! model folder is inspected.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
