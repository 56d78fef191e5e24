// crates/model-gate-config/src/config.rs
// ============================================================================
// Module: Model Gate Configuration
// Description: Configuration loading and validation for Model Gate.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: model-gate-core, model-gate-probes, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from an optional TOML file. An explicitly named
//! file (CLI flag or environment variable) must exist; the default file name
//! is only consulted when present. Every limit is bounded so a config cannot
//! disable the reader guards used by the smoke tester.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use model_gate_core::DEFAULT_MAX_METADATA_BYTES;
use model_gate_probes::smoke::DEFAULT_MAX_PICKLE_BYTES;
use model_gate_probes::smoke::DEFAULT_MAX_PROTOBUF_BYTES;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "model-gate.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "MODEL_GATE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 64 * 1024;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Upper bound for `max_metadata_bytes`.
pub(crate) const MAX_METADATA_BYTES_CEILING: usize = 16 * 1024 * 1024;
/// Upper bound for `max_protobuf_bytes`; the default is already the format limit.
pub(crate) const MAX_PROTOBUF_BYTES_CEILING: u64 = DEFAULT_MAX_PROTOBUF_BYTES;
/// Upper bound for `max_pickle_bytes`.
pub(crate) const MAX_PICKLE_BYTES_CEILING: u64 = 4 * 1024 * 1024 * 1024;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Model Gate configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelGateConfig {
    /// Reader limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Resolved source path, when a file was loaded.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl ModelGateConfig {
    /// Loads configuration using the default resolution rules.
    ///
    /// Resolution order: `path`, then [`CONFIG_ENV_VAR`], then
    /// [`DEFAULT_CONFIG_NAME`] in the working directory. Only the default file
    /// may be absent, in which case defaults are returned.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (resolved, explicit) = resolve_path(path)?;
        if !explicit && !resolved.exists() {
            return Ok(Self::default());
        }
        Self::load_file(&resolved)
    }

    /// Loads and validates a specific configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed, or validated.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        validate_path(path)?;
        let io_error = |err: std::io::Error| ConfigError::Io(format!("{}: {err}", path.display()));
        let file = File::open(path).map_err(io_error)?;
        let limit = u64::try_from(MAX_CONFIG_FILE_SIZE).unwrap_or(u64::MAX);
        let mut bytes = Vec::new();
        file.take(limit.saturating_add(1)).read_to_end(&mut bytes).map_err(io_error)?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.source = Some(path.to_path_buf());
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()
    }
}

/// Reader limits applied while loading metadata and artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum size of `metadata.yaml` in bytes.
    #[serde(default = "default_max_metadata_bytes")]
    pub max_metadata_bytes: usize,
    /// Maximum size of a protobuf artifact (`.onnx`, `saved_model.pb`).
    #[serde(default = "default_max_protobuf_bytes")]
    pub max_protobuf_bytes: u64,
    /// Maximum size of a pickle stream (`data.pkl`) held in memory.
    #[serde(default = "default_max_pickle_bytes")]
    pub max_pickle_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_metadata_bytes: default_max_metadata_bytes(),
            max_protobuf_bytes: default_max_protobuf_bytes(),
            max_pickle_bytes: default_max_pickle_bytes(),
        }
    }
}

impl LimitsConfig {
    /// Validates every limit against its hard bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a limit is zero or too large.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_metadata_bytes == 0 || self.max_metadata_bytes > MAX_METADATA_BYTES_CEILING {
            return Err(ConfigError::Invalid(format!(
                "limits.max_metadata_bytes must be between 1 and {MAX_METADATA_BYTES_CEILING}"
            )));
        }
        if self.max_protobuf_bytes == 0 || self.max_protobuf_bytes > MAX_PROTOBUF_BYTES_CEILING {
            return Err(ConfigError::Invalid(format!(
                "limits.max_protobuf_bytes must be between 1 and {MAX_PROTOBUF_BYTES_CEILING}"
            )));
        }
        if self.max_pickle_bytes == 0 || self.max_pickle_bytes > MAX_PICKLE_BYTES_CEILING {
            return Err(ConfigError::Invalid(format!(
                "limits.max_pickle_bytes must be between 1 and {MAX_PICKLE_BYTES_CEILING}"
            )));
        }
        Ok(())
    }
}

/// Default for [`LimitsConfig::max_metadata_bytes`].
const fn default_max_metadata_bytes() -> usize {
    DEFAULT_MAX_METADATA_BYTES
}

/// Default for [`LimitsConfig::max_protobuf_bytes`].
const fn default_max_protobuf_bytes() -> u64 {
    DEFAULT_MAX_PROTOBUF_BYTES
}

/// Default for [`LimitsConfig::max_pickle_bytes`].
const fn default_max_pickle_bytes() -> u64 {
    DEFAULT_MAX_PICKLE_BYTES
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path and whether it was named explicitly.
fn resolve_path(path: Option<&Path>) -> Result<(PathBuf, bool), ConfigError> {
    if let Some(path) = path {
        return Ok((path.to_path_buf(), true));
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok((PathBuf::from(env_path), true));
    }
    Ok((PathBuf::from(DEFAULT_CONFIG_NAME), false))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    Ok(())
}
