// crates/model-gate-cli/src/main.rs
// ============================================================================
// Module: Model Gate CLI Entry Point
// Description: Promotion gate for a single model artifact folder.
// Purpose: Validate metadata, smoke-test weights, and map the verdict to an exit code.
// Dependencies: clap, model-gate-config, model-gate-core, model-gate-probes, thiserror.
// ============================================================================

//! ## Overview
//! `model-gate <model_folder>` runs one linear pass: resolve the folder, load
//! `metadata.yaml`, check the Tier-1 contract, then parse every weight
//! artifact for the declared framework. All user-facing strings are routed
//! through the i18n catalog.
//!
//! ## Invariants
//! - Exit 0 means the folder is eligible for promotion.
//! - Exit 1 covers usage, configuration, declaration, and contract failures.
//! - Exit 2 is reserved for artifact corruption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::ArgAction;
use clap::Parser;
use clap::ValueEnum;
use model_gate_cli::i18n::Locale;
use model_gate_cli::i18n::set_locale;
use model_gate_cli::t;
use model_gate_config::ModelGateConfig;
use model_gate_core::Framework;
use model_gate_core::contract::FRAMEWORK_FIELD;
use model_gate_core::folder_name;
use model_gate_core::load_metadata;
use model_gate_core::validate_contract;
use model_gate_probes::SmokeError;
use model_gate_probes::SmokeLimits;
use model_gate_probes::SmokeObserver;
use model_gate_probes::SmokeVerdict;
use model_gate_probes::run_smoke_test;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable for CLI locale selection.
const LANG_ENV: &str = "MODEL_GATE_LANG";
/// Exit status for usage, declaration, and contract failures.
const EXIT_BLOCKED: u8 = 1;
/// Exit status for artifact corruption.
const EXIT_CORRUPT: u8 = 2;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "model-gate", disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue)]
    show_version: bool,
    /// Preferred output language (overrides `MODEL_GATE_LANG`).
    #[arg(long, value_enum, value_name = "LANG")]
    lang: Option<LangArg>,
    /// Configuration file (overrides `MODEL_GATE_CONFIG`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Model folder to validate.
    #[arg(value_name = "MODEL_FOLDER", required_unless_present = "show_version")]
    model_folder: Option<PathBuf>,
}

/// CLI language selector.
#[derive(ValueEnum, Copy, Clone, Debug)]
enum LangArg {
    /// English.
    En,
    /// Catalan.
    Ca,
}

impl From<LangArg> for Locale {
    fn from(value: LangArg) -> Self {
        match value {
            LangArg::En => Self::En,
            LangArg::Ca => Self::Ca,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for localized fatal diagnostics.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
    /// Process exit status.
    exit: u8,
}

impl CliError {
    /// Constructs a blocking [`CliError`] from a localized message.
    const fn new(message: String) -> Self {
        Self {
            message,
            exit: EXIT_BLOCKED,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err),
    }
}

/// Runs the gate.
fn run() -> CliResult<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => return Ok(usage_exit(&err)),
    };
    let env_lang = std::env::var(LANG_ENV).ok();
    let locale = resolve_locale(cli.lang, env_lang.as_deref())?;
    set_locale(locale);
    if locale != Locale::En {
        stderr(&t!("i18n.disclaimer.machine_translated"))?;
    }

    if cli.show_version {
        stdout(&t!("main.version", version = env!("CARGO_PKG_VERSION")))?;
        return Ok(ExitCode::SUCCESS);
    }
    let Some(model_folder) = cli.model_folder else {
        return Err(CliError::new(t!("fatal.path_missing", path = "")));
    };
    validate_folder(&model_folder, cli.config.as_deref())
}

/// Prints a clap diagnostic and exits 1.
///
/// Exit 0 means eligible for promotion, so help output and usage errors both
/// exit 1 and exit 2 stays reserved for corruption.
fn usage_exit(err: &clap::Error) -> ExitCode {
    let _ = err.print();
    ExitCode::from(EXIT_BLOCKED)
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Validates one model folder end to end.
fn validate_folder(model_folder: &Path, config_path: Option<&Path>) -> CliResult<ExitCode> {
    let folder = resolve_folder(model_folder)?;
    let name = folder_name(&folder);
    stdout(&t!("banner.rule"))?;
    stdout(&t!("banner.validating", folder = name))?;
    stdout(&t!("banner.rule"))?;

    let config = ModelGateConfig::load(config_path)
        .map_err(|err| CliError::new(t!("fatal.config", error = err)))?;
    if let Some(source) = &config.source {
        stdout(&t!("config.loaded", path = source.display()))?;
    }
    let limits = config.limits;
    let metadata = load_metadata(&folder, limits.max_metadata_bytes)
        .map_err(|err| CliError::new(t!("fatal.metadata", error = err)))?;

    stdout(&t!("contract.header"))?;
    let outcome = validate_contract(&metadata, &name);
    if !outcome.passed() {
        stdout(&t!("contract.failed"))?;
        for violation in outcome.violations() {
            stdout(&t!("contract.violation", violation = violation))?;
        }
        stdout("")?;
        stdout(&t!("contract.blocked"))?;
        return Ok(ExitCode::from(EXIT_BLOCKED));
    }
    stdout(&t!("contract.passed"))?;
    if let (Some(framework), Some(hardware)) = (outcome.framework(), outcome.hardware()) {
        stdout(&t!("contract.declared", framework = framework_label(framework), hardware = hardware))?;
    }

    stdout(&t!("smoke.header"))?;
    let smoke_limits = SmokeLimits {
        max_protobuf_bytes: limits.max_protobuf_bytes,
        max_pickle_bytes: limits.max_pickle_bytes,
    };
    let framework = metadata.text(FRAMEWORK_FIELD).unwrap_or_default();
    let mut observer = PrintObserver::default();
    let result = run_smoke_test(&folder, framework, &smoke_limits, &mut observer);
    if let Some(err) = observer.error {
        return Err(err);
    }
    match result {
        Ok(SmokeVerdict::Passed(report)) => {
            stdout(&t!("smoke.passed", framework = framework_label(report.framework)))?;
        }
        Ok(SmokeVerdict::Unsupported {
            framework,
        }) => {
            stdout(&t!("smoke.unsupported", framework = framework))?;
        }
        Err(err) => {
            let line = match &err {
                SmokeError::NoArtifacts {
                    ..
                }
                | SmokeError::MissingSavedModel {
                    ..
                } => t!("smoke.missing", error = err),
                SmokeError::Corrupt {
                    ..
                }
                | SmokeError::Io {
                    ..
                } => t!("smoke.failed", error = err),
            };
            stdout(&line)?;
            stdout("")?;
            stdout(&t!("smoke.blocked"))?;
            return Ok(ExitCode::from(EXIT_CORRUPT));
        }
    }

    stdout("")?;
    stdout(&t!("result.passed"))?;
    Ok(ExitCode::SUCCESS)
}

/// Resolves the model folder to an absolute directory path.
fn resolve_folder(model_folder: &Path) -> CliResult<PathBuf> {
    let absolute = std::path::absolute(model_folder).unwrap_or_else(|_| model_folder.to_path_buf());
    let Ok(folder) = absolute.canonicalize() else {
        return Err(CliError::new(t!("fatal.path_missing", path = absolute.display())));
    };
    if !folder.is_dir() {
        return Err(CliError::new(t!("fatal.not_directory", path = folder.display())));
    }
    Ok(folder)
}

/// Returns the display label for a framework.
const fn framework_label(framework: Framework) -> &'static str {
    match framework {
        Framework::PyTorch => "PyTorch",
        Framework::TensorFlow => "TensorFlow",
        Framework::Onnx => "ONNX",
    }
}

// ============================================================================
// SECTION: Progress
// ============================================================================

/// Smoke observer that prints one progress line per artifact.
#[derive(Default)]
struct PrintObserver {
    /// First output failure; later lines are skipped.
    error: Option<CliError>,
}

impl SmokeObserver for PrintObserver {
    fn artifact_started(&mut self, framework: Framework, path: &Path) {
        if self.error.is_some() {
            return;
        }
        let file = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        let line = match framework {
            Framework::Onnx => t!("smoke.checking", file = file),
            Framework::PyTorch | Framework::TensorFlow => t!("smoke.loading", file = file),
        };
        if let Err(err) = stdout(&line) {
            self.error = Some(err);
        }
    }
}

// ============================================================================
// SECTION: Locale
// ============================================================================

/// Resolves the CLI locale from flags or environment.
fn resolve_locale(lang: Option<LangArg>, env_lang: Option<&str>) -> CliResult<Locale> {
    if let Some(lang) = lang {
        return Ok(lang.into());
    }
    if let Some(value) = env_lang {
        return Locale::parse(value).ok_or_else(|| {
            CliError::new(t!("i18n.lang.invalid_env", env = LANG_ENV, value = value))
        });
    }
    Ok(Locale::En)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Writes a status line to stdout, mapping failures to [`CliError`].
fn stdout(message: &str) -> CliResult<()> {
    write_stdout_line(message).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a diagnostic line to stderr, mapping failures to [`CliError`].
fn stderr(message: &str) -> CliResult<()> {
    write_stderr_line(message).map_err(|err| CliError::new(output_error("stderr", &err)))
}

/// Formats a localized output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    let stream_label = match stream {
        "stdout" => t!("output.stream.stdout"),
        "stderr" => t!("output.stream.stderr"),
        _ => t!("output.stream.unknown"),
    };
    t!("output.write_failed", stream = stream_label, error = error)
}

/// Emits a fatal diagnostic to stderr and returns its exit code.
fn emit_error(err: &CliError) -> ExitCode {
    let _ = write_stderr_line(&err.message);
    ExitCode::from(err.exit)
}
