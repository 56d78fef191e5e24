// crates/model-gate-cli/tests/validate_command.rs
// ============================================================================
// Module: CLI Validate Command Tests
// Description: End-to-end runs of the model-gate binary against temp folders.
// Purpose: Pin the exit-code contract and the user-facing verdict lines.
// Dependencies: model-gate-cli binary, tempfile, zip
// ============================================================================

//! ## Overview
//! Each test builds a model folder on disk, runs the compiled binary, and
//! checks the exit status plus the key output lines:
//! - 0 when the declaration holds and every artifact parses.
//! - 1 for usage, configuration, declaration, and contract failures.
//! - 2 when an artifact is missing or corrupt.

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
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use tempfile::TempDir;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Minimal ONNX model: ir 8, opset 17, graph "main" passing `x` through.
const ONNX_MODEL: &[u8] = &[
    0x08, 0x08, // ir_version = 8
    0x3a, 0x10, // graph
    0x12, 0x04, b'm', b'a', b'i', b'n', // graph.name
    0x5a, 0x03, 0x0a, 0x01, b'x', // graph.input
    0x62, 0x03, 0x0a, 0x01, b'x', // graph.output
    0x42, 0x04, 0x0a, 0x00, 0x10, 0x11, // opset_import { domain: "", version: 17 }
];

/// Protocol-2 pickle of an empty dict.
const EMPTY_DICT_PICKLE: &[u8] = b"\x80\x02}q\x00.";

fn model_gate_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_model-gate"))
}

fn metadata(model_id: &str, framework: &str) -> String {
    format!(
        "model_id: {model_id}\ngit_hash: abc123\nframework: {framework}\nmin_app_version: \
         \"1.0\"\nrequired_hardware: cpu\n"
    )
}

/// Creates `<tmp>/<name>` holding a declaration for `framework`.
fn model_folder(root: &TempDir, name: &str, framework: &str) -> PathBuf {
    let folder = root.path().join(name);
    fs::create_dir(&folder).unwrap();
    fs::write(folder.join("metadata.yaml"), metadata(name, framework)).unwrap();
    folder
}

fn write_torch_zip(path: &Path) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, bytes) in [
        ("archive/data.pkl", EMPTY_DICT_PICKLE),
        ("archive/byteorder", b"little".as_slice()),
        ("archive/version", b"3\n".as_slice()),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}

/// Runs the binary from `cwd` with a clean locale and config environment.
fn run_gate(cwd: &Path, args: &[&str]) -> Output {
    Command::new(model_gate_bin())
        .args(args)
        .current_dir(cwd)
        .env_remove("MODEL_GATE_LANG")
        .env_remove("MODEL_GATE_CONFIG")
        .output()
        .expect("run model-gate")
}

fn run_folder(folder: &Path) -> Output {
    run_gate(folder.parent().unwrap(), &[folder.to_str().unwrap()])
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ============================================================================
// SECTION: Usage
// ============================================================================

/// Verifies a missing folder argument is a usage error with exit 1.
#[test]
fn missing_argument_exits_one() {
    let root = TempDir::new().unwrap();
    let output = run_gate(root.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}

/// Verifies `--help` prints usage but never reads as a promotion pass.
#[test]
fn help_exits_one() {
    let root = TempDir::new().unwrap();
    let output = run_gate(root.path(), &["--help"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("MODEL_FOLDER"));
}

/// Verifies `--version` works without a folder.
#[test]
fn version_prints_package_version() {
    let root = TempDir::new().unwrap();
    let output = run_gate(root.path(), &["--version"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output).trim(), format!("model-gate {}", env!("CARGO_PKG_VERSION")));
}

/// Verifies a nonexistent path is fatal before any validation output.
#[test]
fn nonexistent_path_exits_one() {
    let root = TempDir::new().unwrap();
    let missing = root.path().join("nope");
    let output = run_folder(&missing);
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr(&output);
    assert!(stderr.contains("Model path does not exist"), "unexpected stderr: {stderr}");
    assert!(stderr.contains("nope"));
    assert!(!stdout(&output).contains("VALIDATING"));
}

/// Verifies a regular file in place of the folder is fatal.
#[test]
fn file_path_exits_one() {
    let root = TempDir::new().unwrap();
    let file = root.path().join("model.onnx");
    fs::write(&file, ONNX_MODEL).unwrap();
    let output = run_folder(&file);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("not a directory"));
}

// ============================================================================
// SECTION: Declaration
// ============================================================================

/// Verifies a folder without metadata.yaml fails with exit 1.
#[test]
fn missing_metadata_exits_one() {
    let root = TempDir::new().unwrap();
    let folder = root.path().join("model_a");
    fs::create_dir(&folder).unwrap();
    let output = run_folder(&folder);
    assert_eq!(output.status.code(), Some(1));
    let stdout = stdout(&output);
    assert!(stdout.contains("VALIDATING: model_a"));
    assert!(!stdout.contains("Smoke Test"));
    let stderr = stderr(&output);
    assert!(stderr.contains("metadata.yaml not found"), "unexpected stderr: {stderr}");
}

/// Verifies unparsable YAML fails with exit 1.
#[test]
fn invalid_yaml_exits_one() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    fs::write(folder.join("metadata.yaml"), "model_id: [unclosed\n").unwrap();
    let output = run_folder(&folder);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("invalid YAML"));
}

// ============================================================================
// SECTION: Contract
// ============================================================================

/// Verifies an identifier mismatch blocks promotion with exit 1.
#[test]
fn model_id_mismatch_exits_one() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    fs::write(folder.join("metadata.yaml"), metadata("model_b", "onnx")).unwrap();
    fs::write(folder.join("model.onnx"), ONNX_MODEL).unwrap();
    let output = run_folder(&folder);
    assert_eq!(output.status.code(), Some(1));
    let stdout = stdout(&output);
    assert!(stdout.contains("Tier-1 Validation FAILED"));
    assert!(stdout.contains("'model_id' (model_b) must match folder name (model_a)"), "unexpected stdout: {stdout}");
    assert!(stdout.contains("PROMOTION BLOCKED: Tier-1 validation failed."));
    assert!(!stdout.contains("Smoke Test"));
}

/// Verifies every violation is listed in one run.
#[test]
fn all_violations_are_listed() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    fs::write(folder.join("metadata.yaml"), "model_id: model_a\nframework: jax\n").unwrap();
    let output = run_folder(&folder);
    assert_eq!(output.status.code(), Some(1));
    let stdout = stdout(&output);
    assert!(stdout.contains("Missing required field: 'git_hash'"));
    assert!(stdout.contains("Missing required field: 'min_app_version'"));
    assert!(stdout.contains("Missing required field: 'required_hardware'"));
    assert!(stdout.contains("'framework' must be one of"));
}

/// Verifies an unquoted `yes` hash is a boolean and blocks with exit 1.
#[test]
fn boolean_git_hash_exits_one() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    let declaration = metadata("model_a", "onnx").replace("git_hash: abc123", "git_hash: yes");
    fs::write(folder.join("metadata.yaml"), declaration).unwrap();
    let output = run_folder(&folder);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("Field 'git_hash' must be of type string (found boolean)"));
}

// ============================================================================
// SECTION: Smoke Test
// ============================================================================

/// Verifies a valid ONNX folder passes with exit 0.
#[test]
fn valid_onnx_folder_passes() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    fs::write(folder.join("model.onnx"), ONNX_MODEL).unwrap();
    let output = run_folder(&folder);
    let stdout = stdout(&output);
    assert_eq!(output.status.code(), Some(0), "stdout: {stdout} stderr: {}", stderr(&output));
    assert!(stdout.contains("Tier-1 Validation PASSED"));
    assert!(stdout.contains("Framework: ONNX | Hardware: cpu"), "unexpected stdout: {stdout}");
    assert!(!stdout.contains("Using configuration"));
    assert!(stdout.contains("Checking model.onnx..."));
    assert!(stdout.contains("Smoke Test PASSED (ONNX)"));
    assert!(stdout.contains("ALL VALIDATIONS PASSED"));
}

/// Verifies an exponent-shaped hash is accepted as text.
#[test]
fn exponent_shaped_git_hash_passes() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    let declaration = metadata("model_a", "onnx").replace("git_hash: abc123", "git_hash: 1e10");
    fs::write(folder.join("metadata.yaml"), declaration).unwrap();
    fs::write(folder.join("model.onnx"), ONNX_MODEL).unwrap();
    let output = run_folder(&folder);
    let stdout = stdout(&output);
    assert_eq!(output.status.code(), Some(0), "stdout: {stdout} stderr: {}", stderr(&output));
    assert!(stdout.contains("ALL VALIDATIONS PASSED"));
}

/// Verifies a valid PyTorch zip checkpoint passes with exit 0.
#[test]
fn valid_pytorch_folder_passes() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_pt", "pytorch");
    write_torch_zip(&folder.join("model.pt"));
    let output = run_folder(&folder);
    let stdout = stdout(&output);
    assert_eq!(output.status.code(), Some(0), "stdout: {stdout} stderr: {}", stderr(&output));
    assert!(stdout.contains("Loading model.pt..."));
    assert!(stdout.contains("Smoke Test PASSED (PyTorch)"));
}

/// Verifies a zero-byte ONNX file is corruption with exit 2.
#[test]
fn empty_onnx_file_exits_two() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    fs::write(folder.join("model.onnx"), b"").unwrap();
    let output = run_folder(&folder);
    assert_eq!(output.status.code(), Some(2));
    let stdout = stdout(&output);
    assert!(stdout.contains("Smoke Test FAILED"));
    assert!(stdout.contains("model.onnx"));
    assert!(stdout.contains("PROMOTION BLOCKED: Model artifact corruption detected."));
}

/// Verifies a garbage checkpoint is corruption with exit 2.
#[test]
fn corrupt_pytorch_file_exits_two() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_pt", "pytorch");
    fs::write(folder.join("model.pt"), [0u8; 32]).unwrap();
    let output = run_folder(&folder);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout(&output).contains("Smoke Test FAILED"));
}

/// Verifies a folder without weight files blocks with exit 2.
#[test]
fn missing_artifacts_exit_two() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_pt", "pytorch");
    let output = run_folder(&folder);
    assert_eq!(output.status.code(), Some(2));
    let stdout = stdout(&output);
    assert!(stdout.contains("no pytorch model files (*.pt/*.pth) found"), "unexpected stdout: {stdout}");
    assert!(stdout.contains("PROMOTION BLOCKED: Model artifact corruption detected."));
}

/// Verifies a tensorflow folder without `saved_model/` blocks with exit 2.
#[test]
fn missing_saved_model_exits_two() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_tf", "tensorflow");
    let output = run_folder(&folder);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout(&output).contains("no saved_model directory found"));
}

/// Verifies repeated runs on an unchanged folder agree.
#[test]
fn repeated_runs_are_identical() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    fs::write(folder.join("model.onnx"), ONNX_MODEL).unwrap();
    let first = run_folder(&folder);
    let second = run_folder(&folder);
    assert_eq!(first.status.code(), second.status.code());
    assert_eq!(first.stdout, second.stdout);
}

/// Verifies a relative folder argument resolves against the working directory.
#[test]
fn relative_folder_resolves_against_cwd() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    fs::write(folder.join("model.onnx"), ONNX_MODEL).unwrap();
    let output = run_gate(root.path(), &["model_a"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("VALIDATING: model_a"));
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Verifies an explicit config path that does not exist is fatal.
#[test]
fn missing_explicit_config_exits_one() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    fs::write(folder.join("model.onnx"), ONNX_MODEL).unwrap();
    let config = root.path().join("absent.toml");
    let output = run_gate(root.path(), &["--config", config.to_str().unwrap(), folder.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Failed to load configuration"));
}

/// Verifies configured limits reach the artifact readers.
#[test]
fn configured_protobuf_limit_applies() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    fs::write(folder.join("model.onnx"), ONNX_MODEL).unwrap();
    let config = root.path().join("model-gate.toml");
    fs::write(&config, "[limits]\nmax_protobuf_bytes = 8\n").unwrap();
    let output = run_gate(root.path(), &["--config", config.to_str().unwrap(), folder.to_str().unwrap()]);
    let stdout = stdout(&output);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout.contains(&format!("Using configuration: {}", config.display())), "unexpected stdout: {stdout}");
    assert!(stdout.contains("Smoke Test FAILED"));
}

/// Verifies a `model-gate.toml` in the working directory is picked up.
#[test]
fn default_config_in_cwd_is_loaded() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    fs::write(folder.join("model.onnx"), ONNX_MODEL).unwrap();
    fs::write(root.path().join("model-gate.toml"), "[limits]\nunknown_limit = 1\n").unwrap();
    let output = run_gate(root.path(), &["model_a"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Failed to load configuration"));
}

// ============================================================================
// SECTION: Locale
// ============================================================================

/// Verifies `--lang ca` localizes output and prints the disclaimer.
#[test]
fn catalan_output_carries_disclaimer() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    fs::write(folder.join("model.onnx"), ONNX_MODEL).unwrap();
    let output = run_gate(root.path(), &["--lang", "ca", "model_a"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("VALIDANT: model_a"));
    assert!(stderr(&output).contains("machine-translated") || stderr(&output).contains("traduïda"));
}

/// Verifies an invalid `MODEL_GATE_LANG` is rejected with exit 1.
#[test]
fn invalid_env_locale_exits_one() {
    let root = TempDir::new().unwrap();
    let folder = model_folder(&root, "model_a", "onnx");
    let output = Command::new(model_gate_bin())
        .arg(&folder)
        .current_dir(root.path())
        .env("MODEL_GATE_LANG", "xx")
        .env_remove("MODEL_GATE_CONFIG")
        .output()
        .expect("run model-gate");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("MODEL_GATE_LANG"));
}
