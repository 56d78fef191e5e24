// crates/model-gate-cli/src/i18n.rs
// ============================================================================
// Module: CLI Internationalization Helpers
// Description: Provides message catalog and translation utilities for the CLI.
// Purpose: Centralize user-facing gate output in one localized catalog.
// Dependencies: Standard library collections and synchronization primitives.
// ============================================================================

//! ## Overview
//! Every line the `model-gate` binary prints comes from a small translation
//! catalog. All runtime output should be routed through the [`t!`](crate::t)
//! macro.
//!
//! ## Invariants
//! - The catalog is initialized once and read-only thereafter.
//! - Missing keys fall back to English and then to the key itself.
//! - Placeholder substitutions preserve deterministic order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::OnceLock;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Supported CLI locales.
///
/// # Invariants
/// - [`Locale::En`] is the default fallback locale.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Locale {
    /// English (default).
    En,
    /// Catalan.
    Ca,
}

impl Locale {
    /// Returns the canonical locale label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ca => "ca",
        }
    }

    /// Attempts to parse a locale value (case-insensitive, tolerant of region tags).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        let normalized = value.to_ascii_lowercase();
        let lang = normalized.split(['-', '_']).next().unwrap_or("");
        match lang {
            "en" => Some(Self::En),
            "ca" => Some(Self::Ca),
            _ => None,
        }
    }
}

/// Ordered list of supported CLI locales.
pub const SUPPORTED_LOCALES: &[Locale] = &[Locale::En, Locale::Ca];

/// A formatted message argument captured by the [`macro@crate::t`] macro.
#[derive(Clone)]
pub struct MessageArg {
    /// The placeholder name used in message templates (e.g., `"folder"`).
    pub key: &'static str,
    /// The formatted string value to substitute for this placeholder.
    pub value: String,
}

impl MessageArg {
    /// Constructs a new [`MessageArg`] from a key and displayable value.
    pub fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

// ============================================================================
// SECTION: Locale Selection
// ============================================================================

/// Global locale selection for CLI output.
static CURRENT_LOCALE: OnceLock<Locale> = OnceLock::new();

/// Sets the CLI locale. Only the first call wins.
pub fn set_locale(locale: Locale) {
    let _ = CURRENT_LOCALE.set(locale);
}

/// Returns the current CLI locale (defaults to English).
#[must_use]
pub fn current_locale() -> Locale {
    CURRENT_LOCALE.get().copied().unwrap_or(Locale::En)
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// Static English catalog entries.
const CATALOG_EN: &[(&str, &str)] = &[
    ("main.version", "model-gate {version}"),
    ("output.stream.stdout", "stdout"),
    ("output.stream.stderr", "stderr"),
    ("output.stream.unknown", "output"),
    ("output.write_failed", "Failed to write to {stream}: {error}"),
    ("banner.rule", "═══════════════════════════════════════════════════════════"),
    ("banner.validating", "  VALIDATING: {folder}"),
    ("fatal.path_missing", "❌ FATAL: Model path does not exist: {path}"),
    ("fatal.not_directory", "❌ FATAL: Model path is not a directory: {path}"),
    ("fatal.config", "❌ FATAL: Failed to load configuration: {error}"),
    ("config.loaded", "⚙️  Using configuration: {path}"),
    ("fatal.metadata", "❌ FATAL: {error}"),
    ("contract.header", "🔍 Validating Tier-1 (Blocking) fields..."),
    ("contract.failed", "❌ Tier-1 Validation FAILED:"),
    ("contract.violation", "  - {violation}"),
    ("contract.passed", "✅ Tier-1 Validation PASSED"),
    ("contract.declared", "   Framework: {framework} | Hardware: {hardware}"),
    ("contract.blocked", "🚫 PROMOTION BLOCKED: Tier-1 validation failed."),
    ("smoke.header", "🔥 Running Lightweight Smoke Test..."),
    ("smoke.loading", "  Loading {file}..."),
    ("smoke.checking", "  Checking {file}..."),
    ("smoke.missing", "❌ {error}"),
    ("smoke.failed", "❌ Smoke Test FAILED: {error}"),
    ("smoke.passed", "✅ Smoke Test PASSED ({framework})"),
    ("smoke.unsupported", "⚠️  Smoke test not implemented for framework: {framework}"),
    ("smoke.blocked", "🚫 PROMOTION BLOCKED: Model artifact corruption detected."),
    ("result.passed", "✅ ALL VALIDATIONS PASSED. Model is eligible for promotion."),
    ("i18n.lang.invalid_env", "Invalid value for {env}: {value}. Expected 'en' or 'ca'."),
    (
        "i18n.disclaimer.machine_translated",
        "Note: non-English output is machine-translated and may be inaccurate.",
    ),
];

/// Static Catalan catalog entries.
const CATALOG_CA: &[(&str, &str)] = &[
    ("main.version", "model-gate {version}"),
    ("output.stream.stdout", "stdout"),
    ("output.stream.stderr", "stderr"),
    ("output.stream.unknown", "sortida"),
    ("output.write_failed", "No s'ha pogut escriure a {stream}: {error}"),
    ("banner.rule", "═══════════════════════════════════════════════════════════"),
    ("banner.validating", "  VALIDANT: {folder}"),
    ("fatal.path_missing", "❌ FATAL: La ruta del model no existeix: {path}"),
    ("fatal.not_directory", "❌ FATAL: La ruta del model no és un directori: {path}"),
    ("fatal.config", "❌ FATAL: No s'ha pogut carregar la configuració: {error}"),
    ("config.loaded", "⚙️  S'utilitza la configuració: {path}"),
    ("fatal.metadata", "❌ FATAL: {error}"),
    ("contract.header", "🔍 Validant els camps de nivell 1 (bloquejants)..."),
    ("contract.failed", "❌ La validació de nivell 1 HA FALLAT:"),
    ("contract.violation", "  - {violation}"),
    ("contract.passed", "✅ Validació de nivell 1 SUPERADA"),
    ("contract.declared", "   Marc: {framework} | Maquinari: {hardware}"),
    ("contract.blocked", "🚫 PROMOCIÓ BLOQUEJADA: ha fallat la validació de nivell 1."),
    ("smoke.header", "🔥 Executant la prova de fum lleugera..."),
    ("smoke.loading", "  Carregant {file}..."),
    ("smoke.checking", "  Comprovant {file}..."),
    ("smoke.missing", "❌ {error}"),
    ("smoke.failed", "❌ La prova de fum HA FALLAT: {error}"),
    ("smoke.passed", "✅ Prova de fum SUPERADA ({framework})"),
    ("smoke.unsupported", "⚠️  Prova de fum no implementada per al framework: {framework}"),
    ("smoke.blocked", "🚫 PROMOCIÓ BLOQUEJADA: s'ha detectat corrupció a l'artefacte del model."),
    ("result.passed", "✅ TOTES LES VALIDACIONS SUPERADES. El model es pot promocionar."),
    ("i18n.lang.invalid_env", "Valor no vàlid per a {env}: {value}. S'esperava 'en' o 'ca'."),
    (
        "i18n.disclaimer.machine_translated",
        "Nota: la sortida que no és en anglès està traduïda automàticament i pot ser inexacta.",
    ),
];

/// Returns the raw catalog entries for the requested locale.
#[must_use]
pub const fn catalog_entries_for(locale: Locale) -> &'static [(&'static str, &'static str)] {
    match locale {
        Locale::En => CATALOG_EN,
        Locale::Ca => CATALOG_CA,
    }
}

/// Returns the message catalog for the requested locale.
pub(crate) fn catalog_for(locale: Locale) -> &'static HashMap<&'static str, &'static str> {
    static CATALOG_EN_MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    static CATALOG_CA_MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    match locale {
        Locale::En => CATALOG_EN_MAP.get_or_init(|| CATALOG_EN.iter().copied().collect()),
        Locale::Ca => CATALOG_CA_MAP.get_or_init(|| CATALOG_CA.iter().copied().collect()),
    }
}

// ============================================================================
// SECTION: Translation
// ============================================================================

/// Translates `key` using the selected locale while substituting `args`.
#[must_use]
pub fn translate(key: &str, args: Vec<MessageArg>) -> String {
    let locale = current_locale();
    let template = catalog_for(locale)
        .get(key)
        .copied()
        .or_else(|| catalog_for(Locale::En).get(key).copied())
        .unwrap_or(key);
    if args.is_empty() {
        return template.to_string();
    }

    let mut result = template.to_string();
    for arg in args {
        let placeholder = format!("{{{}}}", arg.key);
        result = result.replace(&placeholder, &arg.value);
    }
    result
}

// ============================================================================
// SECTION: Macro
// ============================================================================

/// Formats a localized message from a key and named arguments.
///
/// # Arguments
///
/// - `$key` must match a catalog entry.
/// - Named arguments are substituted into `{placeholder}` positions.
///
/// # Returns
///
/// A localized [`String`] with placeholders substituted.
#[macro_export]
macro_rules! t {
    ($key:literal $(, $name:ident = $value:expr )* $(,)?) => {{
        let args = ::std::vec![
            $(
                $crate::i18n::MessageArg::new(stringify!($name), $value.to_string()),
            )*
        ];
        $crate::i18n::translate($key, args)
    }};
}
