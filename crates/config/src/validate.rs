//! Configuration validation.
//!
//! Checks a config file for syntax errors, unknown or misspelled fields, type
//! errors and settings that parse but make no sense together.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{loader::parse_config, schema::TesseraConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", "semantic" or "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "host.tick_rate_hz"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    /// Table with arbitrary keys (metric labels).
    Map,
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    Struct(HashMap::from([
        (
            "scheduler",
            Struct(HashMap::from([("min_scan_interval_ms", Leaf)])),
        ),
        (
            "host",
            Struct(HashMap::from([
                ("tick_rate_hz", Leaf),
                ("update_interval_ms", Leaf),
                ("update_mode", Leaf),
            ])),
        ),
        (
            "plugins",
            Struct(HashMap::from([
                ("root", Leaf),
                ("entry_file", Leaf),
                ("exclude", Leaf),
                ("preserve_open_on_reload", Leaf),
                ("watch", Leaf),
                ("bundled", Leaf),
                ("shadow_dir", Leaf),
            ])),
        ),
        (
            "metrics",
            Struct(HashMap::from([
                ("enabled", Leaf),
                ("labels", Map),
                ("textfile", Leaf),
                ("write_interval_ms", Leaf),
            ])),
        ),
    ]))
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known: Vec<&str> = fields.keys().copied().collect();
    for (key, child) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => check_unknown_fields(child, child_schema, &path, diagnostics),
            None => {
                let message = match suggest(key, &known, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "unknown-field",
                    path,
                    message,
                ));
            },
        }
    }
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate the config file at `path`, or the discovered one when `None`.
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        let mut result = ValidationResult::default();
        result.diagnostics.push(Diagnostic::new(
            Severity::Info,
            "file-ref",
            "",
            "no config file found; using defaults",
        ));
        result
            .diagnostics
            .extend(validate_config(&TesseraConfig::default()));
        return result;
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(raw) => validate_str(&crate::env_subst::substitute_env(&raw), &actual_path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate config text. The format is picked from `path`'s extension; the
/// file itself is not read.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    match to_value(raw, path) {
        Ok(value) => check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics),
        Err(message) => {
            diagnostics.push(Diagnostic::new(Severity::Error, "syntax", "", message));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    }

    match parse_config(raw, path) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn to_value(raw: &str, path: &Path) -> Result<serde_json::Value, String> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "toml" => toml::from_str::<toml::Value>(raw)
            .map_err(|e| format!("TOML syntax error: {e}"))
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str::<serde_json::Value>(raw)
            .map_err(|e| format!("YAML syntax error: {e}")),
        "json" => serde_json::from_str(raw).map_err(|e| format!("JSON syntax error: {e}")),
        other => Err(format!("unsupported config format: .{other}")),
    }
}

/// Semantic checks on an already parsed config.
#[must_use]
pub fn validate_config(config: &TesseraConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    if config.host.tick_rate_hz == 0 {
        out.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "host.tick_rate_hz",
            "tick rate must be greater than zero",
        ));
    }

    if config.host.update_interval_ms == 0 {
        out.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "host.update_interval_ms",
            "update interval must be greater than zero",
        ));
    } else if config.scheduler.min_scan_interval_ms > config.host.update_interval_ms {
        out.push(Diagnostic::new(
            Severity::Warning,
            "semantic",
            "scheduler.min_scan_interval_ms",
            format!(
                "minimum scan interval ({} ms) is longer than the update interval ({} ms); \
                 plugins will update less often than configured",
                config.scheduler.min_scan_interval_ms, config.host.update_interval_ms
            ),
        ));
    }

    let entry = config.plugins.entry_file.trim();
    if entry.is_empty() {
        out.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "plugins.entry_file",
            "entry file name must not be empty",
        ));
    } else if entry.contains(['/', '\\']) {
        out.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "plugins.entry_file",
            "entry file must be a plain file name",
        ));
    }

    if !config.plugins.root.is_dir() {
        out.push(Diagnostic::new(
            Severity::Warning,
            "file-ref",
            "plugins.root",
            format!(
                "plugin root {} does not exist; only bundled plugins will mount",
                config.plugins.root.display()
            ),
        ));
    }

    if config.metrics.textfile.is_some() {
        if !config.metrics.enabled {
            out.push(Diagnostic::new(
                Severity::Warning,
                "semantic",
                "metrics.textfile",
                "metrics are disabled; the textfile will never be written",
            ));
        } else if config.metrics.write_interval_ms == 0 {
            out.push(Diagnostic::new(
                Severity::Error,
                "semantic",
                "metrics.write_interval_ms",
                "write interval must be greater than zero",
            ));
        }
    }

    if config.plugins.exclude.iter().any(|e| e.trim().is_empty()) {
        out.push(Diagnostic::new(
            Severity::Info,
            "semantic",
            "plugins.exclude",
            "empty exclude entries have no effect",
        ));
    }

    out
}
