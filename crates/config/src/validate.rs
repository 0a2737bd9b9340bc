//! Configuration validation.
//!
//! Flags syntax errors, unknown or misspelled fields, and values that parse
//! but make the host misbehave (zero dispatch depth, malformed option keys).

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::schema::HostConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", "option-key", "limits"
    pub category: &'static str,
    /// Dotted path, e.g. "process.output_limit"
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone)]
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

/// Known keys per table. `options` is free-form and not listed.
const TOP_LEVEL: &[&str] = &["process", "dispatch", "plugins", "options"];
const PROCESS_KEYS: &[&str] = &["default_timeout_ms", "output_limit"];
const DISPATCH_KEYS: &[&str] = &["max_depth"];
const PLUGINS_KEYS: &[&str] = &["disabled"];

fn known_keys(table: &str) -> Option<&'static [&'static str]> {
    match table {
        "" => Some(TOP_LEVEL),
        "process" => Some(PROCESS_KEYS),
        "dispatch" => Some(DISPATCH_KEYS),
        "plugins" => Some(PLUGINS_KEYS),
        _ => None,
    }
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

fn suggest<'a>(needle: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate the config file at `path`, or the discovered one when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file);

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "syntax",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(content) => validate_toml_str(&content),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate a TOML string without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    if let Some(table) = value.as_table() {
        check_unknown_fields(table, "", &mut diagnostics);
    }

    match toml::from_str::<HostConfig>(toml_str) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    table: &toml::map::Map<String, toml::Value>,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(known) = known_keys(prefix) else {
        return;
    };
    for (key, child) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if known.contains(&key.as_str()) {
            if let Some(child_table) = child.as_table() {
                check_unknown_fields(child_table, &path, diagnostics);
            }
            continue;
        }
        let message = match suggest(key, known) {
            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
            None => "unknown field".to_string(),
        };
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "unknown-field",
            path,
            message,
        });
    }
}

fn check_semantics(config: &HostConfig, diagnostics: &mut Vec<Diagnostic>) {
    if config.dispatch.max_depth == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "limits",
            path: "dispatch.max_depth".into(),
            message: "must be at least 1 or no event is ever dispatched".into(),
        });
    }
    if config.process.output_limit == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "limits",
            path: "process.output_limit".into(),
            message: "process output will always be empty".into(),
        });
    }
    for (key, value) in &config.options {
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "option-key",
                path: format!("options.{key:?}"),
                message: "option names must be non-empty and contain no whitespace".into(),
            });
        }
        if value.contains("${") {
            diagnostics.push(Diagnostic {
                severity: Severity::Info,
                category: "option-key",
                path: format!("options.{key}"),
                message: "contains an unresolved ${...} placeholder".into(),
            });
        }
    }
}
