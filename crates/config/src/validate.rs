//! Configuration validation.
//!
//! Flags unknown or misspelled fields, type errors, and settings that would
//! leave the component unable to talk to its server.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use secrecy::ExposeSecret;

use crate::schema::PusherConfig;

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
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// One of "syntax", "unknown-field", "type-error", "semantic", "file-ref".
    pub category: &'static str,
    /// Dotted path, e.g. "pubsub.reply_timeout_secs"
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

// ── Known keys ──────────────────────────────────────────────────────────────

fn known_sections() -> HashMap<&'static str, &'static [&'static str]> {
    HashMap::from([
        ("component", &["jid", "host", "port", "secret"][..]),
        ("pubsub", &["channel_server", "reply_timeout_secs"][..]),
        ("store", &["database_url"][..]),
        ("notifications", &["template_dir", "from_address", "spool_dir"][..]),
    ])
}

/// Levenshtein edit distance.
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

/// Closest candidate within `max_distance` edits.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

fn unknown_field(path: String, key: &str, candidates: &[&str]) -> Diagnostic {
    let message = match suggest(key, candidates, 3) {
        Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
        None => "unknown field".to_string(),
    };
    Diagnostic::new(Severity::Error, "unknown-field", path, message)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate the config file at `path`, or the discovered one when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let is_toml = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|e| e == "toml");

    match std::fs::read_to_string(&actual_path) {
        Ok(content) if is_toml => {
            let mut result = validate_toml_str(&crate::env_subst::substitute_env(&content));
            result.config_path = Some(actual_path);
            result
        },
        Ok(_) => {
            let mut diagnostics = Vec::new();
            match crate::loader::load_config(&actual_path) {
                Ok(config) => check_semantics(&config, &mut diagnostics),
                Err(e) => diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "type-error",
                    "",
                    e.to_string(),
                )),
            }
            ValidationResult {
                diagnostics,
                config_path: Some(actual_path),
            }
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: Some(actual_path),
        },
    }
}

/// Semantic checks on an already loaded config.
#[must_use]
pub fn validate_config(config: &PusherConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_semantics(config, &mut diagnostics);
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Validate a TOML string without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    if let Some(table) = value.as_table() {
        check_unknown_fields(table, &mut diagnostics);
    }

    match toml::from_str::<PusherConfig>(toml_str) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
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

fn check_unknown_fields(
    table: &toml::map::Map<String, toml::Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let sections = known_sections();
    let section_names: Vec<&str> = sections.keys().copied().collect();

    for (key, value) in table {
        let Some(fields) = sections.get(key.as_str()) else {
            diagnostics.push(unknown_field(key.clone(), key, &section_names));
            continue;
        };
        let Some(inner) = value.as_table() else {
            continue;
        };
        for field in inner.keys() {
            if !fields.contains(&field.as_str()) {
                diagnostics.push(unknown_field(format!("{key}.{field}"), field, fields));
            }
        }
    }
}

fn check_semantics(config: &PusherConfig, diagnostics: &mut Vec<Diagnostic>) {
    if config.pubsub.reply_timeout_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "pubsub.reply_timeout_secs",
            "must be greater than zero; every synchronous request would time out immediately",
        ));
    }

    if config.pubsub.channel_server.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "pubsub.channel_server",
            "channel server address is empty",
        ));
    }

    if config.component.jid.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "component.jid",
            "component address is empty",
        ));
    }

    match &config.component.secret {
        None => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "semantic",
            "component.secret",
            "no shared secret set; the server will likely refuse the handshake",
        )),
        Some(s) if s.expose_secret().starts_with("${") => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "semantic",
            "component.secret",
            "secret looks like an unresolved environment placeholder",
        )),
        Some(_) => {},
    }

    if let Some(url) = &config.store.database_url
        && !url.starts_with("sqlite:")
    {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "store.database_url",
            "only sqlite: URLs are supported",
        ));
    }

    if config.notifications.spool_dir.is_none() {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "semantic",
            "notifications.spool_dir",
            "no spool directory; notifications will only be logged",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[component]
jid = "pusher.example.com"
secret = "s3cret"

[pubsub]
channel_server = "channels.example.com"
reply_timeout_secs = 5

[notifications]
spool_dir = "/var/spool/pusher"
"#;

    #[test]
    fn valid_config_has_no_errors() {
        let result = validate_toml_str(VALID);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.count(Severity::Warning), 0);
    }

    #[test]
    fn misspelled_field_gets_suggestion() {
        let result = validate_toml_str("[pubsub]\nchanel_server = \"x\"\n");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.path == "pubsub.chanel_server")
            .unwrap();
        assert_eq!(d.category, "unknown-field");
        assert!(d.message.contains("channel_server"));
    }

    #[test]
    fn unknown_section_flagged() {
        let result = validate_toml_str("[pubsb]\n");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field")
            .unwrap();
        assert_eq!(d.path, "pubsb");
        assert!(d.message.contains("pubsub"));
    }

    #[test]
    fn zero_timeout_is_an_error() {
        let result = validate_toml_str("[pubsub]\nreply_timeout_secs = 0\n");
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "pubsub.reply_timeout_secs")
        );
    }

    #[test]
    fn loaded_config_with_zero_timeout_is_an_error() {
        let mut config = PusherConfig::default();
        config.pubsub.reply_timeout_secs = 0;
        let result = validate_config(&config);
        assert!(result.has_errors());

        config.pubsub.reply_timeout_secs = 5;
        assert!(!validate_config(&config).has_errors());
    }

    #[test]
    fn type_error_reported() {
        let result = validate_toml_str("[component]\nport = \"not a port\"\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn syntax_error_short_circuits() {
        let result = validate_toml_str("[component\n");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn missing_secret_warns() {
        let result = validate_toml_str("");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "component.secret" && d.severity == Severity::Warning)
        );
    }

    #[test]
    fn validates_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pusher.toml");
        std::fs::write(&path, VALID).unwrap();
        let result = validate(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert!(!result.has_errors());
    }
}
