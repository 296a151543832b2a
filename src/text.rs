//! Small text helpers for console output and log hygiene.

use once_cell::sync::Lazy;
use regex::Regex;

/// Credential-bearing fragments as they show up in Redmine/Harvest error bodies and URLs.
static SECRET_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(bearer\s+|api[-_]?key[=:\s]+|token[=:\s]+|password[=:\s]+|[?&]key=)[^\s&,;"']+"#)
        .expect("invalid secret regex")
});

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts `value` to `limit` characters, marking the cut with `…`.
pub fn truncate_text(value: &str, limit: usize) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_string();
    }
    let keep = limit.saturating_sub(1);
    let end = trimmed
        .char_indices()
        .nth(keep)
        .map_or(trimmed.len(), |(index, _)| index);
    format!("{}…", &trimmed[..end])
}

/// One-line, bounded version of an error message with credential values masked.
pub fn redact_log_details(value: &str) -> String {
    let collapsed = collapse_whitespace(value);
    let masked = SECRET_REGEX.replace_all(&collapsed, "${1}<redacted>");
    truncate_text(&masked, 180)
}

/// Pads `value` with spaces to `width` characters (no truncation).
pub fn pad(value: &str, width: usize) -> String {
    format!("{:<width$}", value, width = width)
}
