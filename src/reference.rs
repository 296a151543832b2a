//! Extraction of `#123`-style issue references from free-text notes.

use once_cell::sync::Lazy;
use regex::Regex;

static ISSUE_REFERENCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([0-9]+)").expect("invalid issue reference regex"));

/// Returns the number of the first `#<digits>` token in `notes`.
///
/// Only the first reference counts; later ones are ignored even if the first turns out not to be
/// a Redmine issue (GitHub references look the same). Digit runs too long for a `u64` cannot name
/// an issue and are reported as no reference.
pub fn parse_issue_reference(notes: &str) -> Option<u64> {
    ISSUE_REFERENCE_REGEX
        .captures(notes)
        .and_then(|capture| capture[1].parse().ok())
}
