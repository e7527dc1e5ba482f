//! Error excerpt extraction from notification bodies.

use once_cell::sync::Lazy;
use regex::Regex;

use cronwatch_types::truncate_excerpt;

static ERROR_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)error|fail|exception").expect("error pattern is valid"));

/// Lines of `body` mentioning an error, joined by newlines and truncated to
/// the excerpt limit. Empty when nothing matches.
pub fn extract_error(body: &str) -> String {
    let lines: Vec<&str> = body
        .lines()
        .filter(|line| ERROR_LINE_RE.is_match(line))
        .collect();
    truncate_excerpt(&lines.join("\n"))
}
