//! Cron notification subject parsing.

use once_cell::sync::Lazy;
use regex::Regex;

/// `[Cron <USER@SERVER>: COMMAND]`. The command stops at the first `]`.
static SUBJECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[Cron <([^@>]+)@([^@>]+)>: (.+?)\]").expect("subject pattern is valid")
});

/// Job-identifying fields taken verbatim from a subject line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSubject {
    pub cron_user: String,
    pub server_name: String,
    pub command: String,
}

/// Extract the job fields from a notification subject.
///
/// Returns `None` for subjects that are not cron notifications.
pub fn parse_subject(subject: &str) -> Option<ParsedSubject> {
    let caps = SUBJECT_RE.captures(subject)?;
    Some(ParsedSubject {
        cron_user: caps[1].to_string(),
        server_name: caps[2].to_string(),
        command: caps[3].to_string(),
    })
}
