//! File-name sanitization shared by remote key generation and archive entries.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Longest name, in characters, that survives sanitization.
pub const MAX_NAME_CHARS: usize = 255;

const FALLBACK_NAME: &str = "file";

static RESERVED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"|?*\x00-\x1F\x7F]"#).expect("static regex"));

static DOT_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{2,}").expect("static regex"));

/// Make a user-supplied file name safe for object keys and archive entries.
///
/// Strips reserved and control characters, neutralises path separators and
/// traversal sequences, and caps the length. Applying it twice yields the
/// same result as applying it once.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned = RESERVED_RE.replace_all(name, "");
    let cleaned = cleaned.replace(['/', '\\'], "_");
    let cleaned = DOT_RUN_RE.replace_all(&cleaned, ".");
    let cleaned = cleaned
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_end();

    let truncated: String = cleaned.chars().take(MAX_NAME_CHARS).collect();
    let truncated = truncated.trim_end();

    if truncated.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        truncated.to_string()
    }
}

/// Object key for an external destination: `<cohort start millis>-<sanitized name>`.
pub fn remote_key(started_at: DateTime<Utc>, file_name: &str) -> String {
    format!(
        "{}-{}",
        started_at.timestamp_millis(),
        sanitize_file_name(file_name)
    )
}
