//! Utility functions for string handling, timestamps and the file system.
//!
//! - String truncation for logs and for the LLM character budget
//! - Filesystem-safe slugs for per-article directories
//! - JSON error classification for truncated LLM replies
//! - Output directory validation and artifact writes

use std::fs as stdfs;
use std::path::Path;

use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, Result};

/// Appended to a body that was cut to the LLM character budget.
pub const TRUNCATION_MARKER: &str = "\n\n[content truncated]";

static FORBIDDEN_PATH_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]+"#).expect("static regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static NON_SLUG_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9A-Za-z\p{Han} _-]+").expect("static regex"));

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a character boundary at or below `max` bytes with
/// an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Cut `body` to `budget` characters for an LLM call.
///
/// Returns the text to forward and whether it was cut. A cut body is exactly
/// the first `budget` characters followed by [`TRUNCATION_MARKER`].
pub fn truncate_for_llm(body: &str, budget: usize) -> (String, bool) {
    match body.char_indices().nth(budget) {
        Some((cut, _)) => (format!("{}{}", &body[..cut], TRUNCATION_MARKER), true),
        None => (body.to_string(), false),
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the LLM response is cut off (e.g., due to token limits), the
/// resulting JSON fails to parse with an EOF error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Turn a title into a directory-name-safe slug.
///
/// Strips characters Windows forbids in paths, keeps ASCII alphanumerics,
/// CJK ideographs, `_` and `-`, joins words with `_` and caps the result at
/// `max_len` characters. Empty input becomes `"untitled"`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(safe_slug("Hello: World?", 80), "Hello_World");
/// assert_eq!(safe_slug("", 80), "untitled");
/// ```
pub fn safe_slug(text: &str, max_len: usize) -> String {
    let text = FORBIDDEN_PATH_CHARS.replace_all(text.trim(), " ");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = NON_SLUG_CHARS.replace_all(text.trim(), "");
    let slug: String = text
        .trim()
        .replace(' ', "_")
        .chars()
        .take(max_len)
        .collect();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// Model-written text flattened to one line for a Markdown document.
///
/// Whitespace runs (newlines included) collapse to one space and leading `#`
/// marks are dropped, so the text can never open a heading of its own.
///
/// ```ignore
/// assert_eq!(inline_text("## Pwned\n\n# Title"), "Pwned # Title");
/// ```
pub fn inline_text(text: &str) -> String {
    let flat = WHITESPACE.replace_all(text.trim(), " ");
    flat.trim_start_matches(|c: char| c == '#' || c.is_whitespace())
        .to_string()
}

/// Local timestamp used in run directory and artifact names.
pub fn run_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    let scratch = path.join("..__write_check__");
    match stdfs::File::create(&scratch) {
        Ok(_) => {
            let _ = stdfs::remove_file(&scratch);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(PipelineError::io(path, e)),
    }
}

/// Write a text artifact, creating parent directories.
pub async fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::io(parent, e))?;
    }
    fs::write(path, contents)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    debug!(path = %path.display(), bytes = contents.len(), "Wrote artifact");
    Ok(())
}

/// Write a value as pretty JSON.
pub async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_text(path, &json).await
}

/// Path rendered with forward slashes, as shown to users and in events.
pub fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let s = "é".repeat(10);
        let result = truncate_for_log(&s, 3);
        assert!(result.starts_with('é'));
        assert!(result.contains("(+18 bytes)"));
    }

    #[test]
    fn test_truncate_for_llm_exact_prefix_plus_marker() {
        let body = "0123456789";
        let (cut, truncated) = truncate_for_llm(body, 4);
        assert!(truncated);
        assert_eq!(cut, format!("0123{TRUNCATION_MARKER}"));

        let (same, truncated) = truncate_for_llm(body, 10);
        assert!(!truncated);
        assert_eq!(same, body);
    }

    #[test]
    fn test_truncate_for_llm_counts_characters() {
        let body = "新闻".repeat(50);
        let (cut, truncated) = truncate_for_llm(&body, 7);
        assert!(truncated);
        let prefix: String = body.chars().take(7).collect();
        assert_eq!(cut, format!("{prefix}{TRUNCATION_MARKER}"));
        assert!(cut.chars().count() <= 7 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_safe_slug() {
        assert_eq!(safe_slug("Hello World", 80), "Hello_World");
        assert_eq!(safe_slug("Fed: rates/inflation?", 80), "Fed_rates_inflation");
        assert_eq!(safe_slug("Trump-Xi 'situationship'", 80), "Trump-Xi_situationship");
        assert_eq!(safe_slug("特朗普 关税", 80), "特朗普_关税");
        assert_eq!(safe_slug("   ", 80), "untitled");
        assert_eq!(safe_slug("@@@", 80), "untitled");
        assert_eq!(safe_slug(&"x".repeat(200), 80).len(), 80);
    }

    #[test]
    fn test_run_timestamp_shape() {
        let ts = run_timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(&ts[8..9], "_");
    }

    #[test]
    fn test_looks_truncated() {
        let result: std::result::Result<serde_json::Value, _> =
            serde_json::from_str(r#"{"field": "value"#);
        assert!(looks_truncated(&result.unwrap_err()));
    }

    #[test]
    fn test_display_path_uses_forward_slashes() {
        assert_eq!(display_path(Path::new("reports/run")), "reports/run");
    }

    #[test]
    fn inline_text_cannot_open_headings() {
        assert_eq!(inline_text("## Pwned\n\n# Title"), "Pwned # Title");
        assert_eq!(inline_text("  plain   text "), "plain text");
        assert_eq!(inline_text("###"), "");
    }
}
