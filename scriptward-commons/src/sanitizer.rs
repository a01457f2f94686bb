//! Output scrubbing for text returned from sandboxed runs.
//!
//! Two operations:
//! - `scrub_output_lines` drops lines that mention internal markers, together
//!   with the caret underline Python prints beneath a traceback source line.
//! - `truncate_chars` cuts text at a character (not byte) limit and appends
//!   [`TRUNCATION_MARKER`] after a blank line.

use regex::Regex;
use std::sync::LazyLock;

/// Appended after a blank line whenever text is cut short.
pub const TRUNCATION_MARKER: &str = "[...truncated...]";

/// Traceback underline rows such as `    ^^^^^^` or `    ~~~~^^^`.
static CARET_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"^\s*[\^~]+[\s\^~]*$"));

/// Remove every line containing one of `markers`.
///
/// A caret-only line directly following a removed line is removed as well,
/// so no orphaned underline points at a line the caller never sees.
pub fn scrub_output_lines<S: AsRef<str>>(text: &str, markers: &[S]) -> String {
    let mut kept = Vec::new();
    let mut after_removed = false;

    for line in text.lines() {
        if markers.iter().any(|marker| line.contains(marker.as_ref())) {
            after_removed = true;
            continue;
        }
        if after_removed && CARET_LINE_REGEX.is_match(line) {
            continue;
        }
        after_removed = false;
        kept.push(line);
    }

    kept.join("\n")
}

/// Keep at most `limit` characters of `text`.
///
/// Returns the (possibly shortened) text and whether anything was cut.
pub fn truncate_chars(text: &str, limit: usize) -> (String, bool) {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => {
            let head = text.get(..cut).unwrap_or(text);
            (format!("{head}\n\n{TRUNCATION_MARKER}"), true)
        }
        None => (text.to_owned(), false),
    }
}

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        // Panic is acceptable thanks to the `load_regex` test
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_regex() {
        let _ = scrub_output_lines("test", &["marker"]);
    }

    #[test]
    fn scrub_removes_marker_lines() {
        let text = "first\nsys.path is ['/x']\nsecond\n__builtins__ leak\nthird";
        assert_eq!(
            scrub_output_lines(text, &["__builtins__", "sys.path"]),
            "first\nsecond\nthird"
        );
    }

    #[test]
    fn scrub_removes_underline_after_removed_line() {
        let text = "Traceback (most recent call last):\n  File \"/tmp/h.py\", line 3\n    ^^^^^^\n  File \"<sandbox>\", line 1\n    1/0\n    ~^~\nZeroDivisionError: division by zero";
        assert_eq!(
            scrub_output_lines(text, &["/tmp/h.py"]),
            "Traceback (most recent call last):\n  File \"<sandbox>\", line 1\n    1/0\n    ~^~\nZeroDivisionError: division by zero"
        );
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let (text, truncated) = truncate_chars("héllo wörld", 5);
        assert!(truncated);
        assert_eq!(text, format!("héllo\n\n{TRUNCATION_MARKER}"));
    }

    #[test]
    fn truncate_leaves_short_text_untouched() {
        let (text, truncated) = truncate_chars("short", 5);
        assert!(!truncated);
        assert_eq!(text, "short");
    }
}
