//! Shaping of text shown back to the submitter.

use regex::Regex;
use std::{path::Path, sync::OnceLock};

/// Removes every mention of the workspace location. Absolute paths to a
/// solution file anywhere else are reduced to the file name.
pub fn scrub_paths(text: &str, workspace: &Path) -> String {
    let mut text = text.to_string();

    let mut prefixes = vec![workspace.to_path_buf()];
    if let Ok(canonical) = workspace.canonicalize() {
        if canonical != workspace {
            prefixes.push(canonical);
        }
    }
    for prefix in prefixes {
        let prefix = prefix.to_string_lossy().to_string();
        if prefix.is_empty() {
            continue;
        }
        text = text
            .replace(&format!("{}{}", prefix, std::path::MAIN_SEPARATOR), "")
            .replace(&prefix, "");
    }

    solution_path().replace_all(&text, "$name").into_owned()
}

fn solution_path() -> &'static Regex {
    static SOLUTION_PATH: OnceLock<Regex> = OnceLock::new();
    SOLUTION_PATH.get_or_init(|| {
        Regex::new(r#"(?:[A-Za-z]:\\|/)[^\s:'"]*[\\/](?P<name>solution(?:\.[A-Za-z0-9]+)?)\b"#)
            .expect("static pattern")
    })
}

/// Caps `text` at `max_chars` characters, marking the cut with `...`.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

pub fn clean(text: &str, workspace: &Path, max_chars: usize) -> String {
    truncate(scrub_paths(text, workspace).trim(), max_chars)
}

/// Note attached to a wrong answer.
pub fn mismatch(expected: &str, actual: &str, workspace: &Path, max_chars: usize) -> String {
    let half = max_chars / 2;
    let note = format!(
        "Expected: '{}' | Got: '{}'",
        truncate(expected.trim(), half),
        truncate(scrub_paths(actual, workspace).trim(), half)
    );
    truncate(&note, max_chars)
}
