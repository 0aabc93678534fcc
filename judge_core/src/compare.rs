use regex::Regex;
use std::sync::OnceLock;

use crate::verdict::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonResult {
    Same,
    Different,
    PatternDifferent,
}

impl From<ComparisonResult> for Verdict {
    fn from(v: ComparisonResult) -> Self {
        match v {
            ComparisonResult::Same => Verdict::Accepted,
            ComparisonResult::Different => Verdict::WrongAnswer,
            ComparisonResult::PatternDifferent => Verdict::PresentationError,
        }
    }
}

pub trait ComparisonMode: Send + Sync {
    fn compare(&self, expected: &str, actual: &str) -> ComparisonResult;
}

/// Exact match after trimming the outer whitespace envelope, then after
/// unifying line endings. Anything else is `PatternDifferent` if the
/// whitespace-free content agrees and `Different` otherwise.
pub struct StandardCompare {
    pub strip_markup: bool,
}

impl ComparisonMode for StandardCompare {
    fn compare(&self, expected: &str, actual: &str) -> ComparisonResult {
        let (expected, actual) = prepare(expected, actual, self.strip_markup);

        let expected = expected.trim();
        let actual = actual.trim();
        if expected == actual {
            return ComparisonResult::Same;
        }

        let expected = normalize_line_endings(expected);
        let actual = normalize_line_endings(actual);
        if expected.trim() == actual.trim() {
            return ComparisonResult::Same;
        }

        ValueCompare.compare(&expected, &actual)
    }
}

/// Like [`StandardCompare`] but also ignores whitespace at the end of every
/// line.
pub struct LineCompare {
    pub strip_markup: bool,
}

impl ComparisonMode for LineCompare {
    fn compare(&self, expected: &str, actual: &str) -> ComparisonResult {
        let (expected, actual) = prepare(expected, actual, self.strip_markup);
        let expected = normalize_line_endings(&expected);
        let actual = normalize_line_endings(&actual);

        let str1: Vec<&str> = expected.trim().split('\n').map(|f| f.trim_end()).collect();
        let str2: Vec<&str> = actual.trim().split('\n').map(|f| f.trim_end()).collect();

        if str1 == str2 {
            return ComparisonResult::Same;
        }

        ValueCompare.compare(&expected, &actual)
    }
}

/// Whitespace-free content comparison. Never yields `Same`: equal content
/// reaching this point differs in layout.
pub struct ValueCompare;

impl ComparisonMode for ValueCompare {
    fn compare(&self, expected: &str, actual: &str) -> ComparisonResult {
        let str1: String = expected.chars().filter(|c| !c.is_whitespace()).collect();
        let str2: String = actual.chars().filter(|c| !c.is_whitespace()).collect();

        if !str1.is_empty() && str1 == str2 {
            ComparisonResult::PatternDifferent
        } else {
            ComparisonResult::Different
        }
    }
}

/// Markup is authoring noise in the expected output only. The program's
/// output is compared as printed.
fn prepare(expected: &str, actual: &str, strip_markup: bool) -> (String, String) {
    let expected = if strip_markup {
        markup().replace_all(expected, "").into_owned()
    } else {
        expected.to_string()
    };
    (expected, actual.to_string())
}

pub fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

fn markup() -> &'static Regex {
    static MARKUP: OnceLock<Regex> = OnceLock::new();
    MARKUP.get_or_init(|| Regex::new(r"<[^>]+>").expect("static pattern"))
}
