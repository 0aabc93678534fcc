use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Status of a submission. `Queued` and `Judging` are the only
/// non-terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "JUDGING")]
    Judging,
    #[serde(rename = "AC")]
    Accepted,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "CE")]
    CompileError,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "MLE")]
    MemoryLimitExceeded,
    #[serde(rename = "PE")]
    PresentationError,
}

impl Verdict {
    pub const ALL: [Verdict; 9] = [
        Verdict::Queued,
        Verdict::Judging,
        Verdict::Accepted,
        Verdict::WrongAnswer,
        Verdict::CompileError,
        Verdict::RuntimeError,
        Verdict::TimeLimitExceeded,
        Verdict::MemoryLimitExceeded,
        Verdict::PresentationError,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Verdict::Queued => "QUEUED",
            Verdict::Judging => "JUDGING",
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer => "WA",
            Verdict::CompileError => "CE",
            Verdict::RuntimeError => "RE",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::PresentationError => "PE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Verdict::Queued | Verdict::Judging)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Verdict {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verdict::ALL
            .iter()
            .find(|v| v.code().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| Error::Argument(format!("unknown verdict: {}", s)))
    }
}
