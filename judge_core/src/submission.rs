use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::verdict::Verdict;

pub type SubmissionId = u64;

/// A user's attempt at a problem plus everything the judge writes back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub user: String,
    pub problem: String,
    pub language: String,
    pub code: String,
    pub verdict: Verdict,
    /// Seconds, maximum over the attempted test cases.
    #[serde(rename = "executionTime")]
    pub execution_time: f64,
    /// KB, maximum over the attempted test cases.
    #[serde(rename = "memoryUsed")]
    pub memory_used: u64,
    #[serde(rename = "compilationError", default)]
    pub compilation_error: String,
    #[serde(rename = "runtimeError", default)]
    pub runtime_error: String,
    #[serde(rename = "testCasesPassed")]
    pub test_cases_passed: u32,
    #[serde(rename = "totalTestCases")]
    pub total_test_cases: u32,
    #[serde(rename = "isTest", default)]
    pub is_test: bool,
    #[serde(rename = "submittedAt")]
    pub submitted_at: DateTime<Utc>,
    #[serde(rename = "judgedAt")]
    pub judged_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn new(
        id: SubmissionId,
        user: impl Into<String>,
        problem: impl Into<String>,
        language: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            id,
            user: user.into(),
            problem: problem.into(),
            language: language.into(),
            code: code.into(),
            verdict: Verdict::Queued,
            execution_time: 0.0,
            memory_used: 0,
            compilation_error: String::new(),
            runtime_error: String::new(),
            test_cases_passed: 0,
            total_test_cases: 0,
            is_test: false,
            submitted_at: Utc::now(),
            judged_at: None,
        }
    }

    pub fn is_judged(&self) -> bool {
        self.verdict.is_terminal()
    }

    /// Moves a queued submission into `Judging`. Returns false when the
    /// submission is not waiting in the queue.
    pub fn mark_judging(&mut self) -> bool {
        if self.verdict != Verdict::Queued {
            return false;
        }
        self.verdict = Verdict::Judging;
        true
    }

    /// Writes a terminal result. A submission that already holds a terminal
    /// verdict is left untouched.
    pub fn record(&mut self, report: &JudgeReport) -> bool {
        if self.is_judged() {
            log::warn!(
                "submission {} already judged as {}, ignoring {}",
                self.id,
                self.verdict,
                report.verdict
            );
            return false;
        }
        debug_assert!(report.verdict.is_terminal());

        self.verdict = report.verdict;
        self.execution_time = report.execution_time;
        self.memory_used = report.memory_used;
        self.compilation_error = report.compilation_error.clone();
        self.runtime_error = report.runtime_error.clone();
        self.test_cases_passed = report.test_cases_passed;
        self.total_test_cases = report.total_test_cases;
        self.judged_at = Some(Utc::now());
        true
    }

    /// Marks the submission as failed by the judge itself.
    pub fn fail(&mut self, msg: impl Into<String>) -> bool {
        self.record(&JudgeReport::system_error(msg))
    }
}

/// Aggregate outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeReport {
    pub verdict: Verdict,
    pub execution_time: f64,
    pub memory_used: u64,
    pub compilation_error: String,
    pub runtime_error: String,
    pub test_cases_passed: u32,
    pub total_test_cases: u32,
}

impl JudgeReport {
    pub fn compile_error(msg: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::CompileError,
            execution_time: 0.0,
            memory_used: 0,
            compilation_error: msg.into(),
            runtime_error: String::new(),
            test_cases_passed: 0,
            total_test_cases: 0,
        }
    }

    pub fn system_error(msg: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::RuntimeError,
            execution_time: 0.0,
            memory_used: 0,
            compilation_error: String::new(),
            runtime_error: format!("System error: {}", msg.into()),
            test_cases_passed: 0,
            total_test_cases: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_verdict_is_kept() {
        let mut submission = Submission::new(1, "u", "p", "c", "int main(){}");
        assert!(submission.mark_judging());
        assert!(!submission.mark_judging());

        assert!(submission.record(&JudgeReport::compile_error("boom")));
        assert_eq!(submission.verdict, Verdict::CompileError);
        assert!(submission.judged_at.is_some());

        assert!(!submission.fail("late failure"));
        assert_eq!(submission.verdict, Verdict::CompileError);
        assert_eq!(submission.compilation_error, "boom");
        assert!(submission.runtime_error.is_empty());
    }

    #[test]
    fn json_shape() {
        let submission = Submission::new(7, "alice", "a-plus-b", "python", "print(1)");
        let s = serde_json::to_string(&submission).unwrap();
        assert!(s.contains("\"verdict\":\"QUEUED\""));
        assert!(s.contains("\"testCasesPassed\":0"));

        let back: Submission = serde_json::from_str(&s).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.submitted_at, submission.submitted_at);
    }
}
