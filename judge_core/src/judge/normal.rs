use std::path::Path;

use log::debug;

use super::diagnostic;
use crate::{
    compare::ComparisonMode,
    compile::CompiledProgram,
    problem::TestCase,
    sandbox::{LimitConfig, RunOutcome, Sandbox},
    verdict::Verdict,
};

/// Verdict and usage of one test case.
#[derive(Debug, Clone)]
pub struct CaseResult {
    pub verdict: Verdict,
    /// Seconds.
    pub time: f64,
    /// KB.
    pub memory: u64,
    /// Shown to the submitter when the case fails.
    pub message: String,
}

/// Runs one program against one stdin/stdout test case.
pub struct NormalJudge<'a> {
    sandbox: &'a Sandbox,
    program: &'a CompiledProgram,
    workdir: &'a Path,
    limit: LimitConfig,
    comparation: &'a dyn ComparisonMode,
    max_message_chars: usize,
}

impl<'a> NormalJudge<'a> {
    pub fn new(
        sandbox: &'a Sandbox,
        program: &'a CompiledProgram,
        workdir: &'a Path,
        limit: LimitConfig,
        comparation: &'a dyn ComparisonMode,
        max_message_chars: usize,
    ) -> Self {
        Self {
            sandbox,
            program,
            workdir,
            limit,
            comparation,
            max_message_chars,
        }
    }

    pub fn judge(&self, case: &TestCase) -> CaseResult {
        let result = self
            .sandbox
            .run(self.program, self.workdir, &case.input, &self.limit);
        debug!(
            "case finished: {:?} in {:.3}s, {}KB",
            result.outcome, result.time, result.memory
        );

        let (verdict, message) = match result.outcome {
            RunOutcome::Ok => {
                let verdict: Verdict = self
                    .comparation
                    .compare(&case.expected_output, &result.stdout)
                    .into();
                let message = if verdict == Verdict::WrongAnswer {
                    diagnostic::mismatch(
                        &case.expected_output,
                        &result.stdout,
                        self.workdir,
                        self.max_message_chars,
                    )
                } else {
                    String::new()
                };
                (verdict, message)
            }
            RunOutcome::RuntimeError => (
                Verdict::RuntimeError,
                diagnostic::clean(&result.error, self.workdir, self.max_message_chars),
            ),
            RunOutcome::TimeLimitExceeded => (Verdict::TimeLimitExceeded, String::new()),
            RunOutcome::MemoryLimitExceeded => (Verdict::MemoryLimitExceeded, String::new()),
        };

        CaseResult {
            verdict,
            time: result.time,
            memory: result.memory,
            message,
        }
    }
}
