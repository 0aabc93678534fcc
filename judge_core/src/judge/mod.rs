//! The evaluation pipeline of one submission: screen, compile, run every
//! test case in order, stop at the first failure.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::{debug, info, warn};

use crate::{
    compare::ComparisonMode,
    compile::{self, CompileResult, LanguageTable},
    config::JudgeConfig,
    error::{Error, Result},
    problem::Problem,
    sandbox::{LimitConfig, Sandbox},
    screen::SecurityScreen,
    submission::{JudgeReport, Submission, SubmissionId},
    supervisor::{self, Supervisor},
    verdict::Verdict,
    workspace::Workspace,
};

pub mod diagnostic;
pub mod normal;

pub use normal::{CaseResult, NormalJudge};

/// Progress of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Compiling,
    Running(usize),
    Terminal(Verdict),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Pending => write!(f, "pending"),
            Stage::Compiling => write!(f, "compiling"),
            Stage::Running(i) => write!(f, "running case {}", i),
            Stage::Terminal(verdict) => write!(f, "finished with {}", verdict),
        }
    }
}

/// Source code to judge, detached from any stored submission.
#[derive(Debug, Clone, Copy)]
pub struct Solution<'a> {
    pub id: SubmissionId,
    pub language: &'a str,
    pub code: &'a str,
}

impl<'a> From<&'a Submission> for Solution<'a> {
    fn from(submission: &'a Submission) -> Self {
        Self {
            id: submission.id,
            language: &submission.language,
            code: &submission.code,
        }
    }
}

pub struct Evaluator {
    config: JudgeConfig,
    languages: LanguageTable,
    screen: SecurityScreen,
    sandbox: Sandbox,
    comparation: Box<dyn ComparisonMode>,
}

impl Evaluator {
    pub fn new(config: JudgeConfig) -> Result<Self> {
        Self::with_supervisor(config, supervisor::native())
    }

    pub fn with_supervisor(config: JudgeConfig, supervisor: Arc<dyn Supervisor>) -> Result<Self> {
        config.check_valid()?;
        let languages = LanguageTable::from_config(&config)?;
        let screen = SecurityScreen::from_config(&config.screen)?;
        let sandbox = Sandbox::new(supervisor, &config);
        let comparation = config.compare_mode.build(config.strip_markup);
        Ok(Self {
            config,
            languages,
            screen,
            sandbox,
            comparation,
        })
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    pub fn languages(&self) -> &LanguageTable {
        &self.languages
    }

    pub fn screen(&self) -> &SecurityScreen {
        &self.screen
    }

    /// Judges `submission` and records the result on it. A submission that
    /// is already terminal keeps its verdict.
    pub fn evaluate(&self, submission: &mut Submission, problem: &Problem, sample_only: bool) -> JudgeReport {
        let report = self.judge(Solution::from(&*submission), problem, sample_only);
        submission.record(&report);
        report
    }

    /// Never fails: infrastructure errors and panics become a runtime error
    /// verdict.
    pub fn judge(&self, solution: Solution<'_>, problem: &Problem, sample_only: bool) -> JudgeReport {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.judge_inner(solution, problem, sample_only)
        }));
        let report = match result {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => {
                warn!("judging {} failed: {}", solution.id, err);
                JudgeReport::system_error(err.to_string())
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                log::error!("judging {} panicked: {}", solution.id, msg);
                JudgeReport::system_error(msg)
            }
        };
        info!(
            "submission {} judged {} ({}/{}, {:.3}s, {}KB)",
            solution.id,
            report.verdict,
            report.test_cases_passed,
            report.total_test_cases,
            report.execution_time,
            report.memory_used
        );
        report
    }

    fn judge_inner(&self, solution: Solution<'_>, problem: &Problem, sample_only: bool) -> Result<JudgeReport> {
        let id = solution.id;
        let mut stage = Stage::Pending;
        debug!("submission {}: {}", id, stage);

        let language = match self.languages.get(solution.language) {
            Ok(language) => language,
            Err(Error::UnsupportedLanguage(name)) => {
                return Ok(JudgeReport::compile_error(format!("unsupported language: {}", name)))
            }
            Err(err) => return Err(err),
        };

        if let Some(reason) = self.screen.screen(solution.code, &language.id).reason() {
            return Ok(JudgeReport::compile_error(format!("Security violation: {}", reason)));
        }

        if solution.code.len() > self.config.max_source_bytes {
            return Ok(JudgeReport::compile_error(format!(
                "Code size exceeds limit ({}KB)",
                self.config.max_source_bytes / 1000
            )));
        }

        problem.check_valid()?;
        let limit = LimitConfig::new(problem.time_limit, problem.memory_limit);

        let mut workspace = Workspace::create(&self.config.workspace_root(), id)?;
        workspace.write_source(&language.source_name(), solution.code)?;

        stage = Stage::Compiling;
        debug!("submission {}: {}", id, stage);
        let program = match compile::compile(language, &workspace, self.sandbox.supervisor(), &self.config)? {
            CompileResult::OK(program) => program,
            CompileResult::LimitExceeded(msg) | CompileResult::CompileError(msg) => {
                let mut msg = diagnostic::clean(&msg, workspace.path(), self.config.max_message_chars);
                if msg.is_empty() {
                    msg = "Compilation failed".into();
                }
                return Ok(JudgeReport::compile_error(msg));
            }
        };

        let cases = problem.select_cases(sample_only);
        if cases.is_empty() {
            warn!("problem `{}` has no test cases to run", problem.name);
        }

        let judge = NormalJudge::new(
            &self.sandbox,
            &program,
            workspace.path(),
            limit,
            self.comparation.as_ref(),
            self.config.max_message_chars,
        );
        let mut report = JudgeReport {
            verdict: Verdict::Accepted,
            execution_time: 0.0,
            memory_used: 0,
            compilation_error: String::new(),
            runtime_error: String::new(),
            test_cases_passed: 0,
            total_test_cases: cases.len() as u32,
        };
        for (i, case) in cases.iter().enumerate() {
            stage = Stage::Running(i + 1);
            debug!("submission {}: {}", id, stage);

            let result = judge.judge(case);
            report.execution_time = report.execution_time.max(result.time);
            report.memory_used = report.memory_used.max(result.memory);
            if result.verdict != Verdict::Accepted {
                report.verdict = result.verdict;
                report.runtime_error = result.message;
                break;
            }
            report.test_cases_passed += 1;
        }

        stage = Stage::Terminal(report.verdict);
        debug!("submission {}: {}", id, stage);

        let failures = workspace.cleanup();
        if failures > 0 {
            warn!("{} workspace entries of {} left behind", failures, id);
        }
        Ok(report)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "evaluation panicked".into()
    }
}
