use std::{path::Path, sync::Arc, time::Duration};

use crate::{
    compile::CompiledProgram,
    config::JudgeConfig,
    supervisor::{RunLimits, RunRequest, Supervisor, Termination},
};

/// Limits of a single test-case run, from the problem.
#[derive(Debug, Clone, Copy)]
pub struct LimitConfig {
    pub time_limit: Duration,
    /// MB.
    pub memory_limit: u64,
}

impl LimitConfig {
    pub fn new(time_limit: f64, memory_limit: u64) -> Self {
        Self {
            time_limit: Duration::from_secs_f64(time_limit),
            memory_limit,
        }
    }

    pub fn memory_limit_kb(&self) -> u64 {
        self.memory_limit * 1024
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub outcome: RunOutcome,
    /// Seconds.
    pub time: f64,
    /// KB.
    pub memory: u64,
    pub stdout: String,
    /// Error text for `RuntimeError`, stderr otherwise.
    pub error: String,
}

/// Runs compiled programs against one input under the problem limits.
pub struct Sandbox {
    supervisor: Arc<dyn Supervisor>,
    output_bytes: usize,
    poll_interval: Duration,
    cpu_rlimit: bool,
}

impl Sandbox {
    pub fn new(supervisor: Arc<dyn Supervisor>, config: &JudgeConfig) -> Self {
        Self {
            supervisor,
            output_bytes: config.max_output_bytes,
            poll_interval: config.poll_interval(),
            cpu_rlimit: config.cpu_rlimit,
        }
    }

    pub fn supervisor(&self) -> &dyn Supervisor {
        self.supervisor.as_ref()
    }

    pub fn run(
        &self,
        program: &CompiledProgram,
        workdir: &Path,
        input: &str,
        limit: &LimitConfig,
    ) -> ExecutionResult {
        let request = RunRequest {
            command: program.command.clone(),
            workdir: workdir.to_path_buf(),
            stdin: input.to_string(),
            limits: RunLimits {
                time: limit.time_limit,
                memory: limit.memory_limit_kb(),
                output_bytes: self.output_bytes,
                poll_interval: self.poll_interval,
                cpu_rlimit: self.cpu_rlimit,
            },
        };
        let report = self.supervisor.supervise(&request);
        let time = report.elapsed.as_secs_f64();

        let (outcome, error) = match report.termination {
            Termination::Exited(0) => (RunOutcome::Ok, report.stderr),
            Termination::Exited(code) => {
                if out_of_memory(&report.stderr) {
                    (RunOutcome::MemoryLimitExceeded, report.stderr)
                } else {
                    let error = describe(&report.stderr, || {
                        format!("Process exited with code {}", code)
                    });
                    (RunOutcome::RuntimeError, error)
                }
            }
            Termination::Signaled(signal) => {
                if out_of_memory(&report.stderr) {
                    (RunOutcome::MemoryLimitExceeded, report.stderr)
                } else {
                    let error = describe(&report.stderr, || {
                        format!("terminated by signal {}", signal)
                    });
                    (RunOutcome::RuntimeError, error)
                }
            }
            Termination::TimeLimit => (RunOutcome::TimeLimitExceeded, report.stderr),
            Termination::MemoryLimit => (RunOutcome::MemoryLimitExceeded, report.stderr),
            Termination::OutputLimit => (
                RunOutcome::RuntimeError,
                format!("output limit exceeded ({} bytes)", self.output_bytes),
            ),
            Termination::Failed(msg) => {
                return ExecutionResult {
                    outcome: RunOutcome::RuntimeError,
                    time: 0.0,
                    memory: 0,
                    stdout: String::new(),
                    error: msg,
                }
            }
        };

        let memory = match outcome {
            // an allocation refused before the sampler saw the growth
            RunOutcome::MemoryLimitExceeded => report.peak_memory.max(limit.memory_limit_kb()),
            _ => report.peak_memory,
        };

        ExecutionResult {
            outcome,
            time,
            memory,
            stdout: report.stdout,
            error,
        }
    }
}

const CPP_BAD_ALLOC: &str = "terminate called after throwing an instance of 'std::bad_alloc'";

/// An uncaught `std::bad_alloc`, or a Python traceback ending in
/// `MemoryError`.
fn out_of_memory(stderr: &str) -> bool {
    if stderr.contains(CPP_BAD_ALLOC) {
        return true;
    }
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map_or(false, |last| last.starts_with("MemoryError"))
}

fn describe(stderr: &str, fallback: impl FnOnce() -> String) -> String {
    if stderr.trim().is_empty() {
        fallback()
    } else {
        stderr.to_string()
    }
}
