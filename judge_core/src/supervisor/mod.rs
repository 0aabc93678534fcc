//! Launching one untrusted process and watching it until it ends.
//!
//! The supervisor knows nothing about verdicts; it only reports how the
//! process terminated and what it consumed. [`crate::sandbox`] turns that
//! into a run outcome.

use std::{
    io::Read,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

#[cfg(not(unix))]
mod portable;
#[cfg(unix)]
mod unix;

#[cfg(not(unix))]
pub use portable::PortableSupervisor;
#[cfg(unix)]
pub use unix::UnixSupervisor;

/// A fully resolved program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in self.args.iter() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunLimits {
    pub time: Duration,
    /// KB.
    pub memory: u64,
    /// Cap on each of stdout and stderr.
    pub output_bytes: usize,
    pub poll_interval: Duration,
    /// Also install a kernel CPU-time limit slightly above `time`.
    pub cpu_rlimit: bool,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub command: CommandLine,
    pub workdir: PathBuf,
    pub stdin: String,
    pub limits: RunLimits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    TimeLimit,
    MemoryLimit,
    OutputLimit,
    /// The process could not be started or tracked.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub termination: Termination,
    pub elapsed: Duration,
    /// KB.
    pub peak_memory: u64,
    pub stdout: String,
    pub stderr: String,
}

impl RunReport {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            termination: Termination::Failed(msg.into()),
            elapsed: Duration::from_secs(0),
            peak_memory: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Runs a process under time and memory limits. Implementations must kill
/// the whole process tree before returning.
pub trait Supervisor: Send + Sync {
    fn supervise(&self, request: &RunRequest) -> RunReport;
}

/// The supervisor of the current platform.
pub fn native() -> Arc<dyn Supervisor> {
    #[cfg(unix)]
    {
        Arc::new(UnixSupervisor)
    }
    #[cfg(not(unix))]
    {
        Arc::new(PortableSupervisor)
    }
}

/// Background reader of one output pipe, keeping at most `limit` bytes.
pub(crate) struct Capture {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Capture {
    pub(crate) fn spawn<R>(reader: Option<R>, limit: usize, overflow: Arc<AtomicBool>) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut reader) = reader {
                let mut chunk = [0u8; 8192];
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            let room = limit.saturating_sub(buf.len());
                            if n > room {
                                buf.extend_from_slice(&chunk[..room]);
                                overflow.store(true, Ordering::SeqCst);
                            } else {
                                buf.extend_from_slice(&chunk[..n]);
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            }
            let _ = tx.send(buf);
        });
        Self { rx }
    }

    /// Waits for the pipe to close. A pipe still held open by an escaped
    /// descendant yields an empty capture after `wait`.
    pub(crate) fn finish(self, wait: Duration) -> String {
        match self.rx.recv_timeout(wait) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => {
                log::warn!("output pipe not closed after {:?}, dropping it", wait);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(program: &str, args: &[&str], time_ms: u64) -> RunRequest {
        RunRequest {
            command: CommandLine::new(program, args.iter().map(|s| s.to_string()).collect()),
            workdir: std::env::temp_dir(),
            stdin: String::new(),
            limits: RunLimits {
                time: Duration::from_millis(time_ms),
                memory: 256 * 1024,
                output_bytes: 1 << 20,
                poll_interval: Duration::from_millis(10),
                cpu_rlimit: true,
            },
        }
    }

    #[test]
    fn display_command() {
        let cmd = CommandLine::new("gcc", vec!["-o".into(), "a".into()]);
        assert_eq!(cmd.to_string(), "gcc -o a");
    }

    #[test]
    fn missing_program() {
        let report = native().supervise(&request("/nonexistent/program", &[], 1000));
        assert!(matches!(report.termination, Termination::Failed(_)));
        assert_eq!(report.peak_memory, 0);
        assert_eq!(report.elapsed, Duration::from_secs(0));
    }

    #[cfg(unix)]
    #[test]
    fn echo_stdin() {
        let mut req = request("cat", &[], 2000);
        req.stdin = "5 3\n".into();
        let report = native().supervise(&req);
        assert_eq!(report.termination, Termination::Exited(0));
        assert_eq!(report.stdout, "5 3\n");
    }

    #[cfg(unix)]
    #[test]
    fn exit_code_and_stderr() {
        let report = native().supervise(&request("sh", &["-c", "echo oops >&2; exit 3"], 2000));
        assert_eq!(report.termination, Termination::Exited(3));
        assert_eq!(report.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[test]
    fn sleeper_is_killed() {
        let started = std::time::Instant::now();
        let report = native().supervise(&request("sleep", &["10"], 300));
        assert_eq!(report.termination, Termination::TimeLimit);
        assert_eq!(report.elapsed, Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn background_children_are_killed() {
        let started = std::time::Instant::now();
        let report = native().supervise(&request("sh", &["-c", "sleep 30 & sleep 30"], 300));
        assert_eq!(report.termination, Termination::TimeLimit);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    /// Whether any live process was started with `arg` on its command line.
    #[cfg(target_os = "linux")]
    fn running_with_arg(arg: &str) -> bool {
        let entries = match std::fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(_) => return false,
        };
        entries.flatten().any(|entry| {
            std::fs::read(entry.path().join("cmdline"))
                .map(|cmdline| cmdline.split(|b| *b == 0).any(|part| part == arg.as_bytes()))
                .unwrap_or(false)
        })
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn daemonized_children_are_killed() {
        if which::which("setsid").is_err() {
            eprintln!("setsid not installed, skipping");
            return;
        }
        let started = std::time::Instant::now();
        let report = native().supervise(&request("sh", &["-c", "(setsid sleep 29.417 &); exit 0"], 5000));
        assert_eq!(report.termination, Termination::Exited(0));
        // the escaped sleeper held the output pipes
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!running_with_arg("29.417"));
    }

    #[cfg(unix)]
    #[test]
    fn quick_exit_still_reports_memory() {
        let report = native().supervise(&request("true", &[], 2000));
        assert_eq!(report.termination, Termination::Exited(0));
        assert!(report.peak_memory > 0);
    }

    #[cfg(unix)]
    #[test]
    fn output_flood() {
        let mut req = request("sh", &["-c", "yes"], 5000);
        req.limits.output_bytes = 4096;
        let report = native().supervise(&req);
        assert_eq!(report.termination, Termination::OutputLimit);
        assert!(report.stdout.len() <= 4096);
    }
}
