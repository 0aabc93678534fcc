use std::{
    io::{self, Write},
    os::unix::process::{CommandExt, ExitStatusExt},
    process::{Command, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, Once, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};

use super::{Capture, RunReport, RunRequest, Supervisor, Termination};
use crate::probe::{self, ProcessProbe};

const PIPE_GRACE: Duration = Duration::from_secs(2);

/// Set in the environment of every supervised process and inherited by
/// everything it starts.
const RUN_MARKER: &str = "JUDGE_SUPERVISED";
const SWEEP_ROUNDS: usize = 16;

/// Live run leaders of this process. Held across spawn and sweep, so a
/// sweep never mistakes a fresh leader for an escaped process.
static LEADERS: Mutex<Vec<libc::pid_t>> = Mutex::new(Vec::new());
static SUBREAPER: Once = Once::new();

/// Process-group based supervisor. The child becomes the leader of a new
/// group so the whole tree can be signalled at once. On Linux the judge
/// also adopts orphans of its runs, so a program that daemonizes out of
/// the group is still found and killed when its run ends.
pub struct UnixSupervisor;

impl Supervisor for UnixSupervisor {
    fn supervise(&self, request: &RunRequest) -> RunReport {
        let limits = &request.limits;

        let mut command = Command::new(&request.command.program);
        command
            .args(&request.command.args)
            .current_dir(&request.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env(RUN_MARKER, "1")
            .process_group(0);

        let cpu_seconds = if limits.cpu_rlimit {
            Some(limits.time.as_secs_f64().ceil() as u64 + 1)
        } else {
            None
        };
        unsafe {
            command.pre_exec(move || apply_rlimits(cpu_seconds));
        }

        adopt_orphans();
        let mut leaders = live_leaders();
        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return RunReport::failed(format!(
                    "failed to start `{}`: {}",
                    request.command.program, err
                ))
            }
        };
        let pid = child.id() as libc::pid_t;
        leaders.push(pid);
        drop(leaders);
        debug!("spawned `{}` as {}", request.command, pid);

        if let Some(mut pipe) = child.stdin.take() {
            let input = request.stdin.clone().into_bytes();
            thread::spawn(move || {
                // the program may exit without reading its input
                let _ = pipe.write_all(&input);
            });
        }
        let overflow = Arc::new(AtomicBool::new(false));
        let stdout = Capture::spawn(child.stdout.take(), limits.output_bytes, overflow.clone());
        let stderr = Capture::spawn(child.stderr.take(), limits.output_bytes, overflow.clone());

        let probe = ProcessProbe::new(child.id()).ok();
        let mut peak_memory = 0;

        let (termination, elapsed) = loop {
            match reap(pid, false) {
                Ok(Some((status, maxrss))) => {
                    peak_memory = peak_memory.max(maxrss);
                    let elapsed = start.elapsed();
                    let termination = classify(status);
                    if termination == Termination::TimeLimit {
                        break (termination, limits.time);
                    }
                    if peak_memory > limits.memory {
                        break (Termination::MemoryLimit, elapsed);
                    }
                    break (termination, elapsed);
                }
                Ok(None) => {}
                Err(err) => {
                    kill_tree(pid);
                    break (
                        Termination::Failed(format!("lost track of process {}: {}", pid, err)),
                        start.elapsed(),
                    );
                }
            }

            if let Some(sample) = probe.as_ref().and_then(ProcessProbe::tree_memory_usage) {
                peak_memory = peak_memory.max(sample);
                if sample > limits.memory {
                    let elapsed = start.elapsed();
                    terminate(pid);
                    break (Termination::MemoryLimit, elapsed);
                }
            }

            if start.elapsed() > limits.time {
                terminate(pid);
                break (Termination::TimeLimit, limits.time);
            }

            if overflow.load(Ordering::SeqCst) {
                let elapsed = start.elapsed();
                terminate(pid);
                break (Termination::OutputLimit, elapsed);
            }

            thread::sleep(limits.poll_interval);
        };

        // stragglers left in the group after a normal exit
        unsafe {
            libc::killpg(pid, libc::SIGKILL);
        }
        let mut leaders = live_leaders();
        leaders.retain(|leader| *leader != pid);
        let swept = sweep_orphans(&leaders);
        drop(leaders);
        if swept > 0 {
            warn!("killed {} processes that escaped run {}", swept, pid);
        }

        RunReport {
            termination,
            elapsed,
            peak_memory,
            stdout: stdout.finish(PIPE_GRACE),
            stderr: stderr.finish(PIPE_GRACE),
        }
    }
}

fn live_leaders() -> MutexGuard<'static, Vec<libc::pid_t>> {
    LEADERS.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(target_os = "linux")]
fn adopt_orphans() {
    SUBREAPER.call_once(|| {
        let one: libc::c_ulong = 1;
        if unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, one, 0, 0, 0) } != 0 {
            warn!(
                "cannot become a child subreaper: {}",
                io::Error::last_os_error()
            );
        }
    });
}

#[cfg(not(target_os = "linux"))]
fn adopt_orphans() {
    SUBREAPER.call_once(|| debug!("orphans of runs are not adopted on this target"));
}

/// Kills and reaps every marked process handed to us after its parent
/// died. Killing one may orphan its own children, hence the rounds.
fn sweep_orphans(leaders: &[libc::pid_t]) -> usize {
    let own = std::process::id();
    let mut swept = 0;
    for _ in 0..SWEEP_ROUNDS {
        let escaped: Vec<libc::pid_t> = probe::children(own)
            .into_iter()
            .map(|child| child as libc::pid_t)
            .filter(|child| !leaders.contains(child))
            .filter(|child| probe::has_env(*child as u32, RUN_MARKER))
            .collect();
        if escaped.is_empty() {
            break;
        }
        for child in escaped {
            unsafe {
                libc::kill(child, libc::SIGKILL);
            }
            if let Err(err) = reap(child, true) {
                debug!("failed to reap escaped process {}: {}", child, err);
            }
            swept += 1;
        }
    }
    swept
}

fn apply_rlimits(cpu_seconds: Option<u64>) -> io::Result<()> {
    let core = rlimit(0);
    if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &core) } != 0 {
        return Err(io::Error::last_os_error());
    }
    if let Some(seconds) = cpu_seconds {
        let cpu = rlimit(seconds);
        if unsafe { libc::setrlimit(libc::RLIMIT_CPU, &cpu) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn rlimit(value: u64) -> libc::rlimit {
    libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    }
}

/// Waits for `pid`. Returns `None` while it is still running in
/// non-blocking mode; otherwise the exit status and the peak RSS in KB.
fn reap(pid: libc::pid_t, block: bool) -> io::Result<Option<(ExitStatus, u64)>> {
    let flags = if block { 0 } else { libc::WNOHANG };
    let mut status: libc::c_int = 0;
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        let ret = unsafe { libc::wait4(pid, &mut status, flags, &mut usage) };
        if ret == 0 {
            return Ok(None);
        }
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(Some((ExitStatus::from_raw(status), maxrss_kb(&usage))));
    }
}

#[cfg(target_os = "macos")]
fn maxrss_kb(usage: &libc::rusage) -> u64 {
    usage.ru_maxrss as u64 / 1024
}

#[cfg(not(target_os = "macos"))]
fn maxrss_kb(usage: &libc::rusage) -> u64 {
    usage.ru_maxrss as u64
}

fn classify(status: ExitStatus) -> Termination {
    if let Some(code) = status.code() {
        return Termination::Exited(code);
    }
    match status.signal() {
        Some(libc::SIGXCPU) => Termination::TimeLimit,
        Some(signal) => Termination::Signaled(signal),
        None => Termination::Failed("unknown wait status".into()),
    }
}

fn kill_tree(pid: libc::pid_t) {
    // collected first; once the leader dies its children are reparented
    let descendants = probe::descendants(pid as u32);
    unsafe {
        libc::killpg(pid, libc::SIGKILL);
        libc::kill(pid, libc::SIGKILL);
    }
    for child in descendants {
        unsafe {
            libc::kill(child as libc::pid_t, libc::SIGKILL);
        }
    }
}

fn terminate(pid: libc::pid_t) {
    kill_tree(pid);
    if let Err(err) = reap(pid, true) {
        warn!("failed to reap {}: {}", pid, err);
    }
}
