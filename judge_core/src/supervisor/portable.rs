use std::{
    io::Write,
    process::{Child, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::debug;
use sysinfo::{Pid, ProcessesToUpdate, System};

use super::{Capture, RunReport, RunRequest, Supervisor, Termination};

const PIPE_GRACE: Duration = Duration::from_secs(2);

/// Supervisor for targets without process groups or rusage. The process
/// tree is rebuilt from the system process table on every poll.
pub struct PortableSupervisor;

impl Supervisor for PortableSupervisor {
    fn supervise(&self, request: &RunRequest) -> RunReport {
        let limits = &request.limits;
        let start = Instant::now();
        let mut child = match Command::new(&request.command.program)
            .args(&request.command.args)
            .current_dir(&request.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                return RunReport::failed(format!(
                    "failed to start `{}`: {}",
                    request.command.program, err
                ))
            }
        };
        let root = Pid::from_u32(child.id());
        debug!("spawned `{}` as {}", request.command, root);

        if let Some(mut pipe) = child.stdin.take() {
            let input = request.stdin.clone().into_bytes();
            thread::spawn(move || {
                let _ = pipe.write_all(&input);
            });
        }
        let overflow = Arc::new(AtomicBool::new(false));
        let stdout = Capture::spawn(child.stdout.take(), limits.output_bytes, overflow.clone());
        let stderr = Capture::spawn(child.stderr.take(), limits.output_bytes, overflow.clone());

        let mut system = System::new();
        let mut peak_memory = 0;

        let (termination, elapsed) = loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let termination = match status.code() {
                        Some(code) => Termination::Exited(code),
                        None => Termination::Signaled(-1),
                    };
                    break (termination, start.elapsed());
                }
                Ok(None) => {}
                Err(err) => {
                    kill_tree(&mut system, root, &mut child);
                    break (Termination::Failed(err.to_string()), start.elapsed());
                }
            }

            system.refresh_processes(ProcessesToUpdate::All, true);
            let sample = tree_memory_kb(&system, root);
            peak_memory = peak_memory.max(sample);
            if sample > limits.memory {
                let elapsed = start.elapsed();
                kill_tree(&mut system, root, &mut child);
                break (Termination::MemoryLimit, elapsed);
            }

            if start.elapsed() > limits.time {
                kill_tree(&mut system, root, &mut child);
                break (Termination::TimeLimit, limits.time);
            }
            if overflow.load(Ordering::SeqCst) {
                let elapsed = start.elapsed();
                kill_tree(&mut system, root, &mut child);
                break (Termination::OutputLimit, elapsed);
            }
            thread::sleep(limits.poll_interval);
        };

        // descendants left behind by a leader that exited on its own
        system.refresh_processes(ProcessesToUpdate::All, true);
        for pid in tree(&system, root).into_iter().skip(1) {
            if let Some(process) = system.process(pid) {
                process.kill();
            }
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

/// `root` followed by every process descending from it.
fn tree(system: &System, root: Pid) -> Vec<Pid> {
    let mut found = vec![root];
    let mut next = 0;
    while next < found.len() {
        let parent = found[next];
        for (pid, process) in system.processes() {
            if process.parent() == Some(parent) && !found.contains(pid) {
                found.push(*pid);
            }
        }
        next += 1;
    }
    found
}

fn tree_memory_kb(system: &System, root: Pid) -> u64 {
    tree(system, root)
        .into_iter()
        .filter_map(|pid| system.process(pid))
        .map(|process| process.memory() / 1024)
        .sum()
}

fn kill_tree(system: &mut System, root: Pid, child: &mut Child) {
    system.refresh_processes(ProcessesToUpdate::All, true);
    // children first, while their parent links are still intact
    for pid in tree(system, root).into_iter().skip(1).rev() {
        if let Some(process) = system.process(pid) {
            process.kill();
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}
