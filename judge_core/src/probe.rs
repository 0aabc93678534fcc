//! Read-only view of a live process through `/proc`.
//!
//! Only Linux exposes the files used here; on other targets every query
//! reports "no sample" and the supervisor falls back to exit-time rusage.

use std::{fs, path::Path};

use crate::error::Result;

pub struct ProcessProbe {
    pid: u32,
}

/// The fields of `/proc/<pid>/stat` the judge cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStat {
    pub pid: u32,
    pub ppid: u32,
}

impl ProcessStat {
    /// Parses one stat line. The command name may contain spaces and
    /// parentheses, so fields are counted from the last `)`.
    pub fn parse(content: &str) -> Option<Self> {
        let open = content.find('(')?;
        let close = content.rfind(')')?;
        let pid = content[..open].trim().parse().ok()?;
        // field 3 is the state, field 4 the parent
        let ppid = content[close + 1..].split_whitespace().nth(1)?.parse().ok()?;
        Some(Self { pid, ppid })
    }
}

impl ProcessProbe {
    pub fn new(pid: u32) -> Result<Self> {
        let proc_path = format!("/proc/{}", pid);
        let path = Path::new(&proc_path);
        if !path.exists() {
            let err = std::io::Error::new(std::io::ErrorKind::NotFound, "process does not exists");
            return Err(err.into());
        }
        Ok(Self { pid })
    }

    /// Current resident set size in KB.
    pub fn get_memory_usage(&self) -> Option<u64> {
        resident_kb(self.pid)
    }

    /// All live descendants, children first.
    pub fn descendants(&self) -> Vec<u32> {
        descendants(self.pid)
    }

    /// Resident memory of the process and all of its descendants, in KB.
    pub fn tree_memory_usage(&self) -> Option<u64> {
        let own = self.get_memory_usage()?;
        let children: u64 = self
            .descendants()
            .into_iter()
            .filter_map(resident_kb)
            .sum();
        Some(own + children)
    }
}

fn resident_kb(pid: u32) -> Option<u64> {
    let content = fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    content
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse().ok())
}

/// Direct children of `pid`, including processes adopted by it.
pub fn children(pid: u32) -> Vec<u32> {
    let tasks = match fs::read_dir(format!("/proc/{}/task", pid)) {
        Ok(tasks) => tasks,
        Err(_) => return Vec::new(),
    };

    let mut found = Vec::new();
    let mut supported = false;
    for task in tasks.flatten() {
        if let Ok(content) = fs::read_to_string(task.path().join("children")) {
            supported = true;
            found.extend(content.split_whitespace().filter_map(|p| p.parse::<u32>().ok()));
        }
    }

    if supported {
        found
    } else {
        children_by_scan(pid)
    }
}

/// Slow path for kernels without `/proc/<pid>/task/<tid>/children`.
fn children_by_scan(pid: u32) -> Vec<u32> {
    let entries = match fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|p| {
            let stat = ProcessStat::parse(&fs::read_to_string(format!("/proc/{}/stat", p)).ok()?)?;
            if stat.ppid == pid {
                Some(stat.pid)
            } else {
                None
            }
        })
        .collect()
}

/// Whether the initial environment of `pid` defines `name`. A zombie or a
/// process of another user reads as `false`.
pub fn has_env(pid: u32, name: &str) -> bool {
    let environ = match fs::read(format!("/proc/{}/environ", pid)) {
        Ok(environ) => environ,
        Err(_) => return false,
    };
    let prefix = format!("{}=", name);
    environ
        .split(|b| *b == 0)
        .any(|entry| entry.starts_with(prefix.as_bytes()))
}

pub fn descendants(pid: u32) -> Vec<u32> {
    let mut result = Vec::new();
    let mut frontier = vec![pid];
    while let Some(p) = frontier.pop() {
        for child in children(p) {
            if !result.contains(&child) && child != pid {
                result.push(child);
                frontier.push(child);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;

    #[test]
    fn parse_stat_with_odd_name() {
        let line = "4242 (a b) c)) S 1 4242 4242 0 -1 4194560 100 0 0 0 7 3 0 0 20 0 1 0 12345 1000000 250 18446744073709551615";
        let stat = ProcessStat::parse(line).unwrap();
        assert_eq!(stat.pid, 4242);
        assert_eq!(stat.ppid, 1);
    }

    #[test]
    fn truncated_stat() {
        assert!(ProcessStat::parse("12 (x) S").is_none());
        assert!(ProcessStat::parse("garbage").is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn probe_self() {
        let probe = ProcessProbe::new(process::id()).unwrap();
        assert!(probe.get_memory_usage().unwrap() > 0);
        assert!(probe.tree_memory_usage().unwrap() > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn environment_of_child() {
        let mut child = process::Command::new("sleep")
            .arg("5")
            .env("JUDGE_TEST_MARK", "1")
            .spawn()
            .unwrap();
        assert!(children(process::id()).contains(&child.id()));
        assert!(has_env(child.id(), "JUDGE_TEST_MARK"));
        assert!(!has_env(child.id(), "JUDGE_TEST"));
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn sees_spawned_child() {
        let mut child = process::Command::new("sleep").arg("5").spawn().unwrap();
        let probe = ProcessProbe::new(process::id()).unwrap();
        assert!(probe.descendants().contains(&child.id()));
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn missing_process() {
        assert!(ProcessProbe::new(u32::MAX).is_err());
    }
}
