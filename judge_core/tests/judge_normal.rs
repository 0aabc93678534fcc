use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use judge_core::{
    error::Result,
    problem::{Problem, ProblemConfig, TestCase},
    supervisor::{self, RunReport, RunRequest, Supervisor},
    Evaluator, JudgeConfig, Submission, Verdict,
};

/// Native supervisor that counts every process it starts.
struct CountingSupervisor {
    inner: Arc<dyn Supervisor>,
    spawned: AtomicUsize,
}

impl Supervisor for CountingSupervisor {
    fn supervise(&self, request: &RunRequest) -> RunReport {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.inner.supervise(request)
    }
}

struct Bench {
    evaluator: Evaluator,
    counter: Arc<CountingSupervisor>,
    root: tempfile::TempDir,
}

impl Bench {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let root = tempfile::tempdir().unwrap();
        let mut config = JudgeConfig::default();
        config.workspace_root = Some(root.path().to_path_buf());
        let counter = Arc::new(CountingSupervisor {
            inner: supervisor::native(),
            spawned: AtomicUsize::new(0),
        });
        let evaluator = Evaluator::with_supervisor(config, counter.clone()).unwrap();
        Self {
            evaluator,
            counter,
            root,
        }
    }

    fn spawned(&self) -> usize {
        self.counter.spawned.load(Ordering::SeqCst)
    }

    fn judge(&self, language: &str, program: &str, problem: &Problem) -> Submission {
        let code = fs::read_to_string(Path::new("../test_dep/programs").join(program)).unwrap();
        let mut submission = Submission::new(1, "tester", problem.name.clone(), language, code);
        submission.mark_judging();
        self.evaluator.evaluate(&mut submission, problem, false);
        submission
    }

    fn workspaces_left(&self) -> usize {
        fs::read_dir(self.root.path()).unwrap().count()
    }
}

fn has(tool: &str) -> bool {
    if which::which(tool).is_ok() {
        true
    } else {
        eprintln!("{} not installed, skipping", tool);
        false
    }
}

fn a_plus_b() -> Result<Problem> {
    ProblemConfig::from_file("../test_dep/normal/problem.yaml")?.load()
}

#[test]
fn c_accept() -> Result<()> {
    if !has("gcc") {
        return Ok(());
    }
    let bench = Bench::new();
    let problem = Problem::new("a-plus-b", 1.0, 128).with_case(TestCase::new("5 3\n", "8\n"));
    let result = bench.judge("c", "sum.c", &problem);

    assert_eq!(result.verdict, Verdict::Accepted);
    assert_eq!(result.test_cases_passed, 1);
    assert_eq!(result.total_test_cases, 1);
    assert!(result.execution_time > 0.0 && result.execution_time < 1.0);
    // finishes well inside one poll interval; exit-time rusage still counts
    assert!(result.memory_used > 0);
    assert!(result.compilation_error.is_empty());
    assert!(result.judged_at.is_some());
    assert_eq!(bench.workspaces_left(), 0);
    Ok(())
}

#[test]
fn every_language_accepts() -> Result<()> {
    let problem = a_plus_b()?;
    for (language, program, tool) in [("c", "sum.c", "gcc"), ("cpp", "sum.cpp", "g++"), ("python", "sum.py", "python3")] {
        if !has(tool) {
            continue;
        }
        let bench = Bench::new();
        let result = bench.judge(language, program, &problem);
        assert_eq!(result.verdict, Verdict::Accepted, "{}: {}", language, result.runtime_error);
        assert_eq!(result.test_cases_passed, 3);
        assert_eq!(result.total_test_cases, 3);
    }
    Ok(())
}

/// Live processes whose executable path lies under `dir`.
#[cfg(target_os = "linux")]
fn running_under(dir: &Path) -> usize {
    let dir = dir.to_string_lossy().to_string();
    fs::read_dir("/proc")
        .map(|entries| {
            entries
                .flatten()
                .filter(|entry| {
                    fs::read(entry.path().join("cmdline"))
                        .map(|cmdline| String::from_utf8_lossy(&cmdline).starts_with(&dir))
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}

#[cfg(target_os = "linux")]
#[test]
fn daemon_does_not_outlive_judging() -> Result<()> {
    if !has("gcc") {
        return Ok(());
    }
    let bench = Bench::new();
    let problem = Problem::new("a-plus-b", 1.0, 128).with_case(TestCase::new("5 3\n", "8\n"));
    let result = bench.judge("c", "daemon.c", &problem);

    assert_eq!(result.verdict, Verdict::Accepted);
    assert_eq!(running_under(bench.root.path()), 0);
    assert_eq!(bench.workspaces_left(), 0);
    Ok(())
}

#[test]
fn python_infinite_loop() -> Result<()> {
    if !has("python3") {
        return Ok(());
    }
    let bench = Bench::new();
    let problem = Problem::new("spin", 1.0, 128).with_case(TestCase::new("", "never"));
    let result = bench.judge("python", "spin.py", &problem);

    assert_eq!(result.verdict, Verdict::TimeLimitExceeded);
    assert!(result.execution_time >= 0.9 && result.execution_time <= 1.2);
    assert_eq!(result.test_cases_passed, 0);
    assert_eq!(bench.workspaces_left(), 0);
    Ok(())
}

#[test]
fn memory_hog() -> Result<()> {
    let problem = Problem::new("hog", 5.0, 128).with_case(TestCase::new("", "4096"));
    for (language, program, tool) in [("cpp", "hog.cpp", "g++"), ("python", "hog.py", "python3")] {
        if !has(tool) {
            continue;
        }
        let bench = Bench::new();
        let result = bench.judge(language, program, &problem);
        assert_eq!(result.verdict, Verdict::MemoryLimitExceeded, "{}", language);
        assert!(result.memory_used >= 128 * 1024);
    }
    Ok(())
}

#[test]
fn stops_after_first_wrong_case() -> Result<()> {
    if !has("gcc") {
        return Ok(());
    }
    let bench = Bench::new();
    // the second case overflows `int`
    let result = bench.judge("c", "int_sum.c", &a_plus_b()?);

    assert_eq!(result.verdict, Verdict::WrongAnswer);
    assert_eq!(result.test_cases_passed, 1);
    assert_eq!(result.total_test_cases, 3);
    assert!(result.runtime_error.starts_with("Expected: '2000000000' | Got: '"));
    // one compile and two runs; the third case never starts
    assert_eq!(bench.spawned(), 3);
    Ok(())
}

#[test]
fn syntax_error_runs_nothing() -> Result<()> {
    if !has("gcc") {
        return Ok(());
    }
    let bench = Bench::new();
    let result = bench.judge("c", "syntax_error.c", &a_plus_b()?);

    assert_eq!(result.verdict, Verdict::CompileError);
    assert!(!result.compilation_error.is_empty());
    assert!(!result.compilation_error.contains(&*bench.root.path().to_string_lossy()));
    assert!(result.compilation_error.len() <= 2003);
    assert_eq!(result.test_cases_passed, 0);
    assert_eq!(result.total_test_cases, 0);
    // only the compiler
    assert_eq!(bench.spawned(), 1);
    assert_eq!(bench.workspaces_left(), 0);
    Ok(())
}

#[test]
fn screened_code_spawns_nothing() -> Result<()> {
    let bench = Bench::new();
    let result = bench.judge("python", "reads_file.py", &a_plus_b()?);

    assert_eq!(result.verdict, Verdict::CompileError);
    assert_eq!(
        result.compilation_error,
        "Security violation: Dangerous pattern detected: open("
    );
    assert_eq!(result.total_test_cases, 0);
    assert_eq!(bench.spawned(), 0);
    assert_eq!(bench.workspaces_left(), 0);
    Ok(())
}

#[test]
fn runtime_error_is_scrubbed() -> Result<()> {
    if !has("python3") {
        return Ok(());
    }
    let bench = Bench::new();
    let result = bench.judge("python", "crash.py", &a_plus_b()?);

    assert_eq!(result.verdict, Verdict::RuntimeError);
    assert!(result.runtime_error.contains("ZeroDivisionError"));
    assert!(result.runtime_error.contains("solution.py"));
    assert!(!result.runtime_error.contains(&*bench.root.path().to_string_lossy()));
    Ok(())
}

#[test]
fn whitespace_layout() -> Result<()> {
    if !has("python3") {
        return Ok(());
    }
    let bench = Bench::new();

    let envelope = Problem::new("hello", 1.0, 64).with_case(TestCase::new("", "Hello, World!"));
    assert_eq!(bench.judge("python", "hello.py", &envelope).verdict, Verdict::Accepted);

    let reflow = Problem::new("reflow", 1.0, 64).with_case(TestCase::new("1 2 3\n", "1 2 3"));
    assert_eq!(bench.judge("python", "reflow.py", &reflow).verdict, Verdict::PresentationError);
    Ok(())
}

#[test]
fn verdict_is_stable() -> Result<()> {
    if !has("gcc") {
        return Ok(());
    }
    let bench = Bench::new();
    let problem = a_plus_b()?;
    let first = bench.judge("c", "int_sum.c", &problem);
    let second = bench.judge("c", "int_sum.c", &problem);
    assert_eq!(first.verdict, second.verdict);
    assert_eq!(first.test_cases_passed, second.test_cases_passed);
    assert_eq!(first.total_test_cases, second.total_test_cases);
    Ok(())
}

#[test]
fn sample_only_run() -> Result<()> {
    if !has("python3") {
        return Ok(());
    }
    let bench = Bench::new();
    let code = fs::read_to_string("../test_dep/programs/sum.py")?;
    let mut submission = Submission::new(2, "tester", "a-plus-b", "python", code);
    submission.is_test = true;
    bench.evaluator.evaluate(&mut submission, &a_plus_b()?, true);
    assert_eq!(submission.verdict, Verdict::Accepted);
    assert_eq!(submission.total_test_cases, 1);
    Ok(())
}
