use std::{
    fs,
    sync::{mpsc, Arc, Mutex},
    time::Duration,
};

use judge_core::{
    error::Result,
    store::{FileStore, SubmissionStore},
    JudgeConfig, JudgeService, Problem, Submission, SubmitMode, SubmitRequest, TestCase, Verdict,
};

fn request(code: &str) -> SubmitRequest {
    SubmitRequest {
        user: "alice".into(),
        problem: "a-plus-b".into(),
        language: "python".into(),
        code: code.into(),
    }
}

fn config(root: &std::path::Path) -> JudgeConfig {
    let mut config = JudgeConfig::default();
    config.workers = 2;
    config.workspace_root = Some(root.join("work"));
    config
}

#[test]
fn queued_submissions_reach_terminal_verdicts() -> Result<()> {
    if which::which("python3").is_err() {
        eprintln!("python3 not installed, skipping");
        return Ok(());
    }
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir()?;
    let store = Arc::new(FileStore::open(dir.path().join("data"))?);
    store.add_problem(
        &Problem::new("a-plus-b", 2.0, 128)
            .with_case(TestCase::sample("5 3\n", "8\n"))
            .with_case(TestCase::new("1 1\n", "2\n")),
    )?;

    let service = JudgeService::new(config(dir.path()), store.clone())?;
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    service.on_finished(Arc::new(move |s: &Submission| {
        let _ = tx.lock().unwrap().send(s.clone());
    }));
    assert_eq!(service.start()?, 0);

    let sources = [
        "a, b = map(int, input().split())\nprint(a + b)\n",
        "print(8)\n",
        "import os\n",
        "a, b = map(int, input().split())\nprint(a, b)\n",
    ];
    let mut ids = Vec::new();
    for source in sources.iter() {
        ids.push(service.submit(request(source), SubmitMode::Queued)?);
    }

    let mut verdicts = std::collections::HashMap::new();
    for _ in 0..ids.len() {
        let finished = rx.recv_timeout(Duration::from_secs(30)).unwrap();
        verdicts.insert(finished.id, finished.verdict);
    }
    assert_eq!(verdicts[&ids[0]], Verdict::Accepted);
    assert_eq!(verdicts[&ids[1]], Verdict::WrongAnswer);
    assert_eq!(verdicts[&ids[2]], Verdict::CompileError);
    assert_eq!(verdicts[&ids[3]], Verdict::WrongAnswer);

    for id in ids.iter() {
        let stored = store.load(*id)?.unwrap();
        assert!(stored.is_judged());
        assert_eq!(service.queue_position(*id), 0);
    }
    assert_eq!(service.queue_depth(), 0);
    service.stop();

    assert_eq!(fs::read_dir(dir.path().join("work"))?.count(), 0);
    Ok(())
}

#[test]
fn restart_recovers_unfinished_work() -> Result<()> {
    if which::which("python3").is_err() {
        eprintln!("python3 not installed, skipping");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let data = dir.path().join("data");
    {
        let store = FileStore::open(&data)?;
        store.add_problem(&Problem::new("a-plus-b", 2.0, 128).with_case(TestCase::new("5 3\n", "8\n")))?;
        for _ in 0..3 {
            let submission = Submission::new(store.next_id()?, "bob", "a-plus-b", "python", "print(8)");
            store.save(&submission)?;
        }
    }

    let store = Arc::new(FileStore::open(&data)?);
    let service = JudgeService::new(config(dir.path()), store.clone())?;
    assert_eq!(service.start()?, 3);

    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    while !store.unfinished()?.is_empty() {
        assert!(std::time::Instant::now() < deadline, "recovery did not finish");
        std::thread::sleep(Duration::from_millis(20));
    }
    for id in 1..=3 {
        assert_eq!(store.load(id)?.unwrap().verdict, Verdict::Accepted);
    }
    assert_eq!(store.next_id()?, 4);
    Ok(())
}
