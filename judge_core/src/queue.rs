//! FIFO of judge jobs drained by a fixed pool of worker threads.
//!
//! The pool size is the ceiling on concurrently running untrusted
//! programs. It is set once and never changes with load. Stored
//! submissions and sample-only test runs wait in the same line.

use std::{
    collections::{HashSet, VecDeque},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        mpsc, Arc, Condvar, Mutex, RwLock,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info, warn};

use crate::{
    error::{Error, Result},
    judge::Evaluator,
    problem::Problem,
    store::{lock, SubmissionStore},
    submission::{Submission, SubmissionId},
    verdict::Verdict,
};

/// Called by a worker after a submission reached its terminal verdict and
/// was saved.
pub type CompletionHook = Arc<dyn Fn(&Submission) + Send + Sync>;

const WAKE_INTERVAL: Duration = Duration::from_secs(1);

/// A sample-only run that is handed back instead of stored.
struct TestRun {
    submission: Submission,
    problem: Problem,
    reply: mpsc::Sender<Submission>,
}

enum Job {
    Stored(SubmissionId),
    Test(Box<TestRun>),
}

struct QueueEntry {
    job: Job,
    order: u64,
}

impl QueueEntry {
    fn is_submission(&self, id: SubmissionId) -> bool {
        matches!(self.job, Job::Stored(stored) if stored == id)
    }
}

struct Shared {
    entries: Mutex<VecDeque<QueueEntry>>,
    available: Condvar,
    running: AtomicBool,
    sequence: AtomicU64,
    busy: AtomicUsize,
    judging: Mutex<HashSet<SubmissionId>>,
    evaluator: Arc<Evaluator>,
    store: Arc<dyn SubmissionStore>,
    on_finished: RwLock<Option<CompletionHook>>,
}

pub struct JudgeQueue {
    shared: Arc<Shared>,
    pool_size: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JudgeQueue {
    pub fn new(evaluator: Arc<Evaluator>, store: Arc<dyn SubmissionStore>, pool_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                running: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
                busy: AtomicUsize::new(0),
                judging: Mutex::new(HashSet::new()),
                evaluator,
                store,
                on_finished: RwLock::new(None),
            }),
            pool_size: pool_size.max(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn set_on_finished(&self, hook: CompletionHook) {
        let mut slot = self
            .shared
            .on_finished
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(hook);
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Re-enqueues what a previous process left unfinished, then starts the
    /// workers. Returns the number of recovered submissions.
    pub fn start(&self) -> Result<usize> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }

        let recovered = match self.recover() {
            Ok(n) => n,
            Err(err) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        let mut workers = lock(&self.workers);
        for index in 0..self.pool_size {
            let shared = self.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("judge-worker-{}", index))
                .spawn(move || worker_loop(shared, index))?;
            workers.push(handle);
        }
        info!("judge queue started with {} workers", self.pool_size);
        Ok(recovered)
    }

    fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for mut submission in self.shared.store.unfinished()? {
            // interrupted mid-judging: judge again from scratch
            if submission.verdict == Verdict::Judging {
                submission.verdict = Verdict::Queued;
                self.shared.store.save(&submission)?;
            }
            if self.enqueue(submission.id) {
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!("re-enqueued {} unfinished submissions", recovered);
        }
        Ok(recovered)
    }

    /// Stops accepting work and waits for the workers to finish the job
    /// they are on. Stored submissions still queued stay `QUEUED` in the
    /// store for the next start; waiting test runs are dropped.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.available.notify_all();
        let workers: Vec<JoinHandle<()>> = lock(&self.workers).drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("a judge worker panicked");
            }
        }
        lock(&self.shared.entries).clear();
        info!("judge queue stopped");
    }

    /// Appends `id` unless it is already waiting or being judged.
    pub fn enqueue(&self, id: SubmissionId) -> bool {
        // same lock order as `next_entry`, so a worker cannot claim the id
        // between the two checks
        let mut entries = lock(&self.shared.entries);
        if lock(&self.shared.judging).contains(&id) {
            return false;
        }
        if entries.iter().any(|e| e.is_submission(id)) {
            return false;
        }
        self.push(&mut entries, Job::Stored(id));
        drop(entries);
        self.shared.available.notify_one();
        debug!("submission {} enqueued", id);
        true
    }

    /// Puts a sample-only run in line. The judged submission arrives on the
    /// returned channel; the channel closes without a value if the queue
    /// stops first.
    pub fn enqueue_test(&self, submission: Submission, problem: Problem) -> Result<mpsc::Receiver<Submission>> {
        let (reply, rx) = mpsc::channel();
        let mut entries = lock(&self.shared.entries);
        // checked under the lock: `stop` clears the line after flipping it
        if !self.is_running() {
            return Err(Error::QueueStopped);
        }
        self.push(
            &mut entries,
            Job::Test(Box::new(TestRun {
                submission,
                problem,
                reply,
            })),
        );
        drop(entries);
        self.shared.available.notify_one();
        debug!("test run enqueued");
        Ok(rx)
    }

    fn push(&self, entries: &mut VecDeque<QueueEntry>, job: Job) {
        let order = self.shared.sequence.fetch_add(1, Ordering::SeqCst);
        entries.push_back(QueueEntry { job, order });
    }

    /// 1-based place in line, 0 when not waiting. Test runs ahead in line
    /// count.
    pub fn position(&self, id: SubmissionId) -> usize {
        let entries = lock(&self.shared.entries);
        match entries.iter().find(|e| e.is_submission(id)) {
            Some(target) => entries.iter().filter(|e| e.order < target.order).count() + 1,
            None => 0,
        }
    }

    /// Jobs waiting for a worker, test runs included.
    pub fn depth(&self) -> usize {
        lock(&self.shared.entries).len()
    }

    /// Number of jobs currently held by a worker.
    pub fn in_flight(&self) -> usize {
        self.shared.busy.load(Ordering::SeqCst)
    }

    pub fn is_judging(&self, id: SubmissionId) -> bool {
        lock(&self.shared.judging).contains(&id)
    }
}

impl Drop for JudgeQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    debug!("worker {} up", index);
    while let Some(entry) = shared.next_entry() {
        match entry.job {
            Job::Stored(id) => {
                debug!("worker {} took submission {}", index, id);
                shared.run_stored(index, id);
                lock(&shared.judging).remove(&id);
            }
            Job::Test(run) => {
                debug!("worker {} took a test run", index);
                shared.run_test(*run);
            }
        }
        shared.busy.fetch_sub(1, Ordering::SeqCst);
    }
    debug!("worker {} down", index);
}

impl Shared {
    /// Blocks until an entry is available. `None` once the queue stopped.
    fn next_entry(&self) -> Option<QueueEntry> {
        let mut entries = lock(&self.entries);
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(entry) = entries.pop_front() {
                // claimed while the queue lock is held so an id is never
                // both absent from the queue and not judging
                if let Job::Stored(id) = entry.job {
                    lock(&self.judging).insert(id);
                }
                self.busy.fetch_add(1, Ordering::SeqCst);
                return Some(entry);
            }
            let (guard, _) = self
                .available
                .wait_timeout(entries, WAKE_INTERVAL)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            entries = guard;
        }
    }

    fn run_stored(&self, index: usize, id: SubmissionId) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process(id)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some("worker panicked".to_string()),
        };
        if let Some(msg) = failure {
            error!("worker {} failed on submission {}: {}", index, id, msg);
            self.fail(id, &msg);
        }
    }

    fn run_test(&self, run: TestRun) {
        let TestRun {
            mut submission,
            problem,
            reply,
        } = run;
        submission.mark_judging();
        self.evaluator.evaluate(&mut submission, &problem, true);
        if reply.send(submission).is_err() {
            debug!("test run finished after its caller left");
        }
    }

    fn process(&self, id: SubmissionId) -> Result<()> {
        let mut submission = self
            .store
            .load(id)?
            .ok_or_else(|| Error::NotFound(format!("submission {}", id)))?;
        if !submission.mark_judging() {
            warn!("submission {} is {}, not judging it", id, submission.verdict);
            return Ok(());
        }
        self.store.save(&submission)?;

        match self.store.problem(&submission.problem)? {
            Some(problem) => {
                let sample_only = submission.is_test;
                self.evaluator.evaluate(&mut submission, &problem, sample_only);
            }
            None => {
                let msg = format!("problem `{}` not found", submission.problem);
                submission.fail(msg);
            }
        }
        self.store.save(&submission)?;
        self.notify(&submission);
        Ok(())
    }

    fn fail(&self, id: SubmissionId, msg: &str) {
        let mut submission = match self.store.load(id) {
            Ok(Some(submission)) => submission,
            _ => return,
        };
        if submission.fail(msg) {
            match self.store.save(&submission) {
                Ok(()) => self.notify(&submission),
                Err(err) => error!("failed to save submission {}: {}", id, err),
            }
        }
    }

    fn notify(&self, submission: &Submission) {
        let hook = self
            .on_finished
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(submission);
        }
    }
}
