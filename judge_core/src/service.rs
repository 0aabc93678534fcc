use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    config::JudgeConfig,
    error::{Error, Result},
    judge::Evaluator,
    queue::{CompletionHook, JudgeQueue},
    store::SubmissionStore,
    submission::{Submission, SubmissionId},
    supervisor::{self, Supervisor},
};

/// What a caller hands in to create a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub user: String,
    pub problem: String,
    pub language: String,
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Handed to the worker pool; the call returns immediately.
    Queued,
    /// Judged on the calling thread before returning.
    Synchronous,
}

/// Entry point for the surrounding system: owns the evaluator, the store
/// and the worker pool.
pub struct JudgeService {
    evaluator: Arc<Evaluator>,
    store: Arc<dyn SubmissionStore>,
    queue: JudgeQueue,
}

impl JudgeService {
    pub fn new(config: JudgeConfig, store: Arc<dyn SubmissionStore>) -> Result<Self> {
        Self::with_supervisor(config, store, supervisor::native())
    }

    pub fn with_supervisor(
        config: JudgeConfig,
        store: Arc<dyn SubmissionStore>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Result<Self> {
        let workers = config.workers;
        let evaluator = Arc::new(Evaluator::with_supervisor(config, supervisor)?);
        let queue = JudgeQueue::new(evaluator.clone(), store.clone(), workers);
        Ok(Self {
            evaluator,
            store,
            queue,
        })
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn queue(&self) -> &JudgeQueue {
        &self.queue
    }

    pub fn on_finished(&self, hook: CompletionHook) {
        self.queue.set_on_finished(hook);
    }

    /// Recovers unfinished work and starts the workers.
    pub fn start(&self) -> Result<usize> {
        self.queue.start()
    }

    pub fn stop(&self) {
        self.queue.stop();
    }

    pub fn submit(&self, request: SubmitRequest, mode: SubmitMode) -> Result<SubmissionId> {
        let mut submission = Submission::new(
            self.store.next_id()?,
            request.user,
            request.problem,
            request.language,
            request.code,
        );
        self.store.save(&submission)?;
        let id = submission.id;

        match mode {
            SubmitMode::Queued => {
                self.queue.enqueue(id);
            }
            SubmitMode::Synchronous => {
                if let Err(err) = self.judge_now(&mut submission) {
                    log::error!("judging submission {} failed: {}", id, err);
                    // the record must not stay JUDGING
                    submission.fail(err.to_string());
                    self.store.save(&submission)?;
                }
            }
        }
        Ok(id)
    }

    fn judge_now(&self, submission: &mut Submission) -> Result<()> {
        submission.mark_judging();
        self.store.save(submission)?;
        match self.store.problem(&submission.problem)? {
            Some(problem) => {
                self.evaluator.evaluate(submission, &problem, false);
            }
            None => {
                let msg = format!("problem `{}` not found", submission.problem);
                submission.fail(msg);
            }
        }
        self.store.save(submission)
    }

    /// Runs the code against the problem's samples only. Nothing is
    /// stored. While the pool runs, the test run waits in line like any
    /// other job, so it never adds to the number of running programs.
    pub fn submit_test(&self, request: SubmitRequest) -> Result<Submission> {
        let problem = self
            .store
            .problem(&request.problem)?
            .ok_or_else(|| Error::NotFound(format!("problem `{}`", request.problem)))?;
        let mut submission = Submission::new(0, request.user, request.problem, request.language, request.code);
        submission.is_test = true;

        if self.queue.is_running() {
            let reply = self.queue.enqueue_test(submission, problem)?;
            return reply.recv().map_err(|_| Error::QueueStopped);
        }
        submission.mark_judging();
        self.evaluator.evaluate(&mut submission, &problem, true);
        Ok(submission)
    }

    pub fn submission(&self, id: SubmissionId) -> Result<Option<Submission>> {
        self.store.load(id)
    }

    pub fn queue_position(&self, id: SubmissionId) -> usize {
        self.queue.position(id)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }
}
