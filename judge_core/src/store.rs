use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use crate::{
    error::{Error, Result},
    problem::{Problem, ProblemConfig},
    submission::{Submission, SubmissionId},
};

/// Where submissions and problems live between evaluations.
pub trait SubmissionStore: Send + Sync {
    /// Reserves a fresh submission id.
    fn next_id(&self) -> Result<SubmissionId>;
    fn load(&self, id: SubmissionId) -> Result<Option<Submission>>;
    fn save(&self, submission: &Submission) -> Result<()>;
    fn problem(&self, name: &str) -> Result<Option<Problem>>;
    /// Submissions without a terminal verdict, oldest first.
    fn unfinished(&self) -> Result<Vec<Submission>>;
}

fn oldest_first(submissions: &mut Vec<Submission>) {
    submissions.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MemoryState {
    submissions: BTreeMap<SubmissionId, Submission>,
    problems: HashMap<String, Problem>,
    last_id: SubmissionId,
}

/// Volatile store, for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_problem(&self, problem: Problem) {
        lock(&self.state).problems.insert(problem.name.clone(), problem);
    }
}

impl SubmissionStore for MemoryStore {
    fn next_id(&self) -> Result<SubmissionId> {
        let mut state = lock(&self.state);
        state.last_id += 1;
        Ok(state.last_id)
    }

    fn load(&self, id: SubmissionId) -> Result<Option<Submission>> {
        Ok(lock(&self.state).submissions.get(&id).cloned())
    }

    fn save(&self, submission: &Submission) -> Result<()> {
        let mut state = lock(&self.state);
        state.last_id = state.last_id.max(submission.id);
        state.submissions.insert(submission.id, submission.clone());
        Ok(())
    }

    fn problem(&self, name: &str) -> Result<Option<Problem>> {
        Ok(lock(&self.state).problems.get(name).cloned())
    }

    fn unfinished(&self) -> Result<Vec<Submission>> {
        let mut pending: Vec<Submission> = lock(&self.state)
            .submissions
            .values()
            .filter(|s| !s.is_judged())
            .cloned()
            .collect();
        oldest_first(&mut pending);
        Ok(pending)
    }
}

/// Directory layout:
///
/// ```text
/// <root>/submissions/<id>.json
/// <root>/problems/<name>/problem.yaml   or   <root>/problems/<name>.yaml
/// ```
pub struct FileStore {
    root: PathBuf,
    last_id: AtomicU64,
}

impl FileStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("submissions"))?;
        fs::create_dir_all(root.join("problems"))?;

        let store = Self {
            root,
            last_id: AtomicU64::new(0),
        };
        let last = store.ids()?.into_iter().max().unwrap_or(0);
        store.last_id.store(last, Ordering::SeqCst);
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn submission_path(&self, id: SubmissionId) -> PathBuf {
        self.root.join("submissions").join(format!("{}.json", id))
    }

    fn ids(&self) -> Result<Vec<SubmissionId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join("submissions"))? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Writes `problem` as an inline yaml file.
    pub fn add_problem(&self, problem: &Problem) -> Result<()> {
        check_name(&problem.name)?;
        let content = serde_yaml::to_string(&ProblemConfig::from(problem))?;
        let path = self.root.join("problems").join(format!("{}.yaml", problem.name));
        fs::write(path, content)?;
        Ok(())
    }
}

fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Store(format!("invalid problem name `{}`", name)))
    }
}

impl SubmissionStore for FileStore {
    fn next_id(&self) -> Result<SubmissionId> {
        Ok(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn load(&self, id: SubmissionId) -> Result<Option<Submission>> {
        let path = self.submission_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, submission: &Submission) -> Result<()> {
        let path = self.submission_path(submission.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(submission)?)?;
        fs::rename(&tmp, &path)?;
        self.last_id.fetch_max(submission.id, Ordering::SeqCst);
        Ok(())
    }

    fn problem(&self, name: &str) -> Result<Option<Problem>> {
        check_name(name)?;
        let problems = self.root.join("problems");
        let candidates = [
            problems.join(name).join("problem.yaml"),
            problems.join(format!("{}.yaml", name)),
        ];
        match candidates.iter().find(|path| path.exists()) {
            Some(path) => Ok(Some(ProblemConfig::from_file(path)?.load()?)),
            None => Ok(None),
        }
    }

    fn unfinished(&self) -> Result<Vec<Submission>> {
        let mut pending = Vec::new();
        for id in self.ids()? {
            match self.load(id) {
                Ok(Some(submission)) if !submission.is_judged() => pending.push(submission),
                Ok(_) => {}
                Err(err) => log::warn!("skipping unreadable submission {}: {}", id, err),
            }
        }
        oldest_first(&mut pending);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        problem::TestCase,
        submission::JudgeReport,
        verdict::Verdict,
    };

    #[test]
    fn memory_store() -> Result<()> {
        let store = MemoryStore::new();
        let a = Submission::new(store.next_id()?, "u", "p", "c", "");
        let b = Submission::new(store.next_id()?, "u", "p", "c", "");
        assert_eq!((a.id, b.id), (1, 2));
        store.save(&a)?;
        store.save(&b)?;

        let mut judged = b.clone();
        judged.record(&JudgeReport::compile_error("x"));
        store.save(&judged)?;

        let pending: Vec<SubmissionId> = store.unfinished()?.iter().map(|s| s.id).collect();
        assert_eq!(pending, vec![1]);
        assert!(store.load(9)?.is_none());
        Ok(())
    }

    #[test]
    fn file_store_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let store = FileStore::open(dir.path())?;
            store.add_problem(&Problem::new("a-plus-b", 1.0, 64).with_case(TestCase::sample("5 3\n", "8\n")))?;
            for _ in 0..3 {
                let submission = Submission::new(store.next_id()?, "u", "a-plus-b", "python", "print(8)");
                store.save(&submission)?;
            }
            let mut done = store.load(2)?.unwrap();
            done.record(&JudgeReport::compile_error("x"));
            store.save(&done)?;
        }

        let store = FileStore::open(dir.path())?;
        assert_eq!(store.next_id()?, 4);
        assert_eq!(store.load(2)?.unwrap().verdict, Verdict::CompileError);
        let pending: Vec<SubmissionId> = store.unfinished()?.iter().map(|s| s.id).collect();
        assert_eq!(pending, vec![1, 3]);

        let problem = store.problem("a-plus-b")?.unwrap();
        assert_eq!(problem.test_cases, vec![TestCase::sample("5 3\n", "8\n")]);
        assert!(store.problem("missing")?.is_none());
        assert!(store.problem("../etc").is_err());
        Ok(())
    }
}
