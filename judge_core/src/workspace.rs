use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use tempfile::TempDir;

use crate::{error::Result, submission::SubmissionId};

/// Per-submission scratch directory. Removed on [`Workspace::cleanup`] or
/// when dropped, whichever comes first.
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    pub fn create(root: &Path, id: SubmissionId) -> Result<Self> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("judge_{}_", id))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        debug!("workspace for {} at {}", id, path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn write_source(&self, name: &str, code: &str) -> Result<PathBuf> {
        let path = self.file(name);
        fs::write(&path, code)?;
        Ok(path)
    }

    /// Removes every file, then the directory. Failures are logged and
    /// skipped. Returns the number of entries that could not be removed.
    pub fn cleanup(&mut self) -> usize {
        let dir = match self.dir.take() {
            Some(dir) => dir,
            None => return 0,
        };

        let mut failures = 0;
        if let Ok(entries) = fs::read_dir(dir.path()) {
            for entry in entries.flatten() {
                let path = entry.path();
                let removed = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                if let Err(err) = removed {
                    warn!("failed to remove {}: {}", path.display(), err);
                    failures += 1;
                }
            }
        }
        if let Err(err) = dir.close() {
            warn!("failed to remove workspace {}: {}", self.path.display(), err);
            failures += 1;
        }
        failures
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_is_idempotent() -> Result<()> {
        let root = tempfile::tempdir()?;
        let mut workspace = Workspace::create(root.path(), 42)?;
        let source = workspace.write_source("solution.c", "int main(){}")?;
        fs::create_dir(workspace.file("sub"))?;
        fs::write(workspace.file("sub/x"), "x")?;
        assert!(source.exists());
        assert!(workspace
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("judge_42_"));

        assert_eq!(workspace.cleanup(), 0);
        assert!(!workspace.path().exists());
        assert_eq!(workspace.cleanup(), 0);
        Ok(())
    }

    #[test]
    fn removed_on_drop() -> Result<()> {
        let root = tempfile::tempdir()?;
        let path = {
            let workspace = Workspace::create(root.path(), 1)?;
            workspace.write_source("solution.py", "print(1)")?;
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn distinct_directories() -> Result<()> {
        let root = tempfile::tempdir()?;
        let a = Workspace::create(root.path(), 1)?;
        let b = Workspace::create(root.path(), 1)?;
        assert_ne!(a.path(), b.path());
        Ok(())
    }
}
