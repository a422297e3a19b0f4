use anyhow::{Context, Result};
use git2::{DiffFormat, DiffOptions, Status, StatusOptions};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::{RepoState, Repository, local_identity, normalize_remote_url};

/// git2-backed repository.
///
/// Only the root path is stored; a `git2::Repository` handle is opened per
/// call because it is not `Sync`.
pub struct GitRepository {
    root: PathBuf,
}

impl GitRepository {
    /// Open the repository containing `path`.
    pub fn discover(path: &Path) -> Result<Self> {
        let repo = git2::Repository::discover(path).with_context(|| {
            format!("Failed to find a git repository at {}", path.display())
        })?;
        let workdir = repo
            .workdir()
            .context("Bare repositories are not supported")?;
        let root = workdir
            .canonicalize()
            .unwrap_or_else(|_| workdir.to_path_buf());
        Ok(Self { root })
    }

    fn open(&self) -> Result<git2::Repository> {
        git2::Repository::open(&self.root).context("Failed to open git repository")
    }

    fn status_lines(repo: &git2::Repository) -> Result<Vec<String>> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo
            .statuses(Some(&mut opts))
            .context("Failed to read repository status")?;

        let mut lines: Vec<String> = statuses
            .iter()
            .filter_map(|entry| {
                let path = entry.path()?.to_string();
                Some(format!("{} {}", status_code(entry.status()), path))
            })
            .collect();
        lines.sort();
        Ok(lines)
    }

    fn diff_hash(repo: &git2::Repository) -> Result<String> {
        let head_tree = repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_tree().ok());

        let mut opts = DiffOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true);

        let diff = repo
            .diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))
            .context("Failed to diff working tree")?;

        let mut hasher = Sha256::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            hasher.update([line.origin() as u8]);
            hasher.update(line.content());
            true
        })
        .context("Failed to render working tree diff")?;
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn status_code(status: Status) -> &'static str {
    if status.contains(Status::WT_NEW) {
        "??"
    } else if status.intersects(Status::INDEX_NEW) {
        "A "
    } else if status.intersects(Status::INDEX_DELETED | Status::WT_DELETED) {
        " D"
    } else if status.intersects(Status::INDEX_RENAMED | Status::WT_RENAMED) {
        " R"
    } else if status.intersects(Status::CONFLICTED) {
        "UU"
    } else {
        " M"
    }
}

impl Repository for GitRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn capture_state(&self) -> Result<RepoState> {
        let repo = self.open()?;
        let commit_hash = repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
            .map(|c| c.id().to_string());
        let lines = Self::status_lines(&repo)?;
        let diff_hash = Self::diff_hash(&repo)?;

        Ok(RepoState {
            commit_hash,
            has_changes: !lines.is_empty(),
            status_output: lines.join("\n"),
            diff_hash,
        })
    }

    fn identity(&self) -> String {
        let remote_url = self.open().ok().and_then(|repo| {
            repo.find_remote("origin")
                .ok()
                .and_then(|remote| remote.url().map(str::to_string))
        });
        remote_url
            .as_deref()
            .and_then(normalize_remote_url)
            .unwrap_or_else(|| local_identity(&self.root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> (GitRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        let repository = GitRepository::discover(dir.path()).unwrap();
        (repository, dir)
    }

    fn commit_file(dir: &Path, name: &str, content: &str, msg: &str) {
        let repo = git2::Repository::open(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@test.com").unwrap();
        if let Ok(head) = repo.head() {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
                .unwrap();
        } else {
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
                .unwrap();
        }
    }

    #[test]
    fn test_commit_hash_unborn_then_populated() {
        let (repository, dir) = setup_repo();
        assert!(repository.capture_state().unwrap().commit_hash.is_none());
        commit_file(dir.path(), "a.txt", "hello", "init");
        let sha = repository.capture_state().unwrap().commit_hash.unwrap();
        assert_eq!(sha.len(), 40);
    }

    #[test]
    fn test_clean_state_is_stable() {
        let (repository, dir) = setup_repo();
        commit_file(dir.path(), "stable.txt", "unchanged\n", "init");
        let first = repository.capture_state().unwrap();
        let second = repository.capture_state().unwrap();
        assert!(!first.has_changes);
        assert!(first.status_output.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_untracked_file_changes_state() {
        let (repository, dir) = setup_repo();
        commit_file(dir.path(), "existing.txt", "original", "init");
        let before = repository.capture_state().unwrap();
        fs::write(dir.path().join("new_file.rs"), "fn main() {}").unwrap();
        let after = repository.capture_state().unwrap();
        assert!(after.has_changes);
        assert!(after.status_output.contains("?? new_file.rs"));
        assert_ne!(before.diff_hash, after.diff_hash);
        assert_eq!(before.commit_hash, after.commit_hash);
    }

    #[test]
    fn test_editing_dirty_file_changes_diff_hash() {
        let (repository, dir) = setup_repo();
        commit_file(dir.path(), "existing.txt", "line one\n", "init");
        fs::write(dir.path().join("existing.txt"), "line one\nline two\n").unwrap();
        let before = repository.capture_state().unwrap();
        fs::write(dir.path().join("existing.txt"), "line one\nline 2\n").unwrap();
        let after = repository.capture_state().unwrap();
        assert_eq!(before.status_output, after.status_output);
        assert_ne!(before.diff_hash, after.diff_hash);
    }

    #[test]
    fn test_new_commit_changes_commit_hash() {
        let (repository, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "1", "first");
        let before = repository.capture_state().unwrap();
        commit_file(dir.path(), "b.txt", "2", "second");
        let after = repository.capture_state().unwrap();
        assert_ne!(before.commit_hash, after.commit_hash);
        assert!(!after.has_changes);
    }

    #[test]
    fn test_identity_prefers_origin_remote() {
        let (repository, dir) = setup_repo();
        let repo = git2::Repository::open(dir.path()).unwrap();
        repo.remote("origin", "git@github.com:acme/widget.git")
            .unwrap();
        assert_eq!(repository.identity(), "github.com/acme/widget");
    }

    #[test]
    fn test_identity_without_remote_uses_local_identity() {
        let (repository, _dir) = setup_repo();
        let name = repository
            .root()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(repository.identity().starts_with(&format!("{}-", name)));
    }
}
