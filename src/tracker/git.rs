use super::VersionControl;
use anyhow::{Context, Result, anyhow};
use git2::{Repository, Signature};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub struct GitTracker {
    repo: Mutex<Repository>,
    workdir: PathBuf,
    store_files: Vec<PathBuf>,
}

impl GitTracker {
    /// Open the repository at `project_dir`. `store_files` are the paths
    /// [`VersionControl::stage_self`] stages.
    pub fn new(project_dir: &Path, store_files: Vec<PathBuf>) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("Git repository has no working directory"))?;
        Ok(Self {
            repo: Mutex::new(repo),
            workdir,
            store_files,
        })
    }

    fn repo(&self) -> Result<MutexGuard<'_, Repository>> {
        self.repo
            .lock()
            .map_err(|_| anyhow!("Git repository lock poisoned"))
    }

    /// Path relative to the working directory, as the index expects.
    fn relative(&self, path: &Path) -> Result<PathBuf> {
        if path.is_relative() {
            return Ok(path.to_path_buf());
        }
        if let Ok(rel) = path.strip_prefix(&self.workdir) {
            return Ok(rel.to_path_buf());
        }

        // Either side may have been reported through a symlink.
        let workdir = self
            .workdir
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", self.workdir.display()))?;
        let resolved = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => parent
                .canonicalize()
                .map(|p| p.join(name))
                .unwrap_or_else(|_| path.to_path_buf()),
            _ => path.to_path_buf(),
        };
        resolved
            .strip_prefix(&workdir)
            .map(Path::to_path_buf)
            .with_context(|| {
                format!(
                    "{} is outside the repository at {}",
                    path.display(),
                    self.workdir.display()
                )
            })
    }
}

impl VersionControl for GitTracker {
    fn stage(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let repo = self.repo()?;
        let mut index = repo.index().context("Failed to open git index")?;
        for path in paths {
            let rel = self.relative(path)?;
            if self.workdir.join(&rel).exists() {
                index
                    .add_path(&rel)
                    .with_context(|| format!("Failed to stage {}", rel.display()))?;
            } else {
                index
                    .remove_path(&rel)
                    .with_context(|| format!("Failed to stage removal of {}", rel.display()))?;
            }
        }
        index.write().context("Failed to write git index")?;
        Ok(())
    }

    fn unstage(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let rels = paths
            .iter()
            .map(|p| self.relative(p))
            .collect::<Result<Vec<_>>>()?;
        let repo = self.repo()?;
        // Unborn HEAD: removing the entries is the reset.
        let head = repo
            .head()
            .ok()
            .and_then(|head| head.peel(git2::ObjectType::Commit).ok());
        repo.reset_default(head.as_ref(), rels.iter().map(PathBuf::as_path))
            .context("Failed to unstage paths")?;
        Ok(())
    }

    fn stage_self(&self) -> Result<()> {
        let existing: Vec<PathBuf> = self
            .store_files
            .iter()
            .filter(|p| p.exists())
            .cloned()
            .collect();
        self.stage(&existing)
    }

    fn commit(&self, message: &str) -> Result<Option<String>> {
        let repo = self.repo()?;
        let mut index = repo.index().context("Failed to open git index")?;
        let tree_id = index.write_tree().context("Failed to write tree")?;
        let tree = repo.find_tree(tree_id)?;

        // Handle unborn branch (new repo with no commits yet)
        let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        if let Some(parent) = &parent
            && parent.tree_id() == tree_id
        {
            return Ok(None);
        }

        let sig = Signature::now("phasekeep", "phasekeep@localhost")?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let commit_id = repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .context("Failed to create commit")?;
        Ok(Some(commit_id.to_string()))
    }

    fn head_revision(&self) -> Option<String> {
        let repo = self.repo().ok()?;
        let head = repo.head().ok()?;
        let commit = head.peel_to_commit().ok()?;
        Some(commit.id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo(store_files: Vec<PathBuf>) -> (GitTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        let tracker = GitTracker::new(dir.path(), store_files).unwrap();
        (tracker, dir)
    }

    fn committed_paths(dir: &Path) -> Vec<String> {
        let repo = Repository::open(dir).unwrap();
        let tree = repo.head().unwrap().peel_to_tree().unwrap();
        let mut paths = Vec::new();
        tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                paths.push(format!("{}{}", root, entry.name().unwrap_or_default()));
            }
            git2::TreeWalkResult::Ok
        })
        .unwrap();
        paths
    }

    #[test]
    fn head_revision_unborn_then_populated() {
        let (tracker, dir) = setup_repo(vec![]);
        assert!(tracker.head_revision().is_none());
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        tracker.stage(&[PathBuf::from("a.txt")]).unwrap();
        let sha = tracker.commit("init").unwrap().unwrap();
        assert_eq!(sha.len(), 40);
        assert_eq!(tracker.head_revision(), Some(sha));
    }

    #[test]
    fn commit_without_changes_is_none() {
        let (tracker, dir) = setup_repo(vec![]);
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        tracker.stage(&[dir.path().join("a.txt")]).unwrap();
        assert!(tracker.commit("first").unwrap().is_some());
        assert!(tracker.commit("second").unwrap().is_none());
    }

    #[test]
    fn stage_self_only_stages_store_files() {
        let dir = tempdir().unwrap();
        let store_dir = dir.path().join(".phasekeep");
        fs::create_dir_all(&store_dir).unwrap();
        let items = store_dir.join("items.json");
        let archive = store_dir.join("archive.jsonl");
        Repository::init(dir.path()).unwrap();
        let tracker = GitTracker::new(dir.path(), vec![items.clone(), archive]).unwrap();

        fs::write(&items, "{}").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "scratch").unwrap();
        tracker.stage_self().unwrap();
        tracker.commit("store only").unwrap();

        assert_eq!(committed_paths(dir.path()), vec![".phasekeep/items.json"]);
    }

    #[test]
    fn deleted_paths_are_staged_as_removals() {
        let (tracker, dir) = setup_repo(vec![]);
        let file = dir.path().join("gone.txt");
        fs::write(&file, "bye").unwrap();
        tracker.stage(&[file.clone()]).unwrap();
        tracker.commit("add").unwrap();

        fs::remove_file(&file).unwrap();
        tracker.stage(&[file]).unwrap();
        tracker.commit("remove").unwrap();
        assert!(committed_paths(dir.path()).is_empty());
    }

    #[test]
    fn unstaged_paths_stay_out_of_the_next_commit() {
        let (tracker, dir) = setup_repo(vec![]);
        fs::write(dir.path().join("kept.txt"), "kept").unwrap();
        tracker.stage(&[dir.path().join("kept.txt")]).unwrap();
        tracker.commit("base").unwrap();

        fs::write(dir.path().join("kept.txt"), "edited").unwrap();
        fs::write(dir.path().join("stray.md"), "stray").unwrap();
        let paths = vec![dir.path().join("kept.txt"), dir.path().join("stray.md")];
        tracker.stage(&paths).unwrap();
        tracker.unstage(&paths).unwrap();

        assert!(tracker.commit("nothing").unwrap().is_none());
        assert_eq!(committed_paths(dir.path()), vec!["kept.txt"]);
    }

    #[test]
    fn unstage_on_unborn_branch_drops_entries() {
        let (tracker, dir) = setup_repo(vec![]);
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        tracker
            .stage(&[PathBuf::from("a.txt"), PathBuf::from("b.txt")])
            .unwrap();
        tracker.unstage(&[PathBuf::from("b.txt")]).unwrap();
        tracker.commit("first").unwrap();
        assert_eq!(committed_paths(dir.path()), vec!["a.txt"]);
    }

    #[test]
    fn paths_outside_repo_are_rejected() {
        let (tracker, _dir) = setup_repo(vec![]);
        let elsewhere = tempdir().unwrap();
        let outside = elsewhere.path().join("x.txt");
        fs::write(&outside, "x").unwrap();
        assert!(tracker.stage(&[outside]).is_err());
    }
}
