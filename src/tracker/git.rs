use anyhow::{Context, Result};
use git2::{IndexAddOption, Oid, Repository, ResetType, Signature};
use std::path::Path;

/// Filesystem snapshot capability: checkpoints are tagged with commit ids.
pub struct GitTracker {
    repo: Repository,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Open the tracker if `project_dir` is a git repository.
    pub fn discover(project_dir: &Path) -> Option<Self> {
        Repository::open(project_dir).ok().map(|repo| Self { repo })
    }

    /// Commit the working tree and return the commit id.
    ///
    /// Returns the current HEAD when nothing changed since it.
    pub fn snapshot(&self, label: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let parent = self.head_commit();
        if let Some(ref parent) = parent
            && parent.tree_id() == tree_id
        {
            return Ok(parent.id().to_string());
        }

        let tree = self.repo.find_tree(tree_id)?;
        let sig = self
            .repo
            .signature()
            .or_else(|_| Signature::now("anvil", "anvil@localhost"))?;
        let message = format!("[anvil] {}", label);
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let commit_id = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)
            .context("Failed to create snapshot commit")?;

        Ok(commit_id.to_string())
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    /// Reset HEAD, index and working tree to a snapshot.
    pub fn restore(&self, sha: &str) -> Result<()> {
        let oid = Oid::from_str(sha).with_context(|| format!("Invalid snapshot id {}", sha))?;
        let commit = self
            .repo
            .find_commit(oid)
            .with_context(|| format!("Snapshot {} not found", sha))?;
        self.repo
            .reset(commit.as_object(), ResetType::Hard, None)
            .context("Failed to reset to snapshot")?;
        Ok(())
    }
}
