//! Isolated execution contexts backed by git worktrees.
//!
//! Each worktree gets its own branch `anvil/<task>/<name>` cut from the base
//! repository's HEAD. Merging commits whatever the worktree holds, then folds
//! the branches into the base HEAD. A merge either lands completely or, on
//! any conflict, leaves the base untouched.

mod variants;

pub use variants::{
    MAX_VARIANTS, MIN_VARIANTS, VariantMetrics, clamp_variant_count, select_best,
};

use git2::{
    BranchType, Commit, ErrorCode, IndexAddOption, Oid, Repository, Signature,
    WorktreeAddOptions, WorktreePruneOptions, build::CheckoutBuilder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::WorktreeError;
use crate::util::{short_id, state_dir};

/// How worktrees are folded back into the base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Merge every given worktree in order
    Combine,
    /// Take exactly one of the given worktrees
    Select(PathBuf),
}

/// Files that could not be merged from one worktree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub worktree: String,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    /// Names of the worktrees merged, in merge order
    pub merged: Vec<String>,
    /// Files changed in the base by the merge
    pub files: Vec<PathBuf>,
    /// New base HEAD, absent when nothing changed
    pub commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worktree {
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
    pub task_id: String,
}

/// Creates, merges and removes worktrees of one base repository.
#[derive(Debug)]
pub struct WorktreeManager {
    base_dir: PathBuf,
    registry: Mutex<HashMap<String, Vec<Worktree>>>,
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn signature(repo: &Repository) -> Result<Signature<'static>, git2::Error> {
    repo.signature()
        .or_else(|_| Signature::now("anvil", "anvil@localhost"))
}

impl WorktreeManager {
    pub fn new(base_dir: &Path) -> Result<Self, WorktreeError> {
        let _ = Repository::discover(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            registry: Mutex::new(HashMap::new()),
        })
    }

    fn repo(&self) -> Result<Repository, WorktreeError> {
        Ok(Repository::discover(&self.base_dir)?)
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Worktree>>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn find(&self, path: &Path) -> Option<Worktree> {
        self.registry()
            .values()
            .flatten()
            .find(|w| w.path == path)
            .cloned()
    }

    /// Create an isolated worktree for `name` and return its path.
    pub fn create(&self, task_id: &str, name: &str) -> Result<PathBuf, WorktreeError> {
        let safe = sanitize(name);
        if self
            .registry()
            .get(task_id)
            .is_some_and(|list| list.iter().any(|w| w.name == safe))
        {
            return Err(WorktreeError::AlreadyExists {
                task_id: task_id.to_string(),
                name: safe,
            });
        }

        let repo = self.repo()?;
        let head = match repo.head() {
            Ok(head) => head.peel_to_commit()?,
            Err(e) if e.code() == ErrorCode::UnbornBranch => {
                return Err(WorktreeError::NoBaseCommit);
            }
            Err(e) => return Err(e.into()),
        };

        let path = state_dir(&self.base_dir)
            .join("worktrees")
            .join(short_id(task_id))
            .join(&safe);
        if path.exists() {
            return Err(WorktreeError::AlreadyExists {
                task_id: task_id.to_string(),
                name: safe,
            });
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let branch = format!("anvil/{}/{}", short_id(task_id), safe);
        let reference = repo.branch(&branch, &head, true)?.into_reference();
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));
        let admin_name = format!("{}-{}", short_id(task_id), safe);
        repo.worktree(&admin_name, &path, Some(&opts))?;

        let worktree = Worktree {
            name: safe,
            path: path.clone(),
            branch,
            task_id: task_id.to_string(),
        };
        debug!(
            task_id,
            name = %worktree.name,
            branch = %worktree.branch,
            path = %path.display(),
            "worktree created"
        );
        self.registry()
            .entry(task_id.to_string())
            .or_default()
            .push(worktree);
        Ok(path)
    }

    /// Commit everything in a worktree onto its branch. Returns the branch tip.
    fn commit_worktree(worktree: &Worktree) -> Result<Oid, WorktreeError> {
        let repo = Repository::open(&worktree.path)?;
        let mut index = repo.index()?;
        index.add_all(["."].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["."].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let parent = repo.head()?.peel_to_commit()?;
        if parent.tree_id() == tree_id {
            return Ok(parent.id());
        }

        let tree = repo.find_tree(tree_id)?;
        let sig = signature(&repo)?;
        let oid = repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &format!("[anvil] {}", worktree.name),
            &tree,
            &[&parent],
        )?;
        Ok(oid)
    }

    fn conflict_files(index: &git2::Index) -> Result<Vec<PathBuf>, git2::Error> {
        let mut files = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
            if let Some(entry) = entry {
                let path = PathBuf::from(String::from_utf8_lossy(&entry.path).into_owned());
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    /// Fold worktrees into the base HEAD.
    pub fn merge(
        &self,
        paths: &[PathBuf],
        strategy: MergeStrategy,
    ) -> Result<MergeResult, WorktreeError> {
        let mut candidates = Vec::with_capacity(paths.len());
        for path in paths {
            let worktree = self
                .find(path)
                .ok_or_else(|| WorktreeError::UnknownWorktree { path: path.clone() })?;
            candidates.push(worktree);
        }

        let selected: Vec<Worktree> = match strategy {
            MergeStrategy::Combine => candidates,
            MergeStrategy::Select(choice) => {
                let chosen = candidates
                    .into_iter()
                    .find(|w| w.path == choice)
                    .ok_or(WorktreeError::NotACandidate { path: choice })?;
                vec![chosen]
            }
        };

        let repo = self.repo()?;
        let base = repo.head()?.peel_to_commit()?;
        let sig = signature(&repo)?;
        let mut current: Commit<'_> = base.clone();
        let mut conflicts = Vec::new();
        let mut merged = Vec::new();

        for worktree in &selected {
            let tip_id = Self::commit_worktree(worktree)?;
            let tip = repo.find_commit(tip_id)?;

            if tip.id() == current.id() || repo.graph_descendant_of(current.id(), tip.id())? {
                merged.push(worktree.name.clone());
                continue;
            }
            if repo.graph_descendant_of(tip.id(), current.id())? {
                current = tip;
                merged.push(worktree.name.clone());
                continue;
            }

            let mut index = repo.merge_commits(&current, &tip, None)?;
            if index.has_conflicts() {
                let files = Self::conflict_files(&index)?;
                warn!(worktree = %worktree.name, files = files.len(), "merge conflict");
                conflicts.push(MergeConflict {
                    worktree: worktree.name.clone(),
                    files,
                });
                continue;
            }

            let tree_id = index.write_tree_to(&repo)?;
            let tree = repo.find_tree(tree_id)?;
            let oid = repo.commit(
                None,
                &sig,
                &sig,
                &format!("[anvil] merge {}", worktree.name),
                &tree,
                &[&current, &tip],
            )?;
            current = repo.find_commit(oid)?;
            merged.push(worktree.name.clone());
        }

        if !conflicts.is_empty() {
            return Err(WorktreeError::Conflict { conflicts });
        }

        if current.id() == base.id() {
            return Ok(MergeResult {
                merged,
                files: Vec::new(),
                commit: None,
            });
        }

        let mut files = Vec::new();
        let diff = repo.diff_tree_to_tree(Some(&base.tree()?), Some(&current.tree()?), None)?;
        for delta in diff.deltas() {
            if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                files.push(path.to_path_buf());
            }
        }

        let head = repo.head()?;
        if head.is_branch()
            && let Some(name) = head.name()
        {
            repo.reference(name, current.id(), true, "anvil merge")?;
        } else {
            repo.set_head_detached(current.id())?;
        }
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

        info!(
            merged = merged.len(),
            files = files.len(),
            commit = %current.id(),
            "worktrees merged"
        );
        Ok(MergeResult {
            merged,
            files,
            commit: Some(current.id().to_string()),
        })
    }

    fn prune(repo: &Repository, admin_name: &str) {
        match repo.find_worktree(admin_name) {
            Ok(wt) => {
                let _ = wt.unlock();
                if let Err(e) = wt.prune(Some(
                    WorktreePruneOptions::new()
                        .valid(true)
                        .working_tree(true)
                        .locked(true),
                )) {
                    warn!(worktree = admin_name, error = %e, "worktree prune failed");
                }
            }
            Err(e) => warn!(worktree = admin_name, error = %e, "worktree lookup failed"),
        }
        let admin_dir = repo.path().join("worktrees").join(admin_name);
        if admin_dir.exists() {
            let _ = std::fs::remove_dir_all(&admin_dir);
        }
    }

    /// Branches named `anvil/<task>/...`.
    fn task_branches(repo: &Repository, task_id: &str) -> Result<Vec<String>, git2::Error> {
        let prefix = format!("anvil/{}/", short_id(task_id));
        let mut names = Vec::new();
        for entry in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            if let Some(name) = branch.name()?
                && name.starts_with(&prefix)
            {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Remove every worktree, branch and directory of a task.
    ///
    /// Works from the repository and the state directory rather than from
    /// what this manager created, so leftovers of a process that died
    /// mid-level are removed too. Returns the number of worktrees pruned.
    pub fn cleanup(&self, task_id: &str) -> Result<usize, WorktreeError> {
        self.registry().remove(task_id);
        let repo = self.repo()?;

        let admin_prefix = format!("{}-", short_id(task_id));
        let admin_names: Vec<String> = repo
            .worktrees()?
            .iter()
            .flatten()
            .filter(|name| name.starts_with(&admin_prefix))
            .map(String::from)
            .collect();
        for admin_name in &admin_names {
            Self::prune(&repo, admin_name);
        }

        let task_dir = state_dir(&self.base_dir)
            .join("worktrees")
            .join(short_id(task_id));
        if task_dir.exists() {
            std::fs::remove_dir_all(&task_dir)?;
        }

        let branches = Self::task_branches(&repo, task_id)?;
        for name in &branches {
            match repo.find_branch(name, BranchType::Local) {
                Ok(mut branch) => {
                    if let Err(e) = branch.delete() {
                        warn!(branch = %name, error = %e, "failed to delete branch");
                    }
                }
                Err(e) if e.code() == ErrorCode::NotFound => {}
                Err(e) => warn!(branch = %name, error = %e, "branch lookup failed"),
            }
        }

        debug!(
            task_id,
            worktrees = admin_names.len(),
            branches = branches.len(),
            "worktrees cleaned up"
        );
        Ok(admin_names.len())
    }
}
