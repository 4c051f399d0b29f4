use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::repo::{GitOutput, GitRunner, RealGitRunner};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("worktree already exists: {0}")]
    AlreadyExists(String),
    #[error("git command failed: {0}")]
    GitCommand(String),
    #[error("no branch to merge into: parent `{0}` is gone and neither main nor master exists")]
    NoMergeTarget(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorktreeError>;

// ---------------------------------------------------------------------------
// WorktreeInfo / MergeBack
// ---------------------------------------------------------------------------

/// An isolated working copy created for one epic's agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
    /// The branch checked out when the worktree was created; merge-back
    /// targets this, falling back to main/master if it was deleted.
    pub parent_branch: String,
    pub epic_id: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of merging a worktree branch back into its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeBack {
    pub success: bool,
    /// False when the branch had no changes relative to the parent.
    pub merged: bool,
    pub merge_commit: Option<String>,
    pub conflicts: Vec<String>,
}

// ---------------------------------------------------------------------------
// WorktreeManager
// ---------------------------------------------------------------------------

/// Lifecycle and merge-back for per-epic git worktrees under
/// `.tick/worktrees/<epic>/`.
pub struct WorktreeManager {
    repo_root: PathBuf,
    git: Box<dyn GitRunner>,
}

impl WorktreeManager {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            git: Box::new(RealGitRunner),
        }
    }

    /// Create a manager with a custom git runner (for testing).
    pub fn with_git_runner(repo_root: impl Into<PathBuf>, git: Box<dyn GitRunner>) -> Self {
        Self {
            repo_root: repo_root.into(),
            git,
        }
    }

    pub fn worktree_path(&self, epic_id: &str) -> PathBuf {
        self.repo_root.join(".tick").join("worktrees").join(epic_id)
    }

    /// Create a worktree for an epic, branched off the current branch.
    pub fn create(&self, epic_id: &str) -> Result<WorktreeInfo> {
        let path = self.worktree_path(epic_id);
        if path.exists() {
            return Err(WorktreeError::AlreadyExists(path.display().to_string()));
        }
        std::fs::create_dir_all(path.parent().expect("worktrees parent"))?;

        let parent_branch = self.current_branch()?;
        let branch = format!("tick/{epic_id}");
        let path_str = path.display().to_string();

        info!(
            epic_id,
            worktree = %path_str,
            branch = %branch,
            parent = %parent_branch,
            "creating worktree"
        );

        let out = self.run(&[
            "worktree",
            "add",
            "-b",
            &branch,
            &path_str,
            &parent_branch,
        ])?;
        if !out.success {
            return Err(WorktreeError::GitCommand(out.stderr));
        }

        Ok(WorktreeInfo {
            path,
            branch,
            parent_branch,
            epic_id: epic_id.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Merge the worktree's branch back into its parent branch.
    ///
    /// Checks out the parent (falling back to main/master if the parent was
    /// deleted), merges with `--no-ff`, and reports conflicts without
    /// resolving them; the repo is left mid-merge so the caller can inspect
    /// and either resolve or [`abort_merge`].
    ///
    /// [`abort_merge`]: WorktreeManager::abort_merge
    pub fn merge_back(&self, info: &WorktreeInfo) -> Result<MergeBack> {
        let target = self.resolve_merge_target(&info.parent_branch)?;
        let out = self.run(&["checkout", &target])?;
        if !out.success {
            return Err(WorktreeError::GitCommand(out.stderr));
        }

        // Nothing to merge is success without a merge commit.
        let diff = self.run(&["diff", "--stat", &target, &info.branch])?;
        if diff.success && diff.stdout.trim().is_empty() {
            info!(branch = %info.branch, "nothing to merge");
            return Ok(MergeBack {
                success: true,
                merged: false,
                merge_commit: None,
                conflicts: Vec::new(),
            });
        }

        let msg = format!("Merge branch '{}' into {target}", info.branch);
        let merge = self.run(&["merge", "--no-ff", "-m", &msg, &info.branch])?;
        if merge.success {
            let commit = self
                .run(&["rev-parse", "HEAD"])?
                .stdout
                .trim()
                .to_string();
            info!(branch = %info.branch, commit = %commit, "merge-back complete");
            return Ok(MergeBack {
                success: true,
                merged: true,
                merge_commit: Some(commit),
                conflicts: Vec::new(),
            });
        }

        let conflicts = self.conflict_files()?;
        warn!(branch = %info.branch, ?conflicts, "merge-back conflicts");
        Ok(MergeBack {
            success: false,
            merged: false,
            merge_commit: None,
            conflicts,
        })
    }

    /// Stage and commit everything in the worktree. Returns the commit id,
    /// or `None` when the tree was clean.
    pub fn commit_all(&self, info: &WorktreeInfo, message: &str) -> Result<Option<String>> {
        let status = self.run_in(&info.path, &["status", "--porcelain"])?;
        if !status.success {
            return Err(WorktreeError::GitCommand(status.stderr));
        }
        if status.stdout.trim().is_empty() {
            return Ok(None);
        }

        let add = self.run_in(&info.path, &["add", "-A"])?;
        if !add.success {
            return Err(WorktreeError::GitCommand(add.stderr));
        }
        let commit = self.run_in(&info.path, &["commit", "-m", message])?;
        if !commit.success {
            return Err(WorktreeError::GitCommand(commit.stderr));
        }
        Ok(Some(self.head_commit(info)?))
    }

    /// Current HEAD commit of the worktree.
    pub fn head_commit(&self, info: &WorktreeInfo) -> Result<String> {
        let out = self.run_in(&info.path, &["rev-parse", "HEAD"])?;
        if !out.success {
            return Err(WorktreeError::GitCommand(out.stderr));
        }
        Ok(out.stdout.trim().to_string())
    }

    /// True when the repository currently has unresolved merge conflicts.
    pub fn has_conflict(&self) -> Result<bool> {
        Ok(!self.conflict_files()?.is_empty())
    }

    /// Abort an in-progress merge, restoring the pre-merge state.
    pub fn abort_merge(&self) -> Result<()> {
        let out = self.run(&["merge", "--abort"])?;
        if out.success {
            Ok(())
        } else {
            Err(WorktreeError::GitCommand(out.stderr))
        }
    }

    /// Remove the worktree and its branch. Only safe after a clean merge
    /// unless `discard` is set.
    pub fn destroy(&self, info: &WorktreeInfo, discard: bool) -> Result<()> {
        let path_str = info.path.display().to_string();
        let mut args = vec!["worktree", "remove"];
        if discard {
            args.push("--force");
        }
        args.push(&path_str);
        let out = self.run(&args)?;
        if !out.success {
            return Err(WorktreeError::GitCommand(out.stderr));
        }

        let delete_flag = if discard { "-D" } else { "-d" };
        let out = self.run(&["branch", delete_flag, &info.branch])?;
        if !out.success {
            warn!(branch = %info.branch, stderr = %out.stderr, "branch cleanup failed");
        }
        Ok(())
    }

    fn current_branch(&self) -> Result<String> {
        let out = self.run(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if !out.success {
            return Err(WorktreeError::GitCommand(out.stderr));
        }
        Ok(out.stdout.trim().to_string())
    }

    /// Pick the branch to merge into: the recorded parent if it still
    /// exists, otherwise main, otherwise master.
    fn resolve_merge_target(&self, parent: &str) -> Result<String> {
        for candidate in [parent, "main", "master"] {
            let probe = self.run(&[
                "rev-parse",
                "--verify",
                "--quiet",
                &format!("refs/heads/{candidate}"),
            ])?;
            if probe.success {
                return Ok(candidate.to_string());
            }
        }
        Err(WorktreeError::NoMergeTarget(parent.to_string()))
    }

    fn conflict_files(&self) -> Result<Vec<String>> {
        let out = self.run(&["diff", "--name-only", "--diff-filter=U"])?;
        if !out.success {
            return Err(WorktreeError::GitCommand(out.stderr));
        }
        Ok(out
            .stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn run(&self, args: &[&str]) -> Result<GitOutput> {
        self.git
            .run_git(&self.repo_root, args)
            .map_err(WorktreeError::GitCommand)
    }

    fn run_in(&self, dir: &Path, args: &[&str]) -> Result<GitOutput> {
        self.git
            .run_git(dir, args)
            .map_err(WorktreeError::GitCommand)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A mock git runner that records commands and returns canned responses.
    struct MockGit {
        responses: Mutex<Vec<GitOutput>>,
        commands: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl MockGit {
        fn new(responses: Vec<GitOutput>) -> (Box<Self>, Arc<Mutex<Vec<Vec<String>>>>) {
            let commands = Arc::new(Mutex::new(Vec::new()));
            (
                Box::new(Self {
                    responses: Mutex::new(responses),
                    commands: Arc::clone(&commands),
                }),
                commands,
            )
        }
    }

    impl GitRunner for MockGit {
        fn run_git(&self, _dir: &Path, args: &[&str]) -> std::result::Result<GitOutput, String> {
            self.commands
                .lock()
                .unwrap()
                .push(args.iter().map(|s| s.to_string()).collect());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(GitOutput::ok(""))
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    fn info(path: &Path) -> WorktreeInfo {
        WorktreeInfo {
            path: path.join(".tick").join("worktrees").join("e1c"),
            branch: "tick/e1c".into(),
            parent_branch: "feature/base".into(),
            epic_id: "e1c".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_builds_branch_off_current() {
        let dir = tempfile::tempdir().unwrap();
        let (git, commands) = MockGit::new(vec![
            GitOutput::ok("develop\n"), // rev-parse --abbrev-ref HEAD
            GitOutput::ok(""),          // worktree add
        ]);
        let mgr = WorktreeManager::with_git_runner(dir.path(), git);

        let wt = mgr.create("e1c").unwrap();
        assert_eq!(wt.branch, "tick/e1c");
        assert_eq!(wt.parent_branch, "develop");
        assert!(wt.path.ends_with(".tick/worktrees/e1c"));

        let cmds = commands.lock().unwrap();
        assert!(cmds[1].contains(&"add".to_string()));
        assert!(cmds[1].contains(&"develop".to_string()));
    }

    #[test]
    fn create_rejects_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".tick").join("worktrees").join("e1c")).unwrap();
        let (git, _) = MockGit::new(vec![]);
        let mgr = WorktreeManager::with_git_runner(dir.path(), git);

        assert!(matches!(
            mgr.create("e1c"),
            Err(WorktreeError::AlreadyExists(_))
        ));
    }

    #[test]
    fn merge_back_clean() {
        let dir = tempfile::tempdir().unwrap();
        let (git, _) = MockGit::new(vec![
            GitOutput::ok(""),            // rev-parse --verify parent
            GitOutput::ok(""),            // checkout
            GitOutput::ok("src/x.rs | 3 +-\n"), // diff --stat
            GitOutput::ok(""),            // merge
            GitOutput::ok("abc123\n"),    // rev-parse HEAD
        ]);
        let mgr = WorktreeManager::with_git_runner(dir.path(), git);

        let result = mgr.merge_back(&info(dir.path())).unwrap();
        assert!(result.success);
        assert!(result.merged);
        assert_eq!(result.merge_commit.as_deref(), Some("abc123"));
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn merge_back_nothing_to_merge() {
        let dir = tempfile::tempdir().unwrap();
        let (git, _) = MockGit::new(vec![
            GitOutput::ok(""), // verify parent
            GitOutput::ok(""), // checkout
            GitOutput::ok(""), // empty diff
        ]);
        let mgr = WorktreeManager::with_git_runner(dir.path(), git);

        let result = mgr.merge_back(&info(dir.path())).unwrap();
        assert!(result.success);
        assert!(!result.merged);
        assert_eq!(result.merge_commit, None);
    }

    #[test]
    fn merge_back_reports_conflicts_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let (git, commands) = MockGit::new(vec![
            GitOutput::ok(""),                    // verify parent
            GitOutput::ok(""),                    // checkout
            GitOutput::ok("src/x.rs | 3 +-\n"),   // diff --stat
            GitOutput::err("CONFLICT (content)"), // merge fails
            GitOutput::ok("src/x.rs\n"),          // diff --diff-filter=U
        ]);
        let mgr = WorktreeManager::with_git_runner(dir.path(), git);

        let result = mgr.merge_back(&info(dir.path())).unwrap();
        assert!(!result.success);
        assert_eq!(result.conflicts, vec!["src/x.rs"]);

        // No automatic `merge --abort`; that is the caller's decision.
        let cmds = commands.lock().unwrap();
        assert!(!cmds.iter().any(|c| c.contains(&"--abort".to_string())));
    }

    #[test]
    fn merge_target_falls_back_to_main() {
        let dir = tempfile::tempdir().unwrap();
        let (git, commands) = MockGit::new(vec![
            GitOutput::err(""), // verify parent: gone
            GitOutput::ok(""),  // verify main: exists
            GitOutput::ok(""),  // checkout main
            GitOutput::ok(""),  // empty diff
        ]);
        let mgr = WorktreeManager::with_git_runner(dir.path(), git);

        let result = mgr.merge_back(&info(dir.path())).unwrap();
        assert!(result.success);

        let cmds = commands.lock().unwrap();
        let checkout = cmds.iter().find(|c| c[0] == "checkout").unwrap();
        assert_eq!(checkout[1], "main");
    }

    #[test]
    fn merge_target_exhausted_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let (git, _) = MockGit::new(vec![
            GitOutput::err(""), // parent
            GitOutput::err(""), // main
            GitOutput::err(""), // master
        ]);
        let mgr = WorktreeManager::with_git_runner(dir.path(), git);

        assert!(matches!(
            mgr.merge_back(&info(dir.path())),
            Err(WorktreeError::NoMergeTarget(_))
        ));
    }

    #[test]
    fn destroy_removes_worktree_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        let (git, commands) = MockGit::new(vec![GitOutput::ok(""), GitOutput::ok("")]);
        let mgr = WorktreeManager::with_git_runner(dir.path(), git);

        mgr.destroy(&info(dir.path()), true).unwrap();

        let cmds = commands.lock().unwrap();
        assert!(cmds[0].contains(&"--force".to_string()));
        assert_eq!(cmds[1][0], "branch");
        assert_eq!(cmds[1][1], "-D");
    }

    #[test]
    fn commit_all_skips_clean_tree() {
        let dir = tempfile::tempdir().unwrap();
        let (git, commands) = MockGit::new(vec![GitOutput::ok("")]); // clean status
        let mgr = WorktreeManager::with_git_runner(dir.path(), git);

        let result = mgr.commit_all(&info(dir.path()), "msg").unwrap();
        assert_eq!(result, None);
        assert_eq!(commands.lock().unwrap().len(), 1);
    }

    #[test]
    fn commit_all_commits_dirty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let (git, commands) = MockGit::new(vec![
            GitOutput::ok(" M src/x.rs\n"), // status
            GitOutput::ok(""),              // add -A
            GitOutput::ok(""),              // commit
            GitOutput::ok("abc123\n"),      // rev-parse HEAD
        ]);
        let mgr = WorktreeManager::with_git_runner(dir.path(), git);

        let result = mgr.commit_all(&info(dir.path()), "msg").unwrap();
        assert_eq!(result.as_deref(), Some("abc123"));

        let cmds = commands.lock().unwrap();
        assert_eq!(cmds[1], vec!["add", "-A"]);
        assert_eq!(cmds[2][0], "commit");
    }

    #[test]
    fn has_conflict_queries_diff_filter() {
        let dir = tempfile::tempdir().unwrap();
        let (git, _) = MockGit::new(vec![GitOutput::ok("src/a.rs\n")]);
        let mgr = WorktreeManager::with_git_runner(dir.path(), git);
        assert!(mgr.has_conflict().unwrap());
    }
}
