//! Repository service: the operations clients call
//!
//! Every operation resolves its path to the enclosing repository's
//! [`RepositoryPath`] and runs as a task on that repository's queue. Mutating operations are followed by a
//! synthetic change notification so subscribers refresh even when the
//! filesystem watcher misses (or coalesces away) the change.

mod mutate;
mod network;
#[cfg(test)]
mod tests;

pub use mutate::{MutatingCommand, MutationOutcome, ResetMode};
pub use network::PushOptions;

use std::path::Path;
use std::sync::Arc;

use git2::Repository;
use tracing::{debug, warn};

use crate::config::Config;
use crate::credentials::{CredentialMediator, CredentialProvider};
use crate::git::{Access, Git};
use crate::model::{
    BranchInfo, FileStatus, GitLog, QuickStatus, RemoteInfo, RepoStatus, SubmoduleEntry,
    SubmoduleStatus,
};
use crate::parse::{
    branches, parse_log, parse_refs, parse_remotes, parse_status, refs_by_commit, StatusEntries,
    LOG_FORMAT, REF_FORMAT,
};
use crate::path::RepositoryPath;
use crate::queue::{TaskKind, TaskQueue};
use crate::submodule::{self, SubmoduleCoordinator, UpdateOptions};
use crate::watch::{ChangeSource, Subscription, WatchHub};
use crate::{Error, Result};

/// Entry point for all repository operations
#[derive(Clone)]
pub struct RepoService {
    git: Git,
    queue: TaskQueue,
    credentials: CredentialMediator,
    watch: WatchHub,
    submodules: SubmoduleCoordinator,
}

impl std::fmt::Debug for RepoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoService")
            .field("git", &self.git.program())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl RepoService {
    /// Create a service from configuration
    pub fn new(config: &Config, provider: Arc<dyn CredentialProvider>) -> Self {
        Self::from_parts(
            Git::new(config.git.clone()),
            TaskQueue::new(config.queue.max_concurrent),
            CredentialMediator::from_config(provider, &config.credentials),
            WatchHub::new(config.watch.debounce),
        )
    }

    /// Assemble a service from already-built components
    pub fn from_parts(
        git: Git,
        queue: TaskQueue,
        credentials: CredentialMediator,
        watch: WatchHub,
    ) -> Self {
        let submodules = SubmoduleCoordinator::new(git.clone(), queue.clone());
        Self {
            git,
            queue,
            credentials,
            watch,
            submodules,
        }
    }

    /// The task queue all operations run on
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// The credential mediator used for network operations
    pub fn credentials(&self) -> &CredentialMediator {
        &self.credentials
    }

    /// The change watcher hub
    pub fn watch_hub(&self) -> &WatchHub {
        &self.watch
    }

    /// Classify `path` without going through a queue
    pub fn quick_status(&self, path: impl AsRef<Path>) -> Result<QuickStatus> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(QuickStatus::NoSuchPath);
        }

        let repo = match Repository::discover(path) {
            Ok(repo) => repo,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(QuickStatus::Uninited),
            Err(e) => return Err(Error::Other(format!("Git error: {}", e))),
        };

        if repo.is_bare() {
            return Ok(QuickStatus::Bare {
                root: RepositoryPath::new(repo.path())?,
            });
        }
        let workdir = repo
            .workdir()
            .ok_or_else(|| Error::Other(format!("{} has no working tree", path.display())))?;
        Ok(QuickStatus::Inited {
            root: RepositoryPath::new(workdir)?,
        })
    }

    /// Create a repository at `path`, creating the directory if needed
    pub async fn init(&self, path: impl AsRef<Path>, bare: bool) -> Result<RepositoryPath> {
        tokio::fs::create_dir_all(path.as_ref()).await?;
        let repo = RepositoryPath::new(path)?;
        let git = self.git.clone();
        let root = repo.clone();

        self.queue
            .run(&repo, TaskKind::Mutating, move || async move {
                let mut args = vec!["init"];
                if bare {
                    args.push("--bare");
                }
                git.write(root.as_path(), &args).await.map(|_| ())
            })
            .await?;
        self.watch.notify(&repo, ChangeSource::Operation);
        Ok(repo)
    }

    /// Working-tree snapshot, including each initialized submodule's own status
    pub async fn get_status(&self, path: impl AsRef<Path>) -> Result<RepoStatus> {
        let repo = RepositoryPath::discover(path)?;
        let git = self.git.clone();
        let root = repo.clone();

        let (entries, flags, modules) = self
            .queue
            .run(&repo, TaskKind::Read, move || async move {
                let entries = read_status(&git, &root).await?;
                let flags = in_progress(&git, &root).await?;
                let modules = submodule::discover(&git, &root).await?;
                Ok((entries, flags, modules))
            })
            .await?;

        let submodules = self.submodule_statuses(&repo, modules).await?;
        Ok(RepoStatus {
            branch: entries.branch,
            files: entries.files,
            submodules,
            in_rebase: flags.rebase,
            in_merge: flags.merge,
            in_cherry_pick: flags.cherry_pick,
        })
    }

    /// Query each submodule's status on its own queue, concurrently
    async fn submodule_statuses(
        &self,
        repo: &RepositoryPath,
        modules: Vec<SubmoduleEntry>,
    ) -> Result<Vec<SubmoduleStatus>> {
        let mut pending = Vec::with_capacity(modules.len());
        for module in modules {
            let handle = match module.repository {
                Some(ref child) => {
                    let git = self.git.clone();
                    let target = child.clone();
                    Some(self.queue.submit(child, TaskKind::Read, move || async move {
                        read_status(&git, &target).await
                    }))
                }
                None => None,
            };
            pending.push((module.path, handle));
        }

        let mut statuses = Vec::with_capacity(pending.len());
        for (path, handle) in pending {
            let status = match handle {
                None => SubmoduleStatus {
                    path,
                    initialized: false,
                    files: Vec::new(),
                    error: None,
                },
                Some(handle) => match handle.join().await {
                    Ok(entries) => SubmoduleStatus {
                        path,
                        initialized: true,
                        files: entries.files,
                        error: None,
                    },
                    Err(e) => {
                        warn!(repo = %repo, submodule = %path, error = %e, "could not read submodule status");
                        SubmoduleStatus {
                            path,
                            initialized: true,
                            files: Vec::new(),
                            error: Some(e.to_string()),
                        }
                    }
                },
            };
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// One page of history across all branches, tags and remotes
    ///
    /// Refs are read fresh on every call.
    pub async fn get_log(&self, path: impl AsRef<Path>, limit: usize, skip: usize) -> Result<GitLog> {
        let repo = RepositoryPath::discover(path)?;
        let git = self.git.clone();
        let root = repo.clone();

        let nodes = self
            .queue
            .run(&repo, TaskKind::Read, move || async move {
                let format = format!("--format={}", REF_FORMAT);
                let refs = git
                    .read(root.as_path(), ["for-each-ref", format.as_str()])
                    .await?;
                let records = parse_refs(&refs.stdout)?;

                // exit code 1: HEAD is unborn
                let head = git
                    .run_with(
                        root.as_path(),
                        ["rev-parse", "-q", "--verify", "HEAD"],
                        &git.options(Access::Read).allow_exit_code(1),
                    )
                    .await?;
                let head = head.success().then(|| head.stdout.trim().to_string());

                let has_history_refs = records.iter().any(|r| {
                    r.name.starts_with("refs/heads/")
                        || r.name.starts_with("refs/tags/")
                        || r.name.starts_with("refs/remotes/")
                });
                if head.is_none() && !has_history_refs {
                    debug!(repo = %root, "no commits yet");
                    return Ok(Vec::new());
                }

                let mut args = vec!["log".to_string()];
                if head.is_some() {
                    args.push("HEAD".to_string());
                }
                args.extend([
                    "--branches".to_string(),
                    "--tags".to_string(),
                    "--remotes".to_string(),
                    "--date-order".to_string(),
                    "--no-color".to_string(),
                    format!("--pretty=format:{}", LOG_FORMAT),
                    format!("--max-count={}", limit),
                    format!("--skip={}", skip),
                ]);
                let output = git.read(root.as_path(), &args).await?;
                parse_log(&output.stdout, &refs_by_commit(&records, head.as_deref()))
            })
            .await?;

        Ok(GitLog { nodes, limit, skip })
    }

    /// Local and remote-tracking branches
    pub async fn list_branches(&self, path: impl AsRef<Path>) -> Result<Vec<BranchInfo>> {
        let repo = RepositoryPath::discover(path)?;
        let git = self.git.clone();
        let root = repo.clone();

        self.queue
            .run(&repo, TaskKind::Read, move || async move {
                let format = format!("--format={}", REF_FORMAT);
                let output = git
                    .read(
                        root.as_path(),
                        ["for-each-ref", format.as_str(), "refs/heads", "refs/remotes"],
                    )
                    .await?;
                Ok(branches(&parse_refs(&output.stdout)?))
            })
            .await
    }

    /// Configured remotes
    pub async fn list_remotes(&self, path: impl AsRef<Path>) -> Result<Vec<RemoteInfo>> {
        let repo = RepositoryPath::discover(path)?;
        let git = self.git.clone();
        let root = repo.clone();

        self.queue
            .run(&repo, TaskKind::Read, move || async move {
                let output = git.read(root.as_path(), ["remote", "-v"]).await?;
                parse_remotes(&output.stdout)
            })
            .await
    }

    /// Submodules of the repository at `path`
    pub async fn list_submodules(&self, path: impl AsRef<Path>) -> Result<Vec<SubmoduleEntry>> {
        let repo = RepositoryPath::discover(path)?;
        self.submodules.discover(&repo).await
    }

    /// Add a submodule cloned from `url` at `sub_path`
    pub async fn add_submodule(
        &self,
        path: impl AsRef<Path>,
        url: &str,
        sub_path: &str,
    ) -> Result<SubmoduleEntry> {
        let repo = RepositoryPath::discover(path)?;
        let result = self.submodules.add(&repo, url, sub_path).await;
        self.watch.notify(&repo, ChangeSource::Operation);
        result
    }

    /// Initialize and update submodules
    pub async fn update_submodules(
        &self,
        path: impl AsRef<Path>,
        options: UpdateOptions,
    ) -> Result<Vec<SubmoduleEntry>> {
        let repo = RepositoryPath::discover(path)?;
        let result = self.submodules.update(&repo, options).await;
        self.watch.notify(&repo, ChangeSource::Operation);
        result
    }

    /// Remove the submodule at `sub_path`
    pub async fn remove_submodule(&self, path: impl AsRef<Path>, sub_path: &str) -> Result<()> {
        let repo = RepositoryPath::discover(path)?;
        let result = self.submodules.remove(&repo, sub_path).await;
        self.watch.notify(&repo, ChangeSource::Operation);
        result
    }

    /// Start receiving change notifications for `path`
    pub fn subscribe_to_changes(&self, path: impl AsRef<Path>) -> Result<Subscription> {
        let repo = RepositoryPath::discover(path)?;
        self.watch.subscribe(&repo)
    }

    /// Stop receiving change notifications
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.watch.unsubscribe(subscription);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct InProgress {
    rebase: bool,
    merge: bool,
    cherry_pick: bool,
}

/// Run and parse `git status` in `root`; caller must be on `root`'s queue
pub(crate) async fn read_status(git: &Git, root: &RepositoryPath) -> Result<StatusEntries> {
    let output = git
        .read(
            root.as_path(),
            [
                "status",
                "--porcelain=v1",
                "-z",
                "--branch",
                "--untracked-files=all",
                "--ignore-submodules=dirty",
            ],
        )
        .await?;
    parse_status(&output.stdout)
}

/// Paths currently in conflict; caller must be on `root`'s queue
pub(crate) async fn conflicted_files(git: &Git, root: &RepositoryPath) -> Result<Vec<String>> {
    Ok(read_status(git, root)
        .await?
        .files
        .into_iter()
        .filter(|f| f.status == FileStatus::Conflicted)
        .map(|f| f.path)
        .collect())
}

async fn in_progress(git: &Git, root: &RepositoryPath) -> Result<InProgress> {
    let dir = submodule::git_dir(git, root.as_path()).await?;
    Ok(InProgress {
        rebase: dir.join("rebase-merge").exists() || dir.join("rebase-apply").exists(),
        merge: dir.join("MERGE_HEAD").exists(),
        cherry_pick: dir.join("CHERRY_PICK_HEAD").exists(),
    })
}
