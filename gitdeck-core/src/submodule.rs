//! Submodule discovery and lifecycle
//!
//! Configuration changes (add, remove, init) run on the parent's queue.
//! Work on a submodule's own history (update, reset) runs on the queue keyed
//! by the submodule's path, so siblings proceed concurrently while each one
//! stays serialized against other operations on it. Child tasks are only
//! submitted after the parent task has finished, never from inside it.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::git::{Access, Git};
use crate::model::SubmoduleEntry;
use crate::parse::{parse_gitmodules, parse_index_entry, parse_submodule_status};
use crate::path::RepositoryPath;
use crate::queue::{TaskKind, TaskQueue};
use crate::{Error, Result};

/// `-c` option that lets submodule commands use local-path transports
const ALLOW_FILE_PROTOCOL: [&str; 2] = ["-c", "protocol.file.allow=always"];

/// Options for [`SubmoduleCoordinator::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Clone submodules that are not initialized yet
    pub init: bool,
    /// Update nested submodules too
    pub recursive: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            init: true,
            recursive: true,
        }
    }
}

/// Schedules submodule work on the right queues
#[derive(Debug, Clone)]
pub struct SubmoduleCoordinator {
    git: Git,
    queue: TaskQueue,
}

impl SubmoduleCoordinator {
    pub fn new(git: Git, queue: TaskQueue) -> Self {
        Self { git, queue }
    }

    /// List the submodules of `repo`
    ///
    /// Uninitialized submodules are reported with `repository: None`.
    pub async fn discover(&self, repo: &RepositoryPath) -> Result<Vec<SubmoduleEntry>> {
        let git = self.git.clone();
        let parent = repo.clone();
        self.queue
            .run(repo, TaskKind::Read, move || async move {
                discover(&git, &parent).await
            })
            .await
    }

    /// Initialize and update submodules, each on its own queue
    pub async fn update(
        &self,
        repo: &RepositoryPath,
        options: UpdateOptions,
    ) -> Result<Vec<SubmoduleEntry>> {
        let git = self.git.clone();
        let parent = repo.clone();
        let entries = self
            .queue
            .run(repo, TaskKind::Mutating, move || async move {
                if options.init {
                    git.run_with(
                        parent.as_path(),
                        ALLOW_FILE_PROTOCOL.into_iter().chain(["submodule", "init"]),
                        &git.options(Access::Write),
                    )
                    .await?;
                }
                discover(&git, &parent).await
            })
            .await?;

        let mut handles = Vec::with_capacity(entries.len());
        for entry in &entries {
            if !options.init && entry.repository.is_none() {
                continue;
            }
            let child = repo.nested(&entry.path)?;
            let git = self.git.clone();
            let parent = repo.clone();
            let sub_path = entry.path.clone();
            let handle = self.queue.submit(&child, TaskKind::Mutating, move || async move {
                let mut args: Vec<&str> = ALLOW_FILE_PROTOCOL.to_vec();
                args.extend(["submodule", "update"]);
                if options.init {
                    args.push("--init");
                }
                if options.recursive {
                    args.push("--recursive");
                }
                args.extend(["--", sub_path.as_str()]);
                git.run_with(parent.as_path(), &args, &git.options(Access::Network))
                    .await
                    .map(|_| ())
            });
            handles.push((entry.path.clone(), handle));
        }

        let mut first_error = None;
        for (path, handle) in handles {
            if let Err(e) = handle.join().await {
                warn!(submodule = %path, error = %e, "submodule update failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.discover(repo).await
    }

    /// Add a submodule at `path`, cloned from `url`
    pub async fn add(&self, repo: &RepositoryPath, url: &str, path: &str) -> Result<SubmoduleEntry> {
        let child = repo.nested(path)?;
        let git = self.git.clone();
        let parent = repo.clone();
        let url = url.to_string();
        let sub_path = path.to_string();

        let entries = self
            .queue
            .run(repo, TaskKind::Mutating, move || async move {
                git.run_with(
                    parent.as_path(),
                    ALLOW_FILE_PROTOCOL
                        .into_iter()
                        .chain(["submodule", "add", "--", url.as_str(), sub_path.as_str()]),
                    &git.options(Access::Network),
                )
                .await?;
                discover(&git, &parent).await
            })
            .await?;

        info!(repo = %repo, submodule = %child, "added submodule");
        entries
            .into_iter()
            .find(|e| e.path == path)
            .ok_or_else(|| Error::Other(format!("submodule {} missing after add", path)))
    }

    /// Deinitialize and remove the submodule at `path`
    ///
    /// Tasks still queued for the submodule are cancelled afterwards.
    pub async fn remove(&self, repo: &RepositoryPath, path: &str) -> Result<()> {
        let child = repo.nested(path)?;
        let git = self.git.clone();
        let parent = repo.clone();
        let sub_path = path.to_string();

        self.queue
            .run(repo, TaskKind::Mutating, move || async move {
                let entry = discover(&git, &parent)
                    .await?
                    .into_iter()
                    .find(|e| e.path == sub_path)
                    .ok_or_else(|| {
                        Error::InvalidPath(format!("{} is not a submodule of {}", sub_path, parent))
                    })?;

                git.write(parent.as_path(), ["submodule", "deinit", "-f", "--", sub_path.as_str()])
                    .await?;
                git.write(parent.as_path(), ["rm", "-f", "--", sub_path.as_str()])
                    .await?;

                let modules = git_dir(&git, parent.as_path())
                    .await?
                    .join("modules")
                    .join(&entry.name);
                if modules.exists() {
                    tokio::fs::remove_dir_all(&modules).await?;
                }
                Ok(())
            })
            .await?;

        if self.queue.cancel_queued(&child) {
            debug!(submodule = %child, "cancelled pending submodule tasks");
        }
        info!(repo = %repo, submodule = %child, "removed submodule");
        Ok(())
    }

    /// Throw away everything in the submodule at `path` that differs from the
    /// commit the parent pins
    pub async fn reset_to_pinned(&self, repo: &RepositoryPath, path: &str) -> Result<()> {
        let git = self.git.clone();
        let parent = repo.clone();
        let sub_path = path.to_string();

        let pinned = self
            .queue
            .run(repo, TaskKind::Read, move || async move {
                pinned_commit(&git, &parent, &sub_path).await
            })
            .await?
            .ok_or_else(|| Error::InvalidPath(format!("{} is not a submodule of {}", path, repo)))?;

        self.reset_child(&repo.nested(path)?, pinned).await
    }

    /// Hard-reset and clean an initialized submodule on its own queue
    pub(crate) async fn reset_child(&self, child: &RepositoryPath, commit: String) -> Result<()> {
        if !child.as_path().join(".git").exists() {
            debug!(submodule = %child, "submodule not initialized; nothing to discard");
            return Ok(());
        }

        let git = self.git.clone();
        let target = child.clone();
        self.queue
            .run(child, TaskKind::Mutating, move || async move {
                git.write(target.as_path(), ["reset", "--hard", commit.as_str()])
                    .await?;
                git.write(target.as_path(), ["clean", "-ffd"]).await?;
                Ok(())
            })
            .await
    }
}

/// Commit pinned in `repo`'s index for the gitlink at exactly `path`
///
/// `None` when `path` is not a submodule. Callers must already be running
/// on `repo`'s queue.
pub(crate) async fn pinned_commit(
    git: &Git,
    repo: &RepositoryPath,
    path: &str,
) -> Result<Option<String>> {
    let path = path.trim_end_matches('/');
    let output = git
        .read(repo.as_path(), ["ls-files", "-s", "--", path])
        .await?;
    let exact = output
        .stdout
        .lines()
        .find(|line| line.split_once('\t').is_some_and(|(_, p)| p == path));
    match exact {
        Some(line) => parse_index_entry(line),
        None => Ok(None),
    }
}

/// Read submodule configuration and state without going through a queue
///
/// Callers must already be running on `repo`'s queue.
pub(crate) async fn discover(git: &Git, repo: &RepositoryPath) -> Result<Vec<SubmoduleEntry>> {
    let root = repo.as_path();
    if !root.join(".gitmodules").exists() {
        return Ok(Vec::new());
    }

    // exit code 1: no submodule sections
    let config = git
        .run_with(
            root,
            ["config", "-z", "--file", ".gitmodules", "--get-regexp", r"^submodule\."],
            &git.options(Access::Read).allow_exit_code(1),
        )
        .await?;
    let configured = parse_gitmodules(&config.stdout)?;

    let status = git.read(root, ["submodule", "status"]).await?;
    let lines = parse_submodule_status(&status.stdout)?;

    let mut entries = Vec::with_capacity(configured.len());
    for module in configured {
        let Some(path) = module.path else {
            warn!(repo = %repo, submodule = %module.name, "submodule has no path configured");
            continue;
        };
        let line = lines.iter().find(|l| l.path == path);
        let initialized = line.is_some_and(|l| !l.uninitialized) && root.join(&path).join(".git").exists();

        entries.push(SubmoduleEntry {
            name: module.name,
            repository: if initialized {
                Some(repo.nested(&path)?)
            } else {
                None
            },
            url: module.url,
            commit: line.map(|l| l.commit.clone()),
            out_of_sync: line.is_some_and(|l| l.out_of_sync),
            conflicted: line.is_some_and(|l| l.conflicted),
            path,
        });
    }
    Ok(entries)
}

/// Absolute metadata directory of the repository at `root`
pub(crate) async fn git_dir(git: &Git, root: &Path) -> Result<std::path::PathBuf> {
    let output = git.read(root, ["rev-parse", "--git-dir"]).await?;
    let dir = Path::new(output.stdout.trim());
    Ok(if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        root.join(dir)
    })
}
