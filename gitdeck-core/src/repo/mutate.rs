//! Mutating commands

use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::network::PushOptions;
use super::{conflicted_files, RepoService};
use crate::credentials::Credentials;
use crate::git::{Access, Git};
use crate::model::FileStatus;
use crate::parse::parse_status_raw;
use crate::path::RepositoryPath;
use crate::process::RunOptions;
use crate::queue::TaskKind;
use crate::submodule::pinned_commit;
use crate::watch::ChangeSource;
use crate::{Error, Result};

/// `git reset` mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    Soft,
    #[default]
    Mixed,
    Hard,
    Keep,
    Merge,
}

impl ResetMode {
    fn flag(self) -> &'static str {
        match self {
            ResetMode::Soft => "--soft",
            ResetMode::Mixed => "--mixed",
            ResetMode::Hard => "--hard",
            ResetMode::Keep => "--keep",
            ResetMode::Merge => "--merge",
        }
    }
}

/// A command that changes repository state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MutatingCommand {
    /// Stage `files` (all of them, when empty: whatever is already staged) and commit
    Commit {
        message: String,
        #[serde(default)]
        files: Vec<String>,
        #[serde(default)]
        amend: bool,
    },
    Checkout {
        name: String,
    },
    CreateBranch {
        name: String,
        start_point: Option<String>,
    },
    DeleteBranch {
        name: String,
        #[serde(default)]
        force: bool,
    },
    /// Lightweight tag, or annotated when `message` is set
    CreateTag {
        name: String,
        target: Option<String>,
        message: Option<String>,
    },
    Reset {
        to: String,
        #[serde(default)]
        mode: ResetMode,
    },
    Rebase {
        onto: String,
    },
    RebaseContinue,
    RebaseAbort,
    Merge {
        with: String,
        #[serde(default)]
        no_fast_forward: bool,
    },
    /// Throw away local changes to `path` (a file, directory or submodule)
    DiscardChanges {
        path: String,
    },
    AddRemote {
        name: String,
        url: String,
    },
    Push(PushOptions),
    Fetch {
        remote: String,
        refspec: Option<String>,
    },
}

impl MutatingCommand {
    fn name(&self) -> &'static str {
        match self {
            MutatingCommand::Commit { .. } => "commit",
            MutatingCommand::Checkout { .. } => "checkout",
            MutatingCommand::CreateBranch { .. } => "create-branch",
            MutatingCommand::DeleteBranch { .. } => "delete-branch",
            MutatingCommand::CreateTag { .. } => "create-tag",
            MutatingCommand::Reset { .. } => "reset",
            MutatingCommand::Rebase { .. } => "rebase",
            MutatingCommand::RebaseContinue => "rebase-continue",
            MutatingCommand::RebaseAbort => "rebase-abort",
            MutatingCommand::Merge { .. } => "merge",
            MutatingCommand::DiscardChanges { .. } => "discard-changes",
            MutatingCommand::AddRemote { .. } => "add-remote",
            MutatingCommand::Push(_) => "push",
            MutatingCommand::Fetch { .. } => "fetch",
        }
    }
}

/// How a mutating command ended
///
/// A conflict is not an error: the repository is usable and the caller
/// decides whether to resolve, continue or abort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum MutationOutcome {
    Completed,
    Conflicted { files: Vec<String> },
}

impl MutationOutcome {
    pub fn is_conflicted(&self) -> bool {
        matches!(self, MutationOutcome::Conflicted { .. })
    }
}

impl RepoService {
    /// Run one mutating command on `path`'s queue
    pub async fn run_mutating_command(
        &self,
        path: impl AsRef<Path>,
        command: MutatingCommand,
    ) -> Result<MutationOutcome> {
        let repo = RepositoryPath::discover(path)?;
        let name = command.name();
        debug!(repo = %repo, command = name, "running mutating command");

        let result = match command {
            MutatingCommand::Push(options) => self
                .push_repo(&repo, options)
                .await
                .map(|_| MutationOutcome::Completed),
            MutatingCommand::Fetch { remote, refspec } => self
                .fetch_repo(&repo, &remote, refspec.as_deref(), None)
                .await
                .map(|_| MutationOutcome::Completed),
            MutatingCommand::DiscardChanges { path } => self
                .discard_in(&repo, &path)
                .await
                .map(|_| MutationOutcome::Completed),
            command => {
                let git = self.git.clone();
                let root = repo.clone();
                self.queue
                    .run(&repo, TaskKind::Mutating, move || async move {
                        apply(&git, &root, command).await
                    })
                    .await
            }
        };

        self.watch.notify(&repo, ChangeSource::Operation);
        if let Ok(MutationOutcome::Conflicted { ref files }) = result {
            info!(repo = %repo, command = name, conflicts = files.len(), "operation stopped with conflicts");
        }
        result
    }

    /// Stage `files` and commit them with `message`
    pub async fn commit(
        &self,
        path: impl AsRef<Path>,
        message: &str,
        files: Vec<String>,
        amend: bool,
    ) -> Result<()> {
        self.run_mutating_command(
            path,
            MutatingCommand::Commit {
                message: message.to_string(),
                files,
                amend,
            },
        )
        .await
        .map(|_| ())
    }

    pub async fn checkout(&self, path: impl AsRef<Path>, name: &str) -> Result<MutationOutcome> {
        self.run_mutating_command(
            path,
            MutatingCommand::Checkout {
                name: name.to_string(),
            },
        )
        .await
    }

    pub async fn create_branch(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        start_point: Option<&str>,
    ) -> Result<()> {
        self.run_mutating_command(
            path,
            MutatingCommand::CreateBranch {
                name: name.to_string(),
                start_point: start_point.map(str::to_string),
            },
        )
        .await
        .map(|_| ())
    }

    pub async fn delete_branch(&self, path: impl AsRef<Path>, name: &str, force: bool) -> Result<()> {
        self.run_mutating_command(
            path,
            MutatingCommand::DeleteBranch {
                name: name.to_string(),
                force,
            },
        )
        .await
        .map(|_| ())
    }

    pub async fn create_tag(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        target: Option<&str>,
        message: Option<&str>,
    ) -> Result<()> {
        self.run_mutating_command(
            path,
            MutatingCommand::CreateTag {
                name: name.to_string(),
                target: target.map(str::to_string),
                message: message.map(str::to_string),
            },
        )
        .await
        .map(|_| ())
    }

    pub async fn reset(&self, path: impl AsRef<Path>, to: &str, mode: ResetMode) -> Result<()> {
        self.run_mutating_command(
            path,
            MutatingCommand::Reset {
                to: to.to_string(),
                mode,
            },
        )
        .await
        .map(|_| ())
    }

    /// Rebase the current branch onto `onto`
    pub async fn rebase(&self, path: impl AsRef<Path>, onto: &str) -> Result<MutationOutcome> {
        self.run_mutating_command(
            path,
            MutatingCommand::Rebase {
                onto: onto.to_string(),
            },
        )
        .await
    }

    pub async fn rebase_continue(&self, path: impl AsRef<Path>) -> Result<MutationOutcome> {
        self.run_mutating_command(path, MutatingCommand::RebaseContinue)
            .await
    }

    pub async fn rebase_abort(&self, path: impl AsRef<Path>) -> Result<()> {
        self.run_mutating_command(path, MutatingCommand::RebaseAbort)
            .await
            .map(|_| ())
    }

    /// Merge `with` into the current branch
    pub async fn merge(
        &self,
        path: impl AsRef<Path>,
        with: &str,
        no_fast_forward: bool,
    ) -> Result<MutationOutcome> {
        self.run_mutating_command(
            path,
            MutatingCommand::Merge {
                with: with.to_string(),
                no_fast_forward,
            },
        )
        .await
    }

    /// Throw away local changes to `file` (relative to the repository root)
    pub async fn discard_changes(&self, path: impl AsRef<Path>, file: &str) -> Result<()> {
        self.run_mutating_command(
            path,
            MutatingCommand::DiscardChanges {
                path: file.to_string(),
            },
        )
        .await
        .map(|_| ())
    }

    pub async fn add_remote(&self, path: impl AsRef<Path>, name: &str, url: &str) -> Result<()> {
        self.run_mutating_command(
            path,
            MutatingCommand::AddRemote {
                name: name.to_string(),
                url: url.to_string(),
            },
        )
        .await
        .map(|_| ())
    }

    pub async fn push(&self, path: impl AsRef<Path>, options: PushOptions) -> Result<()> {
        self.run_mutating_command(path, MutatingCommand::Push(options))
            .await
            .map(|_| ())
    }

    /// Fetch from `remote`, pruning deleted remote branches
    pub async fn fetch(
        &self,
        path: impl AsRef<Path>,
        remote: &str,
        refspec: Option<&str>,
        credentials: Option<Credentials>,
    ) -> Result<()> {
        let repo = RepositoryPath::discover(path)?;
        let result = self.fetch_repo(&repo, remote, refspec, credentials).await;
        self.watch.notify(&repo, ChangeSource::Operation);
        result
    }

    /// Discard in the parent, or hand a submodule path to its own queue
    async fn discard_in(&self, repo: &RepositoryPath, target: &str) -> Result<()> {
        repo.contained(target)?;

        let git = self.git.clone();
        let root = repo.clone();
        let file = target.to_string();
        let pinned = self
            .queue
            .run(repo, TaskKind::Mutating, move || async move {
                if let Some(commit) = pinned_commit(&git, &root, &file).await? {
                    return Ok(Some(commit));
                }
                discard(&git, &root, &file).await?;
                Ok(None)
            })
            .await?;

        if let Some(commit) = pinned {
            let child = repo.nested(target.trim_end_matches('/'))?;
            debug!(submodule = %child, commit = %commit, "discarding submodule changes");
            self.submodules.reset_child(&child, commit).await?;
        }
        Ok(())
    }
}

fn write_options(git: &Git) -> RunOptions {
    git.options(Access::Write).env("GIT_EDITOR", "true")
}

/// Reject names git would read as options
pub(super) fn ref_arg(name: &str) -> Result<&str> {
    if name.is_empty() || name.starts_with('-') {
        return Err(Error::Other(format!("Invalid ref name: {:?}", name)));
    }
    Ok(name)
}

async fn apply(git: &Git, root: &RepositoryPath, command: MutatingCommand) -> Result<MutationOutcome> {
    let cwd = root.as_path();
    let options = write_options(git);

    match command {
        MutatingCommand::Commit {
            message,
            files,
            amend,
        } => {
            let mut present = Vec::new();
            let mut missing = Vec::new();
            for file in files {
                let full = root.contained(&file)?;
                if full.symlink_metadata().is_ok() {
                    present.push(file);
                } else {
                    missing.push(file);
                }
            }
            if !present.is_empty() {
                let args = ["add", "--"].into_iter().chain(present.iter().map(String::as_str));
                git.run_with(cwd, args, &options).await?;
            }
            if !missing.is_empty() {
                let args = ["rm", "--cached", "--ignore-unmatch", "-q", "--"]
                    .into_iter()
                    .chain(missing.iter().map(String::as_str));
                git.run_with(cwd, args, &options).await?;
            }

            let mut args = vec!["commit", "-F", "-"];
            if amend {
                args.push("--amend");
            }
            git.run_with(cwd, &args, &options.clone().stdin(message.into_bytes()))
                .await?;
        }
        MutatingCommand::Checkout { name } => {
            let result = git.run_with(cwd, ["checkout", ref_arg(&name)?], &options).await;
            return conflict_outcome(git, root, result).await;
        }
        MutatingCommand::CreateBranch { name, start_point } => {
            let mut args = vec!["branch", ref_arg(&name)?];
            if let Some(ref start) = start_point {
                args.push(ref_arg(start)?);
            }
            git.run_with(cwd, &args, &options).await?;
        }
        MutatingCommand::DeleteBranch { name, force } => {
            let flag = if force { "-D" } else { "-d" };
            git.run_with(cwd, ["branch", flag, ref_arg(&name)?], &options)
                .await?;
        }
        MutatingCommand::CreateTag {
            name,
            target,
            message,
        } => {
            let mut args = vec!["tag"];
            if message.is_some() {
                args.extend(["-a", "-F", "-"]);
            }
            args.push(ref_arg(&name)?);
            if let Some(ref target) = target {
                args.push(ref_arg(target)?);
            }
            let options = match message {
                Some(message) => options.clone().stdin(message.into_bytes()),
                None => options.clone(),
            };
            git.run_with(cwd, &args, &options).await?;
        }
        MutatingCommand::Reset { to, mode } => {
            git.run_with(cwd, ["reset", mode.flag(), ref_arg(&to)?], &options)
                .await?;
        }
        MutatingCommand::Rebase { onto } => {
            let result = git
                .run_with(cwd, ["rebase", ref_arg(&onto)?], &options)
                .await;
            return conflict_outcome(git, root, result).await;
        }
        MutatingCommand::RebaseContinue => {
            let result = git.run_with(cwd, ["rebase", "--continue"], &options).await;
            return conflict_outcome(git, root, result).await;
        }
        MutatingCommand::RebaseAbort => {
            git.run_with(cwd, ["rebase", "--abort"], &options).await?;
        }
        MutatingCommand::Merge {
            with,
            no_fast_forward,
        } => {
            let mut args = vec!["merge", "--no-edit"];
            if no_fast_forward {
                args.push("--no-ff");
            }
            args.push(ref_arg(&with)?);
            let result = git.run_with(cwd, &args, &options).await;
            return conflict_outcome(git, root, result).await;
        }
        MutatingCommand::AddRemote { name, url } => {
            git.run_with(cwd, ["remote", "add", ref_arg(&name)?, url.as_str()], &options)
                .await?;
        }
        MutatingCommand::DiscardChanges { .. }
        | MutatingCommand::Push(_)
        | MutatingCommand::Fetch { .. } => {
            return Err(Error::Other(
                "command must be dispatched through run_mutating_command".to_string(),
            ));
        }
    }

    Ok(MutationOutcome::Completed)
}

/// Turn a failed checkout/rebase/merge that left conflicts into a structured outcome
async fn conflict_outcome<T>(
    git: &Git,
    root: &RepositoryPath,
    result: Result<T>,
) -> Result<MutationOutcome> {
    match result {
        Ok(_) => Ok(MutationOutcome::Completed),
        Err(err @ Error::Process { .. }) => {
            let files = conflicted_files(git, root).await?;
            if files.is_empty() {
                Err(err)
            } else {
                Ok(MutationOutcome::Conflicted { files })
            }
        }
        Err(err) => Err(err),
    }
}

/// Restore `target` (a file or directory) to its `HEAD` state
///
/// Untracked files are deleted, newly staged files are unstaged and deleted,
/// renames are undone on both sides and everything else is checked out
/// from `HEAD`. A conflicted path that `HEAD` does not have is dropped from
/// the index and the disk.
async fn discard(git: &Git, root: &RepositoryPath, target: &str) -> Result<()> {
    let cwd = root.as_path();
    let options = write_options(git);
    let output = git
        .read(
            cwd,
            [
                "status",
                "--porcelain=v1",
                "-z",
                "--untracked-files=all",
                "--ignore-submodules=dirty",
            ],
        )
        .await?;
    // Unfiltered: a pathspec would hide the other side of a rename
    let target = Path::new(target);
    let entries: Vec<_> = parse_status_raw(&output.stdout_bytes)?
        .into_iter()
        .filter(|e| {
            under(target, &e.path) || e.old_path.as_deref().is_some_and(|old| under(target, old))
        })
        .collect();
    if entries.is_empty() {
        debug!(repo = %root, path = %target.display(), "nothing to discard");
        return Ok(());
    }

    for entry in entries {
        let mut status = entry.state.status;
        if status == FileStatus::Conflicted && !in_head(git, cwd, &entry.path).await? {
            status = FileStatus::Added;
        }
        match status {
            FileStatus::Untracked => remove_from_disk(&root.contained(&entry.path)?).await?,
            // also conflicts with no `HEAD` side
            FileStatus::Added => unstage_and_remove(git, root, &entry.path, &options).await?,
            FileStatus::Renamed => {
                unstage_and_remove(git, root, &entry.path, &options).await?;
                if let Some(ref old) = entry.old_path {
                    restore_from_head(git, root, old, &options).await?;
                }
            }
            FileStatus::Modified
            | FileStatus::Deleted
            | FileStatus::TypeChanged
            | FileStatus::Conflicted => {
                restore_from_head(git, root, &entry.path, &options).await?;
            }
        }
    }

    debug!(repo = %root, path = %target.display(), "discarded changes");
    Ok(())
}

/// `git <subcommand..> -- <path>` with `path` taken literally, not as a glob
fn pathspec_args<'a>(subcommand: &[&'a str], path: &'a Path) -> Vec<&'a OsStr> {
    let mut args = vec![OsStr::new("--literal-pathspecs")];
    args.extend(subcommand.iter().map(|s| OsStr::new(*s)));
    args.push(OsStr::new("--"));
    args.push(path.as_os_str());
    args
}

async fn unstage_and_remove(
    git: &Git,
    root: &RepositoryPath,
    path: &Path,
    options: &RunOptions,
) -> Result<()> {
    let full = root.contained(path)?;
    git.run_with(
        root.as_path(),
        pathspec_args(&["rm", "--cached", "-f", "-q"], path),
        options,
    )
    .await?;
    remove_from_disk(&full).await
}

async fn restore_from_head(
    git: &Git,
    root: &RepositoryPath,
    path: &Path,
    options: &RunOptions,
) -> Result<()> {
    root.contained(path)?;
    git.run_with(
        root.as_path(),
        pathspec_args(&["checkout", "HEAD"], path),
        options,
    )
    .await?;
    Ok(())
}

/// Whether `HEAD` has an entry at `path`
async fn in_head(git: &Git, cwd: &Path, path: &Path) -> Result<bool> {
    let mut spec = OsString::from("HEAD:");
    spec.push(path.as_os_str());
    // exit code 1: no such path in HEAD
    let result = git
        .run_with(
            cwd,
            [
                OsStr::new("rev-parse"),
                OsStr::new("-q"),
                OsStr::new("--verify"),
                spec.as_os_str(),
            ],
            &git.options(Access::Read).allow_exit_code(1),
        )
        .await?;
    Ok(result.success())
}

/// Whether `path` is `target` itself or lies inside the directory `target`
fn under(target: &Path, path: &Path) -> bool {
    let target: PathBuf = target
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    path.starts_with(target)
}

async fn remove_from_disk(path: &Path) -> Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await?,
        Ok(_) => tokio::fs::remove_file(path).await?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
