//! Operations that talk to a remote
//!
//! Each runs inside a credential session opened before the task is queued
//! and closed with the task's result, so accepted credentials are cached and
//! rejected ones evicted.

use std::future::Future;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::mutate::ref_arg;
use super::RepoService;
use crate::credentials::Credentials;
use crate::git::{Access, Git};
use crate::model::RemoteTag;
use crate::parse::parse_ls_remote;
use crate::path::RepositoryPath;
use crate::process::RunOptions;
use crate::queue::TaskKind;
use crate::watch::ChangeSource;
use crate::{Error, Result};

/// What to push and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushOptions {
    /// Remote to push to
    pub remote: String,
    /// Local ref to push; `HEAD` when unset
    pub refspec: Option<String>,
    /// Destination branch; defaults to `refspec`, or the current branch
    pub remote_branch: Option<String>,
    pub force: bool,
    pub set_upstream: bool,
    /// Credentials to try when the cache has none for the remote's host
    #[serde(skip_serializing)]
    pub credentials: Option<Credentials>,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            refspec: None,
            remote_branch: None,
            force: false,
            set_upstream: false,
            credentials: None,
        }
    }
}

impl PushOptions {
    /// Push `HEAD` to its namesake on `remote`
    pub fn to_remote(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            ..Self::default()
        }
    }
}

fn qualify(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{}", branch)
    }
}

impl RepoService {
    /// Queue `op` for `key` inside a credential session
    async fn authenticated<T, F, Fut>(
        &self,
        key: &RepositoryPath,
        kind: TaskKind,
        supplied: Option<Credentials>,
        op: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Git, RunOptions) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let session = self.credentials.begin(supplied).await?;
        let options = session.apply(self.git.options(Access::Network));
        let git = self.git.clone();
        let result = self.queue.run(key, kind, move || op(git, options)).await;
        session.finish(result)
    }

    /// Clone `url` into `destination_dir` under `path`
    ///
    /// With `recursive`, submodules are checked out too. Returns the new
    /// repository's path.
    pub async fn clone_repository(
        &self,
        path: impl AsRef<Path>,
        url: &str,
        destination_dir: &str,
        recursive: bool,
        credentials: Option<Credentials>,
    ) -> Result<RepositoryPath> {
        let parent = path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&parent).await?;
        let target = parent.join(destination_dir);
        let key = RepositoryPath::new(&target)?;
        let url = url.to_string();

        self.authenticated(&key, TaskKind::Mutating, credentials, move |git, options| async move {
            let mut args: Vec<&str> = Vec::new();
            if recursive {
                args.extend(["-c", "protocol.file.allow=always", "clone", "--recurse-submodules"]);
            } else {
                args.push("clone");
            }
            let destination = target.to_string_lossy();
            args.extend(["--", url.as_str(), &*destination]);
            git.run_with(&parent, &args, &options).await.map(|_| ())
        })
        .await?;

        info!(repo = %key, "cloned repository");
        RepositoryPath::new(key.as_path())
    }

    pub(super) async fn push_repo(&self, repo: &RepositoryPath, options: PushOptions) -> Result<()> {
        ref_arg(&options.remote)?;
        for name in [&options.refspec, &options.remote_branch].into_iter().flatten() {
            ref_arg(name)?;
        }
        let root = repo.clone();
        let supplied = options.credentials.clone();

        self.authenticated(repo, TaskKind::Mutating, supplied, move |git, run| async move {
            let cwd = root.as_path();
            let source = options.refspec.clone().unwrap_or_else(|| "HEAD".to_string());
            let destination = match (&options.remote_branch, &options.refspec) {
                (Some(branch), _) => qualify(branch),
                (None, Some(refspec)) => refspec.clone(),
                (None, None) => {
                    // exit code 1: detached HEAD
                    let current = git
                        .run_with(
                            cwd,
                            ["symbolic-ref", "--short", "-q", "HEAD"],
                            &git.options(Access::Read).allow_exit_code(1),
                        )
                        .await?;
                    if !current.success() {
                        return Err(Error::Other(
                            "HEAD is detached; name the remote branch to push to".to_string(),
                        ));
                    }
                    qualify(current.stdout.trim())
                }
            };

            let mut args = vec!["push".to_string()];
            if options.force {
                args.push("--force".to_string());
            }
            if options.set_upstream {
                args.push("--set-upstream".to_string());
            }
            args.push(options.remote.clone());
            args.push(format!("{}:{}", source, destination));
            git.run_with(cwd, &args, &run).await.map(|_| ())
        })
        .await
    }

    pub(super) async fn fetch_repo(
        &self,
        repo: &RepositoryPath,
        remote: &str,
        refspec: Option<&str>,
        credentials: Option<Credentials>,
    ) -> Result<()> {
        let root = repo.clone();
        let remote = ref_arg(remote)?.to_string();
        let refspec = refspec.map(ref_arg).transpose()?.map(str::to_string);

        self.authenticated(repo, TaskKind::Mutating, credentials, move |git, run| async move {
            let mut args = vec!["fetch", "--prune", remote.as_str()];
            if let Some(ref refspec) = refspec {
                args.push(refspec);
            }
            git.run_with(root.as_path(), &args, &run).await.map(|_| ())
        })
        .await
    }

    /// Tags advertised by `remote`, including peeled `^{}` entries
    pub async fn remote_tags(
        &self,
        path: impl AsRef<Path>,
        remote: &str,
        credentials: Option<Credentials>,
    ) -> Result<Vec<RemoteTag>> {
        let repo = RepositoryPath::discover(path)?;
        let root = repo.clone();
        let remote = ref_arg(remote)?.to_string();

        self.authenticated(&repo, TaskKind::Read, credentials, move |git, run| async move {
            let output = git
                .run_with(root.as_path(), ["ls-remote", "--tags", remote.as_str()], &run)
                .await?;
            parse_ls_remote(&output.stdout)
        })
        .await
    }

    /// Push the tag `name` to `remote`
    pub async fn push_tag(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        remote: &str,
        credentials: Option<Credentials>,
    ) -> Result<()> {
        let repo = RepositoryPath::discover(path)?;
        let tag = format!("refs/tags/{}", ref_arg(name)?);
        let result = self
            .push_repo(
                &repo,
                PushOptions {
                    remote: remote.to_string(),
                    refspec: Some(tag),
                    credentials,
                    ..PushOptions::default()
                },
            )
            .await;
        self.watch.notify(&repo, ChangeSource::Operation);
        result
    }
}
