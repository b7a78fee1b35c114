//! Git invocations on top of the [`ProcessRunner`]
//!
//! Every invocation gets `LC_ALL=C` so messages we classify (conflicts,
//! authentication failures) are stable, and `GIT_TERMINAL_PROMPT=0` so git
//! never blocks on a terminal we do not own. Read-only invocations also set
//! `GIT_OPTIONAL_LOCKS=0`.

use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use crate::config::GitConfig;
use crate::process::{CommandResult, ProcessRunner, RunOptions};
use crate::Result;

/// Whether an invocation may modify the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Reads state only
    Read,
    /// May modify the repository or working tree
    Write,
    /// Talks to a remote; uses the network timeout
    Network,
}

/// Configured git executable
#[derive(Debug, Clone)]
pub struct Git {
    runner: ProcessRunner,
    config: GitConfig,
}

impl Git {
    /// Create a git wrapper from configuration
    pub fn new(config: GitConfig) -> Self {
        Self {
            runner: ProcessRunner::new(),
            config,
        }
    }

    /// Path of the git executable
    pub fn program(&self) -> &str {
        &self.config.path
    }

    /// Default timeout for the given access kind
    pub fn timeout_for(&self, access: Access) -> Duration {
        match access {
            Access::Network => self.config.network_timeout,
            Access::Read | Access::Write => self.config.command_timeout,
        }
    }

    /// Base options for the given access kind
    pub fn options(&self, access: Access) -> RunOptions {
        let mut options = RunOptions::new()
            .timeout(self.timeout_for(access))
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0");
        if access == Access::Read {
            options = options.env("GIT_OPTIONAL_LOCKS", "0");
        }
        options
    }

    /// Run a read-only git command
    pub async fn read<I, S>(&self, cwd: &Path, args: I) -> Result<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run_with(cwd, args, &self.options(Access::Read)).await
    }

    /// Run a git command that modifies the repository
    pub async fn write<I, S>(&self, cwd: &Path, args: I) -> Result<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run_with(cwd, args, &self.options(Access::Write)).await
    }

    /// Run a git command with explicit options
    pub async fn run_with<I, S>(
        &self,
        cwd: &Path,
        args: I,
        options: &RunOptions,
    ) -> Result<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.runner.run(&self.config.path, args, cwd, options).await
    }
}
