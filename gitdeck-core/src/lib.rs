//! Gitdeck Core - Git command orchestration and repository state
//!
//! This crate runs git on behalf of interactive clients: it serializes work
//! per repository, parses plumbing output into structured snapshots, mediates
//! credential prompts for network operations, and tells subscribers when a
//! repository changed.

pub mod config;
pub mod credentials;
pub mod error;
pub mod git;
pub mod model;
pub mod parse;
pub mod path;
pub mod process;
pub mod queue;
pub mod repo;
pub mod submodule;
pub mod watch;

pub use config::{Config, CredentialsConfig, GitConfig, QueueConfig, WatchConfig};
pub use credentials::{
    AuthSession, AuthState, ChannelCredentials, CredentialMediator, CredentialProvider,
    CredentialRequest, Credentials, NoCredentials, StaticCredentials,
};
pub use error::{Error, Result};
pub use git::{Access, Git};
pub use model::{
    BranchInfo, BranchStatus, ChangeKind, CommitNode, FileStatus, GitLog, QuickStatus, RefKind,
    RefName, RemoteInfo, RemoteTag, RepoStatus, Signature, SubmoduleEntry, SubmoduleStatus,
    WorkingFileState,
};
pub use path::RepositoryPath;
pub use process::{CommandResult, ProcessRunner, RunOptions};
pub use queue::{TaskHandle, TaskKind, TaskQueue};
pub use repo::{MutatingCommand, MutationOutcome, PushOptions, RepoService, ResetMode};
pub use submodule::{SubmoduleCoordinator, UpdateOptions};
pub use watch::{ChangeEvent, ChangeSource, Subscription, WatchHub};
