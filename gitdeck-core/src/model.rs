//! Canonical repository model produced by the output parsers

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::RepositoryPath;

/// What kind of ref a name is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// The symbolic `HEAD`
    Head,
    /// `refs/heads/*`
    LocalBranch,
    /// `refs/remotes/*`
    RemoteBranch,
    /// `refs/tags/*` pointing at a tag object
    AnnotatedTag,
    /// `refs/tags/*` pointing directly at a commit
    LightweightTag,
    /// `refs/stash`
    Stash,
    /// Anything else (notes, replace refs, ...)
    Other,
}

impl RefKind {
    /// Classify a fully qualified ref name
    ///
    /// Tags are reported as lightweight; callers that know the tag's object
    /// type upgrade them to [`RefKind::AnnotatedTag`].
    pub fn classify(name: &str) -> Self {
        if name == "HEAD" {
            RefKind::Head
        } else if name.starts_with("refs/heads/") {
            RefKind::LocalBranch
        } else if name.starts_with("refs/remotes/") {
            RefKind::RemoteBranch
        } else if name.starts_with("refs/tags/") {
            RefKind::LightweightTag
        } else if name == "refs/stash" {
            RefKind::Stash
        } else {
            RefKind::Other
        }
    }

    /// Whether this is either kind of tag
    pub fn is_tag(self) -> bool {
        matches!(self, RefKind::AnnotatedTag | RefKind::LightweightTag)
    }
}

/// A ref currently pointing at a commit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefName {
    /// Fully qualified name (`HEAD`, `refs/heads/master`, `refs/tags/v1.0`, ...)
    pub name: String,
    /// Kind of ref
    pub kind: RefKind,
}

impl RefName {
    /// Create a ref, classifying it by name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = RefKind::classify(&name);
        Self { name, kind }
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_tag() {
            write!(f, "tag: {}", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Author or committer identity with timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub date: DateTime<Utc>,
}

/// One commit in the graph with the refs pointing at it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitNode {
    /// Full commit hash
    pub sha: String,
    /// Parent hashes in order; empty for a root commit
    pub parents: Vec<String>,
    pub author: Signature,
    pub committer: Signature,
    /// Full commit message
    pub message: String,
    /// Refs resolving to this commit at query time
    pub refs: Vec<RefName>,
}

impl CommitNode {
    /// First line of the message
    pub fn title(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// Whether a ref with this full name points here
    pub fn has_ref(&self, name: &str) -> bool {
        self.refs.iter().any(|r| r.name == name)
    }

    /// Whether this is a merge commit
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Result of a log query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLog {
    pub nodes: Vec<CommitNode>,
    pub limit: usize,
    pub skip: usize,
}

impl GitLog {
    /// Find a commit by full hash
    pub fn find(&self, sha: &str) -> Option<&CommitNode> {
        self.nodes.iter().find(|n| n.sha == sha)
    }

    /// The commit `HEAD` points at, if it is within the returned page
    pub fn head(&self) -> Option<&CommitNode> {
        self.nodes.iter().find(|n| n.has_ref("HEAD"))
    }
}

/// Single-sided change kind in the index or the working tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
    TypeChanged,
}

/// Overall classification of a path in `git status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Untracked,
    Modified,
    Added,
    Deleted,
    Renamed,
    Conflicted,
    TypeChanged,
}

/// A path that differs from `HEAD`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingFileState {
    /// Path relative to the repository root
    pub path: String,
    /// Source path for renames and copies
    pub old_path: Option<String>,
    /// Overall status
    pub status: FileStatus,
    /// Change between `HEAD` and the index
    pub staged: Option<ChangeKind>,
    /// Change between the index and the working tree
    pub unstaged: Option<ChangeKind>,
}

impl WorkingFileState {
    /// Whether the index side has a change
    pub fn is_staged(&self) -> bool {
        self.staged.is_some()
    }

    /// Whether the working tree side has a change
    pub fn is_unstaged(&self) -> bool {
        self.unstaged.is_some()
    }
}

/// Branch header of `git status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStatus {
    /// Current branch, `None` when detached
    pub branch: Option<String>,
    /// Upstream tracking branch
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    /// Whether HEAD is detached
    pub detached: bool,
    /// Whether the branch has no commits yet
    pub unborn: bool,
}

/// Nested status of one submodule, read from the submodule itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmoduleStatus {
    /// Path within the parent repository
    pub path: String,
    /// Whether the submodule has been cloned
    pub initialized: bool,
    /// Files changed inside the submodule
    pub files: Vec<WorkingFileState>,
    /// Error text when the nested status could not be read
    pub error: Option<String>,
}

impl SubmoduleStatus {
    /// Whether the submodule's working tree matches its own HEAD
    pub fn is_clean(&self) -> bool {
        self.files.is_empty() && self.error.is_none()
    }
}

/// Full working-tree snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStatus {
    pub branch: BranchStatus,
    /// Changed paths, excluding submodule paths whose only change is inside the submodule
    pub files: Vec<WorkingFileState>,
    pub submodules: Vec<SubmoduleStatus>,
    pub in_rebase: bool,
    pub in_merge: bool,
    pub in_cherry_pick: bool,
}

impl RepoStatus {
    /// Paths currently in a conflicted state
    pub fn conflicted(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Conflicted)
            .map(|f| f.path.clone())
            .collect()
    }

    /// Look up a path
    pub fn file(&self, path: &str) -> Option<&WorkingFileState> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Local or remote-tracking branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    /// Fully qualified ref name
    pub name: String,
    /// Commit the branch points at
    pub sha: String,
    /// Upstream ref, for local branches that track one
    pub upstream: Option<String>,
    /// Whether HEAD is this branch
    pub current: bool,
    pub kind: RefKind,
}

/// A configured remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInfo {
    /// Name of the remote (e.g., "origin")
    pub name: String,
    /// Fetch URL of the remote
    pub url: String,
    /// Push URL when it differs from the fetch URL
    pub push_url: Option<String>,
}

/// A tag advertised by a remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTag {
    /// Advertised ref name, including peeled `^{}` entries
    pub name: String,
    pub sha: String,
}

/// A submodule declared in `.gitmodules`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmoduleEntry {
    /// Logical name (`submodule.<name>`)
    pub name: String,
    /// Path within the parent repository
    pub path: String,
    /// Configured URL
    pub url: Option<String>,
    /// Commit currently checked out (or pinned, when not initialized)
    pub commit: Option<String>,
    /// Key for the submodule's own repository, once initialized
    pub repository: Option<RepositoryPath>,
    /// Checked-out commit differs from the one pinned by the parent
    pub out_of_sync: bool,
    /// Submodule has merge conflicts in the parent
    pub conflicted: bool,
}

impl SubmoduleEntry {
    /// Whether the submodule has been cloned into the parent's working tree
    pub fn is_initialized(&self) -> bool {
        self.repository.is_some()
    }
}

/// What kind of directory a path is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum QuickStatus {
    /// Inside a repository with a working tree
    Inited { root: RepositoryPath },
    /// A bare repository
    Bare { root: RepositoryPath },
    /// An existing directory that is not a repository
    Uninited,
    /// The path does not exist
    NoSuchPath,
}
