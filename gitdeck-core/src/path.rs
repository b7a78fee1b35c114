//! Canonical repository paths
//!
//! Every queue, watcher and cache is keyed by a [`RepositoryPath`], so two
//! spellings of the same directory (relative, symlinked, `..`-laden) must
//! collapse to one value before they are used.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Normalized absolute path identifying a repository root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryPath(PathBuf);

impl RepositoryPath {
    /// Normalize a path into a repository key
    ///
    /// The longest existing prefix is canonicalized (resolving symlinks and,
    /// on case-insensitive filesystems, case); the non-existent remainder is
    /// appended lexically. This lets callers key not-yet-cloned submodule
    /// directories the same way they will be keyed once they exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let lexical = normalize_lexically(&absolute)?;

        let mut existing = lexical.as_path();
        let mut remainder = Vec::new();
        loop {
            match existing.canonicalize() {
                Ok(canonical) => {
                    let mut resolved = canonical;
                    for part in remainder.iter().rev() {
                        resolved.push(part);
                    }
                    return Ok(Self(resolved));
                }
                Err(_) => {
                    let name = existing.file_name().ok_or_else(|| {
                        Error::InvalidPath(format!("{} has no existing ancestor", path.display()))
                    })?;
                    remainder.push(name.to_os_string());
                    existing = existing.parent().ok_or_else(|| {
                        Error::InvalidPath(format!("{} has no existing ancestor", path.display()))
                    })?;
                }
            }
        }
    }

    /// Key for the repository containing `path`
    ///
    /// A path inside a working tree resolves to the top level of that tree
    /// and a path inside a bare repository to its git directory, so every
    /// subdirectory of one repository shares a single key. Paths outside any
    /// repository keep their normalized spelling.
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let normalized = Self::new(path)?;
        let repo = match git2::Repository::discover(&normalized.0) {
            Ok(repo) => repo,
            Err(e) => {
                debug!(path = %normalized, error = %e, "not inside a repository");
                return Ok(normalized);
            }
        };
        match repo.workdir() {
            Some(workdir) => Self::new(workdir),
            None => Self::new(repo.path()),
        }
    }

    /// The normalized path
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Key for a path nested inside this repository (e.g. a submodule)
    pub fn nested(&self, relative: impl AsRef<Path>) -> Result<Self> {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            return Err(Error::InvalidPath(format!(
                "{} must be relative to {}",
                relative.display(),
                self.0.display()
            )));
        }
        let nested = Self::new(self.0.join(relative))?;
        if !nested.0.starts_with(&self.0) || nested.0 == self.0 {
            return Err(Error::InvalidPath(format!(
                "{} escapes repository {}",
                relative.display(),
                self.0.display()
            )));
        }
        Ok(nested)
    }

    /// Resolve a file path given relative to the repository root, refusing
    /// anything that would leave the repository
    pub fn contained(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = relative.as_ref();
        let joined = normalize_lexically(&self.0.join(relative))?;
        if !joined.starts_with(&self.0) || joined == self.0 {
            return Err(Error::InvalidPath(format!(
                "{} is outside repository {}",
                relative.display(),
                self.0.display()
            )));
        }
        Ok(joined)
    }
}

impl AsRef<Path> for RepositoryPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for RepositoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

fn normalize_lexically(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(Error::InvalidPath(format!(
                        "{} climbs above the filesystem root",
                        path.display()
                    )));
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}
