//! Submodule configuration and state parsing

use super::object_id;
use crate::{Error, Result};

/// One `[submodule "<name>"]` section of `.gitmodules`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitmodulesEntry {
    pub name: String,
    pub path: Option<String>,
    pub url: Option<String>,
}

/// One line of `git submodule status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmoduleStatusLine {
    pub path: String,
    pub commit: String,
    /// `-` prefix: not cloned yet
    pub uninitialized: bool,
    /// `+` prefix: checked-out commit differs from the pinned one
    pub out_of_sync: bool,
    /// `U` prefix: merge conflicts
    pub conflicted: bool,
}

/// Parse `git config -z --file .gitmodules --get-regexp ^submodule\.`
///
/// Entries come back as `key\nvalue\0`; sections keep first-seen order.
pub fn parse_gitmodules(output: &str) -> Result<Vec<GitmodulesEntry>> {
    let mut entries: Vec<GitmodulesEntry> = Vec::new();

    for item in output.split('\0').filter(|i| !i.trim().is_empty()) {
        let (key, value) = item.split_once('\n').unwrap_or((item, ""));
        let section = key
            .strip_prefix("submodule.")
            .ok_or_else(|| Error::parse(".gitmodules", item))?;
        let (name, field) = section
            .rsplit_once('.')
            .ok_or_else(|| Error::parse(".gitmodules", item))?;

        let index = match entries.iter().position(|e| e.name == name) {
            Some(i) => i,
            None => {
                entries.push(GitmodulesEntry {
                    name: name.to_string(),
                    ..GitmodulesEntry::default()
                });
                entries.len() - 1
            }
        };

        match field {
            "path" => entries[index].path = Some(value.to_string()),
            "url" => entries[index].url = Some(value.to_string()),
            // branch, update, shallow, ignore, ...
            _ => {}
        }
    }

    Ok(entries)
}

/// Parse `git submodule status`
pub fn parse_submodule_status(output: &str) -> Result<Vec<SubmoduleStatusLine>> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut chars = line.chars();
            let marker = chars
                .next()
                .ok_or_else(|| Error::parse("submodule status", line))?;
            if !matches!(marker, ' ' | '-' | '+' | 'U') {
                return Err(Error::parse("submodule status", line));
            }
            let rest = chars.as_str();
            let (sha, tail) = rest
                .split_once(' ')
                .ok_or_else(|| Error::parse("submodule status", line))?;
            let commit = object_id(sha, "submodule status", line)?;

            let path = match tail.rsplit_once(" (") {
                Some((path, describe)) if describe.ends_with(')') => path,
                _ => tail,
            };
            if path.is_empty() {
                return Err(Error::parse("submodule status", line));
            }

            Ok(SubmoduleStatusLine {
                path: path.to_string(),
                commit,
                uninitialized: marker == '-',
                out_of_sync: marker == '+',
                conflicted: marker == 'U',
            })
        })
        .collect()
}

/// Parse one `git ls-files -s` line for a gitlink, returning the pinned commit
pub fn parse_index_entry(output: &str) -> Result<Option<String>> {
    let Some(line) = output.lines().find(|l| !l.trim().is_empty()) else {
        return Ok(None);
    };
    let (meta, _path) = line
        .split_once('\t')
        .ok_or_else(|| Error::parse("ls-files -s", line))?;
    let mut parts = meta.split_whitespace();
    let mode = parts.next().ok_or_else(|| Error::parse("ls-files -s", line))?;
    let sha = parts.next().ok_or_else(|| Error::parse("ls-files -s", line))?;
    if mode != "160000" {
        return Ok(None);
    }
    object_id(sha, "ls-files -s", line).map(Some)
}
