//! `git status --porcelain=v1 -z --branch` parsing

use std::path::PathBuf;

use crate::model::{BranchStatus, ChangeKind, FileStatus, WorkingFileState};
use crate::{Error, Result};

/// Parsed status entries and branch header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusEntries {
    pub branch: BranchStatus,
    pub files: Vec<WorkingFileState>,
}

/// A status entry that also carries its paths exactly as git wrote them
///
/// [`WorkingFileState`] holds display strings; anything that touches the
/// filesystem uses these instead so non-UTF-8 names are not mangled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatusEntry {
    pub state: WorkingFileState,
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
}

/// Parse NUL-separated porcelain v1 output
pub fn parse_status(output: &str) -> Result<StatusEntries> {
    let (branch, raw) = parse_records(output.as_bytes())?;
    Ok(StatusEntries {
        branch,
        files: raw.into_iter().map(|entry| entry.state).collect(),
    })
}

/// Parse porcelain v1 output without decoding file names
pub fn parse_status_raw(output: &[u8]) -> Result<Vec<RawStatusEntry>> {
    Ok(parse_records(output)?.1)
}

fn parse_records(output: &[u8]) -> Result<(BranchStatus, Vec<RawStatusEntry>)> {
    let mut branch = BranchStatus::default();
    let mut files = Vec::new();
    let mut parts = output.split(|&b| b == 0).filter(|p| !p.is_empty());

    while let Some(entry) = parts.next() {
        if let Some(header) = entry.strip_prefix(b"## ") {
            branch = parse_branch_header(&String::from_utf8_lossy(header))?;
            continue;
        }

        let fragment = || String::from_utf8_lossy(entry).into_owned();
        if entry.len() < 4 || entry[2] != b' ' || !entry[..2].is_ascii() {
            return Err(Error::parse("status", fragment()));
        }
        let (x, y) = (entry[0] as char, entry[1] as char);
        let path = &entry[3..];

        if x == '!' && y == '!' {
            continue;
        }

        let old_path = if matches!(x, 'R' | 'C') || matches!(y, 'R' | 'C') {
            Some(
                parts
                    .next()
                    .ok_or_else(|| Error::parse("status rename", fragment()))?,
            )
        } else {
            None
        };

        let state = classify(
            x,
            y,
            String::from_utf8_lossy(path).into_owned(),
            old_path.map(|old| String::from_utf8_lossy(old).into_owned()),
            &fragment(),
        )?;
        files.push(RawStatusEntry {
            state,
            path: path_from_bytes(path),
            old_path: old_path.map(path_from_bytes),
        });
    }

    Ok((branch, files))
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

// git writes UTF-8 paths on platforms without byte-string paths
#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

fn classify(
    x: char,
    y: char,
    path: String,
    old_path: Option<String>,
    entry: &str,
) -> Result<WorkingFileState> {
    if x == '?' && y == '?' {
        return Ok(WorkingFileState {
            path,
            old_path,
            status: FileStatus::Untracked,
            staged: None,
            unstaged: Some(ChangeKind::Added),
        });
    }

    if is_conflict(x, y) {
        return Ok(WorkingFileState {
            path,
            old_path,
            status: FileStatus::Conflicted,
            staged: None,
            unstaged: None,
        });
    }

    let staged = change_kind(x, entry)?;
    let unstaged = change_kind(y, entry)?;
    let sides = [staged, unstaged];
    let has = |kind: ChangeKind| sides.contains(&Some(kind));

    let status = if staged == Some(ChangeKind::Added) || staged == Some(ChangeKind::Copied) {
        FileStatus::Added
    } else if has(ChangeKind::Renamed) {
        FileStatus::Renamed
    } else if has(ChangeKind::Deleted) {
        FileStatus::Deleted
    } else if has(ChangeKind::TypeChanged) {
        FileStatus::TypeChanged
    } else if staged.is_none() && unstaged.is_none() {
        return Err(Error::parse("status", entry));
    } else {
        FileStatus::Modified
    };

    Ok(WorkingFileState {
        path,
        old_path,
        status,
        staged,
        unstaged,
    })
}

fn is_conflict(x: char, y: char) -> bool {
    matches!(
        (x, y),
        ('D', 'D') | ('A', 'U') | ('U', 'D') | ('U', 'A') | ('D', 'U') | ('A', 'A') | ('U', 'U')
    )
}

fn change_kind(code: char, entry: &str) -> Result<Option<ChangeKind>> {
    Ok(match code {
        ' ' | '.' => None,
        'M' => Some(ChangeKind::Modified),
        'A' => Some(ChangeKind::Added),
        'D' => Some(ChangeKind::Deleted),
        'R' => Some(ChangeKind::Renamed),
        'C' => Some(ChangeKind::Copied),
        'T' => Some(ChangeKind::TypeChanged),
        _ => return Err(Error::parse("status code", entry)),
    })
}

fn parse_branch_header(header: &str) -> Result<BranchStatus> {
    let mut status = BranchStatus::default();

    for prefix in ["No commits yet on ", "Initial commit on "] {
        if let Some(branch) = header.strip_prefix(prefix) {
            status.branch = Some(branch.trim().to_string());
            status.unborn = true;
            return Ok(status);
        }
    }

    if header.starts_with("HEAD (no branch)") {
        status.detached = true;
        return Ok(status);
    }

    let (names, tracking) = match header.split_once(" [") {
        Some((names, rest)) => (
            names,
            Some(
                rest.strip_suffix(']')
                    .ok_or_else(|| Error::parse("status branch header", header))?,
            ),
        ),
        None => (header, None),
    };

    match names.split_once("...") {
        Some((branch, upstream)) => {
            status.branch = Some(branch.to_string());
            status.upstream = Some(upstream.to_string());
        }
        None => status.branch = Some(names.trim().to_string()),
    }

    if let Some(tracking) = tracking {
        for part in tracking.split(", ") {
            if let Some(n) = part.strip_prefix("ahead ") {
                status.ahead = n
                    .parse()
                    .map_err(|_| Error::parse("status branch header", header))?;
            } else if let Some(n) = part.strip_prefix("behind ") {
                status.behind = n
                    .parse()
                    .map_err(|_| Error::parse("status branch header", header))?;
            } else if part != "gone" {
                return Err(Error::parse("status branch header", header));
            }
        }
    }

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_repo() {
        let entries = parse_status("## master...origin/master\0").unwrap();
        assert!(entries.files.is_empty());
        assert_eq!(entries.branch.branch.as_deref(), Some("master"));
        assert_eq!(entries.branch.upstream.as_deref(), Some("origin/master"));
    }

    #[test]
    fn test_ahead_behind() {
        let entries = parse_status("## main...origin/main [ahead 2, behind 1]\0").unwrap();
        assert_eq!(entries.branch.ahead, 2);
        assert_eq!(entries.branch.behind, 1);
    }

    #[test]
    fn test_unborn_and_detached() {
        let unborn = parse_status("## No commits yet on master\0").unwrap();
        assert!(unborn.branch.unborn);
        assert_eq!(unborn.branch.branch.as_deref(), Some("master"));

        let detached = parse_status("## HEAD (no branch)\0").unwrap();
        assert!(detached.branch.detached);
        assert!(detached.branch.branch.is_none());
    }

    #[test]
    fn test_untracked_and_modified() {
        let entries = parse_status("## master\0?? new.txt\0 M tracked.txt\0").unwrap();
        assert_eq!(entries.files.len(), 2);
        assert_eq!(entries.files[0].status, FileStatus::Untracked);
        assert_eq!(entries.files[1].status, FileStatus::Modified);
        assert_eq!(entries.files[1].staged, None);
        assert_eq!(entries.files[1].unstaged, Some(ChangeKind::Modified));
    }

    #[test]
    fn test_staged_then_modified_keeps_both_sides() {
        let entries = parse_status("MM both.txt\0").unwrap();
        let file = &entries.files[0];
        assert_eq!(file.status, FileStatus::Modified);
        assert_eq!(file.staged, Some(ChangeKind::Modified));
        assert_eq!(file.unstaged, Some(ChangeKind::Modified));
    }

    #[test]
    fn test_added_then_deleted() {
        let entries = parse_status("AD gone.txt\0").unwrap();
        let file = &entries.files[0];
        assert_eq!(file.status, FileStatus::Added);
        assert_eq!(file.unstaged, Some(ChangeKind::Deleted));
    }

    #[test]
    fn test_conflicts_are_distinct_from_modifications() {
        let entries = parse_status("UU both.txt\0AA added.txt\0DU theirs.txt\0").unwrap();
        assert!(entries
            .files
            .iter()
            .all(|f| f.status == FileStatus::Conflicted));
    }

    #[test]
    fn test_rename_consumes_old_path() {
        let entries = parse_status("R  new name.txt\0old name.txt\0 D removed.txt\0").unwrap();
        assert_eq!(entries.files.len(), 2);
        assert_eq!(entries.files[0].status, FileStatus::Renamed);
        assert_eq!(entries.files[0].path, "new name.txt");
        assert_eq!(entries.files[0].old_path.as_deref(), Some("old name.txt"));
        assert_eq!(entries.files[1].status, FileStatus::Deleted);
    }

    #[test]
    fn test_type_change() {
        let entries = parse_status(" T link\0").unwrap();
        assert_eq!(entries.files[0].status, FileStatus::TypeChanged);
    }

    #[test]
    fn test_unknown_code_is_an_error() {
        match parse_status("ZZ odd.txt\0") {
            Err(Error::Parse { fragment, .. }) => assert_eq!(fragment, "ZZ odd.txt"),
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_rename_without_source_is_an_error() {
        assert!(parse_status("R  new.txt\0").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_raw_paths_keep_invalid_utf8() {
        use std::os::unix::ffi::OsStrExt;

        let entries = parse_status_raw(b"## master\0?? caf\xe9.txt\0R  new.txt\0ol\xffd.txt\0").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].state.status, FileStatus::Untracked);
        assert_eq!(entries[0].state.path, "caf\u{fffd}.txt");
        assert_eq!(entries[0].path.as_os_str().as_bytes(), b"caf\xe9.txt");
        assert_eq!(entries[1].path, PathBuf::from("new.txt"));
        assert_eq!(
            entries[1].old_path.as_ref().unwrap().as_os_str().as_bytes(),
            b"ol\xffd.txt"
        );
    }

    #[test]
    fn test_bad_branch_header() {
        assert!(parse_status("## master...origin/master [sideways 3]\0").is_err());
    }
}
