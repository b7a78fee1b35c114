//! `git remote -v` and `git ls-remote` parsing

use super::object_id;
use crate::model::{RemoteInfo, RemoteTag};
use crate::{Error, Result};

/// Parse `git remote -v`, one entry per remote in first-seen order
pub fn parse_remotes(output: &str) -> Result<Vec<RemoteInfo>> {
    let mut remotes: Vec<RemoteInfo> = Vec::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let (name, rest) = line
            .split_once('\t')
            .ok_or_else(|| Error::parse("remote -v", line))?;
        let (url, direction) = rest
            .rsplit_once(' ')
            .ok_or_else(|| Error::parse("remote -v", line))?;

        let existing = remotes.iter().position(|r| r.name == name);
        match (direction, existing) {
            ("(fetch)", Some(i)) => remotes[i].url = url.to_string(),
            ("(fetch)", None) => remotes.push(RemoteInfo {
                name: name.to_string(),
                url: url.to_string(),
                push_url: None,
            }),
            ("(push)", Some(i)) => {
                if remotes[i].url != url {
                    remotes[i].push_url = Some(url.to_string());
                }
            }
            ("(push)", None) => remotes.push(RemoteInfo {
                name: name.to_string(),
                url: url.to_string(),
                push_url: None,
            }),
            _ => return Err(Error::parse("remote -v", line)),
        }
    }

    Ok(remotes)
}

/// Parse `git ls-remote` output (`<sha>\t<ref>` per line)
pub fn parse_ls_remote(output: &str) -> Result<Vec<RemoteTag>> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (sha, name) = line
                .split_once('\t')
                .ok_or_else(|| Error::parse("ls-remote", line))?;
            Ok(RemoteTag {
                name: name.to_string(),
                sha: object_id(sha, "ls-remote", line)?,
            })
        })
        .collect()
}
