//! `git log` parsing

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{fields, object_id, FIELD_SEP, RECORD_SEP};
use crate::model::{CommitNode, RefName, Signature};
use crate::{Error, Result};

/// `--pretty=format:` string understood by [`parse_log`]
///
/// hash, parents, author name/email/time, committer name/email/time, body;
/// fields split by US, commits terminated by RS.
pub const LOG_FORMAT: &str = "%H%x1f%P%x1f%an%x1f%ae%x1f%at%x1f%cn%x1f%ce%x1f%ct%x1f%B%x1e";

const LOG_FIELDS: usize = 9;

/// Parse log output, attaching refs from `refs` (keyed by commit hash)
pub fn parse_log(output: &str, refs: &HashMap<String, Vec<RefName>>) -> Result<Vec<CommitNode>> {
    let mut nodes = Vec::new();

    for record in output.split(RECORD_SEP) {
        let record = record.trim_start_matches(['\n', '\r']);
        if record.trim().is_empty() {
            continue;
        }
        if !record.contains(FIELD_SEP) {
            return Err(Error::parse("log", record));
        }

        let f = fields(record, LOG_FIELDS, "log")?;
        let sha = object_id(f[0], "log", record)?;
        let parents = f[1]
            .split_whitespace()
            .map(|p| object_id(p, "log", record))
            .collect::<Result<Vec<_>>>()?;

        let author = Signature {
            name: f[2].to_string(),
            email: f[3].to_string(),
            date: timestamp(f[4], record)?,
        };
        let committer = Signature {
            name: f[5].to_string(),
            email: f[6].to_string(),
            date: timestamp(f[7], record)?,
        };

        let node_refs = refs.get(&sha).cloned().unwrap_or_default();
        nodes.push(CommitNode {
            sha,
            parents,
            author,
            committer,
            message: f[8].trim_end().to_string(),
            refs: node_refs,
        });
    }

    Ok(nodes)
}

fn timestamp(raw: &str, record: &str) -> Result<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| Error::parse("log timestamp", record))
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const C: &str = "cccccccccccccccccccccccccccccccccccccccc";

    fn record(sha: &str, parents: &str, message: &str) -> String {
        format!(
            "{sha}\u{1f}{parents}\u{1f}Ada\u{1f}ada@example.com\u{1f}1700000000\u{1f}Bob\u{1f}bob@example.com\u{1f}1700000100\u{1f}{message}\u{1e}"
        )
    }

    #[test]
    fn test_parse_commits_and_parents() {
        let output = [
            record(C, &format!("{} {}", A, B), "Merge branch 'topic'\n"),
            record(B, A, "Commit2\n\nbody text\n"),
            record(A, "", "Init\n"),
        ]
        .join("\n");

        let nodes = parse_log(&output, &HashMap::new()).unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(nodes[0].is_merge());
        assert_eq!(nodes[0].parents, vec![A.to_string(), B.to_string()]);
        assert_eq!(nodes[1].message, "Commit2\n\nbody text");
        assert_eq!(nodes[1].title(), "Commit2");
        assert!(nodes[2].parents.is_empty());
        assert_eq!(nodes[2].author.name, "Ada");
        assert_eq!(nodes[2].committer.date.timestamp(), 1700000100);
    }

    #[test]
    fn test_refs_are_attached_by_hash() {
        let output = record(A, "", "Init\n");
        let mut refs = HashMap::new();
        refs.insert(
            A.to_string(),
            vec![RefName::new("HEAD"), RefName::new("refs/heads/master")],
        );

        let nodes = parse_log(&output, &refs).unwrap();
        assert!(nodes[0].has_ref("HEAD"));
        assert!(nodes[0].has_ref("refs/heads/master"));
    }

    #[test]
    fn test_empty_output() {
        assert!(parse_log("", &HashMap::new()).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let output = format!("{}\u{1f}{}\u{1f}Ada\u{1e}", A, B);
        match parse_log(&output, &HashMap::new()) {
            Err(Error::Parse { fragment, .. }) => assert!(fragment.starts_with(A)),
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_hash_is_an_error() {
        let output = record("not-a-hash", "", "x");
        assert!(matches!(
            parse_log(&output, &HashMap::new()),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_bad_timestamp_is_an_error() {
        let output = record(A, "", "x").replace("1700000000", "yesterday");
        assert!(parse_log(&output, &HashMap::new()).is_err());
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(parse_log("fatal: something odd\n", &HashMap::new()).is_err());
    }
}
