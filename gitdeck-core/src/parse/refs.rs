//! `git for-each-ref` parsing

use std::collections::HashMap;

use super::{fields, object_id};
use crate::model::{BranchInfo, RefKind, RefName};
use crate::Result;

/// `--format=` string understood by [`parse_refs`]
pub const REF_FORMAT: &str =
    "%(refname)%1f%(objecttype)%1f%(objectname)%1f%(*objectname)%1f%(upstream)%1f%(HEAD)";

/// One line of `for-each-ref` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefRecord {
    /// Fully qualified ref name
    pub name: String,
    /// Type of the object the ref points at (`commit`, `tag`, ...)
    pub object_type: String,
    /// Object the ref points at
    pub object: String,
    /// Object after peeling a tag, if the ref points at a tag object
    pub peeled: Option<String>,
    /// Configured upstream ref
    pub upstream: Option<String>,
    /// Whether HEAD currently points at this branch
    pub is_head: bool,
}

impl RefRecord {
    /// The commit (or other object) this ref ultimately resolves to
    pub fn target(&self) -> &str {
        self.peeled.as_deref().unwrap_or(&self.object)
    }

    /// Kind, distinguishing annotated from lightweight tags
    pub fn kind(&self) -> RefKind {
        match RefKind::classify(&self.name) {
            RefKind::LightweightTag if self.object_type == "tag" => RefKind::AnnotatedTag,
            kind => kind,
        }
    }
}

/// Parse `for-each-ref --format=REF_FORMAT` output
pub fn parse_refs(output: &str) -> Result<Vec<RefRecord>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let f = fields(line, 6, "for-each-ref")?;
            let object = object_id(f[2], "for-each-ref", line)?;
            let peeled = if f[3].is_empty() {
                None
            } else {
                Some(object_id(f[3], "for-each-ref", line)?)
            };
            Ok(RefRecord {
                name: f[0].to_string(),
                object_type: f[1].to_string(),
                object,
                peeled,
                upstream: (!f[4].is_empty()).then(|| f[4].to_string()),
                is_head: f[5].trim() == "*",
            })
        })
        .collect()
}

/// Group refs by the commit they resolve to, adding `HEAD` when known
///
/// Each group is ordered HEAD, local branches, remote branches, tags, other.
pub fn refs_by_commit(records: &[RefRecord], head: Option<&str>) -> HashMap<String, Vec<RefName>> {
    let mut map: HashMap<String, Vec<RefName>> = HashMap::new();

    if let Some(head) = head {
        map.entry(head.to_string()).or_default().push(RefName {
            name: "HEAD".to_string(),
            kind: RefKind::Head,
        });
    }

    for record in records {
        map.entry(record.target().to_string())
            .or_default()
            .push(RefName {
                name: record.name.clone(),
                kind: record.kind(),
            });
    }

    for refs in map.values_mut() {
        refs.sort_by(|a, b| rank(a.kind).cmp(&rank(b.kind)).then_with(|| a.name.cmp(&b.name)));
    }

    map
}

fn rank(kind: RefKind) -> u8 {
    match kind {
        RefKind::Head => 0,
        RefKind::LocalBranch => 1,
        RefKind::RemoteBranch => 2,
        RefKind::AnnotatedTag | RefKind::LightweightTag => 3,
        RefKind::Stash => 4,
        RefKind::Other => 5,
    }
}

/// Local and remote-tracking branches from a ref listing
pub fn branches(records: &[RefRecord]) -> Vec<BranchInfo> {
    records
        .iter()
        .filter(|r| matches!(r.kind(), RefKind::LocalBranch | RefKind::RemoteBranch))
        .map(|r| BranchInfo {
            name: r.name.clone(),
            sha: r.object.clone(),
            upstream: r.upstream.clone(),
            current: r.is_head,
            kind: r.kind(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const T: &str = "1111111111111111111111111111111111111111";

    fn fixture() -> String {
        [
            format!("refs/heads/master\u{1f}commit\u{1f}{B}\u{1f}\u{1f}refs/remotes/origin/master\u{1f}*"),
            format!("refs/heads/topic\u{1f}commit\u{1f}{A}\u{1f}\u{1f}\u{1f} "),
            format!("refs/remotes/origin/HEAD\u{1f}commit\u{1f}{B}\u{1f}\u{1f}\u{1f} "),
            format!("refs/remotes/origin/master\u{1f}commit\u{1f}{B}\u{1f}\u{1f}\u{1f} "),
            format!("refs/tags/v1.0\u{1f}tag\u{1f}{T}\u{1f}{B}\u{1f}\u{1f} "),
            format!("refs/tags/light\u{1f}commit\u{1f}{A}\u{1f}\u{1f}\u{1f} "),
        ]
        .join("\n")
    }

    #[test]
    fn test_parse_and_classify() {
        let records = parse_refs(&fixture()).unwrap();
        assert_eq!(records.len(), 6);
        assert!(records[0].is_head);
        assert_eq!(records[0].upstream.as_deref(), Some("refs/remotes/origin/master"));
        assert_eq!(records[4].kind(), RefKind::AnnotatedTag);
        assert_eq!(records[4].target(), B);
        assert_eq!(records[5].kind(), RefKind::LightweightTag);
    }

    #[test]
    fn test_annotated_tag_attaches_to_peeled_commit() {
        let records = parse_refs(&fixture()).unwrap();
        let map = refs_by_commit(&records, Some(B));

        let names: Vec<String> = map[B].iter().map(|r| r.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "HEAD",
                "refs/heads/master",
                "refs/remotes/origin/HEAD",
                "refs/remotes/origin/master",
                "tag: refs/tags/v1.0",
            ]
        );
        assert!(!map.contains_key(T));
        assert_eq!(map[A].len(), 2);
    }

    #[test]
    fn test_branches_only() {
        let records = parse_refs(&fixture()).unwrap();
        let branches = branches(&records);
        assert_eq!(branches.len(), 4);
        assert!(branches.iter().filter(|b| b.current).count() == 1);
    }

    #[test]
    fn test_malformed_line() {
        assert!(matches!(
            parse_refs("refs/heads/master commit abc"),
            Err(Error::Parse { .. })
        ));
    }
}
