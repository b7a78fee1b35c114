//! Parsers turning git plumbing output into the repository model
//!
//! Parsers never drop entities they do not understand: unexpected output is
//! reported as [`Error::Parse`](crate::Error::Parse) carrying the raw
//! fragment, so an incomplete model can never masquerade as a complete one.

mod log;
mod refs;
mod remote;
mod status;
mod submodule;

pub use log::{parse_log, LOG_FORMAT};
pub use refs::{branches, parse_refs, refs_by_commit, RefRecord, REF_FORMAT};
pub use remote::{parse_ls_remote, parse_remotes};
pub use status::{parse_status, parse_status_raw, RawStatusEntry, StatusEntries};
pub use submodule::{
    parse_gitmodules, parse_index_entry, parse_submodule_status, GitmodulesEntry,
    SubmoduleStatusLine,
};

use crate::{Error, Result};

/// Field separator used in our custom formats (ASCII unit separator)
pub(crate) const FIELD_SEP: char = '\u{1f}';

/// Record separator used in our custom formats (ASCII record separator)
pub(crate) const RECORD_SEP: char = '\u{1e}';

/// Whether `s` looks like a full SHA-1 or SHA-256 object name
pub fn is_object_id(s: &str) -> bool {
    (s.len() == 40 || s.len() == 64) && s.bytes().all(|b| b.is_ascii_hexdigit())
}

pub(crate) fn object_id(s: &str, context: &'static str, fragment: &str) -> Result<String> {
    if is_object_id(s) {
        Ok(s.to_string())
    } else {
        Err(Error::parse(context, fragment))
    }
}

/// Split `record` into exactly `n` fields
pub(crate) fn fields<'a>(record: &'a str, n: usize, context: &'static str) -> Result<Vec<&'a str>> {
    let parts: Vec<&str> = record.splitn(n, FIELD_SEP).collect();
    if parts.len() != n {
        return Err(Error::parse(context, record));
    }
    Ok(parts)
}
