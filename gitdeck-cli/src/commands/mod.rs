//! CLI command implementations

pub mod log;
pub mod remotes;
pub mod status;
pub mod watch;

pub use log::LogArgs;
pub use remotes::RemotesArgs;
pub use status::{StatusArgs, SubmodulesArgs};
pub use watch::WatchArgs;

/// Print `value` as pretty JSON
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
