//! Log command

use std::path::PathBuf;

use clap::Args;
use gitdeck_core::RepoService;

use super::print_json;

/// Show commit history across branches, tags and remotes
#[derive(Args, Debug)]
pub struct LogArgs {
    /// Repository path
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Maximum number of commits to show
    #[arg(short = 'n', long, default_value_t = 25)]
    limit: usize,

    /// Number of commits to skip
    #[arg(long, default_value_t = 0)]
    skip: usize,
}

impl LogArgs {
    /// Execute the log command
    pub async fn execute(&self, service: &RepoService, json: bool) -> anyhow::Result<()> {
        let log = service.get_log(&self.path, self.limit, self.skip).await?;
        if json {
            return print_json(&log);
        }

        if log.nodes.is_empty() {
            println!("No commits.");
            return Ok(());
        }

        for node in &log.nodes {
            let refs: Vec<String> = node.refs.iter().map(|r| r.to_string()).collect();
            let decoration = if refs.is_empty() {
                String::new()
            } else {
                format!(" ({})", refs.join(", "))
            };
            println!(
                "{} {} {:<20}{} {}",
                &node.sha[..node.sha.len().min(7)],
                node.committer.date.format("%Y-%m-%d %H:%M"),
                node.author.name,
                decoration,
                node.title()
            );
        }
        Ok(())
    }
}
