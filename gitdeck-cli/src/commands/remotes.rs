//! Remotes command

use std::path::PathBuf;

use clap::Args;
use gitdeck_core::RepoService;

use super::print_json;

/// List remotes, or the tags one of them advertises
#[derive(Args, Debug)]
pub struct RemotesArgs {
    /// Repository path
    #[arg(default_value = ".")]
    path: PathBuf,

    /// List the tags of this remote instead (contacts the remote)
    #[arg(long, value_name = "REMOTE")]
    tags: Option<String>,
}

impl RemotesArgs {
    /// Execute the remotes command
    pub async fn execute(&self, service: &RepoService, json: bool) -> anyhow::Result<()> {
        if let Some(ref remote) = self.tags {
            let tags = service.remote_tags(&self.path, remote, None).await?;
            if json {
                return print_json(&tags);
            }
            for tag in &tags {
                println!("{} {}", tag.sha, tag.name);
            }
            return Ok(());
        }

        let remotes = service.list_remotes(&self.path).await?;
        if json {
            return print_json(&remotes);
        }
        if remotes.is_empty() {
            println!("No remotes configured.");
        }
        for remote in &remotes {
            println!("{}\t{}", remote.name, remote.url);
            if let Some(ref push) = remote.push_url {
                println!("{}\t{} (push)", remote.name, push);
            }
        }
        Ok(())
    }
}
