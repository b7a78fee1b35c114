//! Watch command - stream change notifications for a repository

use std::path::PathBuf;

use clap::Args;
use gitdeck_core::{ChangeSource, RepoService};

/// Print change notifications until interrupted
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Repository path
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Exit after this many notifications
    #[arg(short, long)]
    count: Option<u64>,

    /// Print the refreshed status after each notification
    #[arg(long)]
    status: bool,
}

impl WatchArgs {
    /// Execute the watch command
    pub async fn execute(&self, service: &RepoService, json: bool) -> anyhow::Result<()> {
        let mut subscription = service.subscribe_to_changes(&self.path)?;
        tracing::info!(repo = %subscription.path(), "watching for changes");

        let mut seen = 0u64;
        loop {
            let event = tokio::select! {
                event = subscription.changed() => event,
                _ = tokio::signal::ctrl_c() => break,
            };
            let Some(event) = event else {
                break;
            };

            if json {
                println!("{}", serde_json::to_string(&event)?);
            } else {
                let sources: Vec<&str> = event
                    .sources
                    .iter()
                    .map(|s| match s {
                        ChangeSource::WorkingTree => "working-tree",
                        ChangeSource::Metadata => "metadata",
                        ChangeSource::Operation => "operation",
                    })
                    .collect();
                println!(
                    "#{} {} changed ({})",
                    event.sequence,
                    event.path,
                    sources.join(", ")
                );
            }

            if self.status {
                let status = service.get_status(&event.path).await?;
                if json {
                    println!("{}", serde_json::to_string(&status)?);
                } else {
                    println!("  {} changed path(s)", status.files.len());
                }
            }

            seen += 1;
            if self.count.is_some_and(|limit| seen >= limit) {
                break;
            }
        }

        service.unsubscribe(subscription);
        Ok(())
    }
}
