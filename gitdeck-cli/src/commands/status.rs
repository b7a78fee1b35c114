//! Status and submodules commands

use std::path::PathBuf;

use clap::Args;
use gitdeck_core::{FileStatus, QuickStatus, RepoService, RepoStatus, WorkingFileState};

use super::print_json;

/// Show working tree status
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Repository path
    #[arg(default_value = ".")]
    path: PathBuf,
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, service: &RepoService, json: bool) -> anyhow::Result<()> {
        match service.quick_status(&self.path)? {
            QuickStatus::NoSuchPath => anyhow::bail!("{} does not exist", self.path.display()),
            QuickStatus::Uninited => {
                anyhow::bail!("{} is not inside a git repository", self.path.display())
            }
            QuickStatus::Bare { root } => {
                anyhow::bail!("{} is a bare repository", root)
            }
            QuickStatus::Inited { root } => {
                let status = service.get_status(&root).await?;
                if json {
                    return print_json(&status);
                }
                print_status(&root.to_string(), &status);
            }
        }
        Ok(())
    }
}

fn print_status(root: &str, status: &RepoStatus) {
    println!("Repository: {}", root);

    let branch = &status.branch;
    match (&branch.branch, branch.detached) {
        (_, true) => println!("HEAD detached"),
        (Some(name), false) if branch.unborn => println!("On branch {} (no commits yet)", name),
        (Some(name), false) => println!("On branch {}", name),
        (None, false) => println!("On unknown branch"),
    }
    if let Some(ref upstream) = branch.upstream {
        println!(
            "  tracking {} (ahead {}, behind {})",
            upstream, branch.ahead, branch.behind
        );
    }

    if status.in_rebase {
        println!("Rebase in progress");
    }
    if status.in_merge {
        println!("Merge in progress");
    }
    if status.in_cherry_pick {
        println!("Cherry-pick in progress");
    }

    println!();
    if status.files.is_empty() {
        println!("Working tree clean.");
    } else {
        println!("Changes:");
        for file in &status.files {
            println!("  {}", describe(file));
        }
    }

    for sub in &status.submodules {
        println!();
        if !sub.initialized {
            println!("Submodule {}: not initialized", sub.path);
        } else if let Some(ref error) = sub.error {
            println!("Submodule {}: status unavailable ({})", sub.path, error);
        } else if sub.files.is_empty() {
            println!("Submodule {}: clean", sub.path);
        } else {
            println!("Submodule {}:", sub.path);
            for file in &sub.files {
                println!("  {}", describe(file));
            }
        }
    }
}

fn describe(file: &WorkingFileState) -> String {
    let label = match file.status {
        FileStatus::Untracked => "untracked",
        FileStatus::Modified => "modified",
        FileStatus::Added => "added",
        FileStatus::Deleted => "deleted",
        FileStatus::Renamed => "renamed",
        FileStatus::Conflicted => "conflicted",
        FileStatus::TypeChanged => "typechange",
    };
    let staged = if file.is_staged() { " [staged]" } else { "" };
    match file.old_path {
        Some(ref old) => format!("{:<11} {} -> {}{}", label, old, file.path, staged),
        None => format!("{:<11} {}{}", label, file.path, staged),
    }
}

/// List submodules
#[derive(Args, Debug)]
pub struct SubmodulesArgs {
    /// Repository path
    #[arg(default_value = ".")]
    path: PathBuf,
}

impl SubmodulesArgs {
    /// Execute the submodules command
    pub async fn execute(&self, service: &RepoService, json: bool) -> anyhow::Result<()> {
        let entries = service.list_submodules(&self.path).await?;
        if json {
            return print_json(&entries);
        }

        if entries.is_empty() {
            println!("No submodules.");
            return Ok(());
        }

        for entry in &entries {
            let commit = entry
                .commit
                .as_deref()
                .map(|c| &c[..c.len().min(7)])
                .unwrap_or("-------");
            let mut flags = Vec::new();
            if !entry.is_initialized() {
                flags.push("uninitialized");
            }
            if entry.out_of_sync {
                flags.push("out of sync");
            }
            if entry.conflicted {
                flags.push("conflicted");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            };
            println!(
                "{} {} {}{}",
                commit,
                entry.path,
                entry.url.as_deref().unwrap_or("(no url)"),
                flags
            );
        }
        Ok(())
    }
}
