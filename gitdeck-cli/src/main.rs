//! Gitdeck CLI - inspect and drive repositories through gitdeck-core

mod commands;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gitdeck_core::{
    Config, CredentialProvider, Credentials, NoCredentials, RepoService, StaticCredentials,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{LogArgs, RemotesArgs, StatusArgs, SubmodulesArgs, WatchArgs};

/// Gitdeck: git orchestration for interactive clients
#[derive(Parser, Debug)]
#[command(name = "gitdeck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Path to git executable (overrides config and env)
    #[arg(long, global = true, env = "GITDECK_GIT_PATH")]
    git_path: Option<String>,

    /// Change notification debounce window, e.g. "200ms" (overrides config and env)
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    debounce: Option<Duration>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Show working tree status
    #[command(visible_alias = "st")]
    Status(StatusArgs),

    /// Show commit history across branches, tags and remotes
    Log(LogArgs),

    /// List remotes or their tags
    Remotes(RemotesArgs),

    /// List submodules
    Submodules(SubmodulesArgs),

    /// Print change notifications until interrupted
    Watch(WatchArgs),

    /// Show current configuration
    Config,
}

/// Credentials from `GITDECK_USERNAME` / `GITDECK_PASSWORD`, if both are set
fn credential_provider() -> Arc<dyn CredentialProvider> {
    match (
        std::env::var("GITDECK_USERNAME"),
        std::env::var("GITDECK_PASSWORD"),
    ) {
        (Ok(username), Ok(password)) => {
            Arc::new(StaticCredentials(Credentials::new(username, password)))
        }
        _ => Arc::new(NoCredentials),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = Config::load_with_overrides(cli.git_path.clone(), cli.debounce)?;

    if cli.verbose {
        tracing::info!(
            git_path = %config.git.path,
            debounce = ?config.watch.debounce,
            max_concurrent = config.queue.max_concurrent,
            "Configuration loaded"
        );
    }

    let service = RepoService::new(&config, credential_provider());

    match cli.command {
        Some(Commands::Version) => {
            println!("gitdeck {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Status(args)) => {
            args.execute(&service, cli.json).await?;
        }
        Some(Commands::Log(args)) => {
            args.execute(&service, cli.json).await?;
        }
        Some(Commands::Remotes(args)) => {
            args.execute(&service, cli.json).await?;
        }
        Some(Commands::Submodules(args)) => {
            args.execute(&service, cli.json).await?;
        }
        Some(Commands::Watch(args)) => {
            args.execute(&service, cli.json).await?;
        }
        Some(Commands::Config) => {
            println!("Gitdeck Configuration");
            println!("=====================");
            println!();
            println!("Git:");
            println!("  path: {}", config.git.path);
            println!(
                "  command_timeout: {}",
                humantime::format_duration(config.git.command_timeout)
            );
            println!(
                "  network_timeout: {}",
                humantime::format_duration(config.git.network_timeout)
            );
            println!();
            println!("Queue:");
            println!("  max_concurrent: {}", config.queue.max_concurrent);
            println!();
            println!("Watch:");
            println!("  debounce: {}", humantime::format_duration(config.watch.debounce));
            println!();
            println!("Credentials:");
            println!(
                "  wait_timeout: {}",
                humantime::format_duration(config.credentials.wait_timeout)
            );
            match config.credentials.resolve_askpass() {
                Some(path) => println!("  askpass: {}", path.display()),
                None => println!("  askpass: (not found - network prompts disabled)"),
            }
            println!();
            if let Some(path) = Config::default_config_path() {
                println!("Config file: {}", path.display());
                if path.exists() {
                    println!("  (exists)");
                } else {
                    println!("  (not found - using defaults)");
                }
            }
        }
        None => {
            println!("Gitdeck - git orchestration for interactive clients");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
