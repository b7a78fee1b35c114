//! Configuration management for gitdeck
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (GITDECK_*)
//! 3. Config file (~/.config/gitdeck/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Git executable configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    /// Path to the git executable
    pub path: String,

    /// Timeout for local commands
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Timeout for commands that talk to a remote
    #[serde(with = "humantime_serde")]
    pub network_timeout: Duration,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            path: "git".to_string(),
            command_timeout: Duration::from_secs(120),
            network_timeout: Duration::from_secs(600),
        }
    }
}

/// Repository task queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of tasks running at once across all repositories (0 = unbounded)
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_concurrent: 16 }
    }
}

/// Change watcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Window in which raw filesystem events are coalesced into one notification
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
        }
    }
}

/// Credential mediation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// How long an operation waits for credentials before failing
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,

    /// Path to the askpass helper; defaults to `gitdeck-askpass` next to the running binary
    pub askpass_path: Option<PathBuf>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(60),
            askpass_path: None,
        }
    }
}

impl CredentialsConfig {
    /// Resolve the askpass helper, if one is installed
    pub fn resolve_askpass(&self) -> Option<PathBuf> {
        if let Some(ref path) = self.askpass_path {
            return Some(path.clone());
        }

        let exe = std::env::current_exe().ok()?;
        let name = if cfg!(windows) {
            "gitdeck-askpass.exe"
        } else {
            "gitdeck-askpass"
        };
        let candidate = exe.with_file_name(name);
        candidate.exists().then_some(candidate)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Git executable configuration
    pub git: GitConfig,

    /// Task queue configuration
    pub queue: QueueConfig,

    /// Change watcher configuration
    pub watch: WatchConfig,

    /// Credential configuration
    pub credentials: CredentialsConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/gitdeck/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gitdeck").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - GITDECK_GIT_PATH: Path to git executable
    /// - GITDECK_COMMAND_TIMEOUT / GITDECK_NETWORK_TIMEOUT: humantime durations
    /// - GITDECK_DEBOUNCE: debounce window
    /// - GITDECK_MAX_CONCURRENT: global task concurrency cap
    /// - GITDECK_ASKPASS: askpass helper path
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup("GITDECK_GIT_PATH") {
            self.git.path = path;
        }
        if let Some(value) = lookup("GITDECK_COMMAND_TIMEOUT") {
            self.git.command_timeout = parse_duration("GITDECK_COMMAND_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("GITDECK_NETWORK_TIMEOUT") {
            self.git.network_timeout = parse_duration("GITDECK_NETWORK_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("GITDECK_DEBOUNCE") {
            self.watch.debounce = parse_duration("GITDECK_DEBOUNCE", &value)?;
        }
        if let Some(value) = lookup("GITDECK_MAX_CONCURRENT") {
            self.queue.max_concurrent = value.trim().parse().map_err(|e| {
                Error::Config(format!("Invalid GITDECK_MAX_CONCURRENT '{}': {}", value, e))
            })?;
        }
        if let Some(path) = lookup("GITDECK_ASKPASS") {
            self.credentials.askpass_path = Some(PathBuf::from(path));
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, git_path: Option<String>, debounce: Option<Duration>) -> Self {
        if let Some(path) = git_path {
            self.git.path = path;
        }

        if let Some(d) = debounce {
            self.watch.debounce = d;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(git_path: Option<String>, debounce: Option<Duration>) -> Result<Self> {
        Ok(Self::load()?
            .with_env_overrides()?
            .with_cli_overrides(git_path, debounce))
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", key, value, e)))
}
