//! Per-operation credential sessions
//!
//! A session moves through
//! `AwaitingPrompt -> PromptDetected -> CredentialResolved -> Forwarded`
//! and ends in `Success`, `Rejected` or `Aborted`. Only credentials that git
//! accepted are kept in the cache.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::askpass::{self, Prompt, Reply};
use super::{CredentialProvider, Credentials};
use crate::config::CredentialsConfig;
use crate::process::RunOptions;
use crate::{Error, Result};

const AUTH_FAILURE_MARKERS: &[&str] = &[
    "Authentication failed",
    "Invalid username or password",
    "could not read Username",
    "could not read Password",
    "terminal prompts disabled",
    "The requested URL returned error: 401",
    "The requested URL returned error: 403",
];

/// Where a credential session currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    AwaitingPrompt,
    PromptDetected,
    CredentialResolved,
    Forwarded,
    Success,
    Rejected,
    Aborted,
}

type Cache = Arc<Mutex<HashMap<String, Credentials>>>;

/// Resolves git credential prompts for authenticated operations
#[derive(Clone)]
pub struct CredentialMediator {
    cache: Cache,
    provider: Arc<dyn CredentialProvider>,
    wait_timeout: Duration,
    askpass: Option<PathBuf>,
}

impl fmt::Debug for CredentialMediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialMediator")
            .field("wait_timeout", &self.wait_timeout)
            .field("askpass", &self.askpass)
            .finish_non_exhaustive()
    }
}

impl CredentialMediator {
    /// Create a mediator with an explicit askpass helper (or none)
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        wait_timeout: Duration,
        askpass: Option<PathBuf>,
    ) -> Self {
        Self {
            cache: Arc::new(Mutex::new(HashMap::new())),
            provider,
            wait_timeout,
            askpass,
        }
    }

    /// Create a mediator from configuration
    pub fn from_config(provider: Arc<dyn CredentialProvider>, config: &CredentialsConfig) -> Self {
        let askpass = config.resolve_askpass();
        if askpass.is_none() {
            warn!("gitdeck-askpass not found; authenticated operations will fail instead of prompting");
        }
        Self::new(provider, config.wait_timeout, askpass)
    }

    /// Whether prompts can be intercepted at all
    pub fn has_helper(&self) -> bool {
        self.askpass.is_some()
    }

    /// Credentials cached for `host`
    pub fn cached(&self, host: &str) -> Option<Credentials> {
        lock(&self.cache).get(host).cloned()
    }

    /// Drop cached credentials for `host`
    pub fn forget(&self, host: &str) -> bool {
        lock(&self.cache).remove(host).is_some()
    }

    /// Open a session for one authenticated operation
    ///
    /// `supplied` are credentials the caller passed with the operation; they
    /// are used when the cache has nothing for the prompted host.
    pub async fn begin(&self, supplied: Option<Credentials>) -> Result<AuthSession> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let token = Uuid::new_v4().to_string();

        let ctx = Arc::new(SessionContext {
            token: token.clone(),
            state: Mutex::new(SessionState::default()),
            cache: Arc::clone(&self.cache),
            provider: Arc::clone(&self.provider),
            wait_timeout: self.wait_timeout,
            supplied,
        });
        let server = tokio::spawn(serve(listener, Arc::clone(&ctx)));

        let mut env = vec![
            (askpass::ADDR_ENV.to_string(), addr.to_string()),
            (askpass::TOKEN_ENV.to_string(), token),
        ];
        if let Some(ref helper) = self.askpass {
            env.push(("GIT_ASKPASS".to_string(), helper.display().to_string()));
        }
        debug!(%addr, "opened credential session");

        Ok(AuthSession { env, ctx, server })
    }
}

/// One authenticated operation's credential session
///
/// Pass [`AuthSession::apply`] the operation's run options, run git, then hand
/// the result to [`AuthSession::finish`].
pub struct AuthSession {
    env: Vec<(String, String)>,
    ctx: Arc<SessionContext>,
    server: JoinHandle<()>,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    /// Environment the git subprocess needs to reach this session
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Add this session's environment to `options`
    pub fn apply(&self, mut options: RunOptions) -> RunOptions {
        for (k, v) in &self.env {
            options = options.env(k.clone(), v.clone());
        }
        options
    }

    /// Current state
    pub fn state(&self) -> AuthState {
        lock(&self.ctx.state).phase
    }

    /// Close the session, caching or evicting credentials based on `outcome`
    pub fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        self.server.abort();
        let mut state = lock(&self.ctx.state);

        match outcome {
            Ok(value) => {
                if state.phase == AuthState::Forwarded {
                    if let Some((host, creds)) = state.resolved.clone() {
                        info!(host = %host, "caching accepted credentials");
                        lock(&self.ctx.cache).insert(host, creds);
                    }
                    state.phase = AuthState::Success;
                }
                Ok(value)
            }
            Err(err) => {
                let failure = auth_failure(&err);
                match state.phase {
                    AuthState::Aborted => Err(Error::Authentication {
                        host: state.host.clone().unwrap_or_else(|| "unknown".to_string()),
                        reason: state
                            .reason
                            .clone()
                            .unwrap_or_else(|| "no credentials supplied".to_string()),
                    }),
                    AuthState::Forwarded if failure.is_some() => {
                        let host = state.host.clone().unwrap_or_else(|| "unknown".to_string());
                        lock(&self.ctx.cache).remove(&host);
                        state.phase = AuthState::Rejected;
                        warn!(host = %host, "credentials were rejected");
                        Err(Error::Authentication {
                            host,
                            reason: "credentials were rejected".to_string(),
                        })
                    }
                    _ => match failure {
                        Some((host, reason)) => Err(Error::Authentication {
                            host: state.host.clone().or(host).unwrap_or_else(|| "unknown".to_string()),
                            reason,
                        }),
                        None => Err(err),
                    },
                }
            }
        }
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        self.server.abort();
    }
}

#[derive(Debug)]
struct SessionState {
    phase: AuthState,
    host: Option<String>,
    resolved: Option<(String, Credentials)>,
    reason: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: AuthState::AwaitingPrompt,
            host: None,
            resolved: None,
            reason: None,
        }
    }
}

struct SessionContext {
    token: String,
    state: Mutex<SessionState>,
    cache: Cache,
    provider: Arc<dyn CredentialProvider>,
    wait_timeout: Duration,
    supplied: Option<Credentials>,
}

impl SessionContext {
    async fn answer(&self, text: &str) -> Reply {
        let Some(prompt) = Prompt::parse(text) else {
            return self.abort(None, format!("unrecognized prompt: {}", text.trim()));
        };
        let host = prompt.host().to_string();
        {
            let mut state = lock(&self.state);
            state.phase = AuthState::PromptDetected;
            state.host = Some(host.clone());
        }

        let hint = match prompt {
            Prompt::Password { ref username, .. } => username.clone(),
            Prompt::Username { .. } => None,
        };
        let Some(creds) = self.resolve(&host, hint.as_deref()).await else {
            return self.abort(Some(host), "no credentials supplied".to_string());
        };

        let secret = match prompt {
            Prompt::Username { .. } => creds.username.clone(),
            Prompt::Password { .. } => creds.password.clone(),
        };
        let mut state = lock(&self.state);
        state.phase = AuthState::CredentialResolved;
        state.resolved = Some((host, creds));
        state.phase = AuthState::Forwarded;
        Reply::Answer(secret)
    }

    async fn resolve(&self, host: &str, username: Option<&str>) -> Option<Credentials> {
        // git asks for the username and password in separate prompts
        let earlier = lock(&self.state).resolved.clone();
        if let Some((resolved_host, creds)) = earlier {
            if resolved_host == host {
                return Some(creds);
            }
        }
        let cached = lock(&self.cache).get(host).cloned();
        if let Some(creds) = cached {
            debug!(host = %host, "using cached credentials");
            return Some(creds);
        }
        if let Some(ref creds) = self.supplied {
            return Some(creds.clone());
        }

        match tokio::time::timeout(self.wait_timeout, self.provider.credentials(host, username)).await
        {
            Ok(creds) => creds,
            Err(_) => {
                warn!(host = %host, wait = ?self.wait_timeout, "timed out waiting for credentials");
                None
            }
        }
    }

    fn abort(&self, host: Option<String>, reason: String) -> Reply {
        let mut state = lock(&self.state);
        state.phase = AuthState::Aborted;
        if host.is_some() {
            state.host = host;
        }
        state.reason = Some(reason.clone());
        Reply::Abort(reason)
    }
}

async fn serve(listener: TcpListener, ctx: Arc<SessionContext>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(error = %e, "credential session stopped accepting");
                return;
            }
        };
        if let Err(e) = exchange(stream, &ctx).await {
            warn!(error = %e, "askpass exchange failed");
        }
    }
}

async fn exchange(stream: TcpStream, ctx: &SessionContext) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let token = lines.next_line().await?.unwrap_or_default();
    if token != ctx.token {
        warn!("dropping askpass connection with a wrong session token");
        return Ok(());
    }
    let text = lines.next_line().await?.unwrap_or_default();

    let reply = ctx.answer(&text).await;
    write.write_all(format!("{}\n", reply.encode()).as_bytes()).await?;
    write.shutdown().await?;
    Ok(())
}

/// Host (when named) and reason if `err` is git refusing authentication
fn auth_failure(err: &Error) -> Option<(Option<String>, String)> {
    let Error::Process { stderr, .. } = err else {
        return None;
    };
    let line = stderr
        .lines()
        .find(|l| AUTH_FAILURE_MARKERS.iter().any(|m| l.contains(m)))?;
    let host = line
        .split('\'')
        .nth(1)
        .and_then(|u| Url::parse(u).ok())
        .and_then(|u| askpass::host_key(&u));
    Some((host, line.trim().to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
