//! Credential resolution for authenticated git operations
//!
//! Git asks for credentials through `GIT_ASKPASS`. The helper binary relays
//! each prompt to a [`CredentialMediator`] session, which answers from the
//! session cache, from credentials the caller supplied for the operation, or
//! by asking a [`CredentialProvider`] under a bounded wait.

pub mod askpass;
mod mediator;

pub use mediator::{AuthSession, AuthState, CredentialMediator};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Username and password (or token) for one host
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of credentials when neither the cache nor the caller has any
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Supply credentials for `host`, or `None` to abort the operation
    ///
    /// `username` is set when the remote URL already names the user.
    async fn credentials(&self, host: &str, username: Option<&str>) -> Option<Credentials>;
}

/// Provider that never has credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn credentials(&self, _host: &str, _username: Option<&str>) -> Option<Credentials> {
        None
    }
}

/// Provider returning one fixed set of credentials for every host
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self, _host: &str, _username: Option<&str>) -> Option<Credentials> {
        Some(self.0.clone())
    }
}

/// A pending request for credentials, to be answered by the calling context
#[derive(Debug)]
pub struct CredentialRequest {
    /// Host the credentials are for
    pub host: String,
    /// Username already named by the remote URL
    pub username: Option<String>,
    responder: oneshot::Sender<Option<Credentials>>,
}

impl CredentialRequest {
    /// Answer the request; `None` aborts the waiting operation
    pub fn respond(self, credentials: Option<Credentials>) {
        if self.responder.send(credentials).is_err() {
            debug!(host = %self.host, "credential request was abandoned before it was answered");
        }
    }
}

/// Provider that forwards requests to whoever holds the receiving end
///
/// Only the operation that asked waits for the answer; other repositories'
/// queues keep running.
#[derive(Debug, Clone)]
pub struct ChannelCredentials {
    tx: mpsc::Sender<CredentialRequest>,
}

impl ChannelCredentials {
    /// Create a provider and the receiver its requests arrive on
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<CredentialRequest>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl CredentialProvider for ChannelCredentials {
    async fn credentials(&self, host: &str, username: Option<&str>) -> Option<Credentials> {
        let (responder, answer) = oneshot::channel();
        let request = CredentialRequest {
            host: host.to_string(),
            username: username.map(str::to_string),
            responder,
        };
        self.tx.send(request).await.ok()?;
        answer.await.ok().flatten()
    }
}
