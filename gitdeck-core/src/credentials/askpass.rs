//! Wire protocol between an [`AuthSession`](super::AuthSession) and the
//! `gitdeck-askpass` helper that git launches for each prompt.
//!
//! The helper connects to `GITDECK_ASKPASS_ADDR`, sends the session token and
//! the prompt text on one line each, and reads back a single reply line.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use url::Url;

use crate::{Error, Result};

/// Environment variable naming the session's loopback address
pub const ADDR_ENV: &str = "GITDECK_ASKPASS_ADDR";

/// Environment variable carrying the session token
pub const TOKEN_ENV: &str = "GITDECK_ASKPASS_TOKEN";

/// A credential prompt git raised
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// `Username for '<url>': `
    Username { host: String },
    /// `Password for '<url>': `, where the url may name the user
    Password {
        host: String,
        username: Option<String>,
    },
}

impl Prompt {
    /// Recognize a git credential prompt, or `None` for anything else
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (kind, rest) = text.split_once(" for '")?;
        let (raw_url, _) = rest.rsplit_once('\'')?;
        let url = Url::parse(raw_url).ok()?;
        let host = host_key(&url)?;

        match kind {
            "Username" => Some(Prompt::Username { host }),
            "Password" => Some(Prompt::Password {
                host,
                username: (!url.username().is_empty()).then(|| url.username().to_string()),
            }),
            _ => None,
        }
    }

    /// Host (with port, when explicit) the prompt is for
    pub fn host(&self) -> &str {
        match self {
            Prompt::Username { host } | Prompt::Password { host, .. } => host,
        }
    }
}

/// Cache key for a remote URL
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Answer to one prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Value to print for git
    Answer(String),
    /// Make git abort the operation
    Abort(String),
}

impl Reply {
    /// Encode as one protocol line (without the trailing newline)
    pub fn encode(&self) -> String {
        match self {
            Reply::Answer(secret) => format!("ok\t{}", secret),
            Reply::Abort(reason) => format!("abort\t{}", reason.replace('\n', " ")),
        }
    }

    /// Decode one protocol line
    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        match line.split_once('\t') {
            Some(("ok", secret)) => Ok(Reply::Answer(secret.to_string())),
            Some(("abort", reason)) => Ok(Reply::Abort(reason.to_string())),
            _ => Err(Error::parse("askpass reply", line)),
        }
    }
}

/// Encode a helper request
pub fn encode_request(token: &str, prompt: &str) -> String {
    format!("{}\n{}\n", token, prompt.replace('\n', " "))
}

/// Send one prompt to a session and wait for its reply
///
/// Blocking; this runs inside the short-lived helper process.
pub fn ask(addr: &str, token: &str, prompt: &str, timeout: Option<Duration>) -> Result<Reply> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(timeout)?;
    stream.write_all(encode_request(token, prompt).as_bytes())?;
    stream.flush()?;

    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line)?;
    if line.is_empty() {
        return Err(Error::Other("askpass session closed without replying".to_string()));
    }
    Reply::decode(&line)
}
