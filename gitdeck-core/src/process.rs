//! Subprocess execution with captured output and timeouts
//!
//! The runner holds no state between invocations: each call spawns one
//! child, optionally feeds it stdin, drains stdout/stderr concurrently with
//! waiting on it, and kills it if it outlives its timeout.

use std::ffi::OsStr;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Captured outcome of one subprocess invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i32,
    /// Captured stdout, lossily decoded
    pub stdout: String,
    /// Captured stdout exactly as written, for output that embeds file names
    pub stdout_bytes: Vec<u8>,
    /// Captured stderr, lossily decoded
    pub stderr: String,
    /// Wall-clock time from spawn to exit
    pub elapsed: Duration,
}

impl CommandResult {
    /// Whether the process exited with status zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Per-invocation options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Kill the process and fail with [`Error::Timeout`] after this long
    pub timeout: Option<Duration>,
    /// Non-zero exit codes the caller treats as a normal result
    pub allowed_exit_codes: Vec<i32>,
    /// Bytes written to the child's stdin, which is then closed
    pub stdin: Option<Vec<u8>>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl RunOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Accept an additional exit code as success
    pub fn allow_exit_code(mut self, code: i32) -> Self {
        self.allowed_exit_codes.push(code);
        self
    }

    /// Feed the given bytes to stdin
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Stateless subprocess runner
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a new runner
    pub fn new() -> Self {
        Self
    }

    /// Run `program args..` in `cwd`
    ///
    /// Fails with [`Error::Process`] on a non-zero exit code that is not in
    /// `options.allowed_exit_codes`, and with [`Error::Timeout`] when the
    /// timeout elapses first.
    pub async fn run<I, S>(
        &self,
        program: &str,
        args: I,
        cwd: &Path,
        options: &RunOptions,
    ) -> Result<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let command_line = CommandLine(program, &args);

        if !cwd.exists() {
            return Err(Error::InvalidPath(format!(
                "Working directory does not exist: {}",
                cwd.display()
            )));
        }

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .current_dir(cwd)
            .stdin(if options.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &options.env {
            cmd.env(k, v);
        }

        debug!(command = %command_line, cwd = %cwd.display(), "spawning");
        let started = Instant::now();

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Config(format!(
                    "Executable not found at '{}'. Is it installed and on PATH?",
                    program
                ))
            } else {
                Error::Io(e)
            }
        })?;

        if let (Some(input), Some(mut stdin)) = (options.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("child closed stdin early: {}", e);
                }
            });
        }

        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let status = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!(command = %command_line, "failed to kill timed out process: {}", e);
                    }
                    return Err(Error::Timeout {
                        command: command_line.to_string(),
                        elapsed: started.elapsed(),
                    });
                }
            },
            None => child.wait().await?,
        };

        let stdout = stdout
            .await
            .map_err(|e| Error::Other(format!("stdout reader failed: {}", e)))??;
        let stderr = stderr
            .await
            .map_err(|e| Error::Other(format!("stderr reader failed: {}", e)))??;

        let result = CommandResult {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stdout_bytes: stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            elapsed: started.elapsed(),
        };

        debug!(
            command = %command_line,
            exit_code = result.exit_code,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "finished"
        );

        if result.success() || options.allowed_exit_codes.contains(&result.exit_code) {
            Ok(result)
        } else {
            Err(Error::Process {
                command: command_line.to_string(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            })
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

struct CommandLine<'a>(&'a str, &'a [std::ffi::OsString]);

impl fmt::Display for CommandLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        for arg in self.1 {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}
