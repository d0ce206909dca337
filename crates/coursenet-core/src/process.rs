//! Process delegate for external computations
//!
//! Programs are always started from an argument vector, never through a
//! shell, so caller-supplied text reaches the child as data. Stdout and stderr
//! are drained concurrently to EOF before an invocation counts as finished.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// How a finished process is classified as failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitPolicy {
    /// Only non-empty stderr is a failure; a non-zero exit with empty stderr passes
    #[default]
    StderrOnly,
    /// Non-empty stderr or a non-zero exit is a failure
    Strict,
}

/// One call to an external program
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
            current_dir: None,
        }
    }

    /// Working directory of the child (inherits ours when unset)
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Payload written to the child's stdin; the stream is closed afterwards
    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn stdin_payload(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }
}

/// Everything a finished process produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Failure description under `policy`, or `None` if the run counts as a success
    pub fn failure(&self, policy: ExitPolicy) -> Option<String> {
        if !self.stderr.is_empty() {
            return Some(self.stderr_lossy().into_owned());
        }
        match (policy, self.exit_code) {
            (ExitPolicy::StderrOnly, _) | (ExitPolicy::Strict, Some(0)) => None,
            (ExitPolicy::Strict, Some(code)) => Some(format!("exited with code {}", code)),
            (ExitPolicy::Strict, None) => Some("terminated by signal".to_string()),
        }
    }
}

/// Spawns external programs and drains their streams
#[derive(Debug, Clone, Default)]
pub struct ProcessDelegate {
    /// Deadline applied when an invocation does not set its own
    default_timeout: Option<Duration>,
}

impl ProcessDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: Some(timeout),
        }
    }

    /// Run to completion, capturing stdout and stderr
    pub async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        self.execute(invocation, false).await
    }

    /// Run to completion, passing stdout through to the host's stdout
    ///
    /// Only stderr is captured; the returned `stdout` is empty.
    pub async fn run_streaming(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        self.execute(invocation, true).await
    }

    async fn execute(&self, invocation: &Invocation, forward_stdout: bool) -> Result<ProcessOutput> {
        let program = invocation.program.as_str();

        let mut command = Command::new(program);
        command
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }

        debug!(
            program = %program,
            args = ?invocation.args,
            stdin_bytes = invocation.stdin.as_ref().map(Vec::len),
            "Spawning process"
        );

        let child = command.spawn().map_err(|source| CoreError::ProcessSpawn {
            program: program.to_string(),
            source,
        })?;
        let pid = child.id();

        let drive = drive(child, invocation.stdin.as_deref(), forward_stdout);

        let result = match invocation.timeout.or(self.default_timeout) {
            Some(limit) => match tokio::time::timeout(limit, drive).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(program = %program, ?pid, timeout = ?limit, "Process timed out, killed");
                    return Err(CoreError::Timeout {
                        operation: format!("process {}", program),
                        timeout: limit,
                    });
                }
            },
            None => drive.await,
        };

        let output = result.map_err(|source| CoreError::ProcessIo {
            program: program.to_string(),
            source,
        })?;

        debug!(
            program = %program,
            ?pid,
            exit_code = ?output.exit_code,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "Process finished"
        );

        Ok(output)
    }
}

/// Feed stdin, drain both output streams to EOF, then reap the child
///
/// The child is owned here so that dropping this future (deadline expiry)
/// kills it through `kill_on_drop`.
async fn drive(
    mut child: Child,
    payload: Option<&[u8]>,
    forward_stdout: bool,
) -> io::Result<ProcessOutput> {
    let stdin = child.stdin.take();
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stdout not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("stderr not captured"))?;

    let feed = async move {
        if let (Some(mut pipe), Some(payload)) = (stdin, payload) {
            pipe.write_all(payload).await?;
            pipe.shutdown().await?;
        }
        Ok::<_, io::Error>(())
    };

    let drain_stdout = async {
        let mut buf = Vec::new();
        if forward_stdout {
            let mut host = tokio::io::stdout();
            tokio::io::copy(&mut stdout, &mut host).await?;
            host.flush().await?;
        } else {
            stdout.read_to_end(&mut buf).await?;
        }
        Ok::<_, io::Error>(buf)
    };

    let drain_stderr = async {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await?;
        Ok::<_, io::Error>(buf)
    };

    let (fed, stdout, stderr) = tokio::join!(feed, drain_stdout, drain_stderr);

    // A child may exit without reading its input; that is its business.
    if let Err(e) = fed {
        if e.kind() != io::ErrorKind::BrokenPipe {
            return Err(e);
        }
        debug!("Child closed stdin before the payload was fully written");
    }

    let status = child.wait().await?;

    Ok(ProcessOutput {
        stdout: stdout?,
        stderr: stderr?,
        exit_code: status.code(),
    })
}
