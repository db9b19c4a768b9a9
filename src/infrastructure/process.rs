//! Process execution for migration entry points
//!
//! Every external invocation (interpreters, `psql`, `alembic`, backup tools)
//! is described by a [`CommandTemplate`]: an argument vector with
//! `{placeholder}` slots that is rendered into a [`CommandSpec`] and run
//! under a hard timeout. Migration units are untrusted code, so a timeout
//! kills the child instead of asking it to stop.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::tools::get_tool_path;

/// Time allowed for draining output pipes after the child exits
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Argument vector with `{placeholder}` slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(pub Vec<String>);

impl CommandTemplate {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Render into a runnable command.
    ///
    /// `{env:NAME}` reads the process environment and fails when unset.
    /// Unknown placeholders are left verbatim so shell snippets survive.
    pub fn render(&self, vars: &TemplateVars) -> Result<CommandSpec> {
        let mut parts = self
            .0
            .iter()
            .map(|part| expand(part, vars))
            .collect::<Result<Vec<_>>>()?
            .into_iter();

        let program = match parts.next() {
            Some(program) if !program.trim().is_empty() => program,
            _ => bail!("Command template is empty"),
        };

        Ok(CommandSpec {
            program,
            args: parts.collect(),
            env: Vec::new(),
            cwd: None,
        })
    }
}

/// Values substituted into a [`CommandTemplate`]
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

fn expand(part: &str, vars: &TemplateVars) -> Result<String> {
    let mut out = String::with_capacity(part.len());
    let mut rest = part;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let key = &after[..close];

        if let Some(var) = key.strip_prefix("env:") {
            let value = std::env::var(var)
                .with_context(|| format!("Environment variable {} is not set", var))?;
            out.push_str(&value);
        } else if let Some(value) = vars.get(key) {
            out.push_str(value);
        } else {
            out.push('{');
            out.push_str(key);
            out.push('}');
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// A fully rendered command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) || arg.is_empty() {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured output of a completed child
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `lines` lines of stderr, or stdout when stderr is empty
    pub fn tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let collected: Vec<&str> = source.lines().collect();
        let start = collected.len().saturating_sub(lines);
        collected[start..].join("\n")
    }

    /// One-line description of a non-zero exit
    pub fn failure_message(&self) -> String {
        let status = match self.exit_code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        };
        let tail = self.tail(5);
        if tail.trim().is_empty() {
            status
        } else {
            format!("{}: {}", status, tail.trim())
        }
    }
}

/// Result of running a command under a timeout
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Completed(ProcessOutput),
    TimedOut { elapsed: Duration },
}

/// Spawns commands and enforces hard timeouts
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run a command, killing it when `timeout` elapses.
    ///
    /// # Errors
    /// Returns an error only when the process cannot be spawned or waited on;
    /// non-zero exits and timeouts are reported through [`ProcessOutcome`].
    pub async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<ProcessOutcome> {
        let program = get_tool_path(&spec.program);
        debug!("Executing: {}", spec);

        let mut command = Command::new(&program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let start = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", program))?;

        let stdout_task = tokio::spawn(read_all(child.stdout.take()));
        let stderr_task = tokio::spawn(read_all(child.stderr.take()));

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status.with_context(|| format!("Failed to wait for {}", program))?;
                let stdout = tokio::time::timeout(DRAIN_GRACE, stdout_task)
                    .await
                    .ok()
                    .and_then(|joined| joined.ok())
                    .unwrap_or_default();
                let stderr = tokio::time::timeout(DRAIN_GRACE, stderr_task)
                    .await
                    .ok()
                    .and_then(|joined| joined.ok())
                    .unwrap_or_default();

                Ok(ProcessOutcome::Completed(ProcessOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    elapsed: start.elapsed(),
                }))
            }
            Err(_) => {
                warn!(
                    "{} exceeded {}s timeout, killing it",
                    program,
                    timeout.as_secs_f64()
                );
                #[cfg(unix)]
                if let Some(pid) = child.id() {
                    kill_process_group(pid).await;
                }
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", program, e);
                }
                stdout_task.abort();
                stderr_task.abort();

                Ok(ProcessOutcome::TimedOut {
                    elapsed: start.elapsed(),
                })
            }
        }
    }
}

/// Kill the whole process group so grandchildren do not outlive the unit
#[cfg(unix)]
async fn kill_process_group(pid: u32) {
    let result = Command::new("kill")
        .args(["-KILL", "--", &format!("-{}", pid)])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        debug!("Process group kill for {} failed: {}", pid, e);
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        // Keep whatever arrived before the pipe failed
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!("Reading child output failed after {} bytes: {}", buf.len(), e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
