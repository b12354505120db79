// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Shell command execution on the host or inside a named container.

use std::collections::HashSet;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ExecOpts {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ExecOpts {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl ExecOpts {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("container runtime is unreachable")]
    DaemonUnavailable,

    #[error("container is not available: {0}")]
    ContainerUnavailable(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("command output exceeded {0} bytes")]
    OutputTooLarge(usize),

    #[error("command exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ExecError {
    /// True for the failures callers should translate to 503 semantics.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::DaemonUnavailable | Self::ContainerUnavailable(_))
    }
}

/// Docker CLI stderr patterns meaning the daemon itself is unreachable.
pub fn is_daemon_unavailable(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("cannot connect to the docker daemon")
        || s.contains("docker: not found")
        || s.contains("command not found: docker")
}

/// Docker CLI stderr patterns meaning the named container is gone or stopped.
pub fn is_container_unavailable(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("no such container")
        || s.contains("is not running")
        || s.contains("error response from daemon")
}

/// Single-quote a string for the shell, escaping embedded quotes.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Wrap a command so it executes inside the named container.
pub fn in_container(container: &str, cmd: &str) -> String {
    format!("docker exec {container} sh -lc {}", shell_quote(cmd))
}

/// The seam between the engines and the operating system. Implemented by
/// [`HostRunner`] in production and by scripted mocks in tests.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        cmd: &str,
        opts: ExecOpts,
    ) -> impl Future<Output = Result<ExecOutput, ExecError>> + Send;
}

/// Runs commands through `sh -c` on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    async fn run(&self, cmd: &str, opts: ExecOpts) -> Result<ExecOutput, ExecError> {
        debug!(cmd, "spawning shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(opts.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecError::Timeout(opts.timeout))??;

        if output.stdout.len() + output.stderr.len() > opts.max_output_bytes {
            return Err(ExecError::OutputTooLarge(opts.max_output_bytes));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            if is_daemon_unavailable(&stderr) {
                return Err(ExecError::DaemonUnavailable);
            }
            if is_container_unavailable(&stderr) {
                let line = stderr.lines().next().unwrap_or("").trim().to_string();
                return Err(ExecError::ContainerUnavailable(line));
            }
            return Err(ExecError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(ExecOutput { stdout, stderr })
    }
}

/// A shell bound to one node-side target: either the host directly, or a
/// named container every command is wrapped into.
#[derive(Debug, Clone)]
pub struct NodeShell<R> {
    runner: R,
    container: Option<String>,
}

impl<R: CommandRunner> NodeShell<R> {
    pub fn new(runner: R, container: Option<String>) -> Self {
        Self { runner, container }
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub async fn run(&self, cmd: &str, opts: ExecOpts) -> Result<ExecOutput, ExecError> {
        match &self.container {
            Some(name) => self.runner.run(&in_container(name, cmd), opts).await,
            None => self.runner.run(cmd, opts).await,
        }
    }

    /// Run on the host even when this shell targets a container
    /// (`docker restart` must not run inside the container it restarts).
    pub async fn run_on_host(&self, cmd: &str, opts: ExecOpts) -> Result<ExecOutput, ExecError> {
        self.runner.run(cmd, opts).await
    }

    /// Read a file, treating a missing file as empty content.
    pub async fn read_file(&self, path: &str) -> Result<String, ExecError> {
        let out = self
            .run(&format!("cat {path} 2>/dev/null || true"), ExecOpts::default())
            .await?;
        Ok(out.stdout)
    }

    /// Write a file through a here-document into a temp file, then move it
    /// into place so a concurrent reader never observes a half-written file.
    /// The here-document terminates the content with a newline of its own,
    /// so one trailing newline is shaved off to keep rewrites stable.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), ExecError> {
        let body = content.strip_suffix('\n').unwrap_or(content);
        let heredoc = format!("cat > {path}.tmp <<\"EOF\"\n{body}\nEOF\nmv {path}.tmp {path}");
        self.run(&heredoc, ExecOpts::default()).await?;
        Ok(())
    }
}

/// Names of currently running containers; empty when docker is unreachable.
pub async fn list_running_containers<R: CommandRunner>(runner: &R) -> HashSet<String> {
    let opts = ExecOpts {
        timeout: Duration::from_millis(1500),
        max_output_bytes: 1024 * 1024,
    };
    match runner.run("docker ps --format '{{.Names}}'", opts).await {
        Ok(out) => out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(err) => {
            debug!(error = %err, "docker ps failed, assuming no running containers");
            HashSet::new()
        }
    }
}

pub async fn is_container_running<R: CommandRunner>(runner: &R, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    list_running_containers(runner).await.contains(name)
}
