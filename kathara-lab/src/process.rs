// LabForge: Kathara lab compiler written in Rust
// Copyright (C) 2022-2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Module for spawning local processes (the emulation backend and the container runtime).

use std::{
    path::{Path, PathBuf},
    process::{Output, Stdio},
    string::FromUtf8Error,
    time::Duration,
};

use async_trait::async_trait;
use itertools::Itertools;
use thiserror::Error;
use tokio::{process::Command, time::timeout};

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    /// Bytes written to `STDOUT`.
    pub stdout: Vec<u8>,
    /// Bytes written to `STDERR`.
    pub stderr: Vec<u8>,
    /// Exit code of the process. Processes killed by a signal report `-1`.
    pub exit_code: i32,
}

impl CmdOutput {
    /// Whether the process exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// `STDOUT` as (lossy) UTF-8.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// `STDERR` as (lossy) UTF-8.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Parse `STDOUT` as UTF-8.
    pub fn stdout_utf8(self) -> Result<String, CmdError> {
        Ok(String::from_utf8(self.stdout)?)
    }
}

impl From<Output> for CmdOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        }
    }
}

/// A single invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory, or `None` for the current one.
    pub cwd: Option<PathBuf>,
    /// The process is killed once this timeout elapses.
    pub timeout: Duration,
}

impl Invocation {
    /// Create a new invocation with the given timeout.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Render the command line, used for logging.
    pub fn cmd_str(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .join(" ")
    }
}

/// Run a command with arguments in a working directory, bounded by a timeout.
///
/// The lab driver and the container collaborator only talk to the outside world through this
/// trait, which makes it possible to replace the process layer in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the invocation and return its output, regardless of the exit code. The error is only
    /// returned if the process cannot be spawned, or if it did not finish in time.
    async fn run(&self, invocation: Invocation) -> Result<CmdOutput, CmdError>;

    /// Run the invocation and check that it exited successfully.
    async fn run_checked(&self, invocation: Invocation) -> Result<CmdOutput, CmdError> {
        let cmd = invocation.cmd_str();
        let output = self.run(invocation).await?;
        check_output(&cmd, output)
    }
}

/// Runner that spawns processes on the local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, invocation: Invocation) -> Result<CmdOutput, CmdError> {
        let cmd_str = invocation.cmd_str();
        log::trace!("[process] `{cmd_str}`");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = invocation.cwd.as_ref() {
            cmd.current_dir(cwd);
        }

        // dropping the future on timeout drops the child, which kills it.
        match timeout(invocation.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output.into()),
            Ok(Err(e)) => {
                log::error!("[process] {cmd_str} failed: {e}");
                Err(CmdError::Io(e))
            }
            Err(_) => {
                log::error!(
                    "[process] {cmd_str} did not finish within {:?}, killed it",
                    invocation.timeout
                );
                Err(CmdError::Timeout(cmd_str, invocation.timeout))
            }
        }
    }
}

/// Check the output for a successful exit code.
pub fn check_output(cmd: &str, output: CmdOutput) -> Result<CmdOutput, CmdError> {
    if output.success() {
        Ok(output)
    } else {
        log::error!(
            "[process] {} exited with exit code {}{}{}",
            cmd,
            output.exit_code,
            if !output.stdout.is_empty() {
                format!("\nSTDOUT:\n{}", output.stdout_lossy())
            } else {
                String::new()
            },
            if !output.stderr.is_empty() {
                format!("\nSTDERR:\n{}", output.stderr_lossy())
            } else {
                String::new()
            }
        );
        Err(CmdError::Failed {
            cmd: cmd.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr_lossy(),
        })
    }
}

/// Error returned by a [`CommandRunner`].
#[derive(Debug, Error)]
pub enum CmdError {
    /// The process could not be spawned or waited for.
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    /// The process did not finish in time and was killed.
    #[error("Command `{0}` timed out after {1:?}")]
    Timeout(String, Duration),
    /// The process exited with a non-zero exit code.
    #[error("Command `{cmd}` failed with exit code {exit_code}: {stderr}")]
    Failed {
        /// The command line
        cmd: String,
        /// The exit code
        exit_code: i32,
        /// Captured `STDERR`
        stderr: String,
    },
    /// Cannot parse output as utf8
    #[error("Cannot parse output as UTF-8: {0}")]
    FromUtf8(#[from] FromUtf8Error),
}

impl CmdError {
    /// Return the exit code if the error was a [`CmdError::Failed`]. Otherwise, return `None`.
    pub fn status(&self) -> Option<i32> {
        if let CmdError::Failed { exit_code, .. } = self {
            Some(*exit_code)
        } else {
            None
        }
    }
}
