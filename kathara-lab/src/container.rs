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

//! Module for interacting with the containers of a running lab.
//!
//! Containers are addressed by a best-effort name: first, a running container whose image is the
//! given name is looked up. Then, a container whose name contains `_<name>_` (the naming pattern
//! of Kathara). Finally, the name is used as is.
//!
//! The handle also manages the device images: [`ContainerExec::images`] lists the images of the
//! catalog, and [`ContainerExec::build_image`] builds one of them from the compose file.

use std::{path::PathBuf, time::Duration};

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::{
    config::{Config, CONFIG},
    process::{CmdError, CmdOutput, CommandRunner, Invocation, LocalRunner},
};

/// Timeout for the `docker ps` lookups.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Repository prefix of the images in the device catalog.
pub const IMAGE_PREFIX: &str = "icr/";

/// Handle for executing commands in containers.
#[derive(Debug, Clone)]
pub struct ContainerExec<R = LocalRunner> {
    runner: R,
    docker_bin: String,
    timeout: Duration,
    compose_file: PathBuf,
    build_timeout: Duration,
}

impl ContainerExec<LocalRunner> {
    /// Create a new handle from the global configuration.
    pub fn new() -> Self {
        Self::with_runner(LocalRunner, &CONFIG)
    }
}

impl Default for ContainerExec<LocalRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> ContainerExec<R> {
    /// Create a new handle using a custom process runner.
    pub fn with_runner(runner: R, config: &Config) -> Self {
        Self {
            runner,
            docker_bin: config.docker_bin.clone(),
            timeout: config.exec_timeout(),
            compose_file: config.compose_file.clone(),
            build_timeout: config.build_timeout(),
        }
    }

    /// Resolve a container name or image name to the name of a running container.
    pub async fn resolve(&self, target: &str) -> Result<String, ContainerError> {
        if target.is_empty() {
            return Err(ContainerError::EmptyTarget);
        }

        if let Some(name) = self.first_match(format!("ancestor={target}")).await? {
            log::trace!("[docker] {target} found by ancestor: {name}");
            return Ok(name);
        }
        if let Some(name) = self.first_match(format!("name=_{target}_")).await? {
            log::trace!("[docker] {target} found by name pattern: {name}");
            return Ok(name);
        }

        log::warn!("[docker] {target} not found by ancestor or name pattern, using it as is");
        Ok(target.to_string())
    }

    /// Execute a command in the container. The output is returned regardless of the exit code.
    pub async fn exec<S: AsRef<str>>(&self, target: &str, args: &[S]) -> Result<CmdOutput, ContainerError> {
        if args.is_empty() {
            return Err(ContainerError::EmptyCommand);
        }
        let container = self.resolve(target).await?;
        let invocation = Invocation::new(&self.docker_bin, self.timeout)
            .arg("exec")
            .arg(&container)
            .args(args.iter().map(|a| a.as_ref()));
        log::debug!("[docker] {}", invocation.cmd_str());
        Ok(self.runner.run(invocation).await?)
    }

    /// Get the logs of the container. Docker forwards the container's `STDERR` on its own
    /// `STDERR`, so both streams are concatenated.
    pub async fn logs(&self, target: &str, tail: Option<usize>) -> Result<String, ContainerError> {
        let container = self.resolve(target).await?;
        let mut invocation = Invocation::new(&self.docker_bin, self.timeout).arg("logs");
        if let Some(n) = tail {
            invocation = invocation.arg("--tail").arg(n.to_string());
        }
        let output = self.runner.run_checked(invocation.arg(container)).await?;
        let mut logs = output.stdout_lossy();
        logs.push_str(&output.stderr_lossy());
        Ok(logs)
    }

    /// Inspect the container, returning the first object of `docker inspect`.
    pub async fn inspect(&self, target: &str) -> Result<serde_json::Value, ContainerError> {
        let container = self.resolve(target).await?;
        let output = self
            .runner
            .run_checked(
                Invocation::new(&self.docker_bin, LOOKUP_TIMEOUT)
                    .arg("inspect")
                    .arg(&container),
            )
            .await?;
        let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        match value {
            serde_json::Value::Array(mut objects) if !objects.is_empty() => Ok(objects.remove(0)),
            _ => Err(ContainerError::NotFound(container)),
        }
    }

    /// Read a file from within the container, encoded as base64 (without any whitespace).
    pub async fn read_file_base64(&self, target: &str, path: &str) -> Result<String, ContainerError> {
        let output = self.exec(target, &["base64", path]).await?;
        let output = crate::process::check_output(&format!("base64 {path}"), output)?;
        Ok(output
            .stdout_utf8()?
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect())
    }

    /// List the repositories of all local images that belong to the device catalog, in the order
    /// docker reports them and without duplicates.
    pub async fn images(&self) -> Result<Vec<String>, ContainerError> {
        let output = self
            .runner
            .run_checked(
                Invocation::new(&self.docker_bin, LOOKUP_TIMEOUT)
                    .args(["images", "--format", "{{.Repository}}"]),
            )
            .await?;
        Ok(output
            .stdout_lossy()
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with(IMAGE_PREFIX))
            .unique()
            .map(String::from)
            .collect())
    }

    /// Build the image of a compose service with `docker compose -f <compose_file> build
    /// <service>`. Returns the lines printed by docker.
    pub async fn build_image(&self, service: &str) -> Result<Vec<String>, ContainerError> {
        if service.is_empty() || service.starts_with('-') || service.contains(char::is_whitespace) {
            return Err(ContainerError::InvalidService(service.to_string()));
        }
        let invocation = Invocation::new(&self.docker_bin, self.build_timeout)
            .args(["compose", "-f"])
            .arg(self.compose_file.to_string_lossy())
            .arg("build")
            .arg(service);
        log::info!("[docker] Building {service}");
        log::debug!("[docker] {}", invocation.cmd_str());
        let output = self.runner.run_checked(invocation).await?;
        Ok(output.stdout_lossy().lines().map(String::from).collect())
    }

    async fn first_match(&self, filter: String) -> Result<Option<String>, ContainerError> {
        let output = self
            .runner
            .run(
                Invocation::new(&self.docker_bin, LOOKUP_TIMEOUT)
                    .args(["ps", "--filter"])
                    .arg(filter)
                    .args(["--format", "{{.Names}}"]),
            )
            .await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(output
            .stdout_lossy()
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(String::from))
    }
}

lazy_static! {
    static ref ARG_SEPARATOR: Regex = Regex::new(r"[,\s]+").unwrap();
}

/// Normalize the arguments of an attack command: split every element on commas and whitespace,
/// strip surrounding quotes, drop empty arguments and remove duplicates (keeping the first
/// occurrence).
pub fn normalize_command_args<S: AsRef<str>>(command: &[S]) -> Vec<String> {
    command
        .iter()
        .flat_map(|el| {
            ARG_SEPARATOR
                .split(el.as_ref())
                .map(|a| {
                    a.trim_start_matches(['"', '\''])
                        .trim_end_matches(['"', '\''])
                        .trim()
                        .to_string()
                })
                .collect::<Vec<_>>()
        })
        .filter(|a| !a.is_empty())
        .unique()
        .collect()
}

/// Errors thrown while interacting with containers.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Error while running docker
    #[error("{0}")]
    Cmd(#[from] CmdError),
    /// Cannot parse the output of docker
    #[error("Cannot parse docker output: {0}")]
    Json(#[from] serde_json::Error),
    /// No container or image name given.
    #[error("No container given")]
    EmptyTarget,
    /// The command to execute is empty.
    #[error("Empty command")]
    EmptyCommand,
    /// Docker does not know the container.
    #[error("Container {0} not found")]
    NotFound(String),
    /// The name cannot be passed to `docker compose build`.
    #[error("Invalid service name: {0:?}")]
    InvalidService(String),
}
