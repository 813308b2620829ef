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

//! Driving the lifecycle of a Kathara lab.
//!
//! A lab archive is extracted into `<labs_dir>/<name>`, and started with `kathara lstart`. The
//! structure [`KatharaLab`] carries a type parameter `S` that is either [`Inactive`] or
//! [`Active`]. Only an active lab can be stopped, and stopping it turns it back into an inactive
//! one.
//!
//! To make sure that at most one lifecycle operation of the same lab is in flight at any time,
//! the `KatharaLab` creates a lock file `<labs_dir>/<name>.lock` while starting, and keeps it
//! while it is active. The lock file contains the user that has created it. Dropping the
//! `KatharaLab<_, Active>` releases the lock.
//!
//! A running lab outlives the process that started it. Starting a lab therefore also writes the
//! marker `<labs_dir>/<name>.active`, which is only removed by [`KatharaLab::stop`]. Labs with a
//! marker are never considered stale by [`cleanup_stale`], and can be taken over by another
//! process with [`KatharaLab::resume`].

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

use crate::{
    config::{Config, CONFIG},
    process::{CmdError, CommandRunner, Invocation, LocalRunner},
};

/// File extension of the lock files.
const LOCK_EXTENSION: &str = "lock";
/// File extension of the markers of running labs.
const ACTIVE_EXTENSION: &str = "active";

/// The lab is not running. This state does not own any resources.
#[derive(Debug)]
pub struct Inactive;

/// The lab was started by the emulation backend. The state owns the working directory and the
/// lock of the lab.
#[derive(Debug)]
pub struct Active {
    lab_dir: PathBuf,
    _lock: LabLock,
}

/// Handle to a single Kathara lab, identified by its name. The type parameter `R` is the
/// process runner used to invoke `kathara`, and `S` is either [`Inactive`] or [`Active`].
///
/// Calling [`KatharaLab::new`] creates an inactive instance that does not touch the file
/// system. [`KatharaLab::start`] extracts an archive and starts the lab, returning a
/// `KatharaLab<R, Active>`. Call [`KatharaLab::stop`] to tear it down again.
#[derive(Debug)]
pub struct KatharaLab<R = LocalRunner, S = Inactive> {
    name: String,
    labs_dir: PathBuf,
    kathara_bin: String,
    start_timeout: Duration,
    stop_timeout: Duration,
    runner: R,
    state: S,
}

impl KatharaLab<LocalRunner, Inactive> {
    /// Create a new inactive lab with the global configuration, spawning processes locally.
    pub fn new(name: impl Into<String>) -> Result<Self, LabError> {
        Self::with_runner(name, LocalRunner, &CONFIG)
    }
}

impl<R: CommandRunner> KatharaLab<R, Inactive> {
    /// Create a new inactive lab using a custom process runner and configuration.
    pub fn with_runner(name: impl Into<String>, runner: R, config: &Config) -> Result<Self, LabError> {
        let name = name.into();
        check_lab_name(&name)?;
        Ok(Self {
            name,
            labs_dir: config.labs_dir.clone(),
            kathara_bin: config.kathara_bin.clone(),
            start_timeout: config.start_timeout(),
            stop_timeout: config.stop_timeout(),
            runner,
            state: Inactive,
        })
    }

    /// Extract the archive into the working directory of this lab, and start it with `kathara
    /// lstart --noterminals`. Any content left in the working directory from a previous run is
    /// torn down and removed first.
    ///
    /// The lab is marked as active before `lstart` is invoked. If extracting or starting fails,
    /// the working directory is purged again, the marker is removed, and the lock is released.
    pub async fn start(self, archive: impl AsRef<Path>) -> Result<KatharaLab<R, Active>, LabError> {
        let archive = archive.as_ref().to_path_buf();
        let lock = LabLock::acquire(&self.labs_dir, &self.name)?;
        let lab_dir = self.lab_dir();

        if lab_dir.exists() {
            log::debug!("[{}] Tearing down the previous lab", self.name);
            self.teardown(&lab_dir).await;
        }

        log::debug!(
            "[{}] Extracting {} into {}",
            self.name,
            archive.display(),
            lab_dir.display()
        );
        let target = lab_dir.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || extract_archive(&archive, &target)).await? {
            purge_dir(&lab_dir)?;
            return Err(e);
        }

        log::info!("[{}] Starting the lab", self.name);
        let marker = active_path(&self.labs_dir, &self.name);
        std::fs::write(&marker, owner())?;
        let lstart = Invocation::new(&self.kathara_bin, self.start_timeout)
            .args(["lstart", "--noterminals", "-d"])
            .arg(lab_dir.to_string_lossy())
            .cwd(&self.labs_dir);
        if let Err(e) = self.runner.run_checked(lstart).await {
            log::warn!("[{}] lstart failed, purging {}", self.name, lab_dir.display());
            purge_dir(&lab_dir)?;
            remove_file(&marker)?;
            return Err(e.into());
        }
        log::info!("[{}] Lab started", self.name);

        Ok(self.into_state(Active {
            lab_dir,
            _lock: lock,
        }))
    }

    /// Take over a lab that was started before, for instance by a different process. The working
    /// directory must exist, and no other lifecycle operation may be in flight. A lab without
    /// marker (e.g., extracted by hand) is marked as active.
    pub fn resume(self) -> Result<KatharaLab<R, Active>, LabError> {
        let lab_dir = self.lab_dir();
        if !lab_dir.is_dir() {
            return Err(LabError::NotRunning(self.name));
        }
        let lock = LabLock::acquire(&self.labs_dir, &self.name)?;
        let marker = active_path(&self.labs_dir, &self.name);
        match std::fs::read_to_string(&marker) {
            Ok(starter) => log::debug!("[{}] Taking over the lab started by {starter}", self.name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::write(&marker, owner())?
            }
            Err(e) => return Err(e.into()),
        }
        log::debug!("[{}] Resumed lab at {}", self.name, lab_dir.display());
        Ok(self.into_state(Active {
            lab_dir,
            _lock: lock,
        }))
    }
}

impl<R: CommandRunner> KatharaLab<R, Active> {
    /// Stop the lab with `kathara lclean`, and recursively purge the working directory. This
    /// removes the marker of the running lab, and releases the lock.
    ///
    /// If `lclean` fails, the working directory and the marker are kept, and the error is
    /// returned.
    pub async fn stop(self) -> Result<KatharaLab<R, Inactive>, LabError> {
        log::info!("[{}] Stopping the lab", self.name);
        let lclean = Invocation::new(&self.kathara_bin, self.stop_timeout)
            .args(["lclean", "-d"])
            .arg(self.state.lab_dir.to_string_lossy())
            .cwd(&self.labs_dir);
        self.runner.run_checked(lclean).await?;

        purge_dir(&self.state.lab_dir)?;
        remove_file(&active_path(&self.labs_dir, &self.name))?;
        log::info!("[{}] Lab stopped and cleaned", self.name);

        Ok(self.into_state(Inactive))
    }

    /// Path to the working directory into which the lab was extracted.
    pub fn working_dir(&self) -> &Path {
        &self.state.lab_dir
    }
}

impl<R: CommandRunner, S> KatharaLab<R, S> {
    /// Name of the lab.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path to the (future) working directory of the lab.
    pub fn lab_dir(&self) -> PathBuf {
        self.labs_dir.join(&self.name)
    }

    /// Path to the archive of this lab, as it is placed by the compiler.
    pub fn archive_path(&self) -> PathBuf {
        self.labs_dir.join(format!("{}.zip", self.name))
    }

    fn into_state<T>(self, state: T) -> KatharaLab<R, T> {
        KatharaLab {
            name: self.name,
            labs_dir: self.labs_dir,
            kathara_bin: self.kathara_bin,
            start_timeout: self.start_timeout,
            stop_timeout: self.stop_timeout,
            runner: self.runner,
            state,
        }
    }

    /// Run `lclean` on the directory (ignoring its result) and remove it.
    async fn teardown(&self, lab_dir: &Path) {
        let lclean = Invocation::new(&self.kathara_bin, self.stop_timeout)
            .args(["lclean", "-d"])
            .arg(lab_dir.to_string_lossy())
            .cwd(&self.labs_dir);
        if let Err(e) = self.runner.run_checked(lclean).await {
            log::warn!("[{}] lclean of {} failed: {e}", self.name, lab_dir.display());
        }
        if let Err(e) = purge_dir(lab_dir) {
            log::warn!("[{}] Cannot remove {}: {e}", self.name, lab_dir.display());
        }
    }
}

/// Clean every lab that was left behind by a previous process. Every directory in the labs
/// directory that is neither locked nor marked as running is torn down with `kathara lclean` and
/// removed.
/// Failures to tear down a single lab are logged and skipped. Returns the names of the removed
/// labs.
pub async fn cleanup_stale<R: CommandRunner>(runner: &R, config: &Config) -> Result<Vec<String>, LabError> {
    let labs_dir = &config.labs_dir;
    if !labs_dir.is_dir() {
        log::trace!("[cleanup] {} does not exist, nothing to do", labs_dir.display());
        return Ok(Vec::new());
    }

    let mut stale = Vec::new();
    for entry in std::fs::read_dir(labs_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if lock_path(labs_dir, &name).exists() {
            log::debug!("[cleanup] Lab {name} is locked, skipping it");
            continue;
        }
        if active_path(labs_dir, &name).exists() {
            log::debug!("[cleanup] Lab {name} is running, skipping it");
            continue;
        }
        stale.push((name, entry.path()));
    }
    stale.sort();

    let mut cleaned = Vec::new();
    for (name, path) in stale {
        log::info!("[cleanup] Removing stale lab {name}");
        let lclean = Invocation::new(&config.kathara_bin, config.stop_timeout())
            .args(["lclean", "-d"])
            .arg(path.to_string_lossy())
            .cwd(labs_dir);
        if let Err(e) = runner.run_checked(lclean).await {
            log::warn!("[cleanup] lclean of {name} failed: {e}");
        }
        match purge_dir(&path) {
            Ok(()) => cleaned.push(name),
            Err(e) => log::warn!("[cleanup] Cannot remove {}: {e}", path.display()),
        }
    }

    Ok(cleaned)
}

/// Lock file of a single lab. The file is removed when the lock is dropped.
#[derive(Debug)]
pub struct LabLock {
    path: PathBuf,
}

impl LabLock {
    /// Create the lock file for the lab `name`. If the file already exists, return
    /// [`LabError::CannotObtainLock`] with the current owner.
    pub fn acquire(labs_dir: &Path, name: &str) -> Result<Self, LabError> {
        std::fs::create_dir_all(labs_dir)?;
        let path = lock_path(labs_dir, name);

        log::trace!("[{name}] Obtaining the lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(owner().as_bytes())?;
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let owner = std::fs::read_to_string(&path).unwrap_or_default();
                log::error!("[{name}] Cannot obtain the lock! {owner} owns the lab.");
                Err(LabError::CannotObtainLock(name.to_string(), owner))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LabLock {
    fn drop(&mut self) {
        log::debug!("Releasing lock {} (drop)", self.path.display());
        let _ = std::fs::remove_file(&self.path);
    }
}

fn lock_path(labs_dir: &Path, name: &str) -> PathBuf {
    labs_dir.join(format!("{name}.{LOCK_EXTENSION}"))
}

fn active_path(labs_dir: &Path, name: &str) -> PathBuf {
    labs_dir.join(format!("{name}.{ACTIVE_EXTENSION}"))
}

/// Whether the lab `name` is marked as running.
pub fn is_active(config: &Config, name: &str) -> bool {
    active_path(&config.labs_dir, name).exists()
}

/// The user and process, written into lock files and markers.
fn owner() -> String {
    format!(
        "{} (pid {})",
        std::env::var("USER").unwrap_or_else(|_| String::from("unknown")),
        std::process::id()
    )
}

/// Lab names become directory names, so they must be a single, normal path component.
fn check_lab_name(name: &str) -> Result<(), LabError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c: char| c == '/' || c == '\\' || c == '\0')
    {
        Err(LabError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

fn purge_dir(path: &Path) -> Result<(), std::io::Error> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn remove_file(path: &Path) -> Result<(), std::io::Error> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn extract_archive(archive: &Path, target: &Path) -> Result<(), LabError> {
    let file = std::fs::File::open(archive).map_err(|e| LabError::Archive {
        path: archive.to_path_buf(),
        source: e.into(),
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(|source| LabError::Archive {
        path: archive.to_path_buf(),
        source,
    })?;
    std::fs::create_dir_all(target)?;
    zip.extract(target).map_err(|source| LabError::Archive {
        path: archive.to_path_buf(),
        source,
    })
}

/// Error type thrown while managing a Kathara lab.
#[derive(Debug, Error)]
pub enum LabError {
    /// I/O Error
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Error while invoking the emulation backend.
    #[error("Backend error: {0}")]
    Cmd(#[from] CmdError),
    /// The archive cannot be read or extracted.
    #[error("Cannot extract {}: {source}", .path.display())]
    Archive {
        /// Path to the archive
        path: PathBuf,
        /// The underlying error
        source: zip::result::ZipError,
    },
    /// Cannot obtain the lock.
    #[error("Cannot obtain the lock of lab {0}! {1} owns the lock.")]
    CannotObtainLock(String, String),
    /// The working directory of the lab does not exist.
    #[error("Lab {0} is not running")]
    NotRunning(String),
    /// The lab name cannot be used as a directory name.
    #[error("Invalid lab name: {0:?}")]
    InvalidName(String),
    /// Cannot join a blocking job
    #[error("Cannot join thread: {0}")]
    Join(#[from] tokio::task::JoinError),
}
