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

//! This library drives [Kathara](https://www.kathara.org/) labs that were compiled into an
//! archive, and interacts with the containers of a running lab.
//!
//! # Configuration
//!
//! The library reads its configuration from the TOML file named by the environment variable
//! `KATHARA_LAB_CONFIG`. All keys are optional; see [`config`] for the available keys and their
//! defaults. The most important one is `labs_dir`, the directory in which every lab gets its own
//! working directory.
//!
//! # Locking Mechanism
//!
//! Starting and stopping a lab may take minutes, and two lifecycles of the same lab must never
//! interleave. Thus, the main structure [`KatharaLab`] contains a type parameter `S` which is
//! either [`Inactive`] or [`Active`]. An inactive lab does not own any resources. Turning it into
//! an active lab with [`KatharaLab::start`] or [`KatharaLab::resume`] creates the lock file
//! `<labs_dir>/<name>.lock`, which contains the user that has created it. When the lock already
//! exists, the lab cannot be turned from `Inactive` to `Active`. Dropping the active lab removes
//! the lock again.
//!
//! # Processes
//!
//! All external programs (`kathara` and `docker`) are invoked through the trait
//! [`process::CommandRunner`]. Every invocation carries a timeout after which the child process is
//! killed, and the operation is reported as failed.

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod config;
pub mod container;
pub mod lifecycle;
pub mod process;

#[cfg(test)]
mod test;

pub use container::{normalize_command_args, ContainerError, ContainerExec, IMAGE_PREFIX};
pub use lifecycle::{cleanup_stale, is_active, Active, Inactive, KatharaLab, LabError, LabLock};
pub use process::{CmdError, CmdOutput, CommandRunner, Invocation, LocalRunner};
