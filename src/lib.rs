// LabForge: Kathara lab compiler written in Rust
// Copyright (C) 2023 Tibor Schneider <sctibor@ethz.ch>
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

//! # LabForge: compile network topologies into Kathara labs
//!
//! A topology is a list of machines (hosts, routers, industrial devices, attackers, ...) drawn in
//! an editor. This crate compiles such a topology into a lab for the network emulator
//! [Kathara](https://www.kathara.org/): one startup script per machine, the lab descriptor
//! `lab.conf`, and the uploaded programs and projects of industrial devices, all packaged into a
//! single zip archive. The crate [`kathara_lab`] then starts and stops the lab.
//!
//! ## Structure
//! The compiler is a pipeline, run by [`compile`]:
//! - [`normalize`] converts the different shapes of stored interfaces into the structured form,
//!   and makes sure every machine has exactly one management interface.
//! - [`addressing`] allocates the management addresses ([`addressing::ManagementAddressorBuilder`]).
//! - [`startup`] synthesizes the startup script of each machine, [`lab_conf`] builds the lab
//!   descriptor, and [`payload`] decodes the embedded files. These three run concurrently.
//! - [`archive`] writes the resulting [`Lab`] into a zip archive.
//!
//! In addition, [`project`] stores projects as JSON files, and [`broadcast`] fans out log
//! messages to all connected observers.

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod addressing;
pub mod archive;
pub mod broadcast;
pub mod lab;
pub mod lab_conf;
pub mod model;
pub mod normalize;
pub mod payload;
pub mod project;
pub mod startup;
#[cfg(test)]
mod test;

pub use lab::{compile, compile_to_archive, CompileError, CompilerOptions, Lab};
pub use model::{LabInfo, Machine, MachineInput};
