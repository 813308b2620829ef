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

//! The compiler: from a snapshot of machines to the files of a Kathara lab.
//!
//! [`compile`] first normalizes the machines and allocates their management addresses. Then, the
//! startup scripts, the `lab.conf` and the staged payloads are generated concurrently (they only
//! read the addressed machines), and collected into a [`Lab`].

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use ipnet::Ipv4Net;
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    addressing::{AddressError, ManagementAddressorBuilder, COLLECTOR, COLLECTOR_DB},
    archive::{write_archive, ArchiveError},
    lab_conf::{collector_db_startup, collector_startup, generate_lab_conf, COLLECTOR_SERVICE},
    model::{LabInfo, Machine, MachineInput},
    normalize::normalize_machines,
    payload::{stage_payloads, StagedFile},
    startup::generate_startup,
};

/// File name of the lab descriptor.
pub const LAB_CONF: &str = "lab.conf";
/// Suffix of startup scripts.
pub const STARTUP_SUFFIX: &str = ".startup";

/// Options of the compiler.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// The subnet from which management addresses are allocated. The default is `10.0.0.0/24`.
    pub management_subnet: Ipv4Net,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            management_subnet: ManagementAddressorBuilder::default().subnet,
        }
    }
}

impl CompilerOptions {
    /// Create the default options.
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the management subnet.
    pub fn management_subnet(&mut self, x: Ipv4Net) -> &mut Self {
        self.management_subnet = x;
        self
    }

    fn addressor(&self) -> ManagementAddressorBuilder {
        let mut builder = ManagementAddressorBuilder::new();
        builder.subnet(self.management_subnet);
        builder
    }
}

impl From<&kathara_lab::config::Config> for CompilerOptions {
    fn from(config: &kathara_lab::config::Config) -> Self {
        Self {
            management_subnet: config.management_subnet,
        }
    }
}

/// The generated lab: a map from relative paths to file content, and the machine folders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lab {
    /// Content of every file, indexed by its path relative to the lab root.
    pub files: BTreeMap<String, Vec<u8>>,
    /// Host names of all machines, in order.
    pub folders: Vec<String>,
    /// The normalized machines, annotated with their management address.
    pub machines: Vec<Machine>,
}

impl Lab {
    /// Get the content of a file as a string.
    pub fn file_str(&self, path: &str) -> Option<&str> {
        self.files
            .get(path)
            .and_then(|c| std::str::from_utf8(c).ok())
    }

    /// Whether the file is a startup script.
    pub fn is_startup_script(path: &str) -> bool {
        path.ends_with(STARTUP_SUFFIX) && !path.contains('/')
    }

    /// Write the lab into a zip archive at `path`. See [`write_archive`].
    pub fn write_archive(&self, path: impl AsRef<Path>) -> Result<(), ArchiveError> {
        write_archive(self, path.as_ref())
    }

    fn insert(&mut self, path: String, content: impl Into<Vec<u8>>) {
        if self.files.insert(path.clone(), content.into()).is_some() {
            log::warn!("[compile] {path} was generated twice, the last one wins");
        }
    }
}

/// Compile a snapshot of machines into a lab. The snapshot itself is not modified.
pub fn compile(
    machines: &[MachineInput],
    info: &LabInfo,
    options: &CompilerOptions,
) -> Result<Lab, CompileError> {
    log::debug!("[compile] Compiling {} machines", machines.len());
    let addressor = options.addressor();
    let machines = addressor.assign(normalize_machines(machines.to_vec()))?;

    let mut seen = HashSet::new();
    for m in machines.iter() {
        if !seen.insert(m.host_name()) {
            log::warn!("[compile] Host name {} is used by multiple machines", m.host_name());
        }
    }

    let ((startups, lab_conf), payloads) = rayon::join(
        || {
            rayon::join(
                || generate_startups(&machines),
                || generate_lab_conf(info, &machines),
            )
        },
        || stage_payloads(&machines),
    );

    let mut lab = Lab {
        folders: machines.iter().map(|m| m.host_name()).collect(),
        ..Default::default()
    };
    let reserved = [
        (COLLECTOR, collector_startup(addressor.collector_addr()?)?, Some(COLLECTOR_SERVICE)),
        (COLLECTOR_DB, collector_db_startup(addressor.collector_db_addr()?)?, None),
    ];
    // A user machine with a reserved name already holds the reserved address. It keeps its own
    // script, followed by the service of the reserved machine.
    for (name, mut script) in startups? {
        if let Some((_, _, service)) = reserved.iter().find(|(r, _, _)| *r == name) {
            log::warn!("[compile] Machine {name} uses a reserved name and replaces the service");
            if let Some(service) = service {
                script.push_str(service);
                script.push('\n');
            }
        }
        lab.insert(format!("{name}{STARTUP_SUFFIX}"), script);
    }
    for (name, startup, _) in reserved {
        let path = format!("{name}{STARTUP_SUFFIX}");
        if !lab.files.contains_key(&path) {
            lab.insert(path, startup);
        }
    }
    lab.insert(LAB_CONF.to_string(), lab_conf?);
    for StagedFile { path, content } in payloads {
        lab.insert(path, content);
    }
    lab.machines = machines;

    log::debug!("[compile] Generated {} files", lab.files.len());
    Ok(lab)
}

/// Compile the lab, and write it into an archive at `path`.
pub fn compile_to_archive(
    machines: &[MachineInput],
    info: &LabInfo,
    options: &CompilerOptions,
    path: impl AsRef<Path>,
) -> Result<Lab, CompileError> {
    let lab = compile(machines, info, options)?;
    lab.write_archive(path)?;
    Ok(lab)
}

fn generate_startups(machines: &[Machine]) -> Result<Vec<(String, String)>, std::fmt::Error> {
    machines
        .par_iter()
        .map(|m| Ok((m.host_name(), generate_startup(m, machines)?)))
        .collect()
}

/// Errors thrown while compiling a lab.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Cannot allocate the management addresses.
    #[error("{0}")]
    Address(#[from] AddressError),
    /// Formatting error
    #[error("{0}")]
    Fmt(#[from] std::fmt::Error),
    /// Cannot write the archive.
    #[error("{0}")]
    Archive(#[from] ArchiveError),
}
