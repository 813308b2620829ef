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

use serde_json::Value;

use crate::{
    addressing::ManagementAddressorBuilder,
    model::{Machine, MachineInput},
    normalize::normalize_machines,
};

mod compile;
mod lab_conf;
mod payload;
mod startup;

/// Parse a list of machines, as it would be stored in a project.
pub(crate) fn inputs(machines: Value) -> Vec<MachineInput> {
    serde_json::from_value(machines).unwrap()
}

/// Parse, normalize and address a list of machines in the default subnet.
pub(crate) fn addressed(machines: Value) -> Vec<Machine> {
    ManagementAddressorBuilder::new()
        .assign(normalize_machines(inputs(machines)))
        .unwrap()
}

/// The management addresses of all machines, as strings.
pub(crate) fn addrs(machines: &[Machine]) -> Vec<String> {
    machines
        .iter()
        .map(|m| m.computed_eth0_ip.unwrap().to_string())
        .collect()
}
