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

//! Normalization of machines read from a project.
//!
//! This is the only place that knows about the different shapes in which interfaces were stored.
//! After [`normalize_machines`], every machine carries [`Interfaces`] with exactly one management
//! interface (`eth0`) at the front.

use crate::model::{
    DeviceKind, Eth, Interface, InterfaceInput, Interfaces, InterfacesInput, LegacyInterface,
    Machine, MachineInput,
};

/// Normalize all machines, keeping their order.
pub fn normalize_machines(machines: Vec<MachineInput>) -> Vec<Machine> {
    machines.into_iter().map(normalize_machine).collect()
}

/// Normalize a single machine. Attackers are renamed to `attacker`; no other field except the
/// interfaces is changed.
pub fn normalize_machine(machine: MachineInput) -> Machine {
    let interfaces = normalize_interfaces(machine.interfaces);
    let name = if machine.kind == DeviceKind::Attacker {
        String::from("attacker")
    } else {
        machine.name
    };
    Machine {
        id: machine.id,
        name,
        kind: machine.kind,
        interfaces,
        computed_eth0_ip: machine.computed_eth0_ip,
        attack_loaded: machine.attack_loaded,
        attack_image: machine.attack_image,
        attack_command: machine.attack_command,
        attack_command_args: machine.attack_command_args,
        industrial: machine.industrial,
        tls: machine.tls,
        scripts: machine.scripts,
        routing_software: machine.routing_software,
    }
}

/// Convert any shape of interfaces into the structured form.
///
/// - Structured interfaces keep their numbers. Interfaces without a number are numbered by their
///   position, starting at 1.
/// - Legacy entries are numbered by their position, starting at 1.
/// - Unrecognized values yield no interfaces at all.
///
/// Finally, the management interface is moved to the front, or inserted if absent. Duplicate
/// management interfaces are dropped.
pub fn normalize_interfaces(input: InterfacesInput) -> Interfaces {
    let (ifaces, free) = match input {
        InterfacesInput::Structured(s) => (
            s.ifaces
                .into_iter()
                .enumerate()
                .map(|(idx, i)| structured_iface(idx, i))
                .collect(),
            s.free,
        ),
        InterfacesInput::Legacy(list) => (
            list.into_iter()
                .enumerate()
                .map(|(idx, i)| legacy_iface(idx, i))
                .collect(),
            None,
        ),
        InterfacesInput::Unrecognized(v) => {
            if !v.is_null() {
                log::warn!("[normalize] Ignoring unrecognized interfaces: {v}");
            }
            (Vec::new(), None)
        }
    };

    Interfaces {
        ifaces: with_single_management(ifaces),
        free,
    }
}

fn structured_iface(idx: usize, iface: InterfaceInput) -> Interface {
    Interface {
        eth: Eth {
            number: iface.eth.number.unwrap_or(idx as u32 + 1),
            domain: iface.eth.domain,
        },
        ip: non_empty(iface.ip),
    }
}

fn legacy_iface(idx: usize, iface: LegacyInterface) -> Interface {
    let number = idx as u32 + 1;
    let (domain, ip) = match iface {
        LegacyInterface::Label(domain) => (domain, None),
        LegacyInterface::Object { domain, ip } => (domain, ip),
        LegacyInterface::Unknown(v) => {
            log::warn!("[normalize] Legacy interface {v} is not understood, leaving eth{number} unconnected");
            (String::new(), None)
        }
    };
    Interface {
        eth: Eth { number, domain },
        ip: non_empty(ip),
    }
}

fn non_empty(ip: Option<String>) -> Option<String> {
    ip.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn with_single_management(ifaces: Vec<Interface>) -> Vec<Interface> {
    let (mut mgmt, user): (Vec<_>, Vec<_>) = ifaces.into_iter().partition(|i| i.eth.number == 0);
    if mgmt.len() > 1 {
        log::warn!("[normalize] Dropping {} duplicate eth0 interfaces", mgmt.len() - 1);
    }
    mgmt.truncate(1);
    if mgmt.is_empty() {
        mgmt.push(Interface::default());
    }
    mgmt.into_iter().chain(user).collect()
}
