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

//! Builder of the lab descriptor `lab.conf`, and of the startup scripts of the reserved log
//! collector services.

use std::{borrow::Cow, fmt::Write};

use ipnet::Ipv4Net;

use crate::{
    addressing::{COLLECTOR, COLLECTOR_DB},
    model::{EnvBlock, LabInfo, Machine, OperationalMode},
};

/// Collision domain of the management network.
pub const MANAGEMENT_DOMAIN: &str = "_collector";
/// Endpoint used by fans and temperature sensors if their engine cannot be resolved.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/";
/// Port of the REST API of the simulation engine.
pub const ENGINE_PORT: u16 = 8000;

/// Default period of the sine wave, in seconds.
pub const DEFAULT_SINE_PERIOD: f64 = 60.0;
/// Default amplitude of the sine wave.
pub const DEFAULT_SINE_AMPLITUDE: f64 = 10.0;
/// Default offset of the sine wave.
pub const DEFAULT_SINE_OFFSET: f64 = 30.0;

/// Generate the lab metadata lines. Only non-empty values are written, and the block is
/// terminated by an empty line if anything was written.
pub fn generate_lab_info(info: &LabInfo) -> Result<String, std::fmt::Error> {
    let mut s = String::new();
    for (key, value) in [
        ("LAB_DESCRIPTION", &info.description),
        ("LAB_VERSION", &info.version),
        ("LAB_AUTHOR", &info.author),
        ("LAB_EMAIL", &info.email),
        ("LAB_WEB", &info.web),
    ] {
        if !value.is_empty() {
            writeln!(&mut s, "{key}=\"{}\"", escape(value))?;
        }
    }
    if !s.is_empty() {
        writeln!(&mut s)?;
    }
    Ok(s)
}

/// Generate the entire `lab.conf`: the metadata, the reserved collector services and one block
/// per machine, in order.
pub fn generate_lab_conf(info: &LabInfo, machines: &[Machine]) -> Result<String, std::fmt::Error> {
    let mut s = generate_lab_info(info)?;

    writeln!(&mut s, "{COLLECTOR}[bridged]=true")?;
    writeln!(&mut s, "{COLLECTOR}[port]=\"3100:3100/tcp\"")?;
    writeln!(&mut s, "{COLLECTOR}[0]=\"{MANAGEMENT_DOMAIN}\"")?;
    writeln!(&mut s, "{COLLECTOR}[image]=\"icr/collector\"")?;
    writeln!(&mut s, "{COLLECTOR_DB}[0]=\"{MANAGEMENT_DOMAIN}\"")?;
    writeln!(&mut s, "{COLLECTOR_DB}[image]=\"icr/collector-db\"")?;

    for machine in machines {
        write_machine(&mut s, machine, machines)?;
    }

    Ok(s)
}

fn write_machine(s: &mut String, machine: &Machine, machines: &[Machine]) -> std::fmt::Result {
    let name = machine.host_name();
    let profile = machine.kind.profile();

    for iface in machine.user_interfaces() {
        if !iface.eth.domain.is_empty() {
            let domain = domain_label(&iface.eth.domain);
            writeln!(s, "{name}[{}]={domain}", iface.eth.number)?;
        }
    }

    // The collector block already placed the reserved services on the management network.
    if is_reserved(&name) {
        log::warn!("[lab.conf] Machine {name} uses a reserved name, keeping the reserved image");
    } else {
        writeln!(s, "{name}[0]={MANAGEMENT_DOMAIN}")?;
        writeln!(s, "{name}[bridged]=true")?;
        if let Some(image) = profile.image.select(machine) {
            writeln!(s, "{name}[image]={image}")?;
        }
    }

    match profile.env {
        EnvBlock::None => {}
        EnvBlock::Fan => {
            write_env(s, &name, "ENDPOINT", &engine_endpoint(machine, machines))?;
            if let Some(capacity) = machine
                .industrial
                .capacity
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
            {
                write_env(s, &name, "CAPACITY", capacity)?;
            }
        }
        EnvBlock::TemperatureSensor => {
            write_env(s, &name, "ENDPOINT", &engine_endpoint(machine, machines))?;
            let industrial = &machine.industrial;
            if industrial.mode == OperationalMode::SineWave {
                write_env(s, &name, "SINE_WAVE", "true")?;
                for (key, value, default) in [
                    ("SINE_PERIOD", industrial.sine_period, DEFAULT_SINE_PERIOD),
                    ("SINE_AMPLITUDE", industrial.sine_amplitude, DEFAULT_SINE_AMPLITUDE),
                    ("SINE_OFFSET", industrial.sine_offset, DEFAULT_SINE_OFFSET),
                ] {
                    write_env(s, &name, key, &value.unwrap_or(default).to_string())?;
                }
            }
        }
    }

    Ok(())
}

fn write_env(s: &mut String, name: &str, key: &str, value: &str) -> std::fmt::Result {
    writeln!(s, "{name}[env]=\"{key}={}\"", escape(value))
}

/// The REST endpoint of the engine selected by a fan or temperature sensor. Falls back to
/// [`DEFAULT_ENDPOINT`] if no engine is selected, or if it cannot be found.
pub fn engine_endpoint(machine: &Machine, machines: &[Machine]) -> String {
    let Some(engine_id) = machine
        .industrial
        .selected_engine_id
        .as_deref()
        .filter(|id| !id.is_empty())
    else {
        return DEFAULT_ENDPOINT.to_string();
    };
    match machines
        .iter()
        .find(|m| m.id == engine_id)
        .and_then(|engine| engine.reachable_ip())
    {
        Some(ip) => format!("http://{ip}:{ENGINE_PORT}/"),
        None => {
            log::warn!(
                "[lab.conf] Engine {engine_id} of {} not found, using {DEFAULT_ENDPOINT}",
                machine.name
            );
            DEFAULT_ENDPOINT.to_string()
        }
    }
}

/// Whether the host name belongs to one of the reserved collector services.
pub fn is_reserved(name: &str) -> bool {
    name == COLLECTOR || name == COLLECTOR_DB
}

/// Command starting the log ingestion daemon of the collector.
pub const COLLECTOR_SERVICE: &str = "loki -config.file=/etc/loki/config.yml &";

/// Startup script of the log collector: bring up the management interface and start Loki.
pub fn collector_startup(addr: Ipv4Net) -> Result<String, std::fmt::Error> {
    let mut s = String::new();
    writeln!(&mut s, "#!/bin/sh")?;
    writeln!(&mut s, "echo \"nameserver 8.8.8.8\" > /etc/resolv.conf")?;
    writeln!(&mut s, "{COLLECTOR_SERVICE}")?;
    writeln!(&mut s, "ip addr add {addr} dev eth0")?;
    writeln!(&mut s, "ip link set eth0 up")?;
    Ok(s)
}

/// Startup script of the collector database: bring up the management interface. The image
/// starts the database on its own.
pub fn collector_db_startup(addr: Ipv4Net) -> Result<String, std::fmt::Error> {
    let mut s = String::new();
    writeln!(&mut s, "#!/bin/sh")?;
    writeln!(&mut s, "echo \"nameserver 8.8.8.8\" > /etc/resolv.conf")?;
    writeln!(&mut s, "ip addr add {addr} dev eth0")?;
    writeln!(&mut s, "ip link set eth0 up")?;
    Ok(s)
}

/// A collision domain as it may appear on the right-hand side of a `lab.conf` line. Characters
/// other than ASCII letters, digits, `_`, `-` and `.` are replaced by `_`.
pub fn domain_label(domain: &str) -> Cow<'_, str> {
    let valid = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
    if domain.chars().all(valid) {
        return Cow::Borrowed(domain);
    }
    let label: String = domain
        .chars()
        .map(|c| if valid(c) { c } else { '_' })
        .collect();
    log::warn!("[lab.conf] Collision domain {domain:?} contains invalid characters, using {label}");
    Cow::Owned(label)
}

/// Escape a value for a double-quoted `lab.conf` string.
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', " ")
}
