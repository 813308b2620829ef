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

//! Synthesis of the startup scripts.
//!
//! Every machine gets a bash script `<host>.startup` that Kathara runs when the container starts:
//!
//! 1. The header with the strict mode and a name server.
//! 2. Activation of the management interface (`eth0`) with the allocated address.
//! 3. Activation of all user interfaces that have an address.
//! 4. The trimmed user script.
//! 5. The block of the device kind (see [`StartupBlock`]). The block of the TLS termination proxy
//!    replaces the user script, all others are appended to it.

use std::fmt::Write;

use itertools::Itertools;

use crate::{
    model::{Machine, OperationalMode, StartupBlock},
    payload::{decode_content, plc_program_file_name, scada_project_file_name},
};

/// Port on which the industrial devices serve Modbus/TCP.
pub const MODBUS_PORT: u16 = 502;
/// Port of the SCADA web server.
pub const SCADA_PORT: u16 = 1881;

const OPENPLC_DIR: &str = "/OpenPLC_v3";
const FUXA_SERVER_DIR: &str = "/usr/src/app/FUXA/server";
/// Path of the project database of the SCADA server inside its container.
pub const FUXA_PROJECT_PATH: &str = "/usr/src/app/FUXA/server/_appdata/project.fuxap.db";
const FUXA_READY_LINE: &str = "WebServer is running";
const FUXA_LOG: &str = "/var/log/fuxa.log";

/// Generate the startup script of `machine`. `machines` is the full (addressed) list of machines,
/// used to resolve the devices monitored by a PLC.
pub fn generate_startup(machine: &Machine, machines: &[Machine]) -> Result<String, std::fmt::Error> {
    let mut s = String::new();

    writeln!(&mut s, "#!/bin/bash")?;
    writeln!(&mut s, "set -euo pipefail")?;
    writeln!(&mut s)?;
    writeln!(&mut s, "echo \"nameserver 8.8.8.8\" > /etc/resolv.conf")?;

    if let Some(addr) = machine.computed_eth0_ip {
        write_iface_up(&mut s, 0, &addr.to_string())?;
    }
    for iface in machine.user_interfaces() {
        let Some(ip) = iface.ip.as_deref().map(str::trim).filter(|ip| !ip.is_empty()) else {
            continue;
        };
        if ip.contains('/') {
            write_iface_up(&mut s, iface.eth.number, ip)?;
        } else {
            write_iface_up(&mut s, iface.eth.number, &format!("{ip}/24"))?;
        }
    }

    let block = machine.kind.profile().startup;
    if block == StartupBlock::TlsProxy {
        write_tls_proxy(&mut s, machine)?;
        return Ok(s);
    }

    let body = machine.user_script().trim();
    if !body.is_empty() {
        writeln!(&mut s, "{body}")?;
        writeln!(&mut s)?;
    }

    match block {
        StartupBlock::Engine => write_engine(&mut s, machine)?,
        StartupBlock::Plc => write_plc(&mut s, machine, machines)?,
        StartupBlock::Scada => write_scada(&mut s, machine)?,
        StartupBlock::None | StartupBlock::TlsProxy => {}
    }

    Ok(s)
}

fn write_iface_up(s: &mut String, number: u32, addr: &str) -> std::fmt::Result {
    writeln!(s, "ip addr add {addr} dev eth{number}")?;
    writeln!(s, "ip link set eth{number} up")
}

fn write_tls_proxy(s: &mut String, machine: &Machine) -> std::fmt::Result {
    let tls = &machine.tls;
    writeln!(s)?;
    writeln!(s, "cd /etc/stunnel")?;
    writeln!(
        s,
        "mkcert -cert-file server.crt -key-file server.key \"localhost\" \"127.0.0.1\" $(hostname -I)"
    )?;
    writeln!(s)?;
    writeln!(s, "tee /etc/stunnel/stunnel.conf << __EOF__")?;
    writeln!(s, "cert = /etc/stunnel/server.crt")?;
    writeln!(s, "key  = /etc/stunnel/server.key")?;
    writeln!(s, "CAfile = $(mkcert -CAROOT)/rootCA.pem")?;
    writeln!(s)?;
    writeln!(s, "verify = {}", tls.verify())?;
    writeln!(s, "sslVersion = TLSv1.2")?;
    writeln!(s, "options = NO_SSLv2")?;
    writeln!(s, "options = NO_SSLv3")?;
    writeln!(s, "options = NO_COMPRESSION")?;
    writeln!(s, "pid = /var/run/stunnel.pid")?;
    writeln!(s, "foreground = no")?;
    writeln!(s)?;
    writeln!(s, "[section]")?;
    writeln!(s, "accept = {}", tls.in_addr())?;
    writeln!(s, "connect = {}", tls.out_addr())?;
    writeln!(s, "__EOF__")?;
    writeln!(s)?;
    writeln!(s, "stunnel")
}

fn write_engine(s: &mut String, machine: &Machine) -> std::fmt::Result {
    let industrial = &machine.industrial;
    if industrial.mode != OperationalMode::Engine {
        log::debug!(
            "[startup] Engine {} runs in mode {}, not starting the simulation",
            machine.name,
            industrial.mode.name()
        );
        return Ok(());
    }
    let args = [
        ("-t", industrial.temperature_step),
        ("-s", industrial.interval_seconds),
        ("-ts", industrial.temperature_start),
    ]
    .into_iter()
    .filter_map(|(flag, value)| value.map(|v| format!(" {flag} {v}")))
    .join("");
    writeln!(
        s,
        "uv run /engine.py{args} > /var/log/engine.log 2>&1 & disown"
    )
}

fn write_plc(s: &mut String, machine: &Machine, machines: &[Machine]) -> std::fmt::Result {
    let db = format!("{OPENPLC_DIR}/webserver/openplc.db");

    for id in machine.industrial.monitored_machines.iter().unique() {
        let Some(device) = machines.iter().find(|m| &m.id == id) else {
            log::warn!(
                "[startup] PLC {} monitors unknown machine {id}, skipping it",
                machine.name
            );
            continue;
        };
        let Some(ip) = device.reachable_ip() else {
            log::warn!(
                "[startup] Monitored machine {} has no address, skipping it",
                device.name
            );
            continue;
        };
        writeln!(
            s,
            "sqlite3 {db} \"INSERT INTO Slave_dev (dev_name, dev_type, slave_id, ip_address, ip_port, \
             di_start, di_size, coil_start, coil_size, ir_start, ir_size, hr_read_start, hr_read_size, \
             hr_write_start, hr_write_size) VALUES ('{}', 'TCP', 0, '{}', {MODBUS_PORT}, \
             0, 8, 0, 8, 0, 8, 0, 8, 0, 8);\"",
            device.host_name(),
            sql_escape(&ip),
        )?;
    }

    if decode_content(machine.industrial.plc_program_content.as_deref()).is_some() {
        let file = plc_program_file_name(machine);
        writeln!(s, "cp /shared/{file} {OPENPLC_DIR}/webserver/st_files/{file}")?;
        writeln!(
            s,
            "sqlite3 {db} \"INSERT INTO Programs (Name, Description, File, Date_upload) \
             VALUES ('{file}', 'Uploaded with the lab', '{file}', strftime('%s', 'now'));\""
        )?;
        writeln!(s, "echo \"{file}\" > {OPENPLC_DIR}/webserver/active_program")?;
    }

    writeln!(
        s,
        "cd {OPENPLC_DIR} && ./start_openplc.sh > /var/log/openplc.log 2>&1 &"
    )
}

fn write_scada(s: &mut String, machine: &Machine) -> std::fmt::Result {
    let project = scada_project_file_name(machine);
    writeln!(s, "cd {FUXA_SERVER_DIR}")?;
    writeln!(s, "npm start > {FUXA_LOG} 2>&1 &")?;
    writeln!(
        s,
        "timeout 300 bash -c 'until grep -q \"{FUXA_READY_LINE}\" {FUXA_LOG}; do sleep 1; done' || true"
    )?;
    writeln!(s, "fuser -k {SCADA_PORT}/tcp || true")?;
    writeln!(s, "if [ -f /shared/{project} ]; then")?;
    writeln!(s, "    cp /shared/{project} {FUXA_PROJECT_PATH}")?;
    writeln!(s, "fi")?;
    writeln!(s, "npm start >> {FUXA_LOG} 2>&1 &")
}

fn sql_escape(s: &str) -> String {
    s.replace('\'', "''").replace('"', "")
}
