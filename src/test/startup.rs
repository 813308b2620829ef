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

use pretty_assertions::assert_eq;
use serde_json::json;
use test_log::test;

use super::addressed;
use crate::startup::generate_startup;

fn startup_of(machines: serde_json::Value, idx: usize) -> String {
    let machines = addressed(machines);
    generate_startup(&machines[idx], &machines).unwrap()
}

#[test]
fn host_golden() {
    let script = startup_of(
        json!([{
            "id": "1",
            "name": "pc1",
            "type": "terminal",
            "interfaces": {"if": [
                {"eth": {"number": 1, "domain": "A"}, "ip": "192.168.0.1/24"},
                {"eth": {"number": 2, "domain": "B"}, "ip": "192.168.1.1"},
                {"eth": {"number": 3, "domain": ""}},
            ]},
            "scripts": {"startup": "\n  echo hello\nservice apache2 start  \n\n"},
        }]),
        0,
    );
    assert_eq!(script, include_str!("files/host.startup"));
}

#[test]
fn header_and_management() {
    let script = startup_of(json!([{"id": "1", "name": "a"}, {"id": "2", "name": "b"}]), 1);
    assert_eq!(
        script,
        "#!/bin/bash\n\
         set -euo pipefail\n\
         \n\
         echo \"nameserver 8.8.8.8\" > /etc/resolv.conf\n\
         ip addr add 10.0.0.2/24 dev eth0\n\
         ip link set eth0 up\n"
    );
}

#[test]
fn legacy_free_text_is_user_script() {
    let script = startup_of(
        json!([{"id": "1", "name": "a", "interfaces": {"if": [], "free": "echo legacy"}}]),
        0,
    );
    assert!(script.ends_with("ip link set eth0 up\necho legacy\n\n"));

    let script = startup_of(
        json!([{
            "id": "1",
            "name": "a",
            "interfaces": {"if": [], "free": "echo legacy"},
            "scripts": {"startup": "echo new"},
        }]),
        0,
    );
    assert!(script.contains("echo new\n"));
    assert!(!script.contains("legacy"));
}

#[test]
fn tls_proxy_replaces_body() {
    let script = startup_of(
        json!([{
            "id": "1",
            "name": "proxy",
            "type": "tls_termination_proxy",
            "tls": {"in_addr": "0.0.0.0:443", "verify": 2},
            "scripts": {"startup": "echo ignored"},
        }]),
        0,
    );
    assert!(!script.contains("echo ignored"));
    assert!(script.contains("\ncd /etc/stunnel\n"));
    assert!(script.contains("\nverify = 2\n"));
    assert!(script.contains("\naccept = 0.0.0.0:443\n"));
    assert!(script.contains("\nconnect = 10.0.0.2:50001\n"));
    assert!(script.ends_with("__EOF__\n\nstunnel\n"));
}

#[test]
fn engine_flags() {
    let script = startup_of(
        json!([{
            "id": "1",
            "name": "engine",
            "type": "engine",
            "industrial": {"temperatureStep": 0.5, "intervalSeconds": "2", "temperatureStart": 20},
        }]),
        0,
    );
    assert!(script.ends_with(
        "uv run /engine.py -t 0.5 -s 2 -ts 20 > /var/log/engine.log 2>&1 & disown\n"
    ));

    let script = startup_of(json!([{"id": "1", "name": "engine", "type": "engine"}]), 0);
    assert!(script.ends_with("uv run /engine.py > /var/log/engine.log 2>&1 & disown\n"));

    let script = startup_of(
        json!([{"id": "1", "name": "engine", "type": "engine", "industrial": {"mode": "sine_wave"}}]),
        0,
    );
    assert!(!script.contains("engine.py"));
}

#[test]
fn plc_registers_monitored_devices() {
    let script = startup_of(
        json!([
            {"id": "e", "name": "engine", "type": "engine"},
            {"id": "f", "name": "fan", "type": "fan"},
            {"id": "s", "name": "sensor", "type": "temperature_sensor"},
            {
                "id": "p",
                "name": "plc",
                "type": "plc",
                "industrial": {"monitored_machines": ["s", "unknown", "s"]},
            },
        ]),
        3,
    );
    let registrations: Vec<_> = script
        .lines()
        .filter(|l| l.contains("INSERT INTO Slave_dev"))
        .collect();
    assert_eq!(registrations.len(), 1);
    assert!(registrations[0].contains("'sensor', 'TCP', 0, '10.0.0.3', 502,"));
    assert!(!script.contains("INSERT INTO Programs"));
    assert!(script.ends_with("cd /OpenPLC_v3 && ./start_openplc.sh > /var/log/openplc.log 2>&1 &\n"));
}

#[test]
fn plc_program() {
    let script = startup_of(
        json!([{
            "id": "p",
            "name": "plc 1",
            "type": "plc",
            "industrial": {
                "plcProgramContent": "data:text/plain;base64,UFJPR1JBTSBtYWlu",
                "plcProgramName": "main.ST",
            },
        }]),
        0,
    );
    assert!(script.contains("cp /shared/plc_1.ST /OpenPLC_v3/webserver/st_files/plc_1.ST\n"));
    assert!(script.contains("INSERT INTO Programs"));
    assert!(script.contains("echo \"plc_1.ST\" > /OpenPLC_v3/webserver/active_program\n"));

    // malformed content is not registered
    let script = startup_of(
        json!([{
            "id": "p",
            "name": "plc",
            "type": "plc",
            "industrial": {"plcProgramContent": "data:text/plain;base64,@@@"},
        }]),
        0,
    );
    assert!(!script.contains("INSERT INTO Programs"));
}

#[test]
fn scada_wrapper() {
    let script = startup_of(json!([{"id": "s", "name": "hmi", "type": "scada"}]), 0);
    let block: Vec<_> = script.lines().skip_while(|l| !l.starts_with("cd ")).collect();
    assert_eq!(
        block,
        vec![
            "cd /usr/src/app/FUXA/server",
            "npm start > /var/log/fuxa.log 2>&1 &",
            "timeout 300 bash -c 'until grep -q \"WebServer is running\" /var/log/fuxa.log; do sleep 1; done' || true",
            "fuser -k 1881/tcp || true",
            "if [ -f /shared/hmi.db ]; then",
            "    cp /shared/hmi.db /usr/src/app/FUXA/server/_appdata/project.fuxap.db",
            "fi",
            "npm start >> /var/log/fuxa.log 2>&1 &",
        ]
    );
}
