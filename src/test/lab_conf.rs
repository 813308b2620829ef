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
use crate::{
    lab_conf::{
        collector_db_startup, collector_startup, domain_label, engine_endpoint,
        generate_lab_conf, generate_lab_info, DEFAULT_ENDPOINT,
    },
    model::LabInfo,
};

const COLLECTOR_BLOCK: &str = "collector[bridged]=true
collector[port]=\"3100:3100/tcp\"
collector[0]=\"_collector\"
collector[image]=\"icr/collector\"
collectordb[0]=\"_collector\"
collectordb[image]=\"icr/collector-db\"
";

fn lab_conf(machines: serde_json::Value) -> String {
    generate_lab_conf(&LabInfo::default(), &addressed(machines)).unwrap()
}

fn machine_lines<'a>(conf: &'a str, name: &str) -> Vec<&'a str> {
    let prefix = format!("{name}[");
    conf.lines().filter(|l| l.starts_with(&prefix)).collect()
}

#[test]
fn lab_info() {
    let info = LabInfo {
        description: String::from("A \"small\" lab"),
        author: String::from("Alice"),
        ..Default::default()
    };
    assert_eq!(
        generate_lab_info(&info).unwrap(),
        "LAB_DESCRIPTION=\"A \\\"small\\\" lab\"\nLAB_AUTHOR=\"Alice\"\n\n"
    );
    assert_eq!(generate_lab_info(&LabInfo::default()).unwrap(), "");
}

#[test]
fn empty_lab() {
    assert_eq!(lab_conf(json!([])), COLLECTOR_BLOCK);
}

#[test]
fn bindings() {
    let conf = lab_conf(json!([{
        "id": "1",
        "name": "pc1",
        "interfaces": {"if": [
            {"eth": {"number": 1, "domain": "A"}},
            {"eth": {"number": 2, "domain": "B"}},
            {"eth": {"number": 3, "domain": ""}},
        ]},
    }]));
    assert_eq!(
        machine_lines(&conf, "pc1"),
        vec![
            "pc1[1]=A",
            "pc1[2]=B",
            "pc1[0]=_collector",
            "pc1[bridged]=true",
            "pc1[image]=icr/kathara-base",
        ]
    );
    let bindings = conf
        .lines()
        .filter(|l| l.starts_with("pc1[") && l.as_bytes()[4].is_ascii_digit() && !l.starts_with("pc1[0]"))
        .count();
    assert_eq!(bindings, 2);
}

#[test]
fn machines_in_order() {
    let conf = lab_conf(json!([
        {"id": "1", "name": "z", "type": "switch"},
        {"id": "2", "name": "a", "type": "router", "routingSoftware": "frr"},
    ]));
    assert_eq!(
        conf.strip_prefix(COLLECTOR_BLOCK).unwrap(),
        "z[0]=_collector\n\
         z[bridged]=true\n\
         a[0]=_collector\n\
         a[bridged]=true\n\
         a[image]=kathara/frr\n"
    );
}

#[test]
fn fan_endpoint_uses_engine_address() {
    let conf = lab_conf(json!([
        {"id": "x", "name": "pc"},
        {"id": "e", "name": "engine", "type": "engine"},
        {"id": "f", "name": "fan", "type": "fan", "industrial": {"selectedEngineId": "e", "capacity": 300}},
    ]));
    assert_eq!(
        machine_lines(&conf, "fan"),
        vec![
            "fan[0]=_collector",
            "fan[bridged]=true",
            "fan[image]=icr/fan",
            "fan[env]=\"ENDPOINT=http://10.0.0.2:8000/\"",
            "fan[env]=\"CAPACITY=300\"",
        ]
    );
}

#[test]
fn endpoint_fallback() {
    let machines = addressed(json!([
        {"id": "f", "name": "fan", "type": "fan"},
        {"id": "g", "name": "fan2", "type": "fan", "industrial": {"selectedEngineId": "missing"}},
    ]));
    assert_eq!(engine_endpoint(&machines[0], &machines), DEFAULT_ENDPOINT);
    assert_eq!(engine_endpoint(&machines[1], &machines), DEFAULT_ENDPOINT);
}

#[test]
fn temperature_sensor_sine_wave() {
    let conf = lab_conf(json!([
        {"id": "e", "name": "engine", "type": "engine"},
        {
            "id": "t",
            "name": "temp",
            "type": "temperature_sensor",
            "industrial": {"selectedEngineId": "e", "mode": "sine_wave", "sinePeriod": 120, "sineOffset": "25.5"},
        },
        {"id": "u", "name": "temp2", "type": "temperature_sensor", "industrial": {"selectedEngineId": "e"}},
    ]));
    assert_eq!(
        machine_lines(&conf, "temp"),
        vec![
            "temp[0]=_collector",
            "temp[bridged]=true",
            "temp[image]=icr/temperature_sensor",
            "temp[env]=\"ENDPOINT=http://10.0.0.1:8000/\"",
            "temp[env]=\"SINE_WAVE=true\"",
            "temp[env]=\"SINE_PERIOD=120\"",
            "temp[env]=\"SINE_AMPLITUDE=10\"",
            "temp[env]=\"SINE_OFFSET=25.5\"",
        ]
    );
    assert_eq!(
        machine_lines(&conf, "temp2")
            .into_iter()
            .filter(|l| l.contains("[env]"))
            .collect::<Vec<_>>(),
        vec!["temp2[env]=\"ENDPOINT=http://10.0.0.1:8000/\""]
    );
}

#[test]
fn attacker_image() {
    let conf = lab_conf(json!([
        {"id": "a", "name": "kali", "type": "attacker", "attackLoaded": true, "attackImage": "icr/scanner"},
    ]));
    assert_eq!(
        machine_lines(&conf, "attacker"),
        vec![
            "attacker[0]=_collector",
            "attacker[bridged]=true",
            "attacker[image]=icr/scanner",
        ]
    );
}

#[test]
fn collector_scripts() {
    let addr = "10.0.0.254/24".parse().unwrap();
    assert_eq!(
        collector_startup(addr).unwrap(),
        "#!/bin/sh\n\
         echo \"nameserver 8.8.8.8\" > /etc/resolv.conf\n\
         loki -config.file=/etc/loki/config.yml &\n\
         ip addr add 10.0.0.254/24 dev eth0\n\
         ip link set eth0 up\n"
    );
    let addr = "10.0.0.253/24".parse().unwrap();
    assert!(!collector_db_startup(addr).unwrap().contains("loki"));
}

#[test]
fn reserved_names_keep_the_collector_block() {
    let conf = lab_conf(json!([
        {"id": "c", "name": "collector", "type": "terminal", "interfaces": ["A"]},
        {"id": "d", "name": "collectordb", "type": "terminal"},
    ]));
    assert!(conf.starts_with(COLLECTOR_BLOCK));
    assert_eq!(
        machine_lines(&conf, "collector"),
        vec![
            "collector[bridged]=true",
            "collector[port]=\"3100:3100/tcp\"",
            "collector[0]=\"_collector\"",
            "collector[image]=\"icr/collector\"",
            "collector[1]=A",
        ]
    );
    assert_eq!(
        machine_lines(&conf, "collectordb"),
        vec![
            "collectordb[0]=\"_collector\"",
            "collectordb[image]=\"icr/collector-db\"",
        ]
    );
}

#[test]
fn collision_domain_labels() {
    assert_eq!(domain_label("lan-1.a_b"), "lan-1.a_b");
    assert_eq!(domain_label("A\npc[image]=evil"), "A_pc_image__evil");
    assert_eq!(domain_label("two words"), "two_words");

    let conf = lab_conf(json!([
        {"id": "p", "name": "pc", "type": "terminal", "interfaces": ["A\npc[image]=evil"]},
    ]));
    assert_eq!(
        machine_lines(&conf, "pc"),
        vec![
            "pc[1]=A_pc_image__evil",
            "pc[0]=_collector",
            "pc[bridged]=true",
            "pc[image]=icr/kathara-base",
        ]
    );
}
