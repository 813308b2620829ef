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

use std::{fs::File, io::Read};

use pretty_assertions::assert_eq;
use serde_json::json;
use test_log::test;
use zip::ZipArchive;

use super::inputs;
use crate::{
    addressing::AddressError,
    compile, compile_to_archive,
    model::LabInfo,
    project::Project,
    CompileError, CompilerOptions,
};

fn project() -> Project {
    Project::from_value(json!({
        "labInfo": {"name": "plant", "description": "Small plant", "author": "Operator"},
        "machines": [
            {"id": "r", "name": "r1", "type": "router", "routingSoftware": "frr",
             "interfaces": {"if": [
                 {"eth": {"number": 1, "domain": "A"}, "ip": "192.168.0.254/24"},
                 {"eth": {"number": 2, "domain": "B"}, "ip": "192.168.1.254/24"},
             ]}},
            {"id": "e", "name": "engine", "type": "engine", "interfaces": ["B"]},
            {"id": "f", "name": "fan", "type": "fan", "industrial": {"selectedEngineId": "e"}},
            {"id": "p", "name": "plc", "type": "plc",
             "industrial": {"monitored_machines": ["f"], "plcProgramContent": "UFJPR1JBTSBtYWlu"}},
            {"id": "a", "name": "nmap", "type": "attacker", "interfaces": ["A"]},
        ],
    }))
    .unwrap()
}

#[test]
fn lab_layout() {
    let project = project();
    let lab = compile(&project.machines, &project.lab_info, &CompilerOptions::new()).unwrap();
    let files: Vec<_> = lab.files.keys().map(String::as_str).collect();
    assert_eq!(
        files,
        vec![
            "attacker.startup",
            "collector.startup",
            "collectordb.startup",
            "engine.startup",
            "fan.startup",
            "lab.conf",
            "plc.startup",
            "r1.startup",
            "shared/plc.st",
        ]
    );
    assert_eq!(lab.folders, vec!["r1", "engine", "fan", "plc", "attacker"]);
    assert_eq!(lab.file_str("shared/plc.st"), Some("PROGRAM main"));

    let conf = lab.file_str("lab.conf").unwrap();
    assert!(conf.starts_with("LAB_DESCRIPTION=\"Small plant\"\nLAB_AUTHOR=\"Operator\"\n\n"));
    assert!(conf.contains("fan[env]=\"ENDPOINT=http://10.0.0.2:8000/\"\n"));
    assert!(conf.contains("attacker[1]=A\n"));

    let plc = lab.file_str("plc.startup").unwrap();
    assert!(plc.contains("'fan', 'TCP', 0, '10.0.0.3', 502,"));
    assert!(plc.contains("ip addr add 10.0.0.4/24 dev eth0\n"));

    assert!(lab
        .file_str("collector.startup")
        .unwrap()
        .contains("ip addr add 10.0.0.254/24 dev eth0\n"));
    assert!(lab
        .file_str("collectordb.startup")
        .unwrap()
        .contains("ip addr add 10.0.0.253/24 dev eth0\n"));
}

#[test]
fn input_is_not_modified() {
    let project = project();
    let before = project.clone();
    let lab = compile(&project.machines, &project.lab_info, &CompilerOptions::new()).unwrap();
    assert_eq!(project, before);
    assert_eq!(project.machines[4].name, "nmap");
    assert_eq!(lab.machines[4].name, "attacker");
    assert!(project.machines.iter().all(|m| m.computed_eth0_ip.is_none()));
}

#[test]
fn deterministic() {
    let project = project();
    let a = compile(&project.machines, &project.lab_info, &CompilerOptions::new()).unwrap();
    let b = compile(&project.machines, &project.lab_info, &CompilerOptions::new()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn configured_subnet() {
    let project = project();
    let mut options = CompilerOptions::new();
    options.management_subnet("172.20.0.0/24".parse().unwrap());
    let lab = compile(&project.machines, &project.lab_info, &options).unwrap();
    assert!(lab
        .file_str("r1.startup")
        .unwrap()
        .contains("ip addr add 172.20.0.1/24 dev eth0\n"));
    assert!(lab
        .file_str("collector.startup")
        .unwrap()
        .contains("ip addr add 172.20.0.254/24 dev eth0\n"));
}

#[test]
fn address_error() {
    let machines = inputs(json!((0..10)
        .map(|i| json!({"id": i.to_string(), "name": format!("pc{i}")}))
        .collect::<Vec<_>>()));
    let mut options = CompilerOptions::new();
    options.management_subnet("10.0.0.0/29".parse().unwrap());
    assert!(matches!(
        compile(&machines, &LabInfo::default(), &options),
        Err(CompileError::Address(AddressError::NotEnoughAddresses(_)))
    ));
}

#[test]
fn empty_project() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.zip");
    let lab = compile_to_archive(&[], &LabInfo::default(), &CompilerOptions::new(), &path).unwrap();
    assert_eq!(lab.folders, Vec::<String>::new());

    let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
    let mut names: Vec<_> = archive.file_names().map(String::from).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["collector.startup", "collectordb.startup", "lab.conf"]
    );
    let mut conf = String::new();
    archive
        .by_name("lab.conf")
        .unwrap()
        .read_to_string(&mut conf)
        .unwrap();
    assert!(conf.starts_with("collector[bridged]=true\n"));
}

#[test]
fn machines_with_reserved_names() {
    let machines = inputs(json!([
        {"id": "c", "name": "collector", "type": "terminal"},
        {"id": "d", "name": "collectordb", "type": "terminal"},
    ]));
    let lab = compile(&machines, &LabInfo::default(), &CompilerOptions::new()).unwrap();

    let script = lab.file_str("collector.startup").unwrap();
    assert!(script.starts_with("#!/bin/bash\n"));
    assert_eq!(script.matches("ip addr add 10.0.0.254/24 dev eth0").count(), 1);
    assert!(script.ends_with("\nloki -config.file=/etc/loki/config.yml &\n"));

    let script = lab.file_str("collectordb.startup").unwrap();
    assert!(script.starts_with("#!/bin/bash\n"));
    assert_eq!(script.matches("ip addr add 10.0.0.253/24 dev eth0").count(), 1);
    assert!(!script.contains("loki"));

    let conf = lab.file_str("lab.conf").unwrap();
    let images: Vec<_> = conf.lines().filter(|l| l.contains("[image]")).collect();
    assert_eq!(
        images,
        vec![
            "collector[image]=\"icr/collector\"",
            "collectordb[image]=\"icr/collector-db\"",
        ]
    );
}
