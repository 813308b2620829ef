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
use crate::payload::{
    decode_content, plc_program_file_name, stage_payloads, Base64Payload, DataUri,
    EncodedContent, StagedFile,
};

#[test]
fn data_uri() {
    let uri = DataUri::parse("data:application/octet-stream;base64,SGVsbG8gV29ybGQ=").unwrap();
    assert_eq!(uri.mime(), Some("application/octet-stream"));
    assert_eq!(uri.into_base64().decode().unwrap(), b"Hello World");
    assert_eq!(DataUri::parse("SGVsbG8gV29ybGQ="), None);
    assert_eq!(DataUri::parse("data:;base64,SGk=").unwrap().mime(), None);
}

#[test]
fn detect_encoding() {
    assert!(matches!(
        EncodedContent::parse("data:text/plain;base64,SGk="),
        Some(EncodedContent::DataUri(_))
    ));
    assert!(matches!(
        EncodedContent::parse("SGk="),
        Some(EncodedContent::Base64(_))
    ));
    assert_eq!(EncodedContent::parse("   "), None);
    // a data URI without a base64 payload is not content
    assert_eq!(EncodedContent::parse("data:text/plain,hello"), None);
}

#[test]
fn raw_base64() {
    let payload = Base64Payload::new("SGVs\nbG8g V29y\r\nbGQ=");
    assert_eq!(payload.as_str(), "SGVsbG8gV29ybGQ=");
    assert_eq!(payload.decode().unwrap(), b"Hello World");
    // missing padding is accepted
    assert_eq!(Base64Payload::new("SGVsbG8gV29ybGQ").decode().unwrap(), b"Hello World");
}

#[test]
fn decode_optional() {
    assert_eq!(
        decode_content(Some("data:application/octet-stream;base64,SGVsbG8gV29ybGQ=")),
        Some(b"Hello World".to_vec())
    );
    assert_eq!(decode_content(Some("")), None);
    assert_eq!(decode_content(None), None);
    assert_eq!(decode_content(Some("!!!")), None);
}

#[test]
fn staging() {
    let machines = addressed(json!([
        {"id": "1", "name": "pc", "industrial": {"plcProgramContent": "SGk="}},
        {"id": "2", "name": "PLC A", "type": "plc", "industrial": {"plcProgramContent": "SGVsbG8gV29ybGQ="}},
        {"id": "3", "name": "plc2", "type": "plc"},
        {"id": "4", "name": "hmi", "type": "scada", "industrial": {
            "scadaProjectContent": "data:application/octet-stream;base64,ZnV4YSBwcm9qZWN0",
            "scadaProjectName": "project.fuxap.db",
        }},
        {"id": "5", "name": "hmi2", "type": "scada", "industrial": {"scadaProjectContent": "%%%"}},
    ]));
    assert_eq!(
        stage_payloads(&machines),
        vec![
            StagedFile {
                path: String::from("shared/PLC_A.st"),
                content: b"Hello World".to_vec(),
            },
            StagedFile {
                path: String::from("shared/hmi.db"),
                content: b"fuxa project".to_vec(),
            },
        ]
    );
}

#[test]
fn program_extension() {
    let machines = addressed(json!([
        {"id": "1", "name": "p", "type": "plc", "industrial": {"plcProgramName": "prog.xml"}},
        {"id": "2", "name": "q", "type": "plc", "industrial": {"plcProgramName": "noext"}},
        {"id": "3", "name": "r", "type": "plc", "industrial": {"plcProgramName": "weird.a b"}},
    ]));
    let names: Vec<_> = machines.iter().map(plc_program_file_name).collect();
    assert_eq!(names, vec!["p.xml", "q.st", "r.a_b"]);
}
