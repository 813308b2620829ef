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

//! Embedding of uploaded files (PLC programs and SCADA projects).
//!
//! Uploads are stored in a project either as raw base64 or as a data URI
//! (`data:<mime>;base64,<payload>`). The two are kept apart as [`Base64Payload`] and [`DataUri`].
//! A data URI is never decoded as a whole: [`DataUri::into_base64`] is the only way to get to its
//! payload.

use base64::{
    alphabet,
    engine::{general_purpose, DecodePaddingMode, GeneralPurpose},
    Engine,
};

use crate::model::{sanitize_name, DeviceKind, Machine};

/// Directory (inside the lab) in which payloads are staged. Kathara mounts it at `/shared`.
pub const SHARED_DIR: &str = "shared";

/// Default extension of PLC programs.
pub const PLC_PROGRAM_EXTENSION: &str = "st";

/// Extension of SCADA projects.
pub const SCADA_PROJECT_EXTENSION: &str = "db";

/// Standard alphabet; padding is optional, since some uploads strip it.
const DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    general_purpose::PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const DATA_URI_MARKER: &str = ";base64,";

/// Raw base64 text, without any prefix and without whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Payload(String);

impl Base64Payload {
    /// Create a payload from raw base64 text. All whitespace is removed.
    pub fn new(s: &str) -> Self {
        Self(s.chars().filter(|c| !c.is_whitespace()).collect())
    }

    /// The base64 text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the payload.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        DECODER.decode(&self.0)
    }
}

/// A data URI with a base64 payload: `data:<mime>;base64,<payload>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    uri: String,
    /// Start of the payload in `uri`.
    payload_start: usize,
}

impl DataUri {
    /// Parse a data URI. Returns `None` if the string does not contain `;base64,`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let marker = s.find(DATA_URI_MARKER)?;
        Some(Self {
            uri: s.to_string(),
            payload_start: marker + DATA_URI_MARKER.len(),
        })
    }

    /// The media type of the URI, if one is given.
    pub fn mime(&self) -> Option<&str> {
        let header = &self.uri[..self.payload_start - DATA_URI_MARKER.len()];
        let mime = header.strip_prefix("data:").unwrap_or(header);
        (!mime.is_empty()).then_some(mime)
    }

    /// Strip everything up to and including `;base64,`.
    pub fn into_base64(self) -> Base64Payload {
        Base64Payload::new(&self.uri[self.payload_start..])
    }
}

/// Uploaded content, in either of the two encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedContent {
    /// Raw base64
    Base64(Base64Payload),
    /// A data URI
    DataUri(DataUri),
}

impl EncodedContent {
    /// Detect the encoding. Returns `None` for empty content.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            None
        } else if s.starts_with("data:") || s.contains(DATA_URI_MARKER) {
            DataUri::parse(s).map(Self::DataUri)
        } else {
            Some(Self::Base64(Base64Payload::new(s)))
        }
    }

    /// Get the base64 payload.
    pub fn into_base64(self) -> Base64Payload {
        match self {
            Self::Base64(p) => p,
            Self::DataUri(uri) => uri.into_base64(),
        }
    }

    /// Decode the content.
    pub fn decode(self) -> Result<Vec<u8>, base64::DecodeError> {
        self.into_base64().decode()
    }
}

/// Decode optional uploaded content. Missing, empty or malformed content yields `None`.
pub fn decode_content(content: Option<&str>) -> Option<Vec<u8>> {
    match EncodedContent::parse(content?)?.decode() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            log::warn!("[payload] Skipping malformed content: {e}");
            None
        }
    }
}

/// A file that is placed in the shared directory of the lab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Path relative to the lab root, like `shared/plc1.st`.
    pub path: String,
    /// Decoded content.
    pub content: Vec<u8>,
}

/// Name of the file (inside the shared directory) that holds the PLC program of this machine:
/// `<host>.<ext>`, where the extension is taken from the uploaded file name, or `st`.
pub fn plc_program_file_name(machine: &Machine) -> String {
    let ext = machine
        .industrial
        .plc_program_name
        .as_deref()
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| sanitize_name(ext.trim()))
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| PLC_PROGRAM_EXTENSION.to_string());
    format!("{}.{ext}", machine.host_name())
}

/// Name of the file (inside the shared directory) that holds the SCADA project of this machine.
pub fn scada_project_file_name(machine: &Machine) -> String {
    format!("{}.{SCADA_PROJECT_EXTENSION}", machine.host_name())
}

/// Decode the payload of a single machine, if it has one.
pub fn stage_payload(machine: &Machine) -> Option<StagedFile> {
    let (content, file_name) = match machine.kind {
        DeviceKind::Plc => (
            machine.industrial.plc_program_content.as_deref(),
            plc_program_file_name(machine),
        ),
        DeviceKind::Scada => (
            machine.industrial.scada_project_content.as_deref(),
            scada_project_file_name(machine),
        ),
        _ => return None,
    };
    let content = decode_content(content)?;
    log::debug!(
        "[payload] Staging {} bytes for {} as {file_name}",
        content.len(),
        machine.name
    );
    Some(StagedFile {
        path: format!("{SHARED_DIR}/{file_name}"),
        content,
    })
}

/// Decode the payloads of all machines.
pub fn stage_payloads(machines: &[Machine]) -> Vec<StagedFile> {
    machines.iter().filter_map(stage_payload).collect()
}
