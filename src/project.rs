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

//! Persistence of projects as JSON files.
//!
//! A project bundles the lab info and the machines (including the uploaded payloads). The store
//! keeps the JSON value as it is, so fields the compiler does not know about survive a round
//! trip through the store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::model::{lenient, LabInfo, MachineInput};

const EXTENSION: &str = ".json";

/// A project, as it is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    /// Lab metadata
    #[serde(deserialize_with = "lenient::object")]
    pub lab_info: LabInfo,
    /// All machines of the topology
    pub machines: Vec<MachineInput>,
}

impl Project {
    /// Interpret a stored JSON value as project.
    pub fn from_value(value: Value) -> Result<Self, ProjectError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Read a project from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Directory of saved projects.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    dir: PathBuf,
}

impl ProjectStore {
    /// Create a store in the given directory. The directory is created on the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List all saved projects (file names ending in `.json`), sorted.
    pub fn list(&self) -> Result<Vec<String>, ProjectError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.ends_with(EXTENSION) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Save a project as pretty JSON. The `.json` suffix is appended if missing. Returns the
    /// sanitized file name.
    pub fn save(&self, name: &str, project: &Value) -> Result<String, ProjectError> {
        let mut file_name = safe_file_name(name)?;
        if !file_name.ends_with(EXTENSION) {
            file_name.push_str(EXTENSION);
        }
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(
            self.dir.join(&file_name),
            serde_json::to_string_pretty(project)?,
        )?;
        log::debug!("[projects] Saved {file_name}");
        Ok(file_name)
    }

    /// Load a saved project, by its file name or by the name it was saved under.
    pub fn load(&self, name: &str) -> Result<Value, ProjectError> {
        let path = self.path(name)?;
        let content = std::fs::read_to_string(&path).map_err(|e| not_found(name, e))?;
        log::debug!("[projects] Loaded {}", path.display());
        Ok(serde_json::from_str(&content)?)
    }

    /// Load a saved project and interpret it.
    pub fn load_project(&self, name: &str) -> Result<Project, ProjectError> {
        Project::from_value(self.load(name)?)
    }

    /// Delete a saved project.
    pub fn delete(&self, name: &str) -> Result<(), ProjectError> {
        let path = self.path(name)?;
        std::fs::remove_file(&path).map_err(|e| not_found(name, e))?;
        log::debug!("[projects] Deleted {}", path.display());
        Ok(())
    }

    /// Path of a saved project. Names are resolved like in [`Self::save`]: if there is no file
    /// with the exact name, the one with the `.json` suffix is used.
    fn path(&self, name: &str) -> Result<PathBuf, ProjectError> {
        let file_name = safe_file_name(name)?;
        let path = self.dir.join(&file_name);
        if path.is_file() || file_name.ends_with(EXTENSION) {
            return Ok(path);
        }
        Ok(self.dir.join(format!("{file_name}{EXTENSION}")))
    }
}

/// Names of all SCADA machines of a stored project.
pub fn scada_machine_names(project: &Value) -> Vec<String> {
    machines_of(project)
        .filter(|m| m.get("type").and_then(Value::as_str) == Some("scada"))
        .filter_map(|m| m.get("name").and_then(Value::as_str))
        .map(String::from)
        .collect()
}

/// Store the (base64 encoded) SCADA project of the machine `name` in a stored project. Returns
/// `false` if there is no such machine.
pub fn set_scada_project_content(project: &mut Value, name: &str, content: String) -> bool {
    let Some(machine) = project
        .get_mut("machines")
        .and_then(Value::as_array_mut)
        .and_then(|ms| {
            ms.iter_mut()
                .find(|m| m.get("name").and_then(Value::as_str) == Some(name))
        })
        .and_then(Value::as_object_mut)
    else {
        return false;
    };
    let industrial = machine
        .entry("industrial")
        .or_insert_with(|| Value::Object(Default::default()));
    if !industrial.is_object() {
        *industrial = Value::Object(Default::default());
    }
    industrial["scadaProjectContent"] = Value::String(content);
    true
}

/// Set the `meta` field of a stored project: format version and creation time.
pub fn stamp_meta(project: &mut Value) {
    let created_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    if let Some(obj) = project.as_object_mut() {
        obj.insert(
            String::from("meta"),
            serde_json::json!({ "version": "1.0", "createdAt": created_at }),
        );
    }
}

fn machines_of(project: &Value) -> impl Iterator<Item = &Value> {
    project
        .get("machines")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn not_found(name: &str, e: std::io::Error) -> ProjectError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ProjectError::NotFound(name.to_string())
    } else {
        ProjectError::Io(e)
    }
}

/// Remove every character outside of `[A-Za-z0-9_.-]`. Names that would escape the directory
/// are rejected.
pub fn safe_file_name(name: &str) -> Result<String, ProjectError> {
    let safe: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        Err(ProjectError::InvalidName(name.to_string()))
    } else {
        Ok(safe)
    }
}

/// Errors of the project store
#[derive(Debug, Error)]
pub enum ProjectError {
    /// I/O Error
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Invalid JSON
    #[error("Invalid project: {0}")]
    Json(#[from] serde_json::Error),
    /// The name is empty after sanitization.
    #[error("Invalid project name: {0:?}")]
    InvalidName(String),
    /// The project does not exist.
    #[error("Project {0} not found")]
    NotFound(String),
}
