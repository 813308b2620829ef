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

//! Packaging of a [`Lab`] into a zip archive.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use thiserror::Error;
use zip::{result::ZipError, write::FileOptions, CompressionMethod, ZipWriter};

use crate::lab::Lab;

/// Write every file of the lab into a zip archive at `path`, replacing any existing file.
///
/// The archive is first written to a temporary file next to `path`, and then renamed over it.
/// Thus, either `path` holds the complete new archive, or the previous file is left untouched.
/// Startup scripts are stored with mode `0755`, everything else with `0644`.
pub fn write_archive(lab: &Lab, path: &Path) -> Result<(), ArchiveError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io_err = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };
    let zip_err = |source| ArchiveError::Zip {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(&dir).map_err(io_err)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".labforge-")
        .suffix(".zip.tmp")
        .tempfile_in(&dir)
        .map_err(io_err)?;

    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, content) in lab.files.iter() {
            let mode = if Lab::is_startup_script(name) {
                0o755
            } else {
                0o644
            };
            log::trace!("[archive] {name} ({} bytes, mode {mode:o})", content.len());
            zip.start_file(name.as_str(), options.unix_permissions(mode))
                .map_err(zip_err)?;
            zip.write_all(content).map_err(io_err)?;
        }
        zip.finish().map_err(zip_err)?;
    }

    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    log::debug!(
        "[archive] Wrote {} files to {}",
        lab.files.len(),
        path.display()
    );
    Ok(())
}

/// Error while writing the archive. The temporary file is removed, and the previous archive (if
/// any) is left in place.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// I/O error
    #[error("Cannot write {}: {source}", .path.display())]
    Io {
        /// The target path of the archive
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },
    /// Error of the zip encoder
    #[error("Cannot encode {}: {source}", .path.display())]
    Zip {
        /// The target path of the archive
        path: PathBuf,
        /// The underlying error
        source: ZipError,
    },
}
