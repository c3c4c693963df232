// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{DirEntryInfo, DiskFile, FileSystem, VfsDir, VfsEntry};
use crate::error::DiecastError;
use crate::util::mime_helper::detect_mime_type;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

/// Bytes read from files without a known extension to sniff their type.
const SNIFF_LEN: u64 = 8192;

/// Describe a regular file without reading it, sniffing its head only when the extension says nothing.
pub fn disk_file(name: &str, path: PathBuf, metadata: &fs::Metadata) -> io::Result<DiskFile> {
    let mime_type = if mime_guess::from_path(&path).first_raw().is_some() {
        detect_mime_type(&path, &[])
    } else {
        let mut head = Vec::new();
        fs::File::open(&path)?.take(SNIFF_LEN).read_to_end(&mut head)?;
        detect_mime_type(&path, &head)
    };
    let mut file = DiskFile::new(name, path, metadata.len(), mime_type);
    file.modified = metadata.modified().ok();
    Ok(file)
}

/// A directory on the local disk.
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a VFS name onto the root, refusing anything that would escape it.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(resolved)
    }
}

impl FileSystem for LocalFs {
    fn open(&self, name: &str) -> Result<VfsEntry, DiecastError> {
        let path = self
            .resolve(name)
            .ok_or_else(|| DiecastError::not_found(name))?;
        let metadata = fs::metadata(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                DiecastError::not_found(name)
            } else {
                DiecastError::Io(err)
            }
        })?;

        if metadata.is_dir() {
            let mut entries = Vec::new();
            for entry in fs::read_dir(&path)? {
                let entry = entry?;
                let meta = entry.metadata()?;
                entries.push(DirEntryInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    is_dir: meta.is_dir(),
                    size: meta.len(),
                    modified: meta.modified().ok(),
                });
            }
            entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

            return Ok(VfsEntry::Dir(VfsDir {
                name: name.to_string(),
                entries,
            }));
        }

        Ok(VfsEntry::Disk(disk_file(name, path, &metadata)?))
    }
}
