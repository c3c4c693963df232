// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{DirEntryInfo, FileSystem, VfsDir, VfsEntry, VfsFile};
use crate::error::DiecastError;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// A read-only layer backed by a zip archive, loaded into memory at startup.
pub struct ZipFs {
    files: BTreeMap<String, Vec<u8>>,
}

impl ZipFs {
    pub fn open(path: &Path) -> Result<Self, DiecastError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read + std::io::Seek>(reader: R) -> Result<Self, DiecastError> {
        let mut archive = zip::ZipArchive::new(reader)
            .map_err(|e| DiecastError::Config(format!("invalid zip archive: {}", e)))?;
        let mut files = BTreeMap::new();

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| DiecastError::Config(format!("invalid zip entry: {}", e)))?;
            if entry.is_dir() {
                continue;
            }
            let name = format!("/{}", entry.name().trim_start_matches('/'));
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            files.insert(name, data);
        }

        Ok(Self { files })
    }

    fn list(&self, dir: &str) -> Vec<DirEntryInfo> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut entries: BTreeMap<String, DirEntryInfo> = BTreeMap::new();

        for (name, data) in self.files.range(prefix.clone()..) {
            let Some(rest) = name.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    entries.entry(child.to_string()).or_insert(DirEntryInfo {
                        name: child.to_string(),
                        is_dir: true,
                        size: 0,
                        modified: None,
                    });
                }
                None => {
                    entries.insert(
                        rest.to_string(),
                        DirEntryInfo {
                            name: rest.to_string(),
                            is_dir: false,
                            size: data.len() as u64,
                            modified: None,
                        },
                    );
                }
            }
        }

        entries.into_values().collect()
    }
}

impl FileSystem for ZipFs {
    fn open(&self, name: &str) -> Result<VfsEntry, DiecastError> {
        if let Some(data) = self.files.get(name) {
            return Ok(VfsEntry::File(VfsFile::new(name, data.clone())));
        }

        let entries = self.list(name);
        if entries.is_empty() {
            Err(DiecastError::not_found(name))
        } else {
            Ok(VfsEntry::Dir(VfsDir {
                name: name.to_string(),
                entries,
            }))
        }
    }
}
