// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch site root in the system temp directory, removed on drop.
#[derive(Debug)]
pub struct TestFixtureRoot {
    dir: TempDir,
}

impl TestFixtureRoot {
    pub fn new_unique(prefix: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("diecast-{}-", prefix))
            .tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` to a site-relative path such as `/docs/index.html`.
    pub fn write(&self, relative: &str, content: impl AsRef<[u8]>) -> io::Result<PathBuf> {
        let target = self.path().join(relative.trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        Ok(target)
    }

    /// Create an empty site-relative directory.
    pub fn mkdir(&self, relative: &str) -> io::Result<PathBuf> {
        let target = self.path().join(relative.trim_start_matches('/'));
        fs::create_dir_all(&target)?;
        Ok(target)
    }
}
