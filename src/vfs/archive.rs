// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{DiskFile, FileSystem, VfsEntry};
use crate::error::DiecastError;
use log::debug;
use std::io::{self, Write};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub const ARCHIVE_EXTENSION: &str = ".zip";
pub const ARCHIVE_MIME_TYPE: &str = "application/zip";

fn zip_error(err: zip::result::ZipError) -> DiecastError {
    DiecastError::Io(io::Error::other(err.to_string()))
}

/// The directory an archive name refers to: `/docs.zip` -> `/docs`.
pub fn archived_directory(name: &str) -> Option<&str> {
    let dir = name.strip_suffix(ARCHIVE_EXTENSION)?;
    let base = dir.rsplit('/').next().unwrap_or("");
    if base.is_empty() { None } else { Some(dir) }
}

/// Zip everything under `dir` as `fs` sees it into a temp file. The download is named after the
/// base of `requested`.
pub fn archive_directory(
    fs: &dyn FileSystem,
    dir: &str,
    requested: &str,
) -> Result<DiskFile, DiecastError> {
    let spool = tempfile::Builder::new().prefix("diecast-archive-").tempfile()?;
    let mut writer = ZipWriter::new(spool);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut count = 0;
    add_directory(fs, &mut writer, options, dir, "", &mut count)?;

    let spool = writer.finish().map_err(zip_error)?;
    let size = spool.as_file().metadata()?.len();
    debug!("Archived {} ({} files) into {} bytes", dir, count, size);

    let download = requested.rsplit('/').next().unwrap_or(requested);
    let mut file = DiskFile::spooled(requested, spool.into_temp_path(), size, ARCHIVE_MIME_TYPE);
    file.download_name = Some(download.to_string());
    Ok(file)
}

fn add_directory<W: Write + io::Seek>(
    fs: &dyn FileSystem,
    writer: &mut ZipWriter<W>,
    options: SimpleFileOptions,
    dir: &str,
    prefix: &str,
    count: &mut usize,
) -> Result<(), DiecastError> {
    let VfsEntry::Dir(listing) = fs.open(dir)? else {
        return Err(DiecastError::not_found(dir));
    };

    for entry in listing.entries {
        let child = format!("{}/{}", dir.trim_end_matches('/'), entry.name);
        let member = format!("{}{}", prefix, entry.name);

        if entry.is_dir {
            writer
                .add_directory(format!("{}/", member), options)
                .map_err(zip_error)?;
            add_directory(fs, writer, options, &child, &format!("{}/", member), count)?;
            continue;
        }

        writer.start_file(member, options).map_err(zip_error)?;
        match fs.open(&child)? {
            VfsEntry::File(file) => writer.write_all(&file.data)?,
            VfsEntry::Disk(file) => {
                let mut source = std::fs::File::open(&file.path)?;
                io::copy(&mut source, writer)?;
            }
            VfsEntry::Dir(_) => {}
        }
        *count += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{LocalFs, ZipFs};
    use crate::util::test_fixtures::TestFixtureRoot;

    #[test]
    fn archive_names_map_to_directories() {
        assert_eq!(archived_directory("/docs.zip"), Some("/docs"));
        assert_eq!(archived_directory("/a/b.zip"), Some("/a/b"));
        assert_eq!(archived_directory("/.zip"), None);
        assert_eq!(archived_directory("/docs.tar"), None);
    }

    #[test]
    fn archives_nested_files_through_the_filesystem() {
        let fixture = TestFixtureRoot::new_unique("archive").expect("fixture");
        fixture.write("/site/index.html", "<h1>home</h1>").expect("write");
        fixture.write("/site/css/app.css", "body{}").expect("write");
        fixture.write("/elsewhere.txt", "not included").expect("write");
        let fs = LocalFs::new(fixture.path().to_path_buf());

        let file = archive_directory(&fs, "/site", "/site.zip").expect("archive");
        assert_eq!(file.download_name.as_deref(), Some("site.zip"));
        assert_eq!(file.mime_type, ARCHIVE_MIME_TYPE);

        // read it back through the zip layer
        let unpacked = ZipFs::open(&file.path).expect("valid zip");
        match unpacked.open("/css/app.css").expect("member") {
            VfsEntry::File(member) => assert_eq!(member.data, b"body{}"),
            other => panic!("expected a file, got {:?}", other),
        }
        assert!(unpacked.open("/index.html").is_ok());
        assert!(unpacked.open("/elsewhere.txt").expect_err("excluded").is_not_found());
    }

    #[test]
    fn spool_is_removed_with_the_last_handle() {
        let fixture = TestFixtureRoot::new_unique("archive-spool").expect("fixture");
        fixture.write("/d/a.txt", "a").expect("write");
        let fs = LocalFs::new(fixture.path().to_path_buf());

        let file = archive_directory(&fs, "/d", "/d.zip").expect("archive");
        let path = file.path.clone();
        let copy = file.clone();
        drop(file);
        assert!(path.exists());
        drop(copy);
        assert!(!path.exists());
    }
}
