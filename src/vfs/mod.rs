// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Layered virtual file system: overrides, then layers in order, then the fallback.

pub mod archive;
pub mod local;
pub mod zipfs;

use crate::config::{FileOverride, LayerConfig, VfsConfig};
use crate::error::DiecastError;
use crate::util::globs::GlobSet;
use crate::util::mime_helper::detect_mime_type;
use crate::util::value::to_display;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::TempPath;

pub use local::LocalFs;
pub use zipfs::ZipFs;

#[derive(Debug, Clone)]
pub struct VfsFile {
    pub name: String,
    pub data: Vec<u8>,
    pub mime_type: String,
    pub modified: Option<SystemTime>,
}

impl VfsFile {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        let mime_type = detect_mime_type(Path::new(name), &data);
        Self {
            name: name.to_string(),
            data,
            mime_type,
            modified: None,
        }
    }

    pub fn with_mime(name: &str, data: Vec<u8>, mime_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data,
            mime_type: mime_type.to_string(),
            modified: None,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|ext| ext.to_str())
    }
}

/// A file left on disk until it is served, so it can be streamed instead of buffered.
#[derive(Debug, Clone)]
pub struct DiskFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub mime_type: String,
    pub modified: Option<SystemTime>,
    /// Offered as an attachment under this name.
    pub download_name: Option<String>,
    spool: Option<Arc<TempPath>>,
}

impl DiskFile {
    pub fn new(name: &str, path: PathBuf, size: u64, mime_type: String) -> Self {
        Self {
            name: name.to_string(),
            path,
            size,
            mime_type,
            modified: None,
            download_name: None,
            spool: None,
        }
    }

    /// A generated file in the temp directory, removed once the last handle is dropped.
    pub fn spooled(name: &str, spool: TempPath, size: u64, mime_type: &str) -> Self {
        let mut file = Self::new(name, spool.to_path_buf(), size, mime_type.to_string());
        file.spool = Some(Arc::new(spool));
        file
    }

    pub fn read(&self) -> io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    pub async fn read_async(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    pub fn load(self) -> io::Result<VfsFile> {
        let data = self.read()?;
        Ok(VfsFile {
            name: self.name,
            data,
            mime_type: self.mime_type,
            modified: self.modified,
        })
    }
}

impl PartialEq for DiskFile {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.path == other.path && self.size == other.size
    }
}

#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct VfsDir {
    pub name: String,
    pub entries: Vec<DirEntryInfo>,
}

#[derive(Debug, Clone)]
pub enum VfsEntry {
    File(VfsFile),
    Disk(DiskFile),
    Dir(VfsDir),
}

/// A read-only `name -> entry` file system. Names are absolute, `/`-separated paths.
pub trait FileSystem: Send + Sync {
    fn open(&self, name: &str) -> Result<VfsEntry, DiecastError>;
}

pub struct Layer {
    kind: String,
    paths: GlobSet,
    halt_on_missing: bool,
    halt_on_error: bool,
    autoarchive: bool,
    fs: Box<dyn FileSystem>,
}

impl Layer {
    pub fn new(fs: Box<dyn FileSystem>) -> Self {
        Self {
            kind: String::new(),
            paths: GlobSet::default(),
            halt_on_missing: false,
            halt_on_error: false,
            autoarchive: false,
            fs,
        }
    }

    pub fn from_config(config: &LayerConfig, root: &Path) -> Result<Self, DiecastError> {
        let option_str = |key: &str| -> Option<String> {
            config.options.get(key).map(to_display).filter(|s| !s.is_empty())
        };
        let resolve = |path: String| -> PathBuf {
            let candidate = PathBuf::from(path);
            if candidate.is_absolute() {
                candidate
            } else {
                root.join(candidate)
            }
        };

        let fs: Box<dyn FileSystem> = match config.kind.as_str() {
            "" | "local" => {
                let dir = option_str("root")
                    .or_else(|| option_str("path"))
                    .map(resolve)
                    .unwrap_or_else(|| root.to_path_buf());
                Box::new(LocalFs::new(dir))
            }
            "zip" | "archive" => {
                let file = option_str("path").or_else(|| option_str("file")).ok_or_else(|| {
                    DiecastError::Config("zip layers require an options.path".to_string())
                })?;
                Box::new(ZipFs::open(&resolve(file))?)
            }
            other => {
                return Err(DiecastError::Config(format!(
                    "unsupported VFS layer type {:?}",
                    other
                )));
            }
        };

        Ok(Self {
            kind: config.kind.clone(),
            paths: GlobSet::new(&config.paths),
            halt_on_missing: config.halt_on_missing,
            halt_on_error: config.halt_on_error,
            autoarchive: config.autoarchive
                || config
                    .options
                    .get("autoarchive")
                    .is_some_and(crate::util::value::is_truthy),
            fs,
        })
    }

    pub fn with_autoarchive(mut self, enabled: bool) -> Self {
        self.autoarchive = enabled;
        self
    }

    fn should_consider(&self, name: &str) -> bool {
        self.paths.allows(name)
    }

    /// Open `name`; on an autoarchive layer, `<dir>.zip` names a zip of that directory.
    fn open(&self, name: &str) -> Result<VfsEntry, DiecastError> {
        match self.fs.open(name) {
            Err(err) if err.is_not_found() && self.autoarchive => {
                let Some(dir_name) = archive::archived_directory(name) else {
                    return Err(err);
                };
                match self.fs.open(dir_name) {
                    Ok(VfsEntry::Dir(_)) => {
                        archive::archive_directory(self.fs.as_ref(), dir_name, name).map(VfsEntry::Disk)
                    }
                    _ => Err(err),
                }
            }
            other => other,
        }
    }
}

pub struct Vfs {
    overrides: HashMap<String, FileOverride>,
    layers: Vec<Layer>,
    fallback: Option<Layer>,
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            layers: Vec::new(),
            fallback: None,
        }
    }

    /// Build from configuration; the fallback defaults to a local layer over `root`.
    pub fn from_config(config: &VfsConfig, root: &Path) -> Result<Self, DiecastError> {
        let mut vfs = Vfs::new();
        for file in &config.overrides {
            vfs.override_path(file.clone());
        }
        for layer in &config.layers {
            vfs.append_layer(Layer::from_config(layer, root)?);
        }
        let fallback = match &config.fallback {
            Some(layer) => Layer::from_config(layer, root)?,
            None => Layer::new(Box::new(LocalFs::new(root.to_path_buf()))),
        };
        vfs.set_fallback(fallback);
        Ok(vfs)
    }

    pub fn override_path(&mut self, file: FileOverride) {
        self.overrides.insert(file.path.clone(), file);
    }

    pub fn append_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn prepend_layer(&mut self, layer: Layer) {
        self.layers.insert(0, layer);
    }

    pub fn set_fallback(&mut self, layer: Layer) {
        self.fallback = Some(layer);
    }

    /// Open and read a file. Directories anywhere surface as [`DiecastError::IsDirectory`].
    pub fn open(&self, name: &str) -> Result<VfsFile, DiecastError> {
        match self.open_entry(name)? {
            VfsEntry::File(file) => Ok(file),
            VfsEntry::Disk(file) => Ok(file.load()?),
            VfsEntry::Dir(_) => Err(DiecastError::IsDirectory(name.to_string())),
        }
    }

    pub fn open_dir(&self, name: &str) -> Result<VfsDir, DiecastError> {
        match self.open_entry(name)? {
            VfsEntry::Dir(dir) => Ok(dir),
            VfsEntry::File(_) | VfsEntry::Disk(_) => Err(DiecastError::not_found(name)),
        }
    }

    pub fn open_entry(&self, name: &str) -> Result<VfsEntry, DiecastError> {
        self.open_entry_depth(name, 0)
    }

    fn open_entry_depth(&self, name: &str, depth: usize) -> Result<VfsEntry, DiecastError> {
        if let Some(file) = self.overrides.get(name) {
            return self.open_override(file, depth).map(VfsEntry::File);
        }

        let mut directory = None;

        for layer in &self.layers {
            if !layer.should_consider(name) {
                continue;
            }
            match layer.open(name) {
                Ok(VfsEntry::Dir(dir)) => {
                    directory.get_or_insert(dir);
                }
                Ok(file) => return Ok(file),
                Err(err) if err.is_not_found() => {
                    if layer.halt_on_missing {
                        debug!("VFS layer {:?} halted search for {}", layer.kind, name);
                        return Err(err);
                    }
                }
                Err(err) => {
                    if layer.halt_on_error {
                        return Err(err);
                    }
                    debug!("VFS layer {:?} failed for {}: {}", layer.kind, name, err);
                }
            }
        }

        if let Some(fallback) = &self.fallback
            && fallback.should_consider(name)
        {
            match fallback.open(name) {
                Ok(entry) => return Ok(entry),
                Err(err) if !err.is_not_found() => return Err(err),
                Err(_) => {}
            }
        }

        match directory {
            Some(dir) => Ok(VfsEntry::Dir(dir)),
            None => Err(DiecastError::not_found(name)),
        }
    }

    fn open_override(&self, file: &FileOverride, depth: usize) -> Result<VfsFile, DiecastError> {
        if let Some(data) = &file.data {
            return Ok(VfsFile::new(&file.path, autoencode(&file.path, data)?));
        }
        if !file.source.is_empty() && file.source != file.path && depth < 8 {
            return match self.open_entry_depth(&file.source, depth + 1)? {
                VfsEntry::File(mut found) => {
                    found.name = file.path.clone();
                    Ok(found)
                }
                VfsEntry::Disk(found) => {
                    let mut found = found.load()?;
                    found.name = file.path.clone();
                    Ok(found)
                }
                VfsEntry::Dir(_) => Err(DiecastError::IsDirectory(file.source.clone())),
            };
        }
        Err(DiecastError::not_found(&file.path))
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode an inline override literal; structured values follow the file extension.
fn autoencode(path: &str, data: &Value) -> Result<Vec<u8>, DiecastError> {
    match data {
        Value::Object(_) | Value::Array(_) => {
            let ext = Path::new(path)
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            match ext.as_str() {
                "yaml" | "yml" => Ok(serde_yaml::to_string(data)?.into_bytes()),
                _ => Ok(serde_json::to_vec_pretty(data)?),
            }
        }
        other => Ok(to_display(other).into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_fixtures::TestFixtureRoot;
    use serde_json::json;

    fn override_data(path: &str, data: Value) -> FileOverride {
        FileOverride {
            path: path.to_string(),
            source: String::new(),
            data: Some(data),
        }
    }

    #[test]
    fn overrides_win_over_layers() {
        let fixture = TestFixtureRoot::new_unique("vfs-override").expect("fixture");
        fixture.write("/hello.txt", "from disk").expect("write");

        let mut vfs = Vfs::new();
        vfs.set_fallback(Layer::new(Box::new(LocalFs::new(fixture.path().to_path_buf()))));
        vfs.override_path(override_data("/hello.txt", json!("Hello")));

        let file = vfs.open("/hello.txt").expect("file");
        assert_eq!(file.data, b"Hello");
        assert!(file.mime_type.starts_with("text/plain"));
    }

    #[test]
    fn structured_overrides_are_encoded_by_extension() {
        let mut vfs = Vfs::new();
        vfs.override_path(override_data("/data.json", json!({"a": 1})));
        vfs.override_path(override_data("/data.yaml", json!({"a": 1})));

        let json_file = vfs.open("/data.json").expect("json");
        let parsed: Value = serde_json::from_slice(&json_file.data).expect("valid json");
        assert_eq!(parsed, json!({"a": 1}));

        let yaml_file = vfs.open("/data.yaml").expect("yaml");
        assert_eq!(String::from_utf8_lossy(&yaml_file.data).trim(), "a: 1");
    }

    #[test]
    fn source_overrides_alias_other_paths() {
        let mut vfs = Vfs::new();
        vfs.override_path(override_data("/real.txt", json!("real")));
        vfs.override_path(FileOverride {
            path: "/alias.txt".to_string(),
            source: "/real.txt".to_string(),
            data: None,
        });
        assert_eq!(vfs.open("/alias.txt").expect("alias").data, b"real");
    }

    #[test]
    fn layers_respect_globs_and_halting() {
        let first = TestFixtureRoot::new_unique("vfs-layer-a").expect("fixture");
        let second = TestFixtureRoot::new_unique("vfs-layer-b").expect("fixture");
        first.write("/page.md", "first").expect("write");
        second.write("/page.md", "second").expect("write");
        second.write("/only-second.html", "second").expect("write");

        let mut vfs = Vfs::new();
        let mut scoped = Layer::new(Box::new(LocalFs::new(first.path().to_path_buf())));
        scoped.paths = GlobSet::new(&["*.html"]);
        vfs.append_layer(scoped);
        vfs.append_layer(Layer::new(Box::new(LocalFs::new(
            second.path().to_path_buf(),
        ))));

        // the first layer only considers *.html, so the markdown file comes from the second
        assert_eq!(vfs.open("/page.md").expect("page").data, b"second");

        let mut halting = Vfs::new();
        let mut halt = Layer::new(Box::new(LocalFs::new(first.path().to_path_buf())));
        halt.halt_on_missing = true;
        halting.append_layer(halt);
        halting.append_layer(Layer::new(Box::new(LocalFs::new(
            second.path().to_path_buf(),
        ))));
        assert!(
            halting
                .open("/only-second.html")
                .expect_err("halted")
                .is_not_found()
        );
    }

    #[test]
    fn directories_are_reported_separately() {
        let fixture = TestFixtureRoot::new_unique("vfs-dir").expect("fixture");
        fixture.write("/docs/index.html", "index").expect("write");

        let mut vfs = Vfs::new();
        vfs.set_fallback(Layer::new(Box::new(LocalFs::new(fixture.path().to_path_buf()))));

        assert!(vfs.open("/docs").expect_err("dir").is_directory());
        let dir = vfs.open_dir("/docs").expect("listing");
        assert_eq!(dir.entries.len(), 1);
        assert_eq!(dir.entries[0].name, "index.html");
    }

    #[test]
    fn autoarchive_layers_zip_directories() {
        let fixture = TestFixtureRoot::new_unique("vfs-zip").expect("fixture");
        fixture.write("/bundle/a.txt", "alpha").expect("write");

        let mut vfs = Vfs::new();
        vfs.set_fallback(
            Layer::new(Box::new(LocalFs::new(fixture.path().to_path_buf()))).with_autoarchive(true),
        );

        // the directory itself still lists; only the .zip name archives it
        assert!(vfs.open("/bundle").expect_err("dir").is_directory());
        match vfs.open_entry("/bundle.zip").expect("archive") {
            VfsEntry::Disk(file) => {
                assert_eq!(file.mime_type, "application/zip");
                assert_eq!(file.download_name.as_deref(), Some("bundle.zip"));
                assert_eq!(&file.read().expect("read")[..2], b"PK");
            }
            other => panic!("expected a spooled archive, got {:?}", other),
        }
    }

    #[test]
    fn plain_layers_do_not_archive() {
        let fixture = TestFixtureRoot::new_unique("vfs-nozip").expect("fixture");
        fixture.write("/bundle/a.txt", "alpha").expect("write");

        let mut vfs = Vfs::new();
        vfs.set_fallback(Layer::new(Box::new(LocalFs::new(fixture.path().to_path_buf()))));
        assert!(vfs.open_entry("/bundle.zip").expect_err("missing").is_not_found());
    }

    #[test]
    fn disk_files_are_opened_lazily_and_read_on_open() {
        let fixture = TestFixtureRoot::new_unique("vfs-lazy").expect("fixture");
        fixture.write("/big.bin", vec![7u8; 4096]).expect("write");

        let mut vfs = Vfs::new();
        vfs.set_fallback(Layer::new(Box::new(LocalFs::new(fixture.path().to_path_buf()))));

        match vfs.open_entry("/big.bin").expect("entry") {
            VfsEntry::Disk(file) => assert_eq!(file.size, 4096),
            other => panic!("expected a disk file, got {:?}", other),
        }
        assert_eq!(vfs.open("/big.bin").expect("file").data.len(), 4096);
    }
}
