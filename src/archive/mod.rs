// src/archive/mod.rs

//! Access to `.eopkg` archives
//!
//! An `.eopkg` file is a zip container with a fixed layout:
//!
//! - `metadata.xml`: package information
//! - `files.xml`: record of every installed file with its hash/uid/gid/mode
//! - `comar/`: post-install scripts, carried through untouched
//! - `install.tar.xz`: the filesystem contents
//!
//! `Archive` owns the open container and lazily parses the two XML
//! documents on first use.

pub mod delta;
pub mod files;
pub mod metadata;
pub mod payload;

use crate::compression::{Codec, XzCommand};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

pub use delta::DeltaProducer;
pub use files::{DiffResult, FileEntry, FileManifest, FileType};
pub use metadata::{LocalisedField, Metadata, Package};
pub use payload::{PayloadReader, PAYLOAD_ENTRY};

/// Name of the package descriptor entry
pub const METADATA_ENTRY: &str = "metadata.xml";

/// Name of the file manifest entry
pub const FILES_ENTRY: &str = "files.xml";

/// Extension used by package containers
pub const PACKAGE_EXTENSION: &str = "eopkg";

/// Options for `Archive::unpack`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnpackOptions {
    /// Restore the uid/gid recorded in the payload (needs privileges)
    pub preserve_ownership: bool,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            preserve_ownership: true,
        }
    }
}

/// An opened `.eopkg` package
pub struct Archive {
    path: PathBuf,
    id: String,
    metadata: Option<Metadata>,
    files: Option<FileManifest>,
    zip: Option<ZipArchive<File>>,
}

impl Archive {
    /// Open the container at `path`, asserting it is a real zip archive
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening package archive: {}", path.display());

        let file = File::open(&path)?;
        let zip = ZipArchive::new(file).map_err(|e| {
            Error::Corrupted(format!("{} is not a valid package: {}", path.display(), e))
        })?;

        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path,
            id,
            metadata: None,
            files: None,
            zip: Some(zip),
        })
    }

    /// Open the container and read both of its XML documents
    pub fn open_all<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut archive = Self::open(path)?;
        archive.read_all()?;
        Ok(archive)
    }

    /// Release the container handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.zip.take().is_some() {
            debug!("Closed package archive: {}", self.path.display());
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Basename of the package file, unique within a repository
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn zip(&mut self) -> Result<&mut ZipArchive<File>> {
        self.zip.as_mut().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "package archive is closed",
            ))
        })
    }

    /// Entry names in container order
    pub fn entry_names(&mut self) -> Result<Vec<String>> {
        let zip = self.zip()?;
        let mut names = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            names.push(zip.by_index_raw(index)?.name().to_string());
        }
        Ok(names)
    }

    /// Find the index of the entry called `name`.
    ///
    /// Entry names are unique within a container. A missing entry is
    /// `Ok(None)`; the caller decides whether that means corruption.
    pub fn find_entry(&mut self, name: &str) -> Result<Option<usize>> {
        let zip = self.zip()?;
        for index in 0..zip.len() {
            if zip.by_index_raw(index)?.name() == name {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Index of a mandatory entry
    pub(crate) fn require_entry(&mut self, name: &str) -> Result<usize> {
        self.find_entry(name)?
            .ok_or_else(|| Error::Corrupted(format!("{} is missing {}", self.id, name)))
    }

    /// Open a mandatory entry for buffered reading
    pub(crate) fn entry_reader(&mut self, name: &str) -> Result<BufReader<zip::read::ZipFile<'_>>> {
        let index = self.require_entry(name)?;
        let entry = self.zip()?.by_index(index)?;
        Ok(BufReader::new(entry))
    }

    /// Copy the raw bytes of entry `name` into `dest_dir/name`
    pub fn extract_entry<P: AsRef<Path>>(&mut self, name: &str, dest_dir: P) -> Result<PathBuf> {
        let index = self.require_entry(name)?;
        let dest = dest_dir.as_ref().join(name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut entry = self.zip()?.by_index(index)?;
        let mut out = File::create(&dest)?;
        io::copy(&mut entry, &mut out)?;
        out.sync_all()?;

        debug!("Extracted {} to {}", name, dest.display());
        Ok(dest)
    }

    /// Read `metadata.xml` and `files.xml`
    pub fn read_all(&mut self) -> Result<()> {
        self.read_metadata()?;
        self.read_files()?;
        Ok(())
    }

    /// The parsed metadata, reading it on first use
    pub fn metadata(&mut self) -> Result<&Metadata> {
        self.read_metadata()?;
        self.metadata
            .as_ref()
            .ok_or_else(|| Error::Corrupted(format!("{} has no metadata", self.id)))
    }

    /// The parsed file manifest, reading it on first use
    pub fn files(&mut self) -> Result<&FileManifest> {
        self.read_files()?;
        self.files
            .as_ref()
            .ok_or_else(|| Error::Corrupted(format!("{} has no file manifest", self.id)))
    }

    /// Parsed package section of an archive that has already been read
    pub(crate) fn package(&self) -> Result<&Package> {
        self.metadata
            .as_ref()
            .map(|meta| &meta.package)
            .ok_or_else(|| Error::Corrupted(format!("{} metadata has not been read", self.id)))
    }

    /// Parsed manifest of an archive that has already been read
    pub(crate) fn manifest(&self) -> Result<&FileManifest> {
        self.files
            .as_ref()
            .ok_or_else(|| Error::Corrupted(format!("{} files have not been read", self.id)))
    }

    /// Whether a delta from this archive to `newer` makes sense
    pub fn is_delta_possible(&mut self, newer: &mut Archive) -> Result<bool> {
        let old = self.metadata()?.package.clone();
        Ok(old.is_delta_possible(&newer.metadata()?.package))
    }

    /// Files in `other` that are new or modified, and files of ours that are gone
    pub fn diff(&mut self, other: &mut Archive) -> Result<DiffResult> {
        let ours = self.files()?.clone();
        Ok(ours.diff(other.files()?))
    }

    /// Validate every installed file under `root` against the manifest
    pub fn verify<P: AsRef<Path>>(&mut self, root: P) -> Result<()> {
        self.read_all()?;
        let count = {
            let files = self.files()?;
            files.verify(root.as_ref())?;
            files.len()
        };

        info!("Verified {} files of {}", count, self.id);
        Ok(())
    }

    /// Write out `files.xml` and `metadata.xml` into `meta_dir` and unpack
    /// the payload contents into `files_dir`
    pub fn unpack<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        meta_dir: P,
        files_dir: Q,
        options: UnpackOptions,
    ) -> Result<()> {
        self.unpack_with(meta_dir, files_dir, options, &XzCommand::default())
    }

    /// `unpack` with an explicit payload codec
    pub fn unpack_with<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        meta_dir: P,
        files_dir: Q,
        options: UnpackOptions,
        codec: &dyn Codec,
    ) -> Result<()> {
        let meta_dir = meta_dir.as_ref();
        let files_dir = files_dir.as_ref();

        fs::create_dir_all(meta_dir)?;
        self.extract_entry(FILES_ENTRY, meta_dir)?;
        self.extract_entry(METADATA_ENTRY, meta_dir)?;

        // Staged beside the metadata so nothing is left in the installed tree
        let staging = tempfile::Builder::new()
            .prefix(".payload-")
            .tempdir_in(meta_dir)?;
        let tarball = payload::extract_payload(self, staging.path(), codec)?;

        fs::create_dir_all(files_dir)?;
        payload::unpack_tarball(&tarball, files_dir, options)?;
        staging.close()?;

        info!("Unpacked {} into {}", self.id, files_dir.display());
        Ok(())
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        self.close();
    }
}
