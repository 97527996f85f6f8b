// src/archive/payload.rs

//! The `install.tar.xz` payload
//!
//! The payload is copied out of the container, decompressed next to itself
//! and then read sequentially as a plain tarball.

use super::{Archive, UnpackOptions};
use crate::compression::Codec;
use crate::error::Result;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tar::{Entries, Entry};
use tracing::debug;

/// Name of the payload entry inside every container
pub const PAYLOAD_ENTRY: &str = "install.tar.xz";

/// Copy the payload of `archive` into `directory` and decompress it,
/// returning the path of the plain `install.tar`
pub fn extract_payload(archive: &mut Archive, directory: &Path, codec: &dyn Codec) -> Result<PathBuf> {
    let compressed = archive.extract_entry(PAYLOAD_ENTRY, directory)?;
    let tarball = codec.decompress(&compressed, false)?;

    debug!("Payload of {} decompressed to {}", archive.id(), tarball.display());
    Ok(tarball)
}

/// Tar path of an entry with any trailing slash removed, as recorded in
/// `files.xml`
pub fn entry_path<R: Read>(entry: &Entry<'_, R>) -> String {
    String::from_utf8_lossy(&entry.path_bytes())
        .trim_end_matches('/')
        .to_string()
}

/// Forward-only reader over a decompressed payload
///
/// Each entry's body is skipped automatically if it has not been read when
/// the iterator advances.
pub struct PayloadReader {
    inner: tar::Archive<BufReader<File>>,
}

impl PayloadReader {
    pub fn open<P: AsRef<Path>>(tarball: P) -> Result<Self> {
        let file = File::open(tarball.as_ref())?;
        Ok(Self {
            inner: tar::Archive::new(BufReader::new(file)),
        })
    }

    pub fn entries(&mut self) -> Result<Entries<'_, BufReader<File>>> {
        Ok(self.inner.entries()?)
    }

    /// Unpack every entry under `dir`, restoring modes, mtimes and xattrs
    pub fn unpack(mut self, dir: &Path, options: UnpackOptions) -> Result<()> {
        self.inner.set_preserve_permissions(true);
        self.inner.set_preserve_mtime(true);
        self.inner.set_unpack_xattrs(true);
        self.inner.set_preserve_ownerships(options.preserve_ownership);
        self.inner.set_overwrite(true);
        self.inner.unpack(dir)?;
        Ok(())
    }
}

/// Unpack a decompressed payload into `dir`
pub(crate) fn unpack_tarball(tarball: &Path, dir: &Path, options: UnpackOptions) -> Result<()> {
    debug!("Unpacking {} into {}", tarball.display(), dir.display());
    PayloadReader::open(tarball)?.unpack(dir, options)
}
