// src/archive/delta.rs

//! Delta package production
//!
//! A delta package is a normal `.eopkg` container whose payload only holds
//! the files that changed between two releases. Every other container entry
//! is copied across untouched.

use super::payload::{self, entry_path, PayloadReader, PAYLOAD_ENTRY};
use super::{Archive, DiffResult, Package, PACKAGE_EXTENSION};
use crate::compression::{compressed_path, Codec, XzCommand};
use crate::error::{Error, Result};
use std::borrow::Cow;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tar::{Builder, Entry};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Name of the rebuilt (uncompressed) payload inside the work directory
const DELTA_TARBALL: &str = "delta-eopkg.install.tar";

/// File name of the delta package going from `old` to `new`
pub fn delta_filename(old: &Package, new: &Package) -> String {
    format!("{}.delta.{}", old.delta_name(new), PACKAGE_EXTENSION)
}

/// Produces a delta package from an older and a newer release.
///
/// The order of the inputs matters: `left` is the old release and `right`
/// the new one. Each producer owns a unique work directory which is removed,
/// together with both archive handles, on `close` or drop.
pub struct DeltaProducer {
    left: Option<Archive>,
    right: Option<Archive>,
    work_dir: Option<TempDir>,
    codec: Box<dyn Codec>,
}

impl DeltaProducer {
    /// Open both packages, check they can be delta'd, and set up a work
    /// directory under `base_dir`
    pub fn new<B, L, R>(base_dir: B, left: L, right: R) -> Result<Self>
    where
        B: AsRef<Path>,
        L: AsRef<Path>,
        R: AsRef<Path>,
    {
        let left = Archive::open_all(left)?;
        let right = Archive::open_all(right)?;

        let old = left.package()?;
        let new = right.package()?;
        if !old.is_delta_possible(new) {
            return Err(Error::MismatchedDelta {
                left: left.id().to_string(),
                right: right.id().to_string(),
            });
        }

        let prefix = format!(
            "{}-{}-{}-{}-{}-",
            old.name,
            old.version(),
            old.architecture,
            new.release(),
            old.release()
        );
        fs::create_dir_all(base_dir.as_ref())?;
        let work_dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(base_dir.as_ref())?;

        debug!(
            "Delta work directory for {} -> {}: {}",
            left.id(),
            right.id(),
            work_dir.path().display()
        );

        Ok(Self {
            left: Some(left),
            right: Some(right),
            work_dir: Some(work_dir),
            codec: Box::new(XzCommand::default()),
        })
    }

    /// Use `codec` instead of the host `xz` tool for the payload
    pub fn with_codec(mut self, codec: Box<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// The private work directory, until the producer is closed
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_ref().map(TempDir::path)
    }

    fn closed() -> Error {
        Error::Io(io::Error::new(
            io::ErrorKind::NotConnected,
            "delta producer is closed",
        ))
    }

    /// Changes between the two manifests
    pub fn diff(&self) -> Result<DiffResult> {
        let left = self.left.as_ref().ok_or_else(Self::closed)?;
        let right = self.right.as_ref().ok_or_else(Self::closed)?;
        Ok(left.manifest()?.diff(right.manifest()?))
    }

    /// Build the delta package inside `output_dir`, returning its path.
    ///
    /// Nothing is left in `output_dir` when this fails.
    pub fn create<P: AsRef<Path>>(&mut self, output_dir: P) -> Result<PathBuf> {
        let diff = self.diff()?;
        if diff.changed.is_empty() {
            return Err(Error::DeltaPointless);
        }

        let Self {
            left,
            right,
            work_dir,
            codec,
        } = self;
        let left = left.as_mut().ok_or_else(Self::closed)?;
        let right = right.as_mut().ok_or_else(Self::closed)?;
        let work_dir = work_dir.as_ref().ok_or_else(Self::closed)?.path();

        let wanted: HashSet<String> = diff
            .changed
            .iter()
            .map(|f| f.path.trim_end_matches('/').to_string())
            .collect();

        let tarball = payload::extract_payload(right, work_dir, &**codec)?;
        let delta_tar = work_dir.join(DELTA_TARBALL);
        let copied = copy_modified(&tarball, &delta_tar, &wanted)?;
        debug!("Copied {} payload entries into {}", copied, delta_tar.display());

        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir)?;
        let out_path = output_dir.join(delta_filename(left.package()?, right.package()?));
        let xz_path = compressed_path(&delta_tar);

        let result = codec
            .compress(&delta_tar, false)
            .and_then(|xz| repackage(right, &xz, &out_path));
        if let Err(e) = result {
            let _ = fs::remove_file(&xz_path);
            let _ = fs::remove_file(&out_path);
            return Err(e);
        }

        info!(
            "Created delta {} ({} changed, {} removed)",
            out_path.display(),
            diff.changed.len(),
            diff.removed.len()
        );
        Ok(out_path)
    }

    /// Close both packages and remove the work directory. Safe to call
    /// more than once.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut left) = self.left.take() {
            left.close();
        }
        if let Some(mut right) = self.right.take() {
            right.close();
        }
        if let Some(dir) = self.work_dir.take() {
            dir.close()?;
        }
        Ok(())
    }
}

impl Drop for DeltaProducer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to clean up delta work directory: {}", e);
        }
    }
}

fn bytes_path(bytes: &[u8]) -> &Path {
    Path::new(OsStr::from_bytes(bytes))
}

/// Stream the new payload, keeping only the entries listed in `wanted`
fn copy_modified(tarball: &Path, out: &Path, wanted: &HashSet<String>) -> Result<usize> {
    let mut reader = PayloadReader::open(tarball)?;
    let mut builder = Builder::new(BufWriter::new(File::create(out)?));
    let mut copied = 0;

    for entry in reader.entries()? {
        let mut entry = entry?;
        if !wanted.contains(&entry_path(&entry)) {
            continue;
        }
        copy_entry(&mut builder, &mut entry)?;
        copied += 1;
    }

    let mut writer = builder.into_inner()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(copied)
}

/// Write `entry` into `builder` with its header intact. Only regular files
/// carry a body.
fn copy_entry<W: Write, R: Read>(builder: &mut Builder<W>, entry: &mut Entry<'_, R>) -> Result<()> {
    let mut header = entry.header().clone();
    let path = entry.path_bytes().into_owned();
    let link = entry.link_name_bytes().map(Cow::into_owned);

    let mut pax = Vec::new();
    if let Some(extensions) = entry.pax_extensions()? {
        for extension in extensions {
            let extension = extension?;
            let key = extension
                .key()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            pax.push((key.to_string(), extension.value_bytes().to_vec()));
        }
    }
    let pax_has = |name: &str| pax.iter().any(|(key, _)| key == name);
    if !pax.is_empty() {
        builder.append_pax_extensions(pax.iter().map(|(k, v)| (k.as_str(), v.as_slice())))?;
    }

    // GNU long names live in a separate entry which the reader folds away,
    // so they have to be re-emitted when the header alone cannot hold them.
    let long_path = *header.path_bytes() != *path.as_slice() && !pax_has("path");
    let long_link = match &link {
        Some(target) => {
            header.link_name_bytes().as_deref() != Some(target.as_slice()) && !pax_has("linkpath")
        }
        None => false,
    };
    let is_file = header.entry_type().is_file();

    match (long_path, long_link, &link) {
        (_, true, Some(target)) => {
            builder.append_link(&mut header, bytes_path(&path), bytes_path(target))?
        }
        (true, _, _) if is_file => builder.append_data(&mut header, bytes_path(&path), entry)?,
        (true, _, _) => builder.append_data(&mut header, bytes_path(&path), io::empty())?,
        _ if is_file => builder.append(&header, entry)?,
        _ => builder.append(&header, io::empty())?,
    }
    Ok(())
}

/// Write the output container: every entry of `right` except the payload,
/// copied raw, followed by the new payload
fn repackage(right: &mut Archive, xz_path: &Path, out_path: &Path) -> Result<()> {
    let mut zw = ZipWriter::new(File::create(out_path)?);

    let zip = right.zip()?;
    for index in 0..zip.len() {
        let entry = zip.by_index_raw(index)?;
        if entry.name() == PAYLOAD_ENTRY {
            continue;
        }
        debug!("Copying container entry {}", entry.name());
        zw.raw_copy_file(entry)?;
    }

    let mut payload = File::open(xz_path)?;
    let size = payload.metadata()?.len();
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o644)
        .large_file(size >= u64::from(u32::MAX));
    zw.start_file(PAYLOAD_ENTRY, options)?;
    io::copy(&mut payload, &mut zw)?;

    let out = zw.finish()?;
    out.sync_all()?;
    Ok(())
}
