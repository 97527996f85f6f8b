// src/archive/files.rs

//! File manifest (`files.xml`): parsing, diffing and on-disk verification
//!
//! Directories are recorded with an empty hash. The `Type` tag of a record
//! only says what the file is *for* (doc, library, ...), so an empty hash is
//! the one signal treated as "this is a directory".

use super::{Archive, FILES_ENTRY};
use crate::error::{Error, Result, VerifyField};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::debug;

/// Mode bits compared during verification (permissions plus suid/sgid/sticky)
pub const PERMISSION_MASK: u32 = 0o7777;

/// Declared purpose of a file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileType {
    Config,
    Data,
    Doc,
    Executable,
    Header,
    Info,
    Library,
    Locale,
    Man,
    Other(String),
}

impl FileType {
    pub fn as_str(&self) -> &str {
        match self {
            FileType::Config => "config",
            FileType::Data => "data",
            FileType::Doc => "doc",
            FileType::Executable => "executable",
            FileType::Header => "header",
            FileType::Info => "info",
            FileType::Library => "library",
            FileType::Locale => "localedata",
            FileType::Man => "man",
            FileType::Other(s) => s,
        }
    }
}

impl From<&str> for FileType {
    fn from(s: &str) -> Self {
        match s {
            "config" => FileType::Config,
            "data" => FileType::Data,
            "doc" => FileType::Doc,
            "executable" => FileType::Executable,
            "header" => FileType::Header,
            "info" => FileType::Info,
            "library" => FileType::Library,
            "localedata" => FileType::Locale,
            "man" => FileType::Man,
            other => FileType::Other(other.to_string()),
        }
    }
}

/// One `<File>` record
///
/// Two entries are attribute-equal (`==`) when every field matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub file_type: FileType,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    /// SHA-1 hex digest, empty for directories
    pub hash: String,
    pub permanent: Option<String>,
}

impl FileEntry {
    /// Directories are the records without a content hash
    pub fn is_dir(&self) -> bool {
        self.hash.is_empty()
    }

    /// Mode in the zero-padded octal form used by `files.xml`
    pub fn mode_string(&self) -> String {
        let raw = format!("{:o}", self.mode);
        if raw.len() == 3 || raw.len() == 4 {
            format!("0{}", raw)
        } else {
            raw
        }
    }

    fn mismatch(&self, field: VerifyField, expected: impl ToString, actual: impl ToString) -> Error {
        Error::VerificationMismatch {
            path: self.path.clone(),
            field,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Compare the installed copy under `root` with this record
    pub fn verify(&self, root: &Path) -> Result<()> {
        let dst = root.join(self.path.trim_start_matches('/'));
        let info = fs::symlink_metadata(&dst)?;

        if info.len() != self.size {
            return Err(self.mismatch(VerifyField::Size, self.size, info.len()));
        }

        let perm = info.mode() & PERMISSION_MASK;
        let expected_perm = self.mode & PERMISSION_MASK;
        if perm != expected_perm {
            return Err(self.mismatch(
                VerifyField::Permissions,
                format!("{:o}", expected_perm),
                format!("{:o}", perm),
            ));
        }

        if info.uid() != self.uid {
            return Err(self.mismatch(VerifyField::Uid, self.uid, info.uid()));
        }
        if info.gid() != self.gid {
            return Err(self.mismatch(VerifyField::Gid, self.gid, info.gid()));
        }

        let file_type = info.file_type();
        let sum = if file_type.is_symlink() {
            let target = fs::read_link(&dst)?;
            let mut hasher = Sha1::new();
            hasher.update(target.as_os_str().as_bytes());
            format!("{:x}", hasher.finalize())
        } else if file_type.is_file() {
            hash_file(&dst)?
        } else {
            // Directories, fifos and devices carry no content
            return Ok(());
        };

        if sum != self.hash {
            return Err(self.mismatch(VerifyField::Hash, &self.hash, sum));
        }
        Ok(())
    }
}

/// Stream a regular file through SHA-1
fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Outcome of comparing an older manifest with a newer one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// New or modified entries, as recorded in the newer manifest
    pub changed: FileManifest,
    /// Paths of the older manifest that no longer exist
    pub removed: FileManifest,
}

/// The `<Files>` document: every file a package installs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileManifest {
    pub files: Vec<FileEntry>,
}

impl FileManifest {
    pub fn new(files: Vec<FileEntry>) -> Self {
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.files.iter()
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Check if the specified path is listed
    pub fn has_file(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Compute what changed going from `self` (older) to `newer`.
    ///
    /// Entries sharing a path but differing in any attribute are reported
    /// from `newer`. Entries of `newer` with no attribute-equal counterpart
    /// in `self` are reported too, each path at most once.
    pub fn diff(&self, newer: &FileManifest) -> DiffResult {
        let old_by_path: HashMap<&str, &FileEntry> =
            self.files.iter().map(|f| (f.path.as_str(), f)).collect();
        let new_by_path: HashMap<&str, &FileEntry> =
            newer.files.iter().map(|f| (f.path.as_str(), f)).collect();

        let mut changed = Vec::new();
        let mut removed = Vec::new();

        for curr in &self.files {
            match new_by_path.get(curr.path.as_str()) {
                None => removed.push(curr.clone()),
                Some(next) if *next != curr => changed.push((*next).clone()),
                Some(_) => {}
            }
        }

        for next in &newer.files {
            // Paths are unique, so an attribute-equal match can only live
            // at the same path; a same-path mismatch was reported above.
            if !old_by_path.contains_key(next.path.as_str()) {
                changed.push(next.clone());
            }
        }

        DiffResult {
            changed: FileManifest::new(changed),
            removed: FileManifest::new(removed),
        }
    }

    /// Verify every entry under `root`, stopping at the first failure
    pub fn verify(&self, root: &Path) -> Result<()> {
        for file in &self.files {
            file.verify(root)?;
        }
        Ok(())
    }

    /// Parse a `files.xml` document
    ///
    /// A malformed mode on any record fails the whole read.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let raw: RawFiles = quick_xml::de::from_reader(reader)
            .map_err(|e| Error::Corrupted(format!("{}: {}", FILES_ENTRY, e)))?;

        let files = raw
            .files
            .into_iter()
            .map(RawFile::into_entry)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { files })
    }
}

impl<'a> IntoIterator for &'a FileManifest {
    type Item = &'a FileEntry;
    type IntoIter = std::slice::Iter<'a, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

impl FromIterator<FileEntry> for FileManifest {
    fn from_iter<I: IntoIterator<Item = FileEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Deserialize)]
struct RawFiles {
    #[serde(rename = "File", default)]
    files: Vec<RawFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawFile {
    path: String,
    #[serde(rename = "Type", default)]
    file_type: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "UID", default)]
    uid: u32,
    #[serde(rename = "GID", default)]
    gid: u32,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    permanent: Option<String>,
}

impl RawFile {
    fn into_entry(self) -> Result<FileEntry> {
        let mode = match self.mode.as_deref().map(str::trim) {
            None => 0,
            Some(raw) => u32::from_str_radix(raw, 8).map_err(|e| {
                Error::Corrupted(format!(
                    "{}: invalid mode {:?} for {}: {}",
                    FILES_ENTRY, raw, self.path, e
                ))
            })?,
        };

        Ok(FileEntry {
            file_type: FileType::from(self.file_type.trim()),
            path: self.path,
            size: self.size,
            uid: self.uid,
            gid: self.gid,
            mode,
            hash: self.hash.trim().to_string(),
            permanent: self.permanent,
        })
    }
}

impl Archive {
    /// Read `files.xml` from the container. Only parses once.
    pub fn read_files(&mut self) -> Result<()> {
        if self.files.is_some() {
            return Ok(());
        }

        let reader = self.entry_reader(FILES_ENTRY)?;
        let files = FileManifest::from_reader(reader).map_err(|e| match e {
            Error::Corrupted(msg) => Error::Corrupted(format!("{}: {}", self.id, msg)),
            other => other,
        })?;

        debug!("Read {} file records from {}", files.len(), self.id);
        self.files = Some(files);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::tempdir;

    fn entry(path: &str, hash: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            file_type: FileType::Data,
            size: 10,
            uid: 0,
            gid: 0,
            mode: 0o644,
            hash: hash.to_string(),
            permanent: None,
        }
    }

    fn paths(manifest: &FileManifest) -> Vec<&str> {
        manifest.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_files_parsing() {
        let xml = r#"<Files>
    <File>
        <Path>usr/bin/nano</Path>
        <Type>executable</Type>
        <Size>245096</Size>
        <UID>0</UID>
        <GID>0</GID>
        <Mode>0755</Mode>
        <Hash>da39a3ee5e6b4b0d3255bfef95601890afd80709</Hash>
    </File>
    <File>
        <Path>usr/share/nano</Path>
        <Type>data</Type>
        <Mode>0755</Mode>
    </File>
    <File>
        <Path>etc/nanorc</Path>
        <Type>config</Type>
        <Size>12</Size>
        <UID>0</UID>
        <GID>12</GID>
        <Mode>0644</Mode>
        <Hash>ffffffffffffffffffffffffffffffffffffffff</Hash>
        <Permanent>true</Permanent>
    </File>
</Files>"#;

        let files = FileManifest::from_reader(xml.as_bytes()).unwrap();
        assert_eq!(files.len(), 3);

        let nano = files.get("usr/bin/nano").unwrap();
        assert_eq!(nano.file_type, FileType::Executable);
        assert_eq!(nano.size, 245096);
        assert_eq!(nano.mode, 0o755);
        assert!(!nano.is_dir());

        let dir = files.get("usr/share/nano").unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.size, 0);

        let conf = files.get("etc/nanorc").unwrap();
        assert_eq!(conf.gid, 12);
        assert_eq!(conf.permanent.as_deref(), Some("true"));
        assert!(files.has_file("etc/nanorc"));
        assert!(!files.has_file("etc/vimrc"));
    }

    #[test]
    fn test_non_octal_mode_aborts_read() {
        let xml = r#"<Files>
    <File><Path>a</Path><Type>data</Type><Mode>0644</Mode><Hash>aa</Hash></File>
    <File><Path>b</Path><Type>data</Type><Mode>0985</Mode><Hash>bb</Hash></File>
</Files>"#;
        assert!(matches!(
            FileManifest::from_reader(xml.as_bytes()),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn test_directory_is_decided_by_hash_not_type() {
        // The type tag is descriptive only: a "doc" record with no hash is a
        // directory, and an "executable" record with a hash is not.
        let mut dir = entry("usr/share/doc/nano", "");
        dir.file_type = FileType::Doc;
        assert!(dir.is_dir());

        let mut file = entry("usr/bin", "abc");
        file.file_type = FileType::Other("directory".to_string());
        assert!(!file.is_dir());
    }

    #[test]
    fn test_mode_string() {
        let mut file = entry("a", "h");
        assert_eq!(file.mode_string(), "0644");
        file.mode = 0o4755;
        assert_eq!(file.mode_string(), "04755");
        file.mode = 0;
        assert_eq!(file.mode_string(), "0");
    }

    #[test]
    fn test_file_type_round_trip() {
        for tag in ["config", "data", "doc", "executable", "header", "info", "library", "localedata", "man", "font"] {
            assert_eq!(FileType::from(tag).as_str(), tag);
        }
    }

    #[test]
    fn test_diff_reports_modified_and_new() {
        let left = FileManifest::new(vec![entry("/a", "H1"), entry("/b", "H2")]);
        let right = FileManifest::new(vec![entry("/a", "H1"), entry("/b", "H3"), entry("/c", "H4")]);

        let diff = left.diff(&right);
        assert_eq!(diff.changed.files, vec![entry("/b", "H3"), entry("/c", "H4")]);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_diff_reports_removed() {
        let left = FileManifest::new(vec![entry("/a", "H1"), entry("/gone", "H2")]);
        let right = FileManifest::new(vec![entry("/a", "H1")]);

        let diff = left.diff(&right);
        assert!(diff.changed.is_empty());
        assert_eq!(paths(&diff.removed), vec!["/gone"]);
    }

    #[test]
    fn test_self_diff_is_empty() {
        let manifest = FileManifest::new(vec![entry("/a", "H1"), entry("/dir", ""), entry("/b", "H2")]);
        let diff = manifest.diff(&manifest);
        assert!(diff.changed.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_diff_catches_metadata_only_changes() {
        let base = entry("/usr/bin/tool", "H1");
        let mut chmod = base.clone();
        chmod.mode = 0o755;
        let mut chown = base.clone();
        chown.gid = 100;
        let mut perm = base.clone();
        perm.permanent = Some("true".to_string());

        for changed in [chmod, chown, perm] {
            let diff = FileManifest::new(vec![base.clone()]).diff(&FileManifest::new(vec![changed.clone()]));
            assert_eq!(diff.changed.files, vec![changed]);
            assert!(diff.removed.is_empty());
        }
    }

    #[test]
    fn test_diff_directory_permission_change() {
        let mut old_dir = entry("/usr/share/app", "");
        old_dir.mode = 0o755;
        let mut new_dir = old_dir.clone();
        new_dir.mode = 0o700;

        let diff = FileManifest::new(vec![old_dir]).diff(&FileManifest::new(vec![new_dir.clone()]));
        assert_eq!(diff.changed.files, vec![new_dir]);
    }

    #[test]
    fn test_diff_changed_plus_unchanged_covers_newer() {
        let left = FileManifest::new(vec![
            entry("/a", "H1"),
            entry("/b", "H2"),
            entry("/d", ""),
            entry("/old", "H5"),
        ]);
        let right = FileManifest::new(vec![
            entry("/moved", "H1"),
            entry("/b", "H2"),
            entry("/d", ""),
            entry("/a", "H9"),
        ]);

        let diff = left.diff(&right);
        let mut covered: Vec<&str> = paths(&diff.changed);
        covered.extend(right.iter().filter(|r| left.iter().any(|l| l == *r)).map(|f| f.path.as_str()));
        covered.sort();

        let mut expected = paths(&right);
        expected.sort();
        assert_eq!(covered, expected);
        assert_eq!(paths(&diff.removed), vec!["/old"]);
    }

    fn installed(root: &Path, rel: &str, content: &[u8], mode: u32) -> FileEntry {
        let path = root.join(rel);
        fs::write(&path, content).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        let meta = fs::symlink_metadata(&path).unwrap();

        let mut hasher = Sha1::new();
        hasher.update(content);
        FileEntry {
            path: rel.to_string(),
            file_type: FileType::Data,
            size: content.len() as u64,
            uid: meta.uid(),
            gid: meta.gid(),
            mode,
            hash: format!("{:x}", hasher.finalize()),
            permanent: None,
        }
    }

    #[test]
    fn test_verify_regular_file() {
        let dir = tempdir().unwrap();
        let file = installed(dir.path(), "hello.txt", b"hello world", 0o644);
        file.verify(dir.path()).unwrap();
        assert_eq!(file.hash, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[test]
    fn test_verify_detects_permission_flip() {
        let dir = tempdir().unwrap();
        let file = installed(dir.path(), "tool", b"#!/bin/sh\n", 0o755);
        fs::set_permissions(dir.path().join("tool"), fs::Permissions::from_mode(0o754)).unwrap();

        match file.verify(dir.path()) {
            Err(Error::VerificationMismatch { field, expected, actual, .. }) => {
                assert_eq!(field, VerifyField::Permissions);
                assert_eq!(expected, "755");
                assert_eq!(actual, "754");
            }
            other => panic!("expected permission mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_detects_content_change() {
        let dir = tempdir().unwrap();
        let file = installed(dir.path(), "data.bin", b"abcdef", 0o644);
        fs::write(dir.path().join("data.bin"), b"abcdeg").unwrap();

        match file.verify(dir.path()) {
            Err(Error::VerificationMismatch { field, .. }) => assert_eq!(field, VerifyField::Hash),
            other => panic!("expected hash mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_hash_is_lowercase_hex() {
        let dir = tempdir().unwrap();
        let mut file = installed(dir.path(), "hello.txt", b"hello world", 0o644);
        file.hash = file.hash.to_uppercase();

        match file.verify(dir.path()) {
            Err(Error::VerificationMismatch { field, actual, .. }) => {
                assert_eq!(field, VerifyField::Hash);
                assert_eq!(actual, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
            }
            other => panic!("expected hash mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_hashes_large_file() {
        let dir = tempdir().unwrap();
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let file = installed(dir.path(), "large.bin", &content, 0o644);
        file.verify(dir.path()).unwrap();

        let mut altered = content.clone();
        altered[150_000] ^= 1;
        fs::write(dir.path().join("large.bin"), &altered).unwrap();
        assert!(matches!(
            file.verify(dir.path()),
            Err(Error::VerificationMismatch { field: VerifyField::Hash, .. })
        ));
    }

    #[test]
    fn test_verify_detects_size_and_owner() {
        let dir = tempdir().unwrap();
        let mut file = installed(dir.path(), "f", b"12345", 0o644);
        file.size = 4;
        assert!(matches!(
            file.verify(dir.path()),
            Err(Error::VerificationMismatch { field: VerifyField::Size, .. })
        ));

        file.size = 5;
        file.uid = file.uid.wrapping_add(1);
        assert!(matches!(
            file.verify(dir.path()),
            Err(Error::VerificationMismatch { field: VerifyField::Uid, .. })
        ));

        file.uid = file.uid.wrapping_sub(1);
        file.gid = file.gid.wrapping_add(1);
        assert!(matches!(
            file.verify(dir.path()),
            Err(Error::VerificationMismatch { field: VerifyField::Gid, .. })
        ));
    }

    #[test]
    fn test_verify_symlink_hashes_target() {
        let dir = tempdir().unwrap();
        symlink("libfoo.so.1.2", dir.path().join("libfoo.so")).unwrap();
        let meta = fs::symlink_metadata(dir.path().join("libfoo.so")).unwrap();

        let mut hasher = Sha1::new();
        hasher.update(b"libfoo.so.1.2");
        let mut link = FileEntry {
            path: "/libfoo.so".to_string(),
            file_type: FileType::Library,
            size: meta.len(),
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode() & PERMISSION_MASK,
            hash: format!("{:x}", hasher.finalize()),
            permanent: None,
        };
        link.verify(dir.path()).unwrap();

        link.hash = "0000000000000000000000000000000000000000".to_string();
        assert!(matches!(
            link.verify(dir.path()),
            Err(Error::VerificationMismatch { field: VerifyField::Hash, .. })
        ));
    }

    #[test]
    fn test_verify_directory_skips_content() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("share")).unwrap();
        let meta = fs::symlink_metadata(dir.path().join("share")).unwrap();

        let record = FileEntry {
            path: "share".to_string(),
            file_type: FileType::Data,
            size: meta.len(),
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode() & PERMISSION_MASK,
            hash: String::new(),
            permanent: None,
        };
        record.verify(dir.path()).unwrap();
    }

    #[test]
    fn test_manifest_verify_stops_at_first_failure() {
        let dir = tempdir().unwrap();
        let good = installed(dir.path(), "good", b"good", 0o644);
        let mut bad = installed(dir.path(), "bad", b"bad", 0o644);
        bad.hash = "0".repeat(40);
        let missing = entry("missing", "H");

        let manifest = FileManifest::new(vec![good, bad, missing]);
        match manifest.verify(dir.path()) {
            Err(Error::VerificationMismatch { path, .. }) => assert_eq!(path, "bad"),
            other => panic!("expected mismatch on 'bad', got {:?}", other),
        }
    }

    #[test]
    fn test_verify_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(entry("nope", "H").verify(dir.path()), Err(Error::Io(_))));
    }
}
