// src/compression/mod.rs

//! Payload compression for eopkg archives
//!
//! The payload of every package is an xz-compressed tarball. Archive code
//! only ever talks to the narrow `Codec` trait, so the external `xz` tool
//! can be swapped for the in-process `XzStream` without touching callers.

pub mod xz;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

pub use xz::{XzCommand, XzStream};

/// Suffix appended by `Codec::compress`
pub const XZ_SUFFIX: &str = ".xz";

/// Tunables shared by the xz codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    /// xz preset level (0-9)
    pub level: u32,
    /// Thread hint passed to the codec
    pub threads: u32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            level: 6,
            threads: 2,
        }
    }
}

/// File-to-file compressor contract used by the payload code
pub trait Codec {
    /// Compress `input` into `input + ".xz"`, returning the new path
    fn compress(&self, input: &Path, keep_original: bool) -> Result<PathBuf>;

    /// Decompress `input` (which must end in ".xz") next to itself,
    /// returning the path with the suffix removed
    fn decompress(&self, input: &Path, keep_original: bool) -> Result<PathBuf>;
}

/// Path produced by compressing `input`
pub fn compressed_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(XZ_SUFFIX);
    PathBuf::from(name)
}

/// Path produced by decompressing `input`
pub fn decompressed_path(input: &Path) -> Result<PathBuf> {
    input
        .to_str()
        .and_then(|s| s.strip_suffix(XZ_SUFFIX))
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} does not have an {} suffix", input.display(), XZ_SUFFIX),
            ))
        })
}
