// src/lib.rs

//! eopkg package archives
//!
//! Reads, verifies and produces delta packages for the `.eopkg` binary
//! package format: a zip container holding `metadata.xml`, `files.xml` and
//! an xz-compressed tarball of the installed files.
//!
//! # Architecture
//!
//! - Archive: lazy, parse-once access to the container and its XML documents
//! - Diff: attribute-level comparison of two file manifests
//! - Delta: rebuilds a container whose payload only holds changed files
//! - Verify: checks an installed tree against the manifest, file by file
//! - Compression: the payload codec sits behind the `Codec` trait

pub mod archive;
pub mod compression;
mod error;

pub use archive::{Archive, DeltaProducer, DiffResult, FileEntry, FileManifest, UnpackOptions};
pub use compression::{Codec, CompressionSettings, XzCommand, XzStream};
pub use error::{Error, Result, VerifyField};
