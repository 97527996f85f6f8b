// src/error.rs

use std::fmt;
use thiserror::Error;
use zip::result::ZipError;

/// Field that failed on-disk verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyField {
    Size,
    Permissions,
    Uid,
    Gid,
    Hash,
}

impl VerifyField {
    pub fn as_str(&self) -> &str {
        match self {
            VerifyField::Size => "size",
            VerifyField::Permissions => "permission",
            VerifyField::Uid => "UID",
            VerifyField::Gid => "GID",
            VerifyField::Hash => "hash",
        }
    }
}

impl fmt::Display for VerifyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error types for eopkg handling
#[derive(Error, Debug)]
pub enum Error {
    /// A mandatory container entry is missing or fails to parse
    #[error("Package archive is corrupted: {0}")]
    Corrupted(String),

    /// The two packages do not share a release lineage
    #[error("Delta is not possible between {left} and {right}")]
    MismatchedDelta { left: String, right: String },

    /// The file sets are identical, so a delta would carry nothing
    #[error("File set is the same, no point in creating delta")]
    DeltaPointless,

    /// An installed file diverges from its manifest record
    #[error("'{path}' {field} mismatch: {actual} != {expected}")]
    VerificationMismatch {
        path: String,
        field: VerifyField,
        expected: String,
        actual: String,
    },

    /// I/O errors, including external codec failures
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ZipError> for Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(e) => Error::Io(e),
            other => Error::Corrupted(other.to_string()),
        }
    }
}

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;
