// src/archive/metadata.rs

//! Package descriptor (`metadata.xml`)
//!
//! Optional sub-lists are modelled as `Option<…List>` so that a list which
//! is present but empty survives a round trip distinct from an omitted one.

use super::{Archive, METADATA_ENTRY};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;
use tracing::debug;

/// Language assumed for the first localised field when none is given
pub const DEFAULT_LANGUAGE: &str = "en";

/// A field value carrying an `xml:lang` attribute
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalisedField {
    #[serde(rename = "$text", default)]
    pub value: String,
    #[serde(
        rename = "@xml:lang",
        alias = "@lang",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub lang: String,
}

/// Trim every value and backfill the language of the first field
fn clean_localised(fields: &mut [LocalisedField]) {
    for field in fields.iter_mut() {
        field.value = field.value.trim().to_string();
    }
    if let Some(first) = fields.first_mut() {
        if first.lang.is_empty() {
            first.lang = DEFAULT_LANGUAGE.to_string();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Packager {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Origin of one or more binary packages sharing a source name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Source {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default)]
    pub packager: Packager,
}

/// A runtime dependency, optionally bounded by release or version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(rename = "$text", default)]
    pub name: String,
    #[serde(rename = "@releaseFrom", default, skip_serializing_if = "Option::is_none")]
    pub release_from: Option<u32>,
    #[serde(rename = "@releaseTo", default, skip_serializing_if = "Option::is_none")]
    pub release_to: Option<u32>,
    #[serde(rename = "@release", default, skip_serializing_if = "Option::is_none")]
    pub release: Option<u32>,
    #[serde(rename = "@versionFrom", default, skip_serializing_if = "Option::is_none")]
    pub version_from: Option<String>,
    #[serde(rename = "@versionTo", default, skip_serializing_if = "Option::is_none")]
    pub version_to: Option<String>,
    #[serde(rename = "@version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyList {
    #[serde(rename = "Dependency", default)]
    pub items: Vec<Dependency>,
}

/// `<Conflicts>` / `<Replaces>` lists of package names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageList {
    #[serde(rename = "Package", default)]
    pub items: Vec<String>,
}

/// A COMAR script binding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comar {
    #[serde(rename = "$text", default)]
    pub value: String,
    #[serde(rename = "@script", default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provides {
    #[serde(rename = "COMAR", default)]
    pub comar: Vec<Comar>,
    #[serde(rename = "PkgConfig", default)]
    pub pkg_config: Vec<String>,
    #[serde(rename = "PkgConfig32", default)]
    pub pkg_config32: Vec<String>,
}

/// Post-update action requested by a history entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "$text", default)]
    pub value: String,
    #[serde(rename = "@package", default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionList {
    #[serde(rename = "Action", default)]
    pub items: Vec<Action>,
}

/// One release in the package history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Update {
    #[serde(rename = "@release")]
    pub release: u32,
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub update_type: Option<String>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<ActionList>,
}

/// Release history, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    #[serde(rename = "Update", default)]
    pub updates: Vec<Update>,
}

/// A delta package advertised for this package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Delta {
    #[serde(rename = "@releaseFrom", default, skip_serializing_if = "Option::is_none")]
    pub release_from: Option<u32>,
    #[serde(rename = "PackageURI", default)]
    pub package_uri: String,
    #[serde(default)]
    pub package_size: u64,
    #[serde(default)]
    pub package_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaList {
    #[serde(rename = "Delta", default)]
    pub items: Vec<Delta>,
}

/// The `<Package>` section of `metadata.xml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Package {
    pub name: String,
    /// One line description, per language
    #[serde(default)]
    pub summary: Vec<LocalisedField>,
    /// Full description, per language
    #[serde(default)]
    pub description: Vec<LocalisedField>,
    #[serde(rename = "IsA", default, skip_serializing_if = "Option::is_none")]
    pub is_a: Option<String>,
    /// Component this package belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of: Option<String>,
    #[serde(default)]
    pub license: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_dependencies: Option<DependencyList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<PackageList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<PackageList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provides: Option<Provides>,
    #[serde(default)]
    pub history: History,
    #[serde(default)]
    pub build_host: String,
    #[serde(default)]
    pub distribution: String,
    #[serde(default)]
    pub distribution_release: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub installed_size: u64,
    /// Informational only
    #[serde(default)]
    pub package_size: u64,
    /// Informational only
    #[serde(default)]
    pub package_hash: String,
    #[serde(rename = "PackageURI", default)]
    pub package_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_packages: Option<DeltaList>,
    #[serde(default)]
    pub package_format: String,
    #[serde(default)]
    pub source: Source,
}

impl Package {
    /// The package's current release (newest history entry)
    pub fn release(&self) -> u32 {
        self.history.updates.first().map_or(0, |u| u.release)
    }

    /// The package's current version (newest history entry)
    pub fn version(&self) -> &str {
        self.history
            .updates
            .first()
            .map_or("", |u| u.version.as_str())
    }

    pub fn source_name(&self) -> &str {
        &self.source.name
    }

    /// Package ID as used by repository tooling: the basename of its URI
    pub fn id(&self) -> &str {
        Path::new(&self.package_uri)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// Repository subdirectory for this package's source.
    ///
    /// `lib*` sources longer than three characters split on their first
    /// four letters (`libr/libreoffice`), everything else on its first
    /// letter (`n/nano`).
    pub fn path_component(&self) -> String {
        let name = self.source.name.to_lowercase();
        let split = if name.starts_with("lib") && name.len() > 3 {
            4
        } else {
            1
        };
        match name.get(..split) {
            Some(prefix) => format!("{}/{}", prefix, name),
            None => name,
        }
    }

    /// Whether a delta from this package to `newer` is allowed.
    ///
    /// The distribution name is deliberately not compared: only release
    /// lineage, package name, distribution release and architecture.
    pub fn is_delta_possible(&self, newer: &Package) -> bool {
        self.release() < newer.release()
            && self.name == newer.name
            && self.distribution_release == newer.distribution_release
            && self.architecture == newer.architecture
    }

    /// File stem of the delta from this package to `newer`
    pub fn delta_name(&self, newer: &Package) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.name,
            self.release(),
            newer.release(),
            self.distribution_release,
            self.architecture
        )
    }

    /// Remove surrounding whitespace and add missing language attributes
    pub fn clean(&mut self) {
        clean_localised(&mut self.summary);
        clean_localised(&mut self.description);
    }
}

/// Order packages by ascending release
pub fn sort_by_release(packages: &mut [Package]) {
    packages.sort_by_key(Package::release);
}

/// Everything a package tells a user prior to installation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "PISI", rename_all = "PascalCase")]
pub struct Metadata {
    #[serde(default)]
    pub source: Source,
    pub package: Package,
}

impl Metadata {
    /// Parse and normalise a `metadata.xml` document
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut metadata: Metadata = quick_xml::de::from_reader(reader)
            .map_err(|e| Error::Corrupted(format!("{}: {}", METADATA_ENTRY, e)))?;

        if metadata.package.history.updates.is_empty() {
            return Err(Error::Corrupted(format!(
                "{}: package {} has no release history",
                METADATA_ENTRY, metadata.package.name
            )));
        }

        metadata.package.clean();
        Ok(metadata)
    }
}

impl Archive {
    /// Read `metadata.xml` from the container. Only parses once.
    pub fn read_metadata(&mut self) -> Result<()> {
        if self.metadata.is_some() {
            return Ok(());
        }

        let reader = self.entry_reader(METADATA_ENTRY)?;
        let metadata = Metadata::from_reader(reader).map_err(|e| match e {
            Error::Corrupted(msg) => Error::Corrupted(format!("{}: {}", self.id, msg)),
            other => other,
        })?;

        debug!(
            "Read metadata for {}: {} release {}",
            self.id,
            metadata.package.name,
            metadata.package.release()
        );
        self.metadata = Some(metadata);
        Ok(())
    }
}
