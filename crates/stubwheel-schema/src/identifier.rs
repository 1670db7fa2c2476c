//! Package identity and artifact filename grammars.
//!
//! Two filename shapes are recognized:
//!
//! | Kind | Grammar |
//! |---|---|
//! | Binary (wheel) | `{name}-{version}(-{build})?-{interp}-{abi}-{platform}.whl` |
//! | Source archive | `{name}-{version}.tar.gz` or `{name}-{version}.zip` |

use std::hash::{Hash, Hasher};

use thiserror::Error;

use crate::metadata::{MetadataDocument, MetadataError};
use crate::tags::CompatibilityTag;
use crate::{SDIST_EXTENSION, WHEEL_EXTENSION};

/// Errors from parsing an artifact filename.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    /// The filename matches neither the binary nor the source archive grammar.
    #[error("unrecognized artifact filename `{0}`")]
    Unrecognized(String),
}

/// A distribution name, compared in its normalized form.
///
/// Normalization lowercases the name and collapses every run of `-`, `_`
/// and `.` into a single `-`, so `Foo_Bar`, `foo.bar` and `foo--bar` are
/// all the same package.
#[derive(Debug, Clone)]
pub struct PackageName {
    raw: String,
    canonical: String,
}

impl PackageName {
    /// Wrap a name as written by its author.
    pub fn new(name: impl Into<String>) -> Self {
        let raw = name.into();
        let canonical = canonicalize(&raw);
        Self { raw, canonical }
    }

    /// The name exactly as it was given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Normalized form: lowercase, separators collapsed to `-`.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Normalized form with `-` replaced by `_`, as used in artifact
    /// filenames and archive directory names.
    pub fn filename_component(&self) -> String {
        self.canonical.replace('-', "_")
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for PackageName {}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

fn canonicalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }
    out
}

/// A pinned `(name, version)` pair. The version is an opaque exact-match string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentifier {
    /// Distribution name.
    pub name: PackageName,
    /// Exact version string.
    pub version: String,
}

impl PackageIdentifier {
    /// Create an identifier.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: PackageName::new(name),
            version: version.into(),
        }
    }

    /// Read `Name` and `Version` from a metadata document.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::MissingField`] (with the serialized document
    /// attached) when either field is absent.
    pub fn from_metadata(doc: &MetadataDocument) -> Result<Self, MetadataError> {
        let field = |key: &'static str| {
            doc.get(key)
                .map(str::trim)
                .ok_or_else(|| MetadataError::MissingField {
                    field: key,
                    raw: doc.to_string(),
                })
        };
        Ok(Self::new(field("Name")?, field("Version")?))
    }

    /// `{name_}-{version}`: the stem shared by the archive root directory,
    /// the archive filename and the `.dist-info` directory.
    pub fn dist_stem(&self) -> String {
        format!("{}-{}", self.name.filename_component(), self.version)
    }

    /// Path of the metadata entry inside a binary artifact.
    pub fn metadata_entry(&self) -> String {
        format!("{}.dist-info/METADATA", self.dist_stem())
    }

    /// Filename of the repackaged archive.
    pub fn sdist_filename(&self) -> String {
        format!("{}{SDIST_EXTENSION}", self.dist_stem())
    }
}

impl std::fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// A parsed binary artifact filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    /// Name and version.
    pub identifier: PackageIdentifier,
    /// Optional build tag (always starts with a digit).
    pub build: Option<String>,
    /// Expanded tag set, in declaration order.
    pub tags: Vec<CompatibilityTag>,
}

impl WheelFilename {
    /// Parse `{name}-{version}(-{build})?-{interp}-{abi}-{platform}.whl`.
    ///
    /// # Errors
    ///
    /// Returns [`FilenameError::Unrecognized`] for any other shape.
    pub fn parse(filename: &str) -> Result<Self, FilenameError> {
        let unrecognized = || FilenameError::Unrecognized(filename.to_string());

        let stem = filename
            .strip_suffix(WHEEL_EXTENSION)
            .ok_or_else(unrecognized)?;
        let parts: Vec<&str> = stem.split('-').collect();

        let (name, version, build, tag_parts) = match parts.as_slice() {
            [name, version, interp, abi, platform] => {
                (*name, *version, None, (*interp, *abi, *platform))
            }
            [name, version, build, interp, abi, platform] => {
                (*name, *version, Some(*build), (*interp, *abi, *platform))
            }
            _ => return Err(unrecognized()),
        };

        if !is_valid_name(name) || version.is_empty() {
            return Err(unrecognized());
        }
        if build.is_some_and(|b| !b.starts_with(|c: char| c.is_ascii_digit())) {
            return Err(unrecognized());
        }

        let tags = CompatibilityTag::expand(tag_parts.0, tag_parts.1, tag_parts.2)
            .map_err(|_| unrecognized())?;

        Ok(Self {
            identifier: PackageIdentifier::new(name, version),
            build: build.map(str::to_string),
            tags,
        })
    }
}

/// Either recognized artifact filename shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactFilename {
    /// A prebuilt binary artifact.
    Wheel(WheelFilename),
    /// A portable source archive.
    Sdist(PackageIdentifier),
}

impl ArtifactFilename {
    /// Parse a filename against both grammars.
    ///
    /// # Errors
    ///
    /// Returns [`FilenameError::Unrecognized`] when neither grammar matches.
    pub fn parse(filename: &str) -> Result<Self, FilenameError> {
        if filename.ends_with(WHEEL_EXTENSION) {
            return WheelFilename::parse(filename).map(Self::Wheel);
        }

        let stem = filename
            .strip_suffix(SDIST_EXTENSION)
            .or_else(|| filename.strip_suffix(".zip"))
            .ok_or_else(|| FilenameError::Unrecognized(filename.to_string()))?;

        match stem.rsplit_once('-') {
            Some((name, version)) if is_valid_name(name) && !version.is_empty() => {
                Ok(Self::Sdist(PackageIdentifier::new(name, version)))
            }
            _ => Err(FilenameError::Unrecognized(filename.to_string())),
        }
    }

    /// Name and version, whichever grammar matched.
    pub fn identifier(&self) -> &PackageIdentifier {
        match self {
            Self::Wheel(wheel) => &wheel.identifier,
            Self::Sdist(identifier) => identifier,
        }
    }
}

/// Names are ASCII alphanumerics plus `.`, `_` and (for source archives) `-`.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
