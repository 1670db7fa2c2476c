//! Build manifest (`pyproject.toml`) loading and environment overrides.
//!
//! The recognized options live in the `[tool.wheel_stub]` table:
//!
//! ```toml
//! [tool.wheel_stub]
//! index_url = "https://pypi.nvidia.com/"
//! stub_only = true               # optional
//! include_cuda_debuginfo = true  # optional, failure reports only
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Build manifest filename inside a project directory and a repackaged archive.
pub const MANIFEST_FILE: &str = "pyproject.toml";

/// Metadata filename inside a repackaged archive.
pub const PKG_INFO_FILE: &str = "PKG-INFO";

/// Archive timestamp used when `SOURCE_DATE_EPOCH` is unset (1993-04-05).
pub const DEFAULT_SOURCE_DATE: u32 = 733_993_200;

/// Replaces the manifest's `index_url`.
pub const ENV_INDEX_URL: &str = "STUBWHEEL_INDEX_URL";

/// Disables remote resolution when truthy.
pub const ENV_NO_INDEX: &str = "STUBWHEEL_NO_INDEX";

/// Reproducible-build timestamp override.
pub const ENV_SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

/// Errors loading or editing the build manifest.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The manifest file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid TOML or has mistyped options.
    #[error("invalid build manifest: {0}")]
    Parse(#[from] toml::de::Error),

    /// The manifest could not be parsed for editing.
    #[error("invalid build manifest: {0}")]
    Edit(#[from] toml_edit::TomlError),

    /// No `[tool.wheel_stub]` table.
    #[error("Missing [tool.wheel_stub] section in {MANIFEST_FILE}")]
    MissingSection,

    /// `SOURCE_DATE_EPOCH` is set to something other than a timestamp.
    #[error("{ENV_SOURCE_DATE_EPOCH} must be a non-negative 32-bit integer, got {0:?}")]
    InvalidSourceDateEpoch(String),
}

/// Options recognized in `[tool.wheel_stub]`, after environment overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildConfig {
    /// Base URL of the remote index.
    #[serde(default)]
    pub index_url: Option<String>,

    /// Explicit author declaration; `None` when the key is absent.
    #[serde(default)]
    pub stub_only: Option<bool>,

    /// Add GPU driver details to failure reports.
    #[serde(default)]
    pub include_cuda_debuginfo: bool,

    /// Set from the environment only; never read from the manifest.
    #[serde(skip)]
    pub index_disabled: bool,
}

impl BuildConfig {
    /// Apply `STUBWHEEL_INDEX_URL` and `STUBWHEEL_NO_INDEX` through `lookup`
    /// (normally `|k| std::env::var(k).ok()`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_INDEX_URL).filter(|u| !u.trim().is_empty()) {
            tracing::debug!("Index URL overridden by {ENV_INDEX_URL}: {url}");
            self.index_url = Some(url);
        }
        if lookup(ENV_NO_INDEX).is_some_and(|v| is_truthy(&v)) {
            tracing::debug!("Remote resolution disabled by {ENV_NO_INDEX}");
            self.index_disabled = true;
        }
    }

    /// The index base URL with a trailing `/`, if one is configured.
    pub fn index_base(&self) -> Option<String> {
        let url = self.index_url.as_deref()?.trim();
        if url.is_empty() {
            return None;
        }
        if url.ends_with('/') {
            Some(url.to_string())
        } else {
            Some(format!("{url}/"))
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Deserialize)]
struct PyProject {
    tool: Option<Tools>,
}

#[derive(Deserialize)]
struct Tools {
    wheel_stub: Option<BuildConfig>,
}

/// A build manifest: raw text for verbatim emission plus the parsed view.
#[derive(Debug, Clone)]
pub struct BuildManifest {
    raw: String,
    executable: bool,
    /// Parsed `[tool.wheel_stub]` options.
    pub config: BuildConfig,
}

impl BuildManifest {
    /// Parse manifest text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for invalid TOML, [`ConfigError::MissingSection`]
    /// when `[tool.wheel_stub]` is absent.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ConfigError> {
        let raw = raw.into();
        let project: PyProject = toml::from_str(&raw)?;
        let config = project
            .tool
            .and_then(|t| t.wheel_stub)
            .ok_or(ConfigError::MissingSection)?;
        Ok(Self {
            raw,
            executable: false,
            config,
        })
    }

    /// Read and parse a manifest file, remembering whether it is executable.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as [`Self::parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let raw = std::fs::read_to_string(path).map_err(io_err)?;
        let mut manifest = Self::parse(raw)?;
        manifest.executable = is_executable(path).map_err(io_err)?;
        Ok(manifest)
    }

    /// Load `pyproject.toml` from a project directory.
    ///
    /// # Errors
    ///
    /// As [`Self::load`].
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Self::load(&dir.join(MANIFEST_FILE))
    }

    /// Manifest text exactly as read.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether the manifest file had its owner-execute bit set.
    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Manifest text with `stub_only = true` set in `[tool.wheel_stub]`.
    /// Everything else, including comments and layout, is preserved.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Edit`] if the text is not valid TOML,
    /// [`ConfigError::MissingSection`] if the table is missing.
    pub fn with_stub_only(&self) -> Result<String, ConfigError> {
        let mut doc: toml_edit::DocumentMut = self.raw.parse()?;
        let table = doc
            .get_mut("tool")
            .and_then(|tool| tool.get_mut("wheel_stub"))
            .and_then(toml_edit::Item::as_table_like_mut)
            .ok_or(ConfigError::MissingSection)?;
        table.insert("stub_only", toml_edit::value(true));
        Ok(doc.to_string())
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(path)?.permissions().mode() & 0o100 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> std::io::Result<bool> {
    std::fs::metadata(path).map(|_| false)
}

/// Archive timestamp: `SOURCE_DATE_EPOCH` if set, else [`DEFAULT_SOURCE_DATE`].
///
/// # Errors
///
/// [`ConfigError::InvalidSourceDateEpoch`] if the variable is set but not a
/// `u32`.
pub fn source_date_epoch<F>(lookup: F) -> Result<u32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(ENV_SOURCE_DATE_EPOCH) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidSourceDateEpoch(value)),
        None => Ok(DEFAULT_SOURCE_DATE),
    }
}
