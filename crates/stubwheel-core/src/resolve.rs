//! Resolution orchestration: listing fetch, candidate selection and
//! verified download.

use std::path::{Path, PathBuf};

use reqwest::Client;
use stubwheel_schema::{
    CompatibilityTag, HashAlgorithm, MetadataDocument, MetadataError, PackageIdentifier,
};
use thiserror::Error;
use url::Url;

use crate::USER_AGENT;
use crate::compat::{SystemCapability, select_candidate};
use crate::config::{BuildConfig, BuildManifest, ConfigError, PKG_INFO_FILE};
use crate::io::download::{self, DownloadError, RetryPolicy};
use crate::listing::parse_listing;
use crate::system::SystemError;

/// Errors from resolving and fetching an artifact.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No listed artifact matches the version and the system.
    #[error("Didn't find wheel for {name} {version} ({candidates} wheels listed)")]
    NoCompatibleArtifact {
        /// Canonical package name.
        name: String,
        /// Requested version.
        version: String,
        /// Number of binary artifacts the listing advertised.
        candidates: usize,
    },

    /// The manifest marks the package as installable only from its own index.
    #[error("{name} {version} is a stub and must be installed from its index directly")]
    StubOnly {
        /// Canonical package name.
        name: String,
        /// Requested version.
        version: String,
    },

    /// Remote resolution was disabled through the environment.
    #[error("remote index resolution is disabled")]
    Disabled,

    /// No index URL in the manifest or environment.
    #[error("no index_url configured in [tool.wheel_stub]")]
    MissingIndexUrl,

    /// The index URL could not be parsed or joined.
    #[error("invalid index URL {url}: {source}")]
    InvalidIndexUrl {
        /// Offending URL.
        url: String,
        /// Parse error.
        #[source]
        source: url::ParseError,
    },

    /// Fetching the listing or the artifact failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The project metadata is unreadable or incomplete.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The build manifest is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The target system could not be detected.
    #[error(transparent)]
    System(#[from] SystemError),
}

/// An artifact written to disk.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    /// Original filename.
    pub filename: String,
    /// Where it was written.
    pub path: PathBuf,
    /// Where it came from.
    pub url: Url,
    /// Tag that made it compatible.
    pub tag: CompatibilityTag,
    /// Digest algorithm it was verified with, if the index advertised one.
    pub verified: Option<HashAlgorithm>,
}

/// An unpacked repackaged archive: `PKG-INFO` plus the build manifest.
#[derive(Debug, Clone)]
pub struct StubProject {
    /// Canonicalized name and version from `PKG-INFO`.
    pub identifier: PackageIdentifier,
    /// Build manifest.
    pub manifest: BuildManifest,
}

impl StubProject {
    /// Read `PKG-INFO` and `pyproject.toml` from `dir`.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Config`] or [`ResolveError::Metadata`] if either file
    /// is missing or invalid.
    pub fn load(dir: &Path) -> Result<Self, ResolveError> {
        let pkg_info = dir.join(PKG_INFO_FILE);
        let raw = std::fs::read_to_string(&pkg_info).map_err(|source| ConfigError::Io {
            path: pkg_info,
            source,
        })?;
        let metadata = MetadataDocument::parse(&raw)?;
        let identifier = PackageIdentifier::from_metadata(&metadata)?;
        let manifest = BuildManifest::load_from_dir(dir)?;
        Ok(Self {
            identifier: PackageIdentifier::new(identifier.name.canonical(), identifier.version),
            manifest,
        })
    }
}

/// Finds and downloads compatible artifacts from a remote index.
#[derive(Debug, Clone)]
pub struct Resolver {
    client: Client,
    retry: RetryPolicy,
}

impl Resolver {
    /// Create a resolver with the default retry policy.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Client`] if the HTTP client cannot be initialised.
    pub fn new() -> Result<Self, ResolveError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(ResolveError::Client)?;
        Ok(Self {
            client,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Project page URL: `{index_base}{canonical-name}/`.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Disabled`], [`ResolveError::MissingIndexUrl`] or
    /// [`ResolveError::InvalidIndexUrl`].
    pub fn project_url(
        identifier: &PackageIdentifier,
        config: &BuildConfig,
    ) -> Result<Url, ResolveError> {
        if config.index_disabled {
            return Err(ResolveError::Disabled);
        }
        let base = config.index_base().ok_or(ResolveError::MissingIndexUrl)?;
        let invalid = |source| ResolveError::InvalidIndexUrl {
            url: base.clone(),
            source,
        };
        Url::parse(&base)
            .and_then(|url| url.join(&format!("{}/", identifier.name.canonical())))
            .map_err(invalid)
    }

    /// Find the first compatible artifact for `identifier` and download it
    /// into `out_dir`.
    ///
    /// # Errors
    ///
    /// Any [`ResolveError`]; [`ResolveError::NoCompatibleArtifact`] when
    /// nothing matches.
    pub async fn resolve(
        &self,
        identifier: &PackageIdentifier,
        config: &BuildConfig,
        system: &SystemCapability,
        out_dir: &Path,
    ) -> Result<ResolvedArtifact, ResolveError> {
        let project_url = Self::project_url(identifier, config)?;
        tracing::debug!("Querying project url: {project_url}");

        let html = download::fetch_text(&self.client, &project_url, &self.retry).await?;
        let candidates = parse_listing(&html, &project_url);

        let selection =
            select_candidate(&candidates, &identifier.version, system).ok_or_else(|| {
                ResolveError::NoCompatibleArtifact {
                    name: identifier.name.canonical().to_string(),
                    version: identifier.version.clone(),
                    candidates: candidates.len(),
                }
            })?;
        let candidate = selection.candidate;

        tracing::info!("Downloading wheel {}", candidate.filename);
        let path = download::download_verified(
            &self.client,
            &candidate.download_url,
            out_dir,
            &candidate.filename,
            candidate.hash_hint.as_ref(),
            &self.retry,
        )
        .await?;

        Ok(ResolvedArtifact {
            filename: candidate.filename.clone(),
            path,
            url: candidate.download_url.clone(),
            tag: selection.tag.clone(),
            verified: candidate.hash_hint.as_ref().map(|h| h.algorithm),
        })
    }

    /// Install-time fetch for an unpacked repackaged archive. Refuses
    /// stub-only projects.
    ///
    /// # Errors
    ///
    /// [`ResolveError::StubOnly`], otherwise as [`Self::resolve`].
    pub async fn fetch_project(
        &self,
        project: &StubProject,
        config: &BuildConfig,
        system: &SystemCapability,
        out_dir: &Path,
    ) -> Result<ResolvedArtifact, ResolveError> {
        if config.stub_only == Some(true) {
            return Err(ResolveError::StubOnly {
                name: project.identifier.name.canonical().to_string(),
                version: project.identifier.version.clone(),
            });
        }
        self.resolve(&project.identifier, config, system, out_dir)
            .await
    }
}
