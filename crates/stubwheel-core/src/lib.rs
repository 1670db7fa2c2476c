//! Core library for stubwheel: tag compatibility, index listing parsing,
//! verified downloads and reproducible repackaging.

pub mod archive;
pub mod compat;
pub mod config;
pub mod io;
pub mod listing;
pub mod report;
pub mod resolve;
pub mod system;

pub use archive::{ArchiveError, RepackagePlan, SourceArtifact};
pub use compat::{Rejection, Selection, SystemCapability, is_compatible, select_candidate};
pub use config::{BuildConfig, BuildManifest, ConfigError};
pub use listing::{ArtifactCandidate, parse_listing};
pub use resolve::{ResolveError, ResolvedArtifact, Resolver, StubProject};

/// User Agent string sent with every index and artifact request
pub const USER_AGENT: &str = concat!("stubwheel/", env!("CARGO_PKG_VERSION"));
