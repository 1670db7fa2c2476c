//! Shared data model for stubwheel.
//!
//! Everything in this crate is pure: parsing and formatting of artifact
//! metadata, artifact filenames, compatibility tags and hash hints. No I/O.

pub mod hash;
pub mod identifier;
pub mod metadata;
pub mod tags;

// Re-exports
pub use hash::*;
pub use identifier::*;
pub use metadata::*;
pub use tags::*;

/// Extension of prebuilt binary artifacts.
pub const WHEEL_EXTENSION: &str = ".whl";

/// Extension of the repackaged archives this system produces.
pub const SDIST_EXTENSION: &str = ".tar.gz";
