//! Sdist command

use anyhow::{Context, Result};
use std::path::Path;
use stubwheel_core::archive::{SourceArtifact, build_sdist};
use stubwheel_core::config::{BuildManifest, source_date_epoch};

use crate::env_lookup;

/// Repackage `source` into a metadata-only archive under `out_dir`.
pub fn sdist(source: &Path, project_dir: &Path, out_dir: &Path) -> Result<()> {
    let artifact = SourceArtifact::open(source)?;
    let manifest = BuildManifest::load_from_dir(project_dir)
        .with_context(|| format!("Failed to load manifest from {}", project_dir.display()))?;
    let mtime = source_date_epoch(env_lookup)?;

    tracing::info!(
        "Repackaging {} from {}",
        artifact.identifier(),
        artifact.path().display()
    );
    let path = build_sdist(&artifact, &manifest, out_dir, mtime)?;
    println!("{}", path.display());
    Ok(())
}
