//! Fetch command

use anyhow::Result;
use std::path::Path;
use stubwheel_core::config::BuildConfig;
use stubwheel_core::report::FailureReport;
use stubwheel_core::resolve::{ResolveError, ResolvedArtifact, Resolver, StubProject};
use stubwheel_core::system::{self, CapabilityOverrides, InterpreterInfo};
use thiserror::Error;

use crate::env_lookup;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{0}")]
    InstallFailed(Box<FailureReport>),
}

/// Download the compatible binary artifact for the project in `project_dir`.
pub async fn fetch(
    project_dir: &Path,
    out_dir: &Path,
    overrides: &CapabilityOverrides,
) -> Result<()> {
    let project = StubProject::load(project_dir)?;
    let mut config = project.manifest.config.clone();
    config.apply_env_overrides(env_lookup);

    let mut python = None;
    match attempt(&project, &config, overrides, out_dir, &mut python).await {
        Ok(resolved) => {
            tracing::info!(
                "Fetched {} ({}) from {}",
                resolved.filename,
                resolved.tag,
                resolved.url
            );
            println!("{}", resolved.path.display());
            Ok(())
        }
        Err(e) => {
            // Stub-only refusals carry no cause section.
            let cause: Option<&(dyn std::error::Error + 'static)> = match &e {
                ResolveError::StubOnly { .. } => None,
                other => Some(other),
            };
            let mut report = FailureReport::new(&project.identifier, &config, cause);
            if let Some(python) = python {
                report = report.with_python(python);
            }
            Err(FetchError::InstallFailed(Box::new(report)).into())
        }
    }
}

async fn attempt(
    project: &StubProject,
    config: &BuildConfig,
    overrides: &CapabilityOverrides,
    out_dir: &Path,
    python: &mut Option<String>,
) -> Result<ResolvedArtifact, ResolveError> {
    let detected = system::detect(overrides)?;
    *python = detected.interpreter.as_ref().map(InterpreterInfo::describe);
    tracing::debug!("System capability:\n{}", detected.capability);

    Resolver::new()?
        .fetch_project(project, config, &detected.capability, out_dir)
        .await
}
