//! stubwheel - reproducible stub source archives for binary Python packages
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! # Overview
//!
//! `stubwheel sdist` repackages a prebuilt wheel into a metadata-only
//! `.tar.gz` that can be published to a public index. When that archive is
//! installed, `stubwheel fetch` finds the wheel matching the running
//! interpreter on the package's own index and downloads it, verifying the
//! advertised digest.
//!
//! # Environment
//!
//! | Variable | Effect |
//! |---|---|
//! | `STUBWHEEL_INDEX_URL` | Replaces `[tool.wheel_stub].index_url` |
//! | `STUBWHEEL_NO_INDEX` | Disables remote resolution |
//! | `SOURCE_DATE_EPOCH` | Archive timestamp |
//! | `STUBWHEEL_LOG` | Log filter (falls back to `RUST_LOG`, then `info`) |

pub mod cmd;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use stubwheel_core::system::CapabilityOverrides;

/// Log filter variable, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "STUBWHEEL_LOG";

/// Environment lookup handed to the core's override functions.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[derive(Debug, Parser)]
#[command(name = "stubwheel")]
#[command(
    author,
    version,
    about = "stubwheel - reproducible stub source archives for binary Python packages"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Repackage a wheel into a metadata-only source archive
    Sdist {
        /// Wheel to repackage
        #[arg(long)]
        source: PathBuf,
        /// Directory holding pyproject.toml
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Where to write the archive
        #[arg(long, default_value = "dist")]
        out_dir: PathBuf,
    },
    /// Download the compatible wheel for an unpacked stub archive
    Fetch {
        /// Directory holding PKG-INFO and pyproject.toml
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Where to write the wheel
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        #[command(flatten)]
        system: CapabilityArgs,
    },
    /// Show the interpreter and platform tags used for matching
    Tags {
        #[command(flatten)]
        system: CapabilityArgs,
    },
    /// Parse an artifact filename and list its expanded tags
    Inspect {
        /// Wheel or source archive filename
        filename: String,
    },
}

/// Flags that pin the target system instead of probing Python.
#[derive(Debug, Clone, Default, Args)]
pub struct CapabilityArgs {
    /// Python interpreter to probe
    #[arg(long)]
    pub python: Option<PathBuf>,
    /// Interpreter tag, e.g. cp311
    #[arg(long)]
    pub interpreter_tag: Option<String>,
    /// Supported platform tag, most specific first (repeatable)
    #[arg(long = "platform-tag")]
    pub platform_tags: Vec<String>,
    /// Python 3 minor version (derived from a cpNN interpreter tag if omitted)
    #[arg(long)]
    pub minor_version: Option<u32>,
}

impl From<CapabilityArgs> for CapabilityOverrides {
    fn from(args: CapabilityArgs) -> Self {
        Self {
            python: args.python,
            interpreter_tag: args.interpreter_tag,
            platform_tags: args.platform_tags,
            minor_version: args.minor_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_platform_tags() {
        let cli = Cli::parse_from([
            "stubwheel",
            "tags",
            "--interpreter-tag",
            "cp311",
            "--platform-tag",
            "manylinux_2_28_x86_64",
            "--platform-tag",
            "linux_x86_64",
        ]);
        let Commands::Tags { system } = cli.command else {
            panic!("expected tags command");
        };
        let overrides = CapabilityOverrides::from(system);
        assert_eq!(overrides.interpreter_tag.as_deref(), Some("cp311"));
        assert_eq!(
            overrides.platform_tags,
            ["manylinux_2_28_x86_64", "linux_x86_64"]
        );
    }

    #[test]
    fn sdist_defaults() {
        let cli = Cli::parse_from(["stubwheel", "sdist", "--source", "demo-1.0-py3-none-any.whl"]);
        let Commands::Sdist {
            project_dir,
            out_dir,
            ..
        } = cli.command
        else {
            panic!("expected sdist command");
        };
        assert_eq!(project_dir, PathBuf::from("."));
        assert_eq!(out_dir, PathBuf::from("dist"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
