//! Detecting the [`SystemCapability`] of the target Python environment.
//!
//! Explicit values win. Anything not given explicitly is filled in by
//! running a short script under the Python interpreter found on `PATH`
//! (`python3`, then `python`) and reading the JSON it prints.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use thiserror::Error;

use crate::compat::{SystemCapability, cpython3_minor};

/// Errors from locating or probing an interpreter.
#[derive(Error, Debug)]
pub enum SystemError {
    /// No interpreter on `PATH`.
    #[error("no Python interpreter found on PATH (tried python3, python)")]
    NotFound,

    /// The interpreter could not be started.
    #[error("failed to run {}: {source}", python.display())]
    Spawn {
        /// Interpreter that was run.
        python: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The probe script exited unsuccessfully.
    #[error("{} exited with {status}: {stderr}", python.display())]
    Failed {
        /// Interpreter that was run.
        python: PathBuf,
        /// Exit status.
        status: std::process::ExitStatus,
        /// Captured standard error.
        stderr: String,
    },

    /// The probe output was not the expected JSON.
    #[error("unexpected probe output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Interpreter and platform facts printed by [`PROBE_SCRIPT`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InterpreterInfo {
    /// Interpreter tag, e.g. `cp311`.
    pub interpreter_tag: String,
    /// Python 3 minor version.
    pub minor_version: u32,
    /// Platform tags, most specific first.
    pub platform_tags: Vec<String>,
    /// Implementation name, e.g. `CPython`.
    pub implementation: String,
    /// Full interpreter version, e.g. `3.11.9`.
    pub version: String,
}

impl InterpreterInfo {
    /// Parse the probe output.
    ///
    /// # Errors
    ///
    /// [`SystemError::Output`] if the JSON does not have the expected shape.
    pub fn from_json(text: &str) -> Result<Self, SystemError> {
        Ok(serde_json::from_str(text.trim())?)
    }

    /// `"{implementation} {version}"`, as shown in failure reports.
    pub fn describe(&self) -> String {
        format!("{} {}", self.implementation, self.version)
    }
}

/// Prints interpreter and platform tags as JSON. Platform tags follow the
/// usual manylinux/macOS ordering: newest compatible first.
pub const PROBE_SCRIPT: &str = r#"
import json, platform, sys, sysconfig

impl = sys.implementation.name
short = {"cpython": "cp", "pypy": "pp", "ironpython": "ip", "jython": "jy"}.get(impl, impl)
interp = "%s%d%d" % (short, sys.version_info[0], sys.version_info[1])
plat = sysconfig.get_platform().replace("-", "_").replace(".", "_")
tags = []

if plat.startswith("linux_"):
    arch = plat[len("linux_"):]
    if arch == "x86_64" and sys.maxsize <= 2**32:
        arch = "i686"
    libc, ver = platform.libc_ver()
    if libc == "glibc" and ver:
        major, minor = (int(p) for p in ver.split(".")[:2])
        floor = 5 if arch in ("x86_64", "i686") else 17
        legacy = {(2, 17): "manylinux2014", (2, 12): "manylinux2010", (2, 5): "manylinux1"}
        for m in range(minor, floor - 1, -1):
            tags.append("manylinux_%d_%d_%s" % (major, m, arch))
            if (major, m) in legacy:
                tags.append("%s_%s" % (legacy[(major, m)], arch))
    tags.append("linux_" + arch)
elif plat.startswith("macosx_"):
    arch = platform.machine()
    mac_ver = platform.mac_ver()[0]
    release = [int(p) for p in mac_ver.split(".")[:2]] if mac_ver else [10, 16]
    if len(release) < 2:
        release.append(0)
    arches = [arch, "universal2"]
    if arch == "x86_64":
        arches += ["intel", "universal"]
    for major in range(release[0], 10, -1):
        for a in arches:
            tags.append("macosx_%d_0_%s" % (major, a))
    top = 16 if release[0] >= 11 else release[1]
    if arch == "x86_64":
        for minor in range(top, 3, -1):
            for a in arches:
                tags.append("macosx_10_%d_%s" % (minor, a))
else:
    tags.append(plat)

print(json.dumps({
    "interpreter_tag": interp,
    "minor_version": sys.version_info[1],
    "platform_tags": tags,
    "implementation": platform.python_implementation(),
    "version": platform.python_version(),
}))
"#;

/// Locate an interpreter: `explicit` if given, else `python3`, else `python`.
///
/// # Errors
///
/// [`SystemError::NotFound`] if none is available.
pub fn find_python(explicit: Option<&Path>) -> Result<PathBuf, SystemError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    which::which("python3")
        .or_else(|_| which::which("python"))
        .map_err(|_| SystemError::NotFound)
}

/// Run [`PROBE_SCRIPT`] under `python`.
///
/// # Errors
///
/// [`SystemError::Spawn`], [`SystemError::Failed`] or [`SystemError::Output`].
pub fn probe(python: &Path) -> Result<InterpreterInfo, SystemError> {
    tracing::debug!("Probing {}", python.display());
    let output = Command::new(python)
        .args(["-c", PROBE_SCRIPT])
        .output()
        .map_err(|source| SystemError::Spawn {
            python: python.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(SystemError::Failed {
            python: python.to_path_buf(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    InterpreterInfo::from_json(&String::from_utf8_lossy(&output.stdout))
}

/// Explicitly supplied capability values.
#[derive(Debug, Clone, Default)]
pub struct CapabilityOverrides {
    /// Interpreter to probe instead of the one on `PATH`.
    pub python: Option<PathBuf>,
    /// Interpreter tag, e.g. `cp311`.
    pub interpreter_tag: Option<String>,
    /// Platform tags, most specific first.
    pub platform_tags: Vec<String>,
    /// Python 3 minor version.
    pub minor_version: Option<u32>,
}

impl CapabilityOverrides {
    /// The capability set, if the overrides alone are enough to build it.
    ///
    /// A missing minor version is derived from a `cpNN` interpreter tag.
    pub fn complete(&self) -> Option<SystemCapability> {
        let interpreter = self.interpreter_tag.as_deref()?;
        if self.platform_tags.is_empty() {
            return None;
        }
        let minor = self
            .minor_version
            .or_else(|| cpython3_minor(&interpreter.to_ascii_lowercase()))?;
        Some(SystemCapability::new(interpreter, &self.platform_tags, minor))
    }

    /// Fill any gaps in the overrides from `info`.
    pub fn merge(&self, info: &InterpreterInfo) -> SystemCapability {
        let interpreter = self
            .interpreter_tag
            .as_deref()
            .unwrap_or(&info.interpreter_tag);
        let platforms = if self.platform_tags.is_empty() {
            &info.platform_tags
        } else {
            &self.platform_tags
        };
        SystemCapability::new(
            interpreter,
            platforms,
            self.minor_version.unwrap_or(info.minor_version),
        )
    }
}

/// The capability set and, when an interpreter was probed, what it reported.
#[derive(Debug, Clone)]
pub struct DetectedSystem {
    /// Capability used for tag matching.
    pub capability: SystemCapability,
    /// Probe result, if one was needed.
    pub interpreter: Option<InterpreterInfo>,
}

/// Build the capability set from `overrides`, probing an interpreter only
/// when they are incomplete.
///
/// # Errors
///
/// Any [`SystemError`] from locating or probing the interpreter.
pub fn detect(overrides: &CapabilityOverrides) -> Result<DetectedSystem, SystemError> {
    if let Some(capability) = overrides.complete() {
        return Ok(DetectedSystem {
            capability,
            interpreter: None,
        });
    }

    let python = find_python(overrides.python.as_deref())?;
    let info = probe(&python)?;
    tracing::debug!(
        "{} reports {} with {} platform tags",
        python.display(),
        info.interpreter_tag,
        info.platform_tags.len()
    );
    Ok(DetectedSystem {
        capability: overrides.merge(&info),
        interpreter: Some(info),
    })
}
