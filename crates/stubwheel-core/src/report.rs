//! Operator-facing diagnostics for a failed install-time fetch.

use std::fmt;
use std::process::Command;

use regex::Regex;
use stubwheel_schema::PackageIdentifier;

use crate::config::BuildConfig;

/// Everything an operator needs to diagnose why a package could not be fetched.
#[derive(Debug, Clone)]
pub struct FailureReport {
    /// Canonical distribution name.
    pub distribution: String,
    /// Requested version.
    pub version: String,
    /// Index the package is served from, if configured.
    pub index_url: Option<String>,
    /// Interpreter description, e.g. `CPython 3.11.9`.
    pub python: Option<String>,
    /// Operating system name and kernel release.
    pub os: String,
    /// CPU architecture.
    pub arch: String,
    /// GPU driver details, when requested by the manifest.
    pub cuda: Option<String>,
    /// The error and its causes, outermost first. Empty for a stub-only refusal.
    pub causes: Vec<String>,
}

impl FailureReport {
    /// Collect host details for `identifier`. `error` is walked through its
    /// `source()` chain.
    pub fn new(
        identifier: &PackageIdentifier,
        config: &BuildConfig,
        error: Option<&(dyn std::error::Error + 'static)>,
    ) -> Self {
        let mut causes = Vec::new();
        let mut current = error;
        while let Some(e) = current {
            causes.push(e.to_string());
            current = e.source();
        }

        Self {
            distribution: identifier.name.canonical().to_string(),
            version: identifier.version.clone(),
            index_url: config.index_url.clone(),
            python: None,
            os: os_description(),
            arch: std::env::consts::ARCH.to_string(),
            cuda: config.include_cuda_debuginfo.then(cuda_version_info),
            causes,
        }
    }

    /// Attach the interpreter description.
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = Some(python.into());
        self
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Failed to install {} {}.",
            self.distribution, self.version
        )?;
        writeln!(f)?;
        if !self.causes.is_empty() {
            writeln!(f, "Cause:")?;
            for cause in &self.causes {
                writeln!(f, "  {cause}")?;
            }
            writeln!(f)?;
        }

        let index = self.index_url.as_deref().unwrap_or("<not configured>");
        writeln!(
            f,
            "This package is not hosted on this index. Install it directly from {index}:"
        )?;
        writeln!(
            f,
            "  pip install --extra-index-url {index} {}=={}",
            self.distribution, self.version
        )?;
        writeln!(f)?;

        writeln!(f, "Environment:")?;
        writeln!(
            f,
            "  Python: {}",
            self.python.as_deref().unwrap_or("unknown")
        )?;
        writeln!(f, "  OS: {}", self.os)?;
        writeln!(f, "  CPU architecture: {}", self.arch)?;
        if let Some(cuda) = &self.cuda {
            for line in cuda.lines() {
                writeln!(f, "  {line}")?;
            }
        }
        Ok(())
    }
}

fn os_description() -> String {
    let release = Command::new("uname")
        .arg("-r")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|r| !r.is_empty());
    match release {
        Some(release) => format!("{} {release}", std::env::consts::OS),
        None => std::env::consts::OS.to_string(),
    }
}

/// Driver and CUDA versions from `nvidia-smi`, or an explanation of why
/// they are unavailable.
pub fn cuda_version_info() -> String {
    let Ok(nvidia_smi) = which::which("nvidia-smi") else {
        return "nvidia-smi command not found. Ensure NVIDIA drivers are installed.\n".to_string();
    };
    match Command::new(nvidia_smi).output() {
        Ok(output) if output.status.success() => {
            parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => format!(
            "Error in running nvidia-smi: {}\n",
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => format!("Error in running nvidia-smi: {e}\n"),
    }
}

/// Extract `Driver Version` and `CUDA Version` from `nvidia-smi` output.
pub fn parse_nvidia_smi(output: &str) -> String {
    let mut info = String::new();
    for (label, pattern) in [
        ("Driver", r"Driver Version: (\d+\.\d+)"),
        ("CUDA", r"CUDA Version: (\d+\.\d+)"),
    ] {
        let found = Regex::new(pattern)
            .ok()
            .and_then(|re| re.captures(output))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        match found {
            Some(version) => info.push_str(&format!("{label} Version: {version}\n")),
            None => info.push_str(&format!(
                "{label} version not found in nvidia-smi output.\n"
            )),
        }
    }
    info
}
