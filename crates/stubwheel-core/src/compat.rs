//! Tag compatibility engine.
//!
//! Decides whether a single [`CompatibilityTag`] is installable on the
//! current system, and picks the artifact to download from an index
//! listing. Selection is first-match: the first candidate in listing order
//! that has any compatible tag wins, and tags are tried in the order the
//! filename declares them. Compatible tags are not ranked by specificity.

use std::fmt;

use stubwheel_schema::{
    ANY_PLATFORM, CPYTHON3_PREFIX, CompatibilityTag, GENERIC_INTERPRETER, NO_ABI, STABLE_ABI,
};

use crate::listing::ArtifactCandidate;

/// What the running interpreter and platform can load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemCapability {
    interpreter_tag: String,
    platform_tags: Vec<String>,
    minor_version: u32,
}

impl SystemCapability {
    /// Build a capability set. Tags are lowercased, duplicates dropped, and
    /// `any` is moved to (or appended at) the end of the platform list.
    pub fn new<I, S>(interpreter_tag: &str, platform_tags: I, minor_version: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tags: Vec<String> = Vec::new();
        for tag in platform_tags {
            let tag = tag.as_ref().to_ascii_lowercase();
            if tag != ANY_PLATFORM && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags.push(ANY_PLATFORM.to_string());

        Self {
            interpreter_tag: interpreter_tag.to_ascii_lowercase(),
            platform_tags: tags,
            minor_version,
        }
    }

    /// Tag of the running interpreter, e.g. `cp311`.
    pub fn interpreter_tag(&self) -> &str {
        &self.interpreter_tag
    }

    /// Supported platform tags, most specific first, always ending in `any`.
    pub fn platform_tags(&self) -> &[String] {
        &self.platform_tags
    }

    /// Minor version of the running Python 3 interpreter.
    pub fn minor_version(&self) -> u32 {
        self.minor_version
    }

    /// Whether `platform` is one of the supported platform tags.
    pub fn supports_platform(&self, platform: &str) -> bool {
        self.platform_tags.iter().any(|p| p == platform)
    }
}

impl fmt::Display for SystemCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "interpreter: {}", self.interpreter_tag)?;
        writeln!(f, "minor version: {}", self.minor_version)?;
        writeln!(f, "platforms:")?;
        for platform in &self.platform_tags {
            writeln!(f, "  {platform}")?;
        }
        Ok(())
    }
}

/// Extract the minor version from a `CPython` 3 style interpreter tag
/// (`cp311` -> 11). Returns `None` for any other shape.
pub fn cpython3_minor(interpreter: &str) -> Option<u32> {
    let digits = interpreter.strip_prefix(CPYTHON3_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// The closed set of ABI classes a tag can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbiClass {
    /// `none`: no compiled interpreter ABI.
    Generic,
    /// The ABI of exactly the running interpreter.
    Interpreter,
    /// `abi3`: the stable limited ABI.
    Stable,
    /// Any other ABI.
    Foreign,
}

impl AbiClass {
    fn classify(abi: &str, system: &SystemCapability) -> Self {
        if abi == NO_ABI {
            Self::Generic
        } else if abi == system.interpreter_tag {
            Self::Interpreter
        } else if abi == STABLE_ABI {
            Self::Stable
        } else {
            Self::Foreign
        }
    }
}

/// Why a tag was judged incompatible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// ABI-generic tag built for an interpreter other than `py3` or ours.
    GenericInterpreter,
    /// Tag uses our ABI but names a different interpreter.
    InterpreterMismatch,
    /// Stable-ABI tag whose interpreter is not a `CPython` 3 tag.
    StableAbiInterpreter,
    /// Stable-ABI tag built against a newer minor version than ours.
    StableAbiTooNew {
        /// Minor version the artifact was built for.
        built: u32,
        /// Minor version of the running interpreter.
        system: u32,
    },
    /// ABI is neither generic, ours, nor stable.
    ForeignAbi,
    /// Platform is not in the supported list.
    Platform,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenericInterpreter => {
                write!(f, "incompatible interpreter tag for ABI generic wheel")
            }
            Self::InterpreterMismatch => {
                write!(f, "incompatible interpreter tag for Python ABI")
            }
            Self::StableAbiInterpreter => write!(f, "abi3 interpreter tag is incorrect"),
            Self::StableAbiTooNew { built, system } => write!(
                f,
                "abi3 interpreter tag is too new (built for 3.{built}, running 3.{system})"
            ),
            Self::ForeignAbi => write!(f, "ABI tag does not match the interpreter tag"),
            Self::Platform => write!(f, "platform tag is incompatible"),
        }
    }
}

/// Run the decision procedure for one tag, reporting the first failed rule.
///
/// # Errors
///
/// Returns the [`Rejection`] explaining why the tag cannot be installed.
pub fn check(tag: &CompatibilityTag, system: &SystemCapability) -> Result<(), Rejection> {
    match AbiClass::classify(&tag.abi, system) {
        AbiClass::Generic => {
            if tag.interpreter != GENERIC_INTERPRETER && tag.interpreter != system.interpreter_tag
            {
                return Err(Rejection::GenericInterpreter);
            }
        }
        AbiClass::Interpreter => {
            if tag.interpreter != system.interpreter_tag {
                return Err(Rejection::InterpreterMismatch);
            }
        }
        AbiClass::Stable => {
            let built = cpython3_minor(&tag.interpreter).ok_or(Rejection::StableAbiInterpreter)?;
            if built > system.minor_version {
                return Err(Rejection::StableAbiTooNew {
                    built,
                    system: system.minor_version,
                });
            }
        }
        AbiClass::Foreign => return Err(Rejection::ForeignAbi),
    }

    if system.supports_platform(&tag.platform) {
        Ok(())
    } else {
        Err(Rejection::Platform)
    }
}

/// Whether `tag` can be installed on `system`. Rejections are logged at debug.
pub fn is_compatible(tag: &CompatibilityTag, system: &SystemCapability) -> bool {
    match check(tag, system) {
        Ok(()) => true,
        Err(reason) => {
            tracing::debug!("Skipping tag {tag}: {reason}");
            false
        }
    }
}

/// The chosen candidate and the tag that made it compatible.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    /// Selected artifact.
    pub candidate: &'a ArtifactCandidate,
    /// First compatible tag of that artifact.
    pub tag: &'a CompatibilityTag,
}

/// Pick the first candidate whose version equals `version` exactly and that
/// declares at least one compatible tag.
pub fn select_candidate<'a>(
    candidates: &'a [ArtifactCandidate],
    version: &str,
    system: &SystemCapability,
) -> Option<Selection<'a>> {
    for candidate in candidates {
        if candidate.version() != version {
            continue;
        }
        for tag in candidate.tags() {
            tracing::info!("Testing wheel {} against tag {tag}", candidate.filename);
            if is_compatible(tag, system) {
                return Some(Selection { candidate, tag });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn system() -> SystemCapability {
        SystemCapability::new("cp311", ["manylinux_2_28_x86_64", "linux_x86_64"], 11)
    }

    fn tag(s: &str) -> CompatibilityTag {
        s.parse().unwrap()
    }

    fn candidate(filename: &str) -> ArtifactCandidate {
        let url = Url::parse("https://example.com/simple/demo/")
            .unwrap()
            .join(filename)
            .unwrap();
        ArtifactCandidate::new(url, filename, None).unwrap()
    }

    #[test]
    fn any_is_appended_once_and_last() {
        let sys = SystemCapability::new("CP312", ["any", "Linux_X86_64", "linux_x86_64"], 12);
        assert_eq!(sys.platform_tags(), ["linux_x86_64", "any"]);
        assert_eq!(sys.interpreter_tag(), "cp312");

        let empty = SystemCapability::new("cp39", Vec::<String>::new(), 9);
        assert_eq!(empty.platform_tags(), ["any"]);
    }

    #[test]
    fn universal_tag_is_always_compatible() {
        let universal = tag("py3-none-any");
        for sys in [
            system(),
            SystemCapability::new("pp310", ["macosx_14_0_arm64"], 10),
            SystemCapability::new("cp38", Vec::<String>::new(), 8),
        ] {
            assert_eq!(check(&universal, &sys), Ok(()));
        }
    }

    #[test]
    fn generic_abi_rules() {
        let sys = system();
        assert_eq!(check(&tag("cp311-none-linux_x86_64"), &sys), Ok(()));
        assert_eq!(
            check(&tag("cp310-none-any"), &sys),
            Err(Rejection::GenericInterpreter)
        );
        assert_eq!(
            check(&tag("py2-none-any"), &sys),
            Err(Rejection::GenericInterpreter)
        );
        assert_eq!(
            check(&tag("py3-none-win_amd64"), &sys),
            Err(Rejection::Platform)
        );
    }

    #[test]
    fn interpreter_abi_requires_same_interpreter() {
        let sys = system();
        assert_eq!(check(&tag("cp311-cp311-manylinux_2_28_x86_64"), &sys), Ok(()));
        assert_eq!(
            check(&tag("pp311-cp311-manylinux_2_28_x86_64"), &sys),
            Err(Rejection::InterpreterMismatch)
        );
        assert_eq!(
            check(&tag("cp311-cp311-macosx_11_0_arm64"), &sys),
            Err(Rejection::Platform)
        );
    }

    #[test]
    fn stable_abi_is_forward_compatible_only() {
        let sys = system();
        assert_eq!(check(&tag("cp38-abi3-manylinux_2_28_x86_64"), &sys), Ok(()));
        assert_eq!(check(&tag("cp311-abi3-manylinux_2_28_x86_64"), &sys), Ok(()));
        assert_eq!(
            check(&tag("cp312-abi3-manylinux_2_28_x86_64"), &sys),
            Err(Rejection::StableAbiTooNew {
                built: 12,
                system: 11
            })
        );
        assert_eq!(
            check(&tag("py3-abi3-any"), &sys),
            Err(Rejection::StableAbiInterpreter)
        );
        assert_eq!(
            check(&tag("cp3x-abi3-any"), &sys),
            Err(Rejection::StableAbiInterpreter)
        );
    }

    #[test]
    fn unknown_abi_is_rejected() {
        assert_eq!(
            check(&tag("cp310-cp310-manylinux_2_28_x86_64"), &system()),
            Err(Rejection::ForeignAbi)
        );
    }

    #[test]
    fn cpython3_minor_parsing() {
        assert_eq!(cpython3_minor("cp39"), Some(9));
        assert_eq!(cpython3_minor("cp313"), Some(13));
        assert_eq!(cpython3_minor("cp3"), None);
        assert_eq!(cpython3_minor("cp27"), None);
        assert_eq!(cpython3_minor("py3"), None);
    }

    #[test]
    fn selection_is_first_match_in_listing_order() {
        let candidates = vec![
            candidate("demo-1.0-cp312-abi3-manylinux_2_28_x86_64.whl"),
            candidate("demo-1.0-cp311-cp311-linux_x86_64.whl"),
            candidate("demo-1.0-py3-none-any.whl"),
        ];
        let selection = select_candidate(&candidates, "1.0", &system()).unwrap();
        assert_eq!(
            selection.candidate.filename,
            "demo-1.0-cp311-cp311-linux_x86_64.whl"
        );
        assert_eq!(selection.tag, &tag("cp311-cp311-linux_x86_64"));
    }

    #[test]
    fn selection_tries_tags_in_declaration_order() {
        let candidates =
            vec![candidate("demo-2.0-cp311-cp311-win_amd64.manylinux_2_28_x86_64.any.whl")];
        let selection = select_candidate(&candidates, "2.0", &system()).unwrap();
        assert_eq!(selection.tag.platform, "manylinux_2_28_x86_64");
    }

    #[test]
    fn selection_filters_on_exact_version() {
        let candidates = vec![
            candidate("demo-1.0-py3-none-any.whl"),
            candidate("demo-1.0.1-py3-none-any.whl"),
        ];
        let selection = select_candidate(&candidates, "1.0.1", &system()).unwrap();
        assert_eq!(selection.candidate.version(), "1.0.1");
        assert!(select_candidate(&candidates, "1", &system()).is_none());
    }

    #[test]
    fn no_candidates_means_no_match() {
        assert!(select_candidate(&[], "1.0", &system()).is_none());
    }

    #[test]
    fn newer_stable_abi_only_listing_has_no_match() {
        let candidates = vec![candidate("demo-1.0-cp312-abi3-manylinux_2_28_x86_64.whl")];
        assert!(select_candidate(&candidates, "1.0", &system()).is_none());
    }
}
