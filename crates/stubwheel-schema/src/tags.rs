//! Compatibility tags: the `(interpreter, abi, platform)` triple a binary
//! artifact declares in its filename.
//!
//! A filename may carry a *compressed* tag set where each segment lists
//! alternatives separated by `.`, e.g. `py2.py3-none-any` or
//! `cp311-cp311-manylinux_2_17_x86_64.manylinux2014_x86_64`. Expansion
//! yields the cartesian product in declaration order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Interpreter marker for artifacts that run on any Python 3 interpreter.
pub const GENERIC_INTERPRETER: &str = "py3";

/// ABI marker for artifacts with no compiled interpreter ABI.
pub const NO_ABI: &str = "none";

/// ABI marker for the CPython stable (limited) ABI.
pub const STABLE_ABI: &str = "abi3";

/// Platform wildcard, always present in a system's platform list.
pub const ANY_PLATFORM: &str = "any";

/// Interpreter prefix for `CPython` 3.x builds (`cp3` followed by the minor version).
pub const CPYTHON3_PREFIX: &str = "cp3";

/// Errors from parsing a tag string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    /// The text was not three `-` separated, non-empty segments.
    #[error("invalid compatibility tag `{0}`")]
    Invalid(String),
}

/// A single `interpreter-abi-platform` triple.
///
/// Components are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompatibilityTag {
    /// Interpreter tag, e.g. `py3` or `cp311`.
    pub interpreter: String,
    /// ABI tag, e.g. `none`, `abi3` or `cp311`.
    pub abi: String,
    /// Platform tag, e.g. `any` or `manylinux_2_28_x86_64`.
    pub platform: String,
}

impl CompatibilityTag {
    /// Create a tag, lowercasing every component.
    pub fn new(interpreter: &str, abi: &str, platform: &str) -> Self {
        Self {
            interpreter: interpreter.to_ascii_lowercase(),
            abi: abi.to_ascii_lowercase(),
            platform: platform.to_ascii_lowercase(),
        }
    }

    /// Expand a compressed tag set into individual tags.
    ///
    /// Order is interpreter-major, then ABI, then platform, matching the
    /// order the alternatives were written in.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Invalid`] if any alternative is empty.
    pub fn expand(interpreters: &str, abis: &str, platforms: &str) -> Result<Vec<Self>, TagError> {
        fn split(segment: &str) -> Option<Vec<&str>> {
            let parts: Vec<&str> = segment.split('.').collect();
            (!parts.iter().any(|p| p.is_empty())).then_some(parts)
        }

        let invalid = || TagError::Invalid(format!("{interpreters}-{abis}-{platforms}"));
        let interpreters = split(interpreters).ok_or_else(invalid)?;
        let abis = split(abis).ok_or_else(invalid)?;
        let platforms = split(platforms).ok_or_else(invalid)?;

        let mut tags = Vec::with_capacity(interpreters.len() * abis.len() * platforms.len());
        for interpreter in &interpreters {
            for abi in &abis {
                for platform in &platforms {
                    tags.push(Self::new(interpreter, abi, platform));
                }
            }
        }
        Ok(tags)
    }

    /// Parse a possibly compressed `interp-abi-platform` string.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Invalid`] unless the text has exactly three
    /// non-empty segments.
    pub fn parse_set(text: &str) -> Result<Vec<Self>, TagError> {
        let mut parts = text.split('-');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(i), Some(a), Some(p), None) => Self::expand(i, a, p),
            _ => Err(TagError::Invalid(text.to_string())),
        }
    }
}

impl std::fmt::Display for CompatibilityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.interpreter, self.abi, self.platform)
    }
}

impl std::str::FromStr for CompatibilityTag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tags = Self::parse_set(s)?;
        match <[Self; 1]>::try_from(tags) {
            Ok([tag]) => Ok(tag),
            Err(_) => Err(TagError::Invalid(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_tag_parses_and_displays() {
        let tag: CompatibilityTag = "cp312-abi3-manylinux_2_28_x86_64".parse().unwrap();
        assert_eq!(tag.interpreter, "cp312");
        assert_eq!(tag.abi, "abi3");
        assert_eq!(tag.platform, "manylinux_2_28_x86_64");
        assert_eq!(tag.to_string(), "cp312-abi3-manylinux_2_28_x86_64");
    }

    #[test]
    fn components_are_lowercased() {
        let tag = CompatibilityTag::new("CP311", "None", "ANY");
        assert_eq!(tag.to_string(), "cp311-none-any");
    }

    #[test]
    fn compressed_set_expands_in_declaration_order() {
        let tags =
            CompatibilityTag::parse_set("py2.py3-none-manylinux2014_x86_64.manylinux_2_17_x86_64")
                .unwrap();
        let rendered: Vec<String> = tags.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            [
                "py2-none-manylinux2014_x86_64",
                "py2-none-manylinux_2_17_x86_64",
                "py3-none-manylinux2014_x86_64",
                "py3-none-manylinux_2_17_x86_64",
            ]
        );
    }

    #[test]
    fn compressed_set_is_not_a_single_tag() {
        assert!("py2.py3-none-any".parse::<CompatibilityTag>().is_err());
    }

    #[test]
    fn wrong_segment_count_is_rejected() {
        assert!(CompatibilityTag::parse_set("py3-none").is_err());
        assert!(CompatibilityTag::parse_set("py3-none-any-extra").is_err());
        assert!(CompatibilityTag::parse_set("py3..-none-any").is_err());
    }

    #[test]
    fn empty_alternative_reports_whole_tag() {
        let err = CompatibilityTag::expand("cp311", "cp311", "linux_x86_64.").unwrap_err();
        assert_eq!(err, TagError::Invalid("cp311-cp311-linux_x86_64.".to_string()));
        assert_eq!(
            CompatibilityTag::expand("cp311", "abi3.none", "any").unwrap().len(),
            2
        );
    }
}
