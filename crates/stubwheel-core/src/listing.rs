//! Index listing parser.
//!
//! Turns a simple-repository project page (an HTML list of `<a href>`
//! anchors) into [`ArtifactCandidate`]s, one per binary artifact, in
//! document order.

use std::sync::OnceLock;

use regex::Regex;
use stubwheel_schema::{
    CompatibilityTag, FilenameError, HashHint, WHEEL_EXTENSION, WheelFilename,
};
use url::Url;

/// A downloadable binary artifact advertised by an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCandidate {
    /// Absolute download URL, without fragment.
    pub download_url: Url,
    /// Last path segment of the URL.
    pub filename: String,
    /// Digest advertised in the URL fragment, if any.
    pub hash_hint: Option<HashHint>,
    /// Parsed filename (identifier, build tag, expanded tags).
    pub wheel: WheelFilename,
}

impl ArtifactCandidate {
    /// Build a candidate, parsing `filename` with the binary artifact grammar.
    ///
    /// # Errors
    ///
    /// Returns [`FilenameError::Unrecognized`] if the filename is not a
    /// valid binary artifact name.
    pub fn new(
        download_url: Url,
        filename: &str,
        hash_hint: Option<HashHint>,
    ) -> Result<Self, FilenameError> {
        Ok(Self {
            wheel: WheelFilename::parse(filename)?,
            filename: filename.to_string(),
            download_url,
            hash_hint,
        })
    }

    /// Version as written in the filename.
    pub fn version(&self) -> &str {
        &self.wheel.identifier.version
    }

    /// Tag set in declaration order.
    pub fn tags(&self) -> &[CompatibilityTag] {
        &self.wheel.tags
    }
}

fn anchor_href() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<a\s[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Decode the handful of character references that appear in hrefs.
fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Parse a project page served from `page_url`.
///
/// Anchors whose URL path does not end in `.whl` are ignored. Relative
/// hrefs are resolved against `page_url`. A `#{scheme}={digest}` fragment
/// naming a known hash algorithm becomes the candidate's hash hint; a known
/// algorithm with an unusable digest yields a hint nothing can match. Hrefs
/// that cannot be resolved, or whose filename does not parse, are skipped
/// with a warning.
pub fn parse_listing(html: &str, page_url: &Url) -> Vec<ArtifactCandidate> {
    let mut candidates = Vec::new();

    for caps in anchor_href().captures_iter(html) {
        let Some(raw) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let href = decode_entities(raw.as_str().trim());

        let mut url = match page_url.join(&href) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Skipping unresolvable link {href:?}: {e}");
                continue;
            }
        };
        if !url.path().ends_with(WHEEL_EXTENSION) {
            continue;
        }

        let hash_hint = match url.fragment().map(HashHint::from_fragment).transpose() {
            Ok(hint) => hint.flatten(),
            Err(e) => {
                tracing::warn!("{href}: {e}; the download will fail verification");
                Some(e.into_unsatisfiable_hint())
            }
        };
        url.set_fragment(None);

        let Some(filename) = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string)
        else {
            continue;
        };

        match ArtifactCandidate::new(url, &filename, hash_hint) {
            Ok(candidate) => {
                tracing::debug!("Found wheel: {filename}");
                candidates.push(candidate);
            }
            Err(e) => tracing::warn!("Skipping listing entry: {e}"),
        }
    }

    candidates
}
