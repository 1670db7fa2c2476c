//! Artifact metadata documents (`METADATA` inside a wheel, `PKG-INFO` inside
//! a source archive).
//!
//! The format is an RFC 822 style header block: `Key: value` lines, keys may
//! repeat, and a line starting with a space or tab continues the previous
//! value. A blank line ends the header block; anything after it is the
//! free-form body (usually the long description) and is carried through
//! untouched.
//!
//! # Example
//!
//! ```
//! use stubwheel_schema::MetadataDocument;
//!
//! let mut doc = MetadataDocument::parse(
//!     "Name: demo\nVersion: 1.0\nRequires-Dist: a\nRequires-Dist: b\n",
//! )
//! .unwrap();
//! assert_eq!(doc.get_all("requires-dist").collect::<Vec<_>>(), ["a", "b"]);
//!
//! doc.remove_all("Requires-Dist");
//! assert_eq!(doc.to_string(), "Name: demo\nVersion: 1.0\n");
//! ```

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Fields every repackaged artifact must declare.
pub const REQUIRED_FIELDS: [&str; 3] = ["Name", "Version", "License"];

/// Errors produced while parsing or validating a [`MetadataDocument`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// A line was neither a `Key: value` header nor a continuation line.
    #[error("malformed metadata at line {line_no}: {line:?}")]
    Malformed {
        /// 1-based line number of the offending line.
        line_no: usize,
        /// The offending line, without its line terminator.
        line: String,
    },

    /// A required field is absent. Carries the full document for diagnosis.
    #[error("metadata is missing required field `{field}`:\n{raw}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
        /// The raw metadata text that failed validation.
        raw: String,
    },
}

/// Ordered header multimap.
///
/// Entries are kept as a sequence of `(key, value)` pairs in first-seen
/// order, duplicates included. A secondary index maps the ASCII-lowercased
/// key to entry positions, so lookups are case-insensitive like the mail
/// header format they come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataDocument {
    entries: Vec<(String, String)>,
    index: HashMap<String, Vec<usize>>,
    body: Option<String>,
}

impl MetadataDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a header block.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Malformed`] for a line that is neither a
    /// header nor a continuation of one.
    pub fn parse(text: &str) -> Result<Self, MetadataError> {
        let mut doc = Self::new();
        let mut rest = text;
        let mut line_no = 0;

        while !rest.is_empty() {
            let (raw_line, next) = match rest.find('\n') {
                Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                None => (rest, ""),
            };
            line_no += 1;
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

            if line.is_empty() {
                doc.body = Some(next.to_string());
                return Ok(doc);
            }

            if line.starts_with([' ', '\t']) {
                let Some((_, value)) = doc.entries.last_mut() else {
                    return Err(malformed(line_no, line));
                };
                value.push('\n');
                value.push_str(line);
            } else {
                let Some((key, value)) = line.split_once(':') else {
                    return Err(malformed(line_no, line));
                };
                if !is_valid_key(key) {
                    return Err(malformed(line_no, line));
                }
                doc.append(key, value.trim_start_matches([' ', '\t']));
            }

            rest = next;
        }

        Ok(doc)
    }

    /// Append a value, keeping any existing values for the same key.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.index
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(self.entries.len());
        self.entries.push((key, value.into()));
    }

    /// First value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).next()
    }

    /// Every value for `key`, in document order.
    pub fn get_all<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        let positions = self
            .index
            .get(&key.to_ascii_lowercase())
            .map_or(&[][..], Vec::as_slice);
        positions.iter().map(|&i| self.entries[i].1.as_str())
    }

    /// Whether at least one value exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(&key.to_ascii_lowercase())
    }

    /// Remove every value for `key`. Remaining entries keep their order.
    ///
    /// Returns the number of entries removed.
    pub fn remove_all(&mut self, key: &str) -> usize {
        let lowered = key.to_ascii_lowercase();
        let Some(positions) = self.index.remove(&lowered) else {
            return 0;
        };
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&lowered));
        self.reindex();
        positions.len()
    }

    /// Iterate over `(key, value)` pairs in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of header entries (duplicates counted individually).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document has no header entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Text following the header block, if a blank separator line was present.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Check that every field in [`REQUIRED_FIELDS`] is present.
    ///
    /// `raw` is the text the document was parsed from; it is attached to the
    /// error so the operator can see exactly what was rejected.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::MissingField`] naming the first absent field.
    pub fn ensure_required(&self, raw: &str) -> Result<(), MetadataError> {
        match REQUIRED_FIELDS
            .iter()
            .copied()
            .find(|f| !self.contains_key(f))
        {
            Some(field) => Err(MetadataError::MissingField {
                field,
                raw: raw.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, (key, _)) in self.entries.iter().enumerate() {
            self.index
                .entry(key.to_ascii_lowercase())
                .or_default()
                .push(i);
        }
    }
}

impl fmt::Display for MetadataDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{key}: {value}")?;
        }
        if let Some(body) = &self.body {
            writeln!(f)?;
            f.write_str(body)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for MetadataDocument {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn malformed(line_no: usize, line: &str) -> MetadataError {
    MetadataError::Malformed {
        line_no,
        line: line.to_string(),
    }
}

/// Header names are printable ASCII without spaces or colons.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| (b'!'..=b'~').contains(&b) && b != b':')
}
