//! Reproducible repackaging of a binary artifact into a metadata-only
//! source archive.
//!
//! The output is `{name_}-{version}.tar.gz` holding a single root directory
//! with `PKG-INFO` (the artifact's rewritten metadata) and `pyproject.toml`
//! (the build manifest, reconciled with the derived stub-only decision).
//! Identical inputs and timestamp seed produce byte-identical archives.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use stubwheel_schema::{
    ArtifactFilename, FilenameError, MetadataDocument, MetadataError, PackageIdentifier,
};
use tar::{EntryType, Header};
use thiserror::Error;

use crate::config::{BuildManifest, ConfigError, MANIFEST_FILE, PKG_INFO_FILE};

/// Metadata keys dropped from every repackaged artifact.
pub const PLATFORM_KEYS: [&str; 2] = ["Platform", "Supported-Platform"];

const REQUIRES_DIST: &str = "Requires-Dist";

/// Marker of a direct URL reference in a dependency specifier.
const DIRECT_REFERENCE: char = '@';

const DIR_MODE: u32 = 0o775;
const EXEC_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// Errors from reading a source artifact or building an archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The artifact metadata could not be parsed.
    #[error(transparent)]
    MalformedMetadata(MetadataError),

    /// A required metadata field is missing. Carries the raw metadata.
    #[error(transparent)]
    InvalidMetadata(MetadataError),

    /// Dependencies force stub-only mode but the manifest says otherwise.
    #[error(
        "Cannot set [tool.wheel_stub].stub_only to false. Package depends on non-PyPI dependency."
    )]
    ConflictingStubConfig,

    /// The source is a recognized artifact that cannot be repackaged.
    #[error("Unsupported package format for file {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// The binary artifact lacks its metadata entry.
    #[error("{} has no {entry}", path.display())]
    MissingMetadataEntry {
        /// Artifact that was opened.
        path: PathBuf,
        /// Entry that was expected.
        entry: String,
    },

    /// The source filename matches no artifact grammar.
    #[error(transparent)]
    Filename(#[from] FilenameError),

    /// The build manifest is missing or invalid.
    #[error(transparent)]
    Manifest(#[from] ConfigError),

    /// Reading or writing failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The binary artifact is not a readable zip archive.
    #[error("failed to read {}: {source}", path.display())]
    Zip {
        /// Artifact that was opened.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: zip::result::ZipError,
    },
}

impl From<MetadataError> for ArchiveError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::Malformed { .. } => Self::MalformedMetadata(e),
            MetadataError::MissingField { .. } => Self::InvalidMetadata(e),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + use<> {
    let path = path.to_path_buf();
    move |source| ArchiveError::Io { path, source }
}

/// A binary artifact opened for repackaging.
#[derive(Debug, Clone)]
pub struct SourceArtifact {
    path: PathBuf,
    identifier: PackageIdentifier,
    metadata: String,
}

impl SourceArtifact {
    /// Open `path`, parse its filename and read its metadata entry.
    ///
    /// # Errors
    ///
    /// - [`ArchiveError::Io`] if the file does not exist.
    /// - [`ArchiveError::Filename`] for an unrecognized filename.
    /// - [`ArchiveError::UnsupportedFormat`] for a source archive.
    /// - [`ArchiveError::MissingMetadataEntry`] if the metadata entry is absent.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        if !path.exists() {
            return Err(ArchiveError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Could not find {}", path.display()),
                ),
            });
        }

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FilenameError::Unrecognized(path.display().to_string()))?;

        let identifier = match ArtifactFilename::parse(filename)? {
            ArtifactFilename::Wheel(wheel) => wheel.identifier,
            ArtifactFilename::Sdist(_) => {
                return Err(ArchiveError::UnsupportedFormat(path.to_path_buf()));
            }
        };

        let metadata = read_wheel_metadata(path, &identifier)?;
        tracing::debug!("Read metadata for {identifier} from {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            identifier,
            metadata,
        })
    }

    /// Location of the artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name and version from the artifact filename.
    pub fn identifier(&self) -> &PackageIdentifier {
        &self.identifier
    }

    /// Raw metadata text.
    pub fn metadata(&self) -> &str {
        &self.metadata
    }
}

fn read_wheel_metadata(path: &Path, identifier: &PackageIdentifier) -> Result<String, ArchiveError> {
    let zip_error = |source| ArchiveError::Zip {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_error(path))?;
    let mut archive = zip::ZipArchive::new(file).map_err(zip_error)?;

    let entry_name = identifier.metadata_entry();
    let mut entry = match archive.by_name(&entry_name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ArchiveError::MissingMetadataEntry {
                path: path.to_path_buf(),
                entry: entry_name,
            });
        }
        Err(e) => return Err(zip_error(e)),
    };

    let mut metadata = String::new();
    entry
        .read_to_string(&mut metadata)
        .map_err(io_error(path))?;
    Ok(metadata)
}

/// Everything needed to write the archive, derived from the inputs.
#[derive(Debug, Clone)]
pub struct RepackagePlan {
    /// Name and version of the package.
    pub identifier: PackageIdentifier,
    /// Rewritten metadata, emitted as `PKG-INFO`.
    pub metadata: MetadataDocument,
    /// Whether a direct-reference dependency forced stub-only mode.
    pub stub_only: bool,
    /// Manifest text to emit.
    pub manifest: String,
    /// Whether the manifest entry is marked executable.
    pub manifest_executable: bool,
}

impl RepackagePlan {
    /// Validate and rewrite the metadata, then reconcile the manifest.
    ///
    /// # Errors
    ///
    /// - [`ArchiveError::MalformedMetadata`] if the metadata does not parse.
    /// - [`ArchiveError::InvalidMetadata`] if `Name`, `Version` or `License`
    ///   is missing. The raw metadata is logged and carried in the error.
    /// - [`ArchiveError::ConflictingStubConfig`] if stub-only mode is forced
    ///   but the manifest declares `stub_only = false`.
    pub fn new(
        identifier: PackageIdentifier,
        raw_metadata: &str,
        manifest: &BuildManifest,
    ) -> Result<Self, ArchiveError> {
        let mut metadata = MetadataDocument::parse(raw_metadata)?;
        if let Err(e) = metadata.ensure_required(raw_metadata) {
            tracing::error!("Invalid metadata for {identifier}:\n{raw_metadata}");
            return Err(e.into());
        }

        let stub_only = metadata
            .get_all(REQUIRES_DIST)
            .any(|req| req.contains(DIRECT_REFERENCE));
        if stub_only {
            let removed = metadata.remove_all(REQUIRES_DIST);
            tracing::info!(
                "{identifier} has direct-reference dependencies; dropping {removed} Requires-Dist entries and building a stub"
            );
        }

        for key in PLATFORM_KEYS {
            metadata.remove_all(key);
        }

        let (manifest_text, manifest_executable) =
            match (stub_only, manifest.config.stub_only) {
                (false, _) | (true, Some(true)) => {
                    (manifest.raw().to_string(), manifest.is_executable())
                }
                (true, Some(false)) => return Err(ArchiveError::ConflictingStubConfig),
                (true, None) => (manifest.with_stub_only()?, false),
            };

        Ok(Self {
            identifier,
            metadata,
            stub_only,
            manifest: manifest_text,
            manifest_executable,
        })
    }

    /// Archive filename, `{name_}-{version}.tar.gz`.
    pub fn filename(&self) -> String {
        self.identifier.sdist_filename()
    }

    /// Entries in emission order.
    fn entries(&self) -> Vec<ArchiveEntry> {
        let root = self.identifier.dist_stem();
        vec![
            ArchiveEntry {
                path: format!("{root}/"),
                kind: EntryKind::Directory,
                data: Vec::new(),
            },
            ArchiveEntry {
                path: format!("{root}/{PKG_INFO_FILE}"),
                kind: EntryKind::File { executable: false },
                data: self.metadata.to_string().into_bytes(),
            },
            ArchiveEntry {
                path: format!("{root}/{MANIFEST_FILE}"),
                kind: EntryKind::File {
                    executable: self.manifest_executable,
                },
                data: self.manifest.clone().into_bytes(),
            },
        ]
    }

    /// Write the compressed archive to `out`, returning it when done.
    ///
    /// # Errors
    ///
    /// Propagates write errors from `out`.
    pub fn write_to<W: Write>(&self, out: W, mtime: u32) -> std::io::Result<W> {
        let tar_name = self
            .filename()
            .strip_suffix(".gz")
            .map(str::to_string)
            .unwrap_or_default();
        let encoder = GzBuilder::new()
            .mtime(mtime)
            .filename(tar_name)
            .write(out, Compression::best());

        let mut builder = tar::Builder::new(encoder);
        for entry in self.entries() {
            append_entry(&mut builder, &entry, mtime)?;
        }
        builder.into_inner()?.finish()
    }

    /// Write `{out_dir}/{name_}-{version}.tar.gz`, creating `out_dir` if needed.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::Io`] if the directory or file cannot be written.
    pub fn write_into(&self, out_dir: &Path, mtime: u32) -> Result<PathBuf, ArchiveError> {
        std::fs::create_dir_all(out_dir).map_err(io_error(out_dir))?;
        let path = out_dir.join(self.filename());

        let file = File::create(&path).map_err(io_error(&path))?;
        let result = self
            .write_to(BufWriter::new(file), mtime)
            .and_then(|mut w| w.flush());
        if let Err(source) = result {
            let _ = std::fs::remove_file(&path);
            return Err(ArchiveError::Io { path, source });
        }

        tracing::info!("Wrote {}", path.display());
        Ok(path)
    }
}

/// Repackage `source` into `out_dir`.
///
/// # Errors
///
/// As [`RepackagePlan::new`] and [`RepackagePlan::write_into`].
pub fn build_sdist(
    source: &SourceArtifact,
    manifest: &BuildManifest,
    out_dir: &Path,
    mtime: u32,
) -> Result<PathBuf, ArchiveError> {
    let plan = RepackagePlan::new(source.identifier().clone(), source.metadata(), manifest)?;
    plan.write_into(out_dir, mtime)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Directory,
    File { executable: bool },
}

#[derive(Debug)]
struct ArchiveEntry {
    path: String,
    kind: EntryKind,
    data: Vec<u8>,
}

/// Write one entry with normalized ownership, timestamp and mode. Paths that
/// do not fit a ustar header are carried in a PAX `path` record.
fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    entry: &ArchiveEntry,
    mtime: u32,
) -> std::io::Result<()> {
    let mut header = Header::new_ustar();
    let mode = match entry.kind {
        EntryKind::Directory => {
            header.set_entry_type(EntryType::Directory);
            DIR_MODE
        }
        EntryKind::File { executable: true } => {
            header.set_entry_type(EntryType::Regular);
            EXEC_MODE
        }
        EntryKind::File { executable: false } => {
            header.set_entry_type(EntryType::Regular);
            FILE_MODE
        }
    };
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("")?;
    header.set_groupname("")?;
    header.set_mtime(u64::from(mtime));
    header.set_size(entry.data.len() as u64);

    if header.set_path(&entry.path).is_err() {
        builder.append_pax_extensions([("path", entry.path.as_bytes())])?;
        header.set_path(truncated_name(&entry.path))?;
    }

    header.set_cksum();
    builder.append(&header, entry.data.as_slice())
}

/// Fallback ustar name for a path carried in a PAX record: the final
/// component, cut to fit the 100 byte name field.
fn truncated_name(path: &str) -> &str {
    let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or(path);
    let mut end = name.len().min(99);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use zip::write::SimpleFileOptions;

    const METADATA: &str = "Metadata-Version: 2.1\n\
                            Name: nvidia-demo-cu12\n\
                            Version: 12.4.99\n\
                            License: NVIDIA Proprietary Software\n\
                            Platform: Linux\n\
                            Supported-Platform: manylinux_2_28_x86_64\n\
                            Requires-Dist: numpy>=1.0\n\
                            Requires-Dist: nvidia-helper-cu12==12.4\n\
                            \n\
                            Demo package.\n";

    const MANIFEST: &str = "[build-system]\n\
                            requires = [\"stubwheel\"]\n\
                            \n\
                            [tool.wheel_stub]\n\
                            index_url = \"https://pypi.nvidia.com/\"\n";

    fn id() -> PackageIdentifier {
        PackageIdentifier::new("nvidia-demo-cu12", "12.4.99")
    }

    fn manifest(text: &str) -> BuildManifest {
        BuildManifest::parse(text).unwrap()
    }

    fn with_direct_reference() -> String {
        METADATA.replace(
            "Requires-Dist: nvidia-helper-cu12==12.4",
            "Requires-Dist: foo @ http://example.com/foo.whl",
        )
    }

    fn unpack(bytes: &[u8]) -> Vec<(String, tar::Header, Vec<u8>)> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().into_owned();
                let header = e.header().clone();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (path, header, data)
            })
            .collect()
    }

    #[test]
    fn plain_dependencies_are_preserved() {
        let plan = RepackagePlan::new(id(), METADATA, &manifest(MANIFEST)).unwrap();
        assert!(!plan.stub_only);
        assert_eq!(
            plan.metadata.get_all("Requires-Dist").collect::<Vec<_>>(),
            ["numpy>=1.0", "nvidia-helper-cu12==12.4"]
        );
        assert_eq!(plan.manifest, MANIFEST);
    }

    #[test]
    fn platform_keys_are_always_removed() {
        let plan = RepackagePlan::new(id(), METADATA, &manifest(MANIFEST)).unwrap();
        let rendered = plan.metadata.to_string();
        assert!(!rendered.contains("Platform"));
        assert_eq!(plan.metadata.body(), Some("Demo package.\n"));
    }

    #[test]
    fn direct_reference_forces_stub_and_amends_manifest() {
        let plan = RepackagePlan::new(id(), &with_direct_reference(), &manifest(MANIFEST)).unwrap();
        assert!(plan.stub_only);
        assert_eq!(plan.metadata.get_all("Requires-Dist").count(), 0);
        assert!(plan.manifest.starts_with(MANIFEST.trim_end()));
        assert_eq!(manifest(&plan.manifest).config.stub_only, Some(true));
    }

    #[test]
    fn declared_stub_only_passes_through() {
        let text = format!("{MANIFEST}stub_only = true\n");
        let plan = RepackagePlan::new(id(), &with_direct_reference(), &manifest(&text)).unwrap();
        assert!(plan.stub_only);
        assert_eq!(plan.manifest, text);
    }

    #[test]
    fn declared_not_stub_only_conflicts() {
        let text = format!("{MANIFEST}stub_only = false\n");
        let err = RepackagePlan::new(id(), &with_direct_reference(), &manifest(&text)).unwrap_err();
        assert!(matches!(err, ArchiveError::ConflictingStubConfig));
    }

    #[test]
    fn declared_stub_only_is_ignored_without_direct_references() {
        let text = format!("{MANIFEST}stub_only = false\n");
        let plan = RepackagePlan::new(id(), METADATA, &manifest(&text)).unwrap();
        assert!(!plan.stub_only);
        assert_eq!(plan.manifest, text);
    }

    #[test]
    fn missing_license_is_invalid_and_carries_raw_text() {
        let raw = "Name: demo\nVersion: 1.0\nRequires-Dist: a\n";
        let err = RepackagePlan::new(id(), raw, &manifest(MANIFEST)).unwrap_err();
        match err {
            ArchiveError::InvalidMetadata(MetadataError::MissingField { field, raw: dumped }) => {
                assert_eq!(field, "License");
                assert_eq!(dumped, raw);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_metadata_is_rejected() {
        let err = RepackagePlan::new(id(), "garbage line\n", &manifest(MANIFEST)).unwrap_err();
        assert!(matches!(err, ArchiveError::MalformedMetadata(_)));
    }

    #[test]
    fn archive_layout_and_normalized_headers() {
        let plan = RepackagePlan::new(id(), METADATA, &manifest(MANIFEST)).unwrap();
        let bytes = plan.write_to(Vec::new(), 1_700_000_000).unwrap();
        let entries = unpack(&bytes);

        let paths: Vec<_> = entries.iter().map(|(p, _, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            [
                "nvidia_demo_cu12-12.4.99/",
                "nvidia_demo_cu12-12.4.99/PKG-INFO",
                "nvidia_demo_cu12-12.4.99/pyproject.toml",
            ]
        );

        let modes: Vec<_> = entries
            .iter()
            .map(|(_, h, _)| h.mode().unwrap())
            .collect();
        assert_eq!(modes, [0o775, 0o644, 0o644]);

        for (_, header, _) in &entries {
            assert_eq!(header.uid().unwrap(), 0);
            assert_eq!(header.gid().unwrap(), 0);
            assert_eq!(header.username().unwrap(), Some(""));
            assert_eq!(header.groupname().unwrap(), Some(""));
            assert_eq!(header.mtime().unwrap(), 1_700_000_000);
        }

        assert_eq!(entries[1].2, plan.metadata.to_string().into_bytes());
        assert_eq!(entries[2].2, MANIFEST.as_bytes());
    }

    #[test]
    fn gzip_header_carries_fixed_mtime() {
        let plan = RepackagePlan::new(id(), METADATA, &manifest(MANIFEST)).unwrap();
        let bytes = plan.write_to(Vec::new(), 733_993_200).unwrap();
        let decoder = GzDecoder::new(bytes.as_slice());
        let header = decoder.header().unwrap();
        assert_eq!(header.mtime(), 733_993_200);
        assert_eq!(
            header.filename(),
            Some(&b"nvidia_demo_cu12-12.4.99.tar"[..])
        );
    }

    #[test]
    fn builds_are_byte_identical() {
        let first = RepackagePlan::new(id(), &with_direct_reference(), &manifest(MANIFEST))
            .unwrap()
            .write_to(Vec::new(), 733_993_200)
            .unwrap();
        let second = RepackagePlan::new(id(), &with_direct_reference(), &manifest(MANIFEST))
            .unwrap()
            .write_to(Vec::new(), 733_993_200)
            .unwrap();
        assert_eq!(first, second);

        let other_seed = RepackagePlan::new(id(), &with_direct_reference(), &manifest(MANIFEST))
            .unwrap()
            .write_to(Vec::new(), 1)
            .unwrap();
        assert_ne!(first, other_seed);
    }

    #[test]
    fn executable_manifest_keeps_exec_mode() {
        let mut plan = RepackagePlan::new(id(), METADATA, &manifest(MANIFEST)).unwrap();
        plan.manifest_executable = true;
        let entries = unpack(&plan.write_to(Vec::new(), 0).unwrap());
        assert_eq!(entries[2].1.mode().unwrap(), 0o755);
    }

    #[test]
    fn long_paths_use_pax_records() {
        let long_name = format!("pkg_{}", "x".repeat(180));
        let identifier = PackageIdentifier::new(&long_name, "1.0");
        let metadata = format!("Name: {long_name}\nVersion: 1.0\nLicense: MIT\n");
        let plan = RepackagePlan::new(identifier, &metadata, &manifest(MANIFEST)).unwrap();

        let entries = unpack(&plan.write_to(Vec::new(), 0).unwrap());
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].0, format!("{long_name}-1.0/PKG-INFO"));
        assert_eq!(entries[2].0, format!("{long_name}-1.0/pyproject.toml"));
    }

    fn write_wheel(dir: &Path, filename: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(filename);
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        for (name, contents) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    #[test]
    fn open_reads_wheel_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wheel(
            dir.path(),
            "nvidia_demo_cu12-12.4.99-py3-none-manylinux_2_28_x86_64.whl",
            &[
                ("nvidia_demo_cu12/__init__.py", ""),
                ("nvidia_demo_cu12-12.4.99.dist-info/METADATA", METADATA),
            ],
        );

        let source = SourceArtifact::open(&path).unwrap();
        assert_eq!(source.identifier(), &id());
        assert_eq!(source.metadata(), METADATA);

        let out = dir.path().join("dist");
        let written = build_sdist(&source, &manifest(MANIFEST), &out, 0).unwrap();
        assert_eq!(written, out.join("nvidia_demo_cu12-12.4.99.tar.gz"));
        let bytes = std::fs::read(&written).unwrap();
        assert_eq!(unpack(&bytes).len(), 3);
    }

    #[test]
    fn open_without_metadata_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wheel(dir.path(), "demo-1.0-py3-none-any.whl", &[("demo.py", "")]);
        let err = SourceArtifact::open(&path).unwrap_err();
        match err {
            ArchiveError::MissingMetadataEntry { entry, .. } => {
                assert_eq!(entry, "demo-1.0.dist-info/METADATA");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn open_rejects_source_archives_and_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        let sdist = dir.path().join("demo-1.0.tar.gz");
        std::fs::write(&sdist, b"").unwrap();
        assert!(matches!(
            SourceArtifact::open(&sdist),
            Err(ArchiveError::UnsupportedFormat(_))
        ));

        let egg = dir.path().join("demo-1.0.egg");
        std::fs::write(&egg, b"").unwrap();
        assert!(matches!(
            SourceArtifact::open(&egg),
            Err(ArchiveError::Filename(FilenameError::Unrecognized(_)))
        ));

        let missing = dir.path().join("demo-1.0-py3-none-any.whl");
        assert!(matches!(
            SourceArtifact::open(&missing),
            Err(ArchiveError::Io { .. })
        ));
    }

    #[test]
    fn corrupt_wheel_is_a_zip_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo-1.0-py3-none-any.whl");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(
            SourceArtifact::open(&path),
            Err(ArchiveError::Zip { .. })
        ));
    }
}
