//! The archive codec (C5): tar plus optional gzip/zstd, with an embedded
//! metadata JSON entry and streaming extraction that rejects path traversal
//! before any entry is unpacked into the returned map.

use std::{
    io::{Cursor, Read, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::BackupError,
    ids::{BackupSchemaVersion, ProducerVersion, ServiceName},
};

/// The conventional name of the metadata entry, always written first.
pub const METADATA_ENTRY_NAME: &str = "divban.backup.metadata.json";

/// Whole-stream compression applied on top of the tar payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// The filename extension this compression conventionally uses,
    /// appended after `.tar`.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::None => "tar",
            Self::Gzip => "gz",
            Self::Zstd => "zst",
        }
    }

    /// Detects compression from a path's extension: `*.tar.gz`/`*.gz` ->
    /// gzip, `*.tar.zst`/`*.zst` -> zstd, anything else -> none.
    #[must_use]
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Self::Gzip,
            Some("zst") => Self::Zstd,
            _ => Self::None,
        }
    }
}

/// Self-describing metadata embedded as the first entry of every archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub schema_version: BackupSchemaVersion,
    pub producer: String,
    pub producer_version: ProducerVersion,
    pub service: ServiceName,
    pub timestamp: DateTime<Utc>,
    pub files: Vec<String>,
}

/// Encode `files` (in insertion order) plus `metadata` into an archive
/// stream, applying `compression` to the whole tar byte stream.
///
/// # Errors
///
/// Returns [`BackupError::CreateFailed`] if the tar or compression writer
/// fails, or metadata cannot be serialized.
pub fn create_archive(
    files: &IndexMap<PathBuf, Vec<u8>>,
    metadata: &ArchiveMetadata,
    compression: Compression,
) -> Result<Vec<u8>, BackupError> {
    let tar_bytes = build_tar(files, metadata)?;
    compress(&tar_bytes, compression)
}

fn build_tar(
    files: &IndexMap<PathBuf, Vec<u8>>,
    metadata: &ArchiveMetadata,
) -> Result<Vec<u8>, BackupError> {
    let mut builder = tar::Builder::new(Vec::new());

    let metadata_json = serde_json::to_vec_pretty(metadata)
        .map_err(|e| BackupError::CreateFailed(format!("serializing metadata: {e}")))?;
    append_entry(&mut builder, Path::new(METADATA_ENTRY_NAME), &metadata_json)?;

    for (path, contents) in files {
        append_entry(&mut builder, path, contents)?;
    }

    builder
        .into_inner()
        .map_err(|e| BackupError::CreateFailed(format!("finishing tar stream: {e}")))
}

fn append_entry(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &Path,
    contents: &[u8],
) -> Result<(), BackupError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, path, contents)
        .map_err(|e| BackupError::CreateFailed(format!("appending `{}`: {e}", path.display())))
}

fn compress(tar_bytes: &[u8], compression: Compression) -> Result<Vec<u8>, BackupError> {
    match compression {
        Compression::None => Ok(tar_bytes.to_vec()),
        Compression::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(tar_bytes)
                .map_err(|e| BackupError::CreateFailed(format!("gzip: {e}")))?;
            encoder
                .finish()
                .map_err(|e| BackupError::CreateFailed(format!("gzip: {e}")))
        }
        Compression::Zstd => zstd::stream::encode_all(Cursor::new(tar_bytes), 0)
            .map_err(|e| BackupError::CreateFailed(format!("zstd: {e}"))),
    }
}

fn decompress(bytes: &[u8], compression: Compression) -> Result<Vec<u8>, BackupError> {
    match compression {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| BackupError::RestoreFailed(format!("gunzip: {e}")))?;
            Ok(out)
        }
        Compression::Zstd => zstd::stream::decode_all(Cursor::new(bytes))
            .map_err(|e| BackupError::RestoreFailed(format!("zstd decode: {e}"))),
    }
}

/// Rejects archive entries whose path contains `..`, starts with `/`, or
/// contains a NUL byte (§4.5, tested property 7).
fn reject_traversal(path: &Path) -> Result<(), BackupError> {
    let raw = path.to_string_lossy();
    let traversal = raw.split('/').any(|component| component == "..")
        || raw.starts_with('/')
        || raw.contains('\0');
    if traversal {
        return Err(BackupError::PathTraversal(raw.into_owned()));
    }
    Ok(())
}

/// Decode an archive, auto-detecting or accepting a declared compression,
/// returning the embedded metadata (if present) separately from every other
/// file. Every entry's path is validated against traversal *before* any
/// entry is unpacked into the result map, in a first pass over the headers.
///
/// # Errors
///
/// Returns [`BackupError::PathTraversal`] if any entry's path is unsafe, or
/// [`BackupError::RestoreFailed`] if the stream cannot be parsed.
pub fn extract_archive(
    bytes: &[u8],
    compression: Compression,
) -> Result<(Option<ArchiveMetadata>, IndexMap<PathBuf, Vec<u8>>), BackupError> {
    let tar_bytes = decompress(bytes, compression)?;

    // First pass: validate every entry's path before unpacking anything.
    let mut validation_archive = tar::Archive::new(Cursor::new(&tar_bytes));
    for entry in validation_archive
        .entries()
        .map_err(|e| BackupError::RestoreFailed(format!("reading archive: {e}")))?
    {
        let entry = entry.map_err(|e| BackupError::RestoreFailed(format!("reading entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| BackupError::RestoreFailed(format!("reading entry path: {e}")))?;
        reject_traversal(&path)?;
    }

    // Second pass: every path is now known-safe, buffer contents.
    let mut archive = tar::Archive::new(Cursor::new(&tar_bytes));
    let mut metadata = None;
    let mut files = IndexMap::new();
    for entry in archive
        .entries()
        .map_err(|e| BackupError::RestoreFailed(format!("reading archive: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| BackupError::RestoreFailed(format!("reading entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| BackupError::RestoreFailed(format!("reading entry path: {e}")))?
            .into_owned();
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| BackupError::RestoreFailed(format!("reading `{}`: {e}", path.display())))?;

        if path == Path::new(METADATA_ENTRY_NAME) {
            metadata = Some(
                serde_json::from_slice(&contents)
                    .map_err(|e| BackupError::RestoreFailed(format!("parsing metadata: {e}")))?,
            );
        } else {
            files.insert(path, contents);
        }
    }

    Ok((metadata, files))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> ArchiveMetadata {
        ArchiveMetadata {
            schema_version: BackupSchemaVersion::new_literal("1.0.0"),
            producer: "divban".to_owned(),
            producer_version: ProducerVersion::new_literal("0.1.0"),
            service: ServiceName::new_literal("immich"),
            timestamp: DateTime::parse_from_rfc3339("2026-07-26T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            files: vec!["database.sql".to_owned()],
        }
    }

    #[test]
    fn round_trips_files_and_metadata_uncompressed() {
        let mut files = IndexMap::new();
        files.insert(PathBuf::from("database.sql"), b"select 1;".to_vec());
        let metadata = sample_metadata();

        let archive = create_archive(&files, &metadata, Compression::None).unwrap();
        let (decoded_metadata, decoded_files) =
            extract_archive(&archive, Compression::None).unwrap();

        assert_eq!(decoded_metadata, Some(metadata));
        assert_eq!(decoded_files, files);
    }

    #[test]
    fn round_trips_through_gzip() {
        let mut files = IndexMap::new();
        files.insert(PathBuf::from("a.txt"), b"hello".to_vec());
        let metadata = sample_metadata();

        let archive = create_archive(&files, &metadata, Compression::Gzip).unwrap();
        let (decoded_metadata, decoded_files) =
            extract_archive(&archive, Compression::Gzip).unwrap();

        assert_eq!(decoded_metadata, Some(metadata));
        assert_eq!(decoded_files, files);
    }

    #[test]
    fn round_trips_through_zstd_with_one_megabyte_payload() {
        let mut files = IndexMap::new();
        files.insert(PathBuf::from("database.sql"), vec![b'x'; 1024 * 1024]);
        let metadata = sample_metadata();

        let archive = create_archive(&files, &metadata, Compression::Zstd).unwrap();
        let (decoded_metadata, decoded_files) =
            extract_archive(&archive, Compression::Zstd).unwrap();

        assert_eq!(decoded_metadata.unwrap().service.as_str(), "immich");
        assert_eq!(decoded_files[Path::new("database.sql")].len(), 1024 * 1024);
    }

    #[test]
    fn detects_compression_from_extension() {
        assert_eq!(
            Compression::detect(Path::new("immich-backup-2026.tar.gz")),
            Compression::Gzip
        );
        assert_eq!(
            Compression::detect(Path::new("immich-backup-2026.tar.zst")),
            Compression::Zstd
        );
        assert_eq!(
            Compression::detect(Path::new("immich-backup-2026.tar")),
            Compression::None
        );
    }

    #[test]
    fn rejects_parent_directory_traversal_before_writing_anything() {
        let mut builder = tar::Builder::new(Vec::new());
        append_entry(&mut builder, Path::new("database.sql"), b"ok").unwrap();
        append_entry(&mut builder, Path::new("../etc/passwd"), b"evil").unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let result = extract_archive(&tar_bytes, Compression::None);
        assert!(matches!(result, Err(BackupError::PathTraversal(_))));
    }

    #[test]
    fn rejects_absolute_path_entries() {
        let mut builder = tar::Builder::new(Vec::new());
        append_entry(&mut builder, Path::new("/etc/passwd"), b"evil").unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let result = extract_archive(&tar_bytes, Compression::None);
        assert!(matches!(result, Err(BackupError::PathTraversal(_))));
    }
}
