//! The backup engine (C6): timestamped archive naming, metadata
//! versioning, compatibility checking, and restore dispatch, built on the
//! archive codec (C5) and the process/filesystem adapters (C7).

use std::path::{Path, PathBuf};

use chrono::Utc;
use indexmap::IndexMap;

use crate::{
    archive::{self, ArchiveMetadata, Compression},
    context::ServiceUser,
    error::{BackupError, DivbanError},
    ids::{ContainerName, ServiceName, CURRENT_BACKUP_SCHEMA_VERSION, SUPPORTED_BACKUP_SCHEMA_VERSIONS},
    system::{
        fs::Filesystem,
        process::{ExecOptions, ProcessRunner},
    },
};

/// What a service's backup payload actually is: a database dump driven
/// through the container engine, or a tree of files under the data
/// directory.
#[derive(Debug, Clone)]
pub enum BackupPayload {
    Database { container: ContainerName },
    Files { exclude: Vec<String> },
}

/// The result of a successful [`create_backup`].
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// The producer version embedded in every archive this build writes,
/// conventionally the crate's own version.
fn producer_version() -> crate::ids::ProducerVersion {
    crate::ids::ProducerVersion::new_literal(env!("CARGO_PKG_VERSION"))
}

const DATABASE_DUMP_ENTRY: &str = "database.sql";

/// `<service>-backup-<timestamp>.tar.<ext>`, with every `:`/`.` in the
/// ISO-8601 timestamp replaced by `-` so the name is a valid filename on
/// every target filesystem.
#[must_use]
pub fn backup_file_name(service: &ServiceName, compression: Compression) -> String {
    let timestamp = Utc::now().to_rfc3339().replace([':', '.'], "-");
    format!("{service}-backup-{timestamp}.tar.{}", compression.extension())
}

fn backups_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("backups")
}

/// Lists this service's backups under `<dataDir>/backups`, newest first by
/// modification time.
///
/// # Errors
///
/// Returns [`BackupError::NoneListed`] if the directory doesn't exist or no
/// matching file is found.
pub fn list_backups(data_dir: &Path, service: &ServiceName) -> Result<Vec<PathBuf>, DivbanError> {
    let dir = backups_dir(data_dir);
    if !dir.is_dir() {
        return Err(BackupError::NoneListed(service.to_string()).into());
    }

    let prefix = format!("{service}-backup-");
    let mut entries: Vec<(PathBuf, std::time::SystemTime)> = std::fs::read_dir(&dir)
        .map_err(|e| BackupError::NoneListed(format!("{service}: {e}")))?
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    if entries.is_empty() {
        return Err(BackupError::NoneListed(service.to_string()).into());
    }

    entries.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(entries.into_iter().map(|(path, _)| path).collect())
}

/// Creates a backup of `service`, producing its payload per `payload`,
/// writing the archive under `<dataDir>/backups`.
///
/// # Errors
///
/// Returns [`BackupError::CreateFailed`] if the payload cannot be produced
/// or the archive cannot be written.
pub async fn create_backup(
    service: &ServiceName,
    data_dir: &Path,
    payload: &BackupPayload,
    compression: Compression,
    user: &ServiceUser,
) -> Result<BackupOutcome, DivbanError> {
    let dir = backups_dir(data_dir);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| BackupError::CreateFailed(format!("creating backups dir: {e}")))?;

    let mut files = IndexMap::new();
    let mut file_names = Vec::new();
    match payload {
        BackupPayload::Database { container } => {
            let dump = dump_database(container, user).await?;
            files.insert(PathBuf::from(DATABASE_DUMP_ENTRY), dump);
            file_names.push(DATABASE_DUMP_ENTRY.to_owned());
        }
        BackupPayload::Files { exclude } => {
            for (path, contents) in collect_files(data_dir, exclude).await? {
                file_names.push(path.display().to_string());
                files.insert(path, contents);
            }
        }
    }

    let metadata = ArchiveMetadata {
        schema_version: CURRENT_BACKUP_SCHEMA_VERSION,
        producer: "divban".to_owned(),
        producer_version: producer_version(),
        service: service.clone(),
        timestamp: Utc::now(),
        files: file_names,
    };

    let bytes = archive::create_archive(&files, &metadata, compression)
        .map_err(DivbanError::Backup)?;

    let file_name = backup_file_name(service, compression);
    let path = dir.join(&file_name);
    Filesystem::write_bytes(&path, &bytes).await?;

    Ok(BackupOutcome {
        size_bytes: bytes.len() as u64,
        path,
    })
}

/// Restores `service` from the archive at `backup_path`.
///
/// # Errors
///
/// Returns [`BackupError::NotFoundForRestore`] if the path doesn't exist,
/// [`BackupError::ServiceMismatch`] if the embedded metadata names a
/// different service, [`BackupError::UnsupportedSchemaVersion`] if the
/// schema isn't in [`SUPPORTED_BACKUP_SCHEMA_VERSIONS`], or
/// [`BackupError::RestoreFailed`] if extraction or the restore action fails.
pub async fn restore_backup(
    service: &ServiceName,
    data_dir: &Path,
    payload: &BackupPayload,
    backup_path: &Path,
    user: &ServiceUser,
) -> Result<(), DivbanError> {
    if !backup_path.is_file() {
        return Err(BackupError::NotFoundForRestore(backup_path.display().to_string()).into());
    }

    let bytes = Filesystem::read_bytes(backup_path).await?;
    let compression = Compression::detect(backup_path);
    let (metadata, files) =
        archive::extract_archive(&bytes, compression).map_err(DivbanError::Backup)?;

    if let Some(metadata) = &metadata {
        if metadata.service != *service {
            return Err(BackupError::ServiceMismatch {
                expected: service.to_string(),
                found: metadata.service.to_string(),
            }
            .into());
        }
        if !SUPPORTED_BACKUP_SCHEMA_VERSIONS.contains(&metadata.schema_version) {
            return Err(BackupError::UnsupportedSchemaVersion(metadata.schema_version.to_string()).into());
        }
        if metadata.producer_version.0 > producer_version().0 {
            tracing::warn!(
                "backup was produced by a newer divban ({}) than this build ({})",
                metadata.producer_version,
                producer_version()
            );
        }
    }

    match payload {
        BackupPayload::Database { container } => {
            let sql = files
                .get(&PathBuf::from(DATABASE_DUMP_ENTRY))
                .ok_or_else(|| BackupError::RestoreFailed("archive has no database.sql entry".to_owned()))?;
            restore_database(container, sql, user).await?;
        }
        BackupPayload::Files { .. } => {
            for (relative_path, contents) in &files {
                let target = data_dir.join(relative_path);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| BackupError::RestoreFailed(format!("{}: {e}", target.display())))?;
                }
                Filesystem::write_bytes(&target, contents).await?;
            }
        }
    }

    Ok(())
}

async fn dump_database(container: &ContainerName, user: &ServiceUser) -> Result<Vec<u8>, DivbanError> {
    let runner = ProcessRunner;
    let output = runner
        .run_as_user(
            user,
            "podman",
            &[
                "exec".to_owned(),
                "-i".to_owned(),
                container.to_string(),
                "pg_dumpall".to_owned(),
                "--clean".to_owned(),
                "--if-exists".to_owned(),
            ],
            ExecOptions::default(),
        )
        .await?;
    if !output.success() {
        return Err(BackupError::CreateFailed(format!(
            "pg_dumpall failed: {}",
            output.stderr_str()
        ))
        .into());
    }
    Ok(output.stdout)
}

async fn restore_database(
    container: &ContainerName,
    sql: &[u8],
    user: &ServiceUser,
) -> Result<(), DivbanError> {
    let runner = ProcessRunner;
    let output = runner
        .run_as_user(
            user,
            "podman",
            &[
                "exec".to_owned(),
                "-i".to_owned(),
                container.to_string(),
                "psql".to_owned(),
            ],
            ExecOptions {
                stdin: Some(sql.to_vec()),
                ..ExecOptions::default()
            },
        )
        .await?;

    let stderr = output.stderr_str();
    if !output.success() && stderr.contains("ERROR") {
        return Err(BackupError::RestoreFailed(stderr.into_owned()).into());
    }
    if !output.success() {
        tracing::warn!("psql restore reported a non-fatal issue: {stderr}");
    }
    Ok(())
}

/// Walks `data_dir` with `walkdir`, skipping any relative path matching one
/// of `exclude`'s glob patterns, reading the rest concurrently with a
/// bounded join set (§5's recommended fan-out of 10).
async fn collect_files(
    data_dir: &Path,
    exclude: &[String],
) -> Result<Vec<(PathBuf, Vec<u8>)>, DivbanError> {
    let patterns: Vec<glob::Pattern> = exclude
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();

    let candidates: Vec<PathBuf> = walkdir::WalkDir::new(data_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(data_dir).ok()?.to_path_buf();
            let excluded = patterns
                .iter()
                .any(|pattern| pattern.matches_path(&relative));
            (!excluded).then_some(entry.path().to_path_buf())
        })
        .collect();

    let mut join_set = tokio::task::JoinSet::new();
    let mut results = Vec::with_capacity(candidates.len());
    let mut pending = candidates.into_iter();

    const CONCURRENCY: usize = 10;
    for path in pending.by_ref().take(CONCURRENCY) {
        spawn_read(&mut join_set, data_dir, path);
    }

    while let Some(joined) = join_set.join_next().await {
        let (relative, contents) =
            joined.map_err(|e| BackupError::CreateFailed(format!("reading file: {e}")))??;
        results.push((relative, contents));
        if let Some(path) = pending.next() {
            spawn_read(&mut join_set, data_dir, path);
        }
    }

    Ok(results)
}

fn spawn_read(
    join_set: &mut tokio::task::JoinSet<Result<(PathBuf, Vec<u8>), DivbanError>>,
    data_dir: &Path,
    path: PathBuf,
) {
    let data_dir = data_dir.to_path_buf();
    join_set.spawn(async move {
        let relative = path.strip_prefix(&data_dir).unwrap_or(&path).to_path_buf();
        let contents = Filesystem::read_bytes(&path).await?;
        Ok((relative, contents))
    });
}
