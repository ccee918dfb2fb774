//! Filesystem primitives (C7): directory creation with ownership, and
//! file writes with backup-and-replace semantics so a failed setup can
//! restore every touched path to its prior state (§4.8, S5).

use std::path::{Path, PathBuf};

use crate::{
    context::ServiceUser,
    error::{DivbanError, SystemError},
    ids::AbsolutePath,
};

/// The record kept for one tracked file write, enough to either discard the
/// backup on success or restore it on rollback.
#[derive(Debug, Clone)]
pub struct FileWrite {
    pub path: AbsolutePath,
    /// `Some` if a prior file at `path` was moved aside before writing.
    pub backup: Option<PathBuf>,
    /// Whether `path` existed before this write (a non-existent path with no
    /// backup rolls back by deletion, not restoration).
    pub pre_existing: bool,
}

/// Thin async wrapper over `tokio::fs`, plus the tracked operations the
/// setup orchestrator's directory and file steps need.
#[derive(Debug, Default, Clone, Copy)]
pub struct Filesystem;

impl Filesystem {
    #[must_use]
    pub fn directory_exists(path: &Path) -> bool {
        path.is_dir()
    }

    #[must_use]
    pub fn file_exists(path: &Path) -> bool {
        path.is_file()
    }

    /// # Errors
    ///
    /// Returns [`SystemError::Read`] if the file cannot be read.
    pub async fn read_bytes(path: &Path) -> Result<Vec<u8>, DivbanError> {
        tokio::fs::read(path)
            .await
            .map_err(|source| {
                SystemError::Read {
                    path: path.display().to_string(),
                    source,
                }
                .into()
            })
    }

    /// # Errors
    ///
    /// Returns [`SystemError::Write`] if the file cannot be written.
    pub async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), DivbanError> {
        tokio::fs::write(path, bytes).await.map_err(|source| {
            SystemError::Write {
                path: path.display().to_string(),
                source,
            }
            .into()
        })
    }

    /// Creates `path` (and its ancestors) if missing, chowning it to
    /// `user`. Returns whether the directory did not already exist.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::CreateDirectory`] if creation or ownership
    /// assignment fails.
    pub async fn ensure_directory(path: &Path, user: &ServiceUser) -> Result<bool, DivbanError> {
        if Self::directory_exists(path) {
            return Ok(false);
        }
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|source| SystemError::CreateDirectory {
                path: path.display().to_string(),
                source,
            })?;
        chown(path, user).map_err(|source| SystemError::CreateDirectory {
            path: path.display().to_string(),
            source,
        })?;
        Ok(true)
    }

    /// Creates every directory in `paths` that does not already exist,
    /// returning only the ones this call created — the set
    /// [`Self::remove_directories_reverse`] should undo on failure.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::CreateDirectory`] on the first failing path;
    /// directories created before the failure are left in place for the
    /// caller's release step to remove.
    pub async fn ensure_directories_tracked(
        paths: &[AbsolutePath],
        user: &ServiceUser,
    ) -> Result<Vec<AbsolutePath>, DivbanError> {
        let mut created = Vec::new();
        for path in paths {
            if Self::ensure_directory(path.as_path(), user).await? {
                created.push(path.clone());
            }
        }
        Ok(created)
    }

    /// Removes every directory in `created`, in reverse order, ignoring
    /// "already gone" so a partially-rolled-back release can be retried.
    pub async fn remove_directories_reverse(created: &[AbsolutePath]) {
        for path in created.iter().rev() {
            let _ = tokio::fs::remove_dir_all(path.as_path()).await;
        }
    }

    /// Writes every `(path, contents)` pair, moving any pre-existing file at
    /// that path aside to a `.bak.<uuid>` sibling first, so the write is
    /// reversible. Returns one [`FileWrite`] per path in the same order.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Write`] on the first failing path; files
    /// written before the failure (and any backups taken) are left for the
    /// caller's release step to roll back via [`Self::rollback_file_writes`].
    pub async fn write_generated_files_tracked(
        files: &[(AbsolutePath, String)],
    ) -> Result<Vec<FileWrite>, DivbanError> {
        let mut writes = Vec::with_capacity(files.len());
        for (path, contents) in files {
            let pre_existing = Self::file_exists(path.as_path());
            let backup = if pre_existing {
                let backup_path = backup_sibling(path.as_path());
                tokio::fs::copy(path.as_path(), &backup_path)
                    .await
                    .map_err(|source| SystemError::Write {
                        path: path.to_string(),
                        source,
                    })?;
                Some(backup_path)
            } else {
                None
            };

            let tmp_path = new_sibling(path.as_path());
            Self::write_bytes(&tmp_path, contents.as_bytes()).await?;
            tokio::fs::rename(&tmp_path, path.as_path())
                .await
                .map_err(|source| SystemError::Write {
                    path: path.to_string(),
                    source,
                })?;
            writes.push(FileWrite {
                path: path.clone(),
                backup,
                pre_existing,
            });
        }
        Ok(writes)
    }

    /// Discards every backup taken in `writes`, called once the whole setup
    /// pipeline has succeeded and the prior file contents are no longer
    /// needed.
    pub async fn cleanup_file_backups(writes: &[FileWrite]) {
        for write in writes {
            if let Some(backup) = &write.backup {
                let _ = tokio::fs::remove_file(backup).await;
            }
        }
    }

    /// Restores every tracked write to its prior state: a path with a
    /// backup is restored from it; a path with no backup (meaning this
    /// write created it) is deleted.
    pub async fn rollback_file_writes(writes: &[FileWrite]) {
        for write in writes {
            match &write.backup {
                Some(backup) => {
                    let _ = tokio::fs::rename(backup, write.path.as_path()).await;
                }
                None if !write.pre_existing => {
                    let _ = tokio::fs::remove_file(write.path.as_path()).await;
                }
                None => {}
            }
        }
    }
}

fn backup_sibling(path: &Path) -> PathBuf {
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!("{file_name}.bak.{}", uuid::Uuid::new_v4()))
}

/// The `<name>.new` staging path written before the atomic rename over the
/// target (§4.9's file write contract).
fn new_sibling(path: &Path) -> PathBuf {
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!("{file_name}.new"))
}

#[cfg(unix)]
fn chown(path: &Path, user: &ServiceUser) -> std::io::Result<()> {
    rustix::fs::chown(
        path,
        Some(rustix::fs::Uid::from_raw(user.uid.get())),
        Some(rustix::fs::Gid::from_raw(user.gid.get())),
    )
    .map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn chown(_path: &Path, _user: &ServiceUser) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{GroupId, UserId, Username};

    fn user() -> ServiceUser {
        ServiceUser {
            name: Username::new_literal("immich"),
            uid: UserId::new_literal(rustix_current_uid()),
            gid: GroupId::new_literal(rustix_current_uid()),
        }
    }

    #[cfg(unix)]
    fn rustix_current_uid() -> u32 {
        rustix::process::getuid().as_raw()
    }

    #[cfg(not(unix))]
    fn rustix_current_uid() -> u32 {
        0
    }

    #[tokio::test]
    async fn ensure_directory_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("uploads");
        let abs = AbsolutePath::try_from(nested.clone()).unwrap();

        let created_first = Filesystem::ensure_directory(&nested, &user()).await.unwrap();
        let created_second = Filesystem::ensure_directory(&nested, &user()).await.unwrap();

        assert!(created_first);
        assert!(!created_second);
        assert!(Filesystem::directory_exists(abs.as_path()));
    }

    #[tokio::test]
    async fn write_generated_files_backs_up_existing_contents_and_rollback_restores_them() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("immich.env");
        let abs = AbsolutePath::try_from(path.clone()).unwrap();

        tokio::fs::write(&path, b"OLD=1").await.unwrap();

        let writes = Filesystem::write_generated_files_tracked(&[(abs.clone(), "NEW=2".to_owned())])
            .await
            .unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "NEW=2");
        assert!(writes[0].backup.is_some());

        Filesystem::rollback_file_writes(&writes).await;
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "OLD=1");
    }

    #[tokio::test]
    async fn rollback_of_a_freshly_created_file_deletes_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.env");
        let abs = AbsolutePath::try_from(path.clone()).unwrap();

        let writes = Filesystem::write_generated_files_tracked(&[(abs, "A=1".to_owned())])
            .await
            .unwrap();
        assert!(!writes[0].pre_existing);

        Filesystem::rollback_file_writes(&writes).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn cleanup_discards_backups_without_touching_the_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("immich.env");
        let abs = AbsolutePath::try_from(path.clone()).unwrap();
        tokio::fs::write(&path, b"OLD=1").await.unwrap();

        let writes = Filesystem::write_generated_files_tracked(&[(abs, "NEW=2".to_owned())])
            .await
            .unwrap();
        let backup = writes[0].backup.clone().unwrap();
        assert!(backup.exists());

        Filesystem::cleanup_file_backups(&writes).await;
        assert!(!backup.exists());
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "NEW=2");
    }
}
