//! The structured error taxonomy described in the error handling design: a
//! small set of stable categories, independent of how they end up rendered,
//! each mapped to a process exit code in the 10-90 range.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DivbanError>;

/// A single top-level failure, one variant per taxonomy category.
///
/// Categories are intentionally coarse. Operations that can fail in several
/// distinct ways (backups, restores) carry a `code` distinguishing the exit
/// status without multiplying variants.
#[derive(Error, Debug)]
pub enum DivbanError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("system failure: {0}")]
    System(#[from] SystemError),

    #[error("container engine failure: {0}")]
    Container(#[from] ContainerError),

    #[error("service operation failed: {0}")]
    Service(#[from] ServiceError),

    #[error("backup failure: {0}")]
    Backup(#[from] BackupError),

    #[error("{0}")]
    General(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("`{field}` must be an absolute path, got `{value}`")]
    NotAbsolute { field: &'static str, value: String },
    #[error("unknown value `{value}` for `{field}`")]
    UnknownEnumValue { field: &'static str, value: String },
    #[error("malformed identifier in `{field}`: {source}")]
    Identifier {
        field: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("unsupported config schema version `{0}`")]
    UnsupportedSchemaVersion(String),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write `{path}`: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create directory `{path}`: {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process `{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },
    #[error("process `{command}` exited with status {status}: {stderr}")]
    ProcessFailed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error(
        "refusing to run as uid {expected}: current process uid is {actual}; privilege \
         elevation is not attempted"
    )]
    UserMismatch { expected: u32, actual: u32 },
    #[error("setup cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("secret store unavailable: {0}")]
    SecretStoreUnavailable(String),
    #[error("volume name `{0}` collides with an existing volume of a different stack")]
    VolumeNameCollision(String),
    #[error("quadlet generation failed: {0}")]
    Generation(String),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("daemon-reload failed: {0}")]
    DaemonReload(String),
    #[error("failed to {action} unit `{unit}`: {detail}")]
    UnitOperation {
        action: &'static str,
        unit: String,
        detail: String,
    },
    #[error("unknown service `{0}`")]
    UnknownService(String),
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("no backup found at `{0}`")]
    NotFoundForRestore(String),
    #[error("no backups exist for service `{0}`")]
    NoneListed(String),
    #[error("backup creation failed: {0}")]
    CreateFailed(String),
    #[error("restore failed: {0}")]
    RestoreFailed(String),
    #[error("backup service `{found}` does not match target service `{expected}`")]
    ServiceMismatch { expected: String, found: String },
    #[error("unsupported backup schema version `{0}`")]
    UnsupportedSchemaVersion(String),
    #[error("path traversal rejected in archive entry `{0}`")]
    PathTraversal(String),
}

impl DivbanError {
    /// The process exit code for this failure, per the external interface's
    /// exit code table. Categories occupy disjoint 10-wide bands; a handful
    /// of operations are pinned to the specific codes the CLI contract names.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(err) => match err {
                ConfigError::UnsupportedSchemaVersion(_) => 13,
                _ => 12,
            },
            Self::System(err) => match err {
                SystemError::Write { .. } | SystemError::CreateDirectory { .. } => 28,
                SystemError::Timeout { .. } => 22,
                SystemError::Cancelled => 21,
                _ => 20,
            },
            Self::Container(_) => 30,
            Self::Service(_) => 40,
            Self::Backup(err) => match err {
                BackupError::NotFoundForRestore(_) | BackupError::RestoreFailed(_) => 51,
                BackupError::NoneListed(_) => 52,
                _ => 50,
            },
            Self::General(_) => 1,
        }
    }

    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "Config",
            Self::System(_) => "System",
            Self::Container(_) => "Container",
            Self::Service(_) => "Service",
            Self::Backup(_) => "Backup",
            Self::General(_) => "General",
        }
    }
}

/// Wraps a top-level failure together with any errors raised while running
/// the release stack for it, so the original cause stays the headline and
/// release failures surface as secondary context rather than replacing it.
#[derive(Debug)]
pub struct SetupFailure {
    pub cause: DivbanError,
    pub release_errors: Vec<DivbanError>,
}

impl std::fmt::Display for SetupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cause)?;
        if !self.release_errors.is_empty() {
            write!(f, " (and {} release error(s))", self.release_errors.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for SetupFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl SetupFailure {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.cause.exit_code()
    }
}
