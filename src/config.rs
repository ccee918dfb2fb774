//! Config decoding (A2): `toml` + `serde` decoding of a per-service file
//! into the typed [`ServiceConfig<T>`], producing [`ConfigError`] taxonomy
//! errors on failure rather than panicking on a malformed file.

use std::path::Path;

use serde::Deserialize;

use crate::{
    archive::Compression,
    error::{ConfigError, DivbanError},
    ids::{AbsolutePath, ConfigSchemaVersion},
    quadlet::hardware::{MlBackend, TranscodingBackend},
};

/// The config schema version every service's TOML file is checked against.
pub const CURRENT_CONFIG_SCHEMA_VERSION: ConfigSchemaVersion =
    ConfigSchemaVersion(crate::ids::SemVer {
        major: 1,
        minor: 0,
        patch: 0,
    });

/// The data directory and its conventional subdirectories. Only `data_dir`
/// is required; services that don't use a given subdirectory leave it
/// `None` and fall back to a path under `data_dir`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    pub data_dir: AbsolutePath,
    pub upload_location: Option<AbsolutePath>,
    pub profile_location: Option<AbsolutePath>,
    pub thumb_location: Option<AbsolutePath>,
    pub encoded_location: Option<AbsolutePath>,
    pub postgres_location: Option<AbsolutePath>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    pub image: Option<crate::ids::ContainerImage>,
    pub auto_update: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareConfig {
    #[serde(default)]
    pub transcoding: TranscodingBackend,
    #[serde(default)]
    pub ml: MlBackend,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalLibrary {
    pub host_path: AbsolutePath,
    pub container_path: AbsolutePath,
    #[serde(default)]
    pub read_only: bool,
}

fn default_compression() -> Compression {
    Compression::Zstd
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    #[serde(default = "default_compression", with = "compression_serde")]
    pub compression: Compression,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            exclude: Vec::new(),
        }
    }
}

mod compression_serde {
    use super::Compression;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Compression, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match value {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Compression, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "none" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            other => Err(serde::de::Error::custom(format!(
                "unknown backup compression `{other}`, expected none|gzip|zstd"
            ))),
        }
    }
}

/// The full per-service record decoded from TOML: the fields every service
/// shares (§3), plus `T` for the fields specific to one service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig<T> {
    pub divban_config_schema_version: ConfigSchemaVersion,
    pub paths: PathsConfig,
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    #[serde(default)]
    pub container: Option<ContainerConfig>,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub external_libraries: Vec<ExternalLibrary>,
    #[serde(default)]
    pub backup: BackupConfig,
    pub log_level: Option<String>,
    #[serde(flatten)]
    pub service: T,
}

/// Reads and decodes `path` into a [`ServiceConfig<T>`], rejecting a schema
/// version other than [`CURRENT_CONFIG_SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] on malformed TOML,
/// [`ConfigError::UnsupportedSchemaVersion`] if the declared schema version
/// doesn't match, or a [`ConfigError`] from an invalid identifier embedded
/// in the file (branded types run their own parser during decoding).
pub async fn load<T>(path: &Path) -> Result<ServiceConfig<T>, DivbanError>
where
    T: for<'de> Deserialize<'de>,
{
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| crate::error::SystemError::Read {
            path: path.display().to_string(),
            source,
        })?;
    decode(&raw)
}

/// Decodes an already-read TOML string, the pure half of [`load`] so
/// `validate` can run without touching the filesystem concurrency model.
///
/// # Errors
///
/// See [`load`].
pub fn decode<T>(raw: &str) -> Result<ServiceConfig<T>, DivbanError>
where
    T: for<'de> Deserialize<'de>,
{
    let config: ServiceConfig<T> = toml::from_str(raw).map_err(ConfigError::Parse)?;
    if config.divban_config_schema_version != CURRENT_CONFIG_SCHEMA_VERSION {
        return Err(ConfigError::UnsupportedSchemaVersion(
            config.divban_config_schema_version.to_string(),
        )
        .into());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Empty {}

    #[test]
    fn decodes_minimal_config() {
        let toml = r#"
            divbanConfigSchemaVersion = "1.0.0"
            [paths]
            dataDir = "/srv/caddy"
        "#;
        let config: ServiceConfig<Empty> = decode(toml).unwrap();
        assert_eq!(config.paths.data_dir.to_string(), "/srv/caddy");
        assert_eq!(config.hardware.transcoding, TranscodingBackend::Disabled);
    }

    #[test]
    fn rejects_mismatched_schema_version() {
        let toml = r#"
            divbanConfigSchemaVersion = "2.0.0"
            [paths]
            dataDir = "/srv/caddy"
        "#;
        let result = decode::<Empty>(toml);
        assert!(matches!(
            result,
            Err(DivbanError::Config(ConfigError::UnsupportedSchemaVersion(_)))
        ));
    }

    #[test]
    fn rejects_relative_data_dir() {
        let toml = r#"
            divbanConfigSchemaVersion = "1.0.0"
            [paths]
            dataDir = "srv/caddy"
        "#;
        assert!(decode::<Empty>(toml).is_err());
    }

    #[test]
    fn decodes_hardware_and_flattened_service_fields() {
        #[derive(Debug, Clone, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ImmichFields {
            database: DatabaseFields,
        }
        #[derive(Debug, Clone, Deserialize)]
        struct DatabaseFields {
            username: String,
        }

        let toml = r#"
            divbanConfigSchemaVersion = "1.0.0"
            [paths]
            dataDir = "/srv/immich"
            [hardware]
            ml = "cuda"
            [database]
            username = "immich"
        "#;
        let config: ServiceConfig<ImmichFields> = decode(toml).unwrap();
        assert_eq!(config.hardware.ml, MlBackend::Cuda);
        assert_eq!(config.service.database.username, "immich");
    }
}
