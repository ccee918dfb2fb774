use indexmap::IndexMap;
use serde::Serialize;

/// The `[Container]` section of a generated `.container` quadlet file.
///
/// Every field that needs engine-specific formatting (volume relabeling,
/// `UserNS=` suffixes, hardware device/security options) is resolved to its
/// final string form by the stack composer before a [`Container`] is built;
/// this type only knows how to lay the result out as INI fields.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Container {
    pub container_name: String,

    /// Image reference, with an `@sha256:...` digest already appended when present.
    pub image: String,

    pub network: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub publish_port: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volume: Vec<String>,

    /// Rendered as one `Environment=KEY=VALUE` line per entry, in insertion order.
    #[serde(
        serialize_with = "serialize_environment",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub environment: IndexMap<String, String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment_file: Vec<String>,

    /// Precomputed `name,type=mount[,target=...]` / `name,type=env,target=VAR` entries.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secret: Vec<String>,

    /// Precomputed `host:container` device mount entries.
    #[serde(rename = "AddDevice", skip_serializing_if = "Vec::is_empty")]
    pub add_device: Vec<String>,

    /// Untranslated `--security-opt` flags (e.g. `systempaths=unconfined`), passed
    /// straight through to Podman since Quadlet has no first-class key for them.
    #[serde(
        rename = "PodmanArgs",
        serialize_with = "serialize_security_opts",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub security_opt: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_add: Vec<String>,

    /// Already formatted, e.g. `keep-id:uid=1000,gid=1000`.
    pub user_ns: Option<String>,

    pub shm_size: Option<String>,

    #[serde(skip_serializing_if = "is_false")]
    pub read_only: bool,

    #[serde(skip_serializing_if = "is_false")]
    pub no_new_privileges: bool,

    pub health_cmd: Option<String>,
    pub health_interval: Option<String>,
    pub health_timeout: Option<String>,
    pub health_retries: Option<u32>,
    pub health_start_period: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_driver: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !b
}

fn serialize_security_opts<S>(security_opt: &[String], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    security_opt
        .iter()
        .map(|opt| format!("--security-opt={opt}"))
        .collect::<Vec<_>>()
        .serialize(serializer)
}

fn serialize_environment<S>(
    environment: &IndexMap<String, String>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    environment
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serde::quadlet;

    #[test]
    fn renders_minimal_container() {
        let container = Container {
            container_name: "immich-server".to_owned(),
            image: "ghcr.io/immich-app/immich-server:v1.100.0".to_owned(),
            network: Some("immich.network".to_owned()),
            log_driver: Some("journald".to_owned()),
            ..Container::default()
        };
        let rendered = quadlet::to_string(container).unwrap();
        assert!(rendered.starts_with("[Container]\n"));
        assert!(rendered.contains("ContainerName=immich-server\n"));
        assert!(rendered.contains("Image=ghcr.io/immich-app/immich-server:v1.100.0\n"));
        assert!(rendered.contains("LogDriver=journald\n"));
    }

    #[test]
    fn renders_repeated_volume_and_environment_lines() {
        let mut environment = IndexMap::new();
        environment.insert("DB_USERNAME".to_owned(), "immich".to_owned());
        environment.insert("DB_DATABASE_NAME".to_owned(), "immich".to_owned());

        let container = Container {
            container_name: "immich-postgres".to_owned(),
            image: "ghcr.io/immich-app/postgres:14".to_owned(),
            volume: vec![
                "immich_pgdata:/var/lib/postgresql/data".to_owned(),
                "/srv/immich/upload:/upload:z".to_owned(),
            ],
            environment,
            ..Container::default()
        };
        let rendered = quadlet::to_string(container).unwrap();
        assert_eq!(
            rendered,
            "[Container]\n\
            ContainerName=immich-postgres\n\
            Image=ghcr.io/immich-app/postgres:14\n\
            Volume=immich_pgdata:/var/lib/postgresql/data\n\
            Volume=/srv/immich/upload:/upload:z\n\
            Environment=DB_USERNAME=immich\n\
            Environment=DB_DATABASE_NAME=immich\n"
        );
    }
}
