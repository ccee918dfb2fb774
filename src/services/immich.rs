//! Photo and video management (scenario S1): a four-container stack —
//! Postgres, Redis, the API/web server, and machine learning — on an
//! internal network, with the ML container's image and device mounts
//! selected by the configured hardware backend.

use serde::Deserialize;

use crate::{
    config::ServiceConfig,
    context::Context,
    error::DivbanError,
    ids::{ContainerImage, ContainerName, ServiceName},
    quadlet::hardware::apply_image_suffix,
    secret::SecretSpec,
    service::ServiceDefinition,
    stack::{
        HealthCheck, PortMapping, Protocol, SecretMount, ServicePolicy, Stack, StackContainer,
        StackNetwork, VolumeMount,
    },
};

const POSTGRES_IMAGE: &str = "ghcr.io/immich-app/postgres:14";
const REDIS_IMAGE: &str = "docker.io/library/redis:6.2-alpine";
const SERVER_IMAGE: &str = "ghcr.io/immich-app/immich-server:v1.118.2";
const ML_IMAGE: &str = "ghcr.io/immich-app/immich-machine-learning:v1.118.2";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseFields {
    #[serde(default = "default_db_username")]
    pub username: String,
    #[serde(default = "default_db_name")]
    pub database_name: String,
}

fn default_db_username() -> String {
    "immich".to_owned()
}

fn default_db_name() -> String {
    "immich".to_owned()
}

impl Default for DatabaseFields {
    fn default() -> Self {
        Self {
            username: default_db_username(),
            database_name: default_db_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImmichFields {
    #[serde(default)]
    pub database: DatabaseFields,
}

#[derive(Debug, Clone)]
pub struct Immich;

type ImmichContext = Context<ServiceConfig<ImmichFields>>;

impl ServiceDefinition for Immich {
    type Config = ImmichFields;

    fn name(&self) -> ServiceName {
        ServiceName::new_literal("immich")
    }

    fn stack(&self, ctx: &ImmichContext) -> Result<Stack, DivbanError> {
        Ok(Stack {
            name: "immich".to_owned(),
            network: Some(StackNetwork { internal: true }),
            containers: vec![
                postgres_container(ctx),
                redis_container(),
                server_container(ctx),
                machine_learning_container(ctx),
            ],
        })
    }

    fn database(&self, _ctx: &ImmichContext) -> Option<ContainerName> {
        Some(ContainerName::new_literal("immich-postgres"))
    }

    fn secret_specs(&self, _ctx: &ImmichContext) -> Vec<SecretSpec> {
        vec![SecretSpec::new("db-password")]
    }
}

fn postgres_container(ctx: &ImmichContext) -> StackContainer {
    let db = &ctx.config.service.database;
    let mut container = StackContainer::new(
        ContainerName::new_literal("immich-postgres"),
        ContainerImage::new_literal(POSTGRES_IMAGE),
    );
    container.description = Some("Immich's Postgres database".to_owned());
    container
        .environment
        .insert("POSTGRES_USER".to_owned(), db.username.clone());
    container
        .environment
        .insert("POSTGRES_DB".to_owned(), db.database_name.clone());
    container.secrets.push(SecretMount::Env {
        name: "immich-db-password".to_owned(),
        target: "POSTGRES_PASSWORD".to_owned(),
    });
    let data_dir = ctx
        .config
        .paths
        .postgres_location
        .clone()
        .unwrap_or_else(|| {
            ctx.config
                .paths
                .data_dir
                .join("postgres")
                .try_into()
                .expect("data_dir joined with a relative segment stays absolute")
        });
    container.volumes.push(VolumeMount {
        source: data_dir.to_string(),
        target: "/var/lib/postgresql/data".to_owned(),
        options: None,
    });
    container.shm_size = Some("128mb".to_owned());
    container.service = Some(ServicePolicy {
        restart: Some(crate::quadlet::service::RestartPolicy::OnFailure),
        ..ServicePolicy::default()
    });
    container
}

fn redis_container() -> StackContainer {
    let mut container = StackContainer::new(
        ContainerName::new_literal("immich-redis"),
        ContainerImage::new_literal(REDIS_IMAGE),
    );
    container.description = Some("Immich's job queue cache".to_owned());
    container.service = Some(ServicePolicy {
        restart: Some(crate::quadlet::service::RestartPolicy::OnFailure),
        ..ServicePolicy::default()
    });
    container
}

fn server_container(ctx: &ImmichContext) -> StackContainer {
    let db = &ctx.config.service.database;
    let mut container =
        StackContainer::new(ContainerName::new_literal("immich-server"), ContainerImage::new_literal(SERVER_IMAGE));
    container.description = Some("Immich API and web server".to_owned());
    container.requires = vec![
        ContainerName::new_literal("immich-redis"),
        ContainerName::new_literal("immich-postgres"),
    ];
    container.wants = vec![ContainerName::new_literal("immich-machine-learning")];
    container
        .environment
        .insert("DB_USERNAME".to_owned(), db.username.clone());
    container
        .environment
        .insert("DB_DATABASE_NAME".to_owned(), db.database_name.clone());
    container
        .environment
        .insert("DB_HOSTNAME".to_owned(), "immich-postgres".to_owned());
    container
        .environment
        .insert("REDIS_HOSTNAME".to_owned(), "immich-redis".to_owned());
    container.secrets.push(SecretMount::Env {
        name: "immich-db-password".to_owned(),
        target: "DB_PASSWORD".to_owned(),
    });

    let upload_dir = ctx.config.paths.upload_location.clone().unwrap_or_else(|| {
        ctx.config
            .paths
            .data_dir
            .join("upload")
            .try_into()
            .expect("data_dir joined with a relative segment stays absolute")
    });
    container.volumes.push(VolumeMount {
        source: upload_dir.to_string(),
        target: "/usr/src/app/upload".to_owned(),
        options: None,
    });

    let port = ctx.config.network.as_ref().and_then(|n| n.port).unwrap_or(2283);
    container.ports.push(PortMapping {
        host_ip: Some(ctx.config.network.as_ref().and_then(|n| n.host.clone()).unwrap_or_else(|| "127.0.0.1".to_owned())),
        host_port: port,
        container_port: 2283,
        protocol: Protocol::Tcp,
    });

    container.health_check = Some(HealthCheck {
        cmd: "curl -f http://localhost:2283/api/server/ping || exit 1".to_owned(),
        interval: Some(crate::ids::Duration::new_literal("30s")),
        timeout: Some(crate::ids::Duration::new_literal("10s")),
        retries: Some(3),
        start_period: Some(crate::ids::Duration::new_literal("60s")),
    });
    container.service = Some(ServicePolicy {
        restart: Some(crate::quadlet::service::RestartPolicy::OnFailure),
        ..ServicePolicy::default()
    });
    container
}

fn machine_learning_container(ctx: &ImmichContext) -> StackContainer {
    let effect = ctx.config.hardware.ml.effect();
    let image = apply_image_suffix(ML_IMAGE, effect.image_suffix)
        .parse()
        .expect("hardware suffix applied to a valid literal image stays valid");
    let mut container = StackContainer::new(ContainerName::new_literal("immich-machine-learning"), image);
    container.description = Some("Immich facial recognition and smart search".to_owned());
    container.hardware = effect;
    container.volumes.push(VolumeMount {
        source: "immich_model_cache".to_owned(),
        target: "/cache".to_owned(),
        options: None,
    });
    container.service = Some(ServicePolicy {
        restart: Some(crate::quadlet::service::RestartPolicy::OnFailure),
        ..ServicePolicy::default()
    });
    container
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PathsConfig,
        context::{ServiceOptions, ServicePaths, ServiceUser, SystemCapabilities},
        ids::{AbsolutePath, ConfigSchemaVersion, GroupId, UserId, Username},
        logger::Logger,
        quadlet::hardware::MlBackend,
    };
    use std::sync::Arc;

    fn ctx() -> ImmichContext {
        let decoded = ServiceConfig {
            divban_config_schema_version: ConfigSchemaVersion::new_literal("1.0.0"),
            paths: PathsConfig {
                data_dir: AbsolutePath::new_literal("/srv/immich"),
                upload_location: None,
                profile_location: None,
                thumb_location: None,
                encoded_location: None,
                postgres_location: None,
            },
            network: None,
            container: None,
            hardware: crate::config::HardwareConfig::default(),
            external_libraries: Vec::new(),
            backup: crate::config::BackupConfig::default(),
            log_level: None,
            service: ImmichFields::default(),
        };
        Context {
            config: decoded,
            paths: ServicePaths {
                data_dir: AbsolutePath::new_literal("/srv/immich"),
                quadlet_dir: AbsolutePath::new_literal("/home/immich/.config/containers/systemd"),
                config_dir: AbsolutePath::new_literal("/home/immich/.config/divban"),
                home_dir: AbsolutePath::new_literal("/home/immich"),
            },
            user: ServiceUser {
                name: Username::new_literal("immich"),
                uid: UserId::new_literal(1500),
                gid: GroupId::new_literal(1500),
            },
            options: ServiceOptions::default(),
            capabilities: SystemCapabilities::default(),
            logger: Arc::new(Logger::new()),
        }
    }

    #[test]
    fn stack_has_four_containers_on_an_internal_network() {
        let stack = Immich.stack(&ctx()).unwrap();
        assert_eq!(stack.containers.len(), 4);
        assert!(stack.network.unwrap().internal);
    }

    #[test]
    fn server_depends_on_redis_and_postgres_and_wants_ml() {
        let stack = Immich.stack(&ctx()).unwrap();
        let server = stack
            .containers
            .iter()
            .find(|c| c.name.as_str() == "immich-server")
            .unwrap();
        assert_eq!(server.requires.len(), 2);
        assert_eq!(server.wants[0].as_str(), "immich-machine-learning");
    }

    #[test]
    fn database_is_the_postgres_container() {
        let name = Immich.database(&ctx()).unwrap();
        assert_eq!(name.as_str(), "immich-postgres");
    }

    #[test]
    fn cuda_backend_suffixes_the_ml_image() {
        let mut context = ctx();
        context.config.hardware.ml = MlBackend::Cuda;
        let stack = Immich.stack(&context).unwrap();
        let ml = stack
            .containers
            .iter()
            .find(|c| c.name.as_str() == "immich-machine-learning")
            .unwrap();
        assert_eq!(
            ml.image.as_str(),
            "ghcr.io/immich-app/immich-machine-learning-cuda:v1.118.2"
        );
    }
}
