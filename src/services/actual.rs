//! Personal finance (Actual Budget): a single self-contained container —
//! its SQLite store lives on the data volume, so unlike immich there is no
//! separate database container and backup falls back to a file-tree copy.

use serde::Deserialize;

use crate::{
    config::ServiceConfig,
    context::Context,
    error::DivbanError,
    ids::{ContainerImage, ContainerName, ServiceName},
    secret::SecretSpec,
    service::ServiceDefinition,
    stack::{HealthCheck, PortMapping, Protocol, SecretMount, ServicePolicy, Stack, StackContainer, VolumeMount},
};

const IMAGE: &str = "docker.io/actualbudget/actual-server:24.10.0";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActualFields {
    /// Whether multi-user login is enforced; unset leaves Actual's own default.
    #[serde(default)]
    pub login_enforced: bool,
}

#[derive(Debug, Clone)]
pub struct Actual;

type ActualContext = Context<ServiceConfig<ActualFields>>;

impl ServiceDefinition for Actual {
    type Config = ActualFields;

    fn name(&self) -> ServiceName {
        ServiceName::new_literal("actual")
    }

    fn stack(&self, ctx: &ActualContext) -> Result<Stack, DivbanError> {
        let mut container =
            StackContainer::new(ContainerName::new_literal("actual"), ContainerImage::new_literal(IMAGE));
        container.description = Some("Actual Budget server".to_owned());

        container.volumes.push(VolumeMount {
            source: ctx.config.paths.data_dir.to_string(),
            target: "/data".to_owned(),
            options: None,
        });

        container.environment.insert(
            "ACTUAL_LOGIN_METHOD".to_owned(),
            if ctx.config.service.login_enforced {
                "password".to_owned()
            } else {
                "header".to_owned()
            },
        );
        container
            .environment
            .insert("ACTUAL_UPLOAD_FILE_SYNC_SIZE_LIMIT_MB".to_owned(), "20".to_owned());
        container.secrets.push(SecretMount::Env {
            name: "actual-master-key".to_owned(),
            target: "ACTUAL_SERVER_FILES_KEY".to_owned(),
        });

        let port = ctx.config.network.as_ref().and_then(|n| n.port).unwrap_or(5006);
        container.ports.push(PortMapping {
            host_ip: Some("127.0.0.1".to_owned()),
            host_port: port,
            container_port: 5006,
            protocol: Protocol::Tcp,
        });

        container.health_check = Some(HealthCheck {
            cmd: "node /app/server/build/app.js --health-check || exit 1".to_owned(),
            interval: Some(crate::ids::Duration::new_literal("30s")),
            timeout: Some(crate::ids::Duration::new_literal("10s")),
            retries: Some(3),
            start_period: Some(crate::ids::Duration::new_literal("30s")),
        });
        container.service = Some(ServicePolicy {
            restart: Some(crate::quadlet::service::RestartPolicy::OnFailure),
            ..ServicePolicy::default()
        });

        Ok(Stack {
            name: "actual".to_owned(),
            network: None,
            containers: vec![container],
        })
    }

    fn database(&self, _ctx: &ActualContext) -> Option<ContainerName> {
        None
    }

    fn secret_specs(&self, _ctx: &ActualContext) -> Vec<SecretSpec> {
        vec![SecretSpec::new("master-key")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PathsConfig,
        context::{ServiceOptions, ServicePaths, ServiceUser, SystemCapabilities},
        ids::{AbsolutePath, ConfigSchemaVersion, GroupId, UserId, Username},
        logger::Logger,
    };
    use std::sync::Arc;

    fn ctx(login_enforced: bool) -> ActualContext {
        let decoded = ServiceConfig {
            divban_config_schema_version: ConfigSchemaVersion::new_literal("1.0.0"),
            paths: PathsConfig {
                data_dir: AbsolutePath::new_literal("/srv/actual"),
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
            service: ActualFields { login_enforced },
        };
        Context {
            config: decoded,
            paths: ServicePaths {
                data_dir: AbsolutePath::new_literal("/srv/actual"),
                quadlet_dir: AbsolutePath::new_literal("/home/actual/.config/containers/systemd"),
                config_dir: AbsolutePath::new_literal("/home/actual/.config/divban"),
                home_dir: AbsolutePath::new_literal("/home/actual"),
            },
            user: ServiceUser {
                name: Username::new_literal("actual"),
                uid: UserId::new_literal(1502),
                gid: GroupId::new_literal(1502),
            },
            options: ServiceOptions::default(),
            capabilities: SystemCapabilities::default(),
            logger: Arc::new(Logger::new()),
        }
    }

    #[test]
    fn single_container_with_no_shared_network() {
        let stack = Actual.stack(&ctx(false)).unwrap();
        assert_eq!(stack.containers.len(), 1);
        assert!(stack.network.is_none());
    }

    #[test]
    fn login_enforced_switches_to_password_auth() {
        let stack = Actual.stack(&ctx(true)).unwrap();
        assert_eq!(
            stack.containers[0].environment["ACTUAL_LOGIN_METHOD"],
            "password"
        );
    }

    #[test]
    fn backs_up_the_data_tree_rather_than_a_database() {
        assert!(Actual.database(&ctx(false)).is_none());
    }
}
