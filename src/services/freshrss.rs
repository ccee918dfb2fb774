//! RSS aggregation (FreshRSS): a single container with its own scheduled
//! feed refresh, configured entirely through environment variables on first
//! run per the upstream image's `FRESHRSS_*` convention.

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

const IMAGE: &str = "docker.io/freshrss/freshrss:1.24.2";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshRssFields {
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    /// How often the cron container refreshes feeds, e.g. `"*/20 * * * *"`.
    #[serde(default = "default_refresh_schedule")]
    pub refresh_schedule: String,
}

fn default_admin_username() -> String {
    "admin".to_owned()
}

fn default_refresh_schedule() -> String {
    "*/20 * * * *".to_owned()
}

impl Default for FreshRssFields {
    fn default() -> Self {
        Self {
            admin_username: default_admin_username(),
            refresh_schedule: default_refresh_schedule(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FreshRss;

type FreshRssContext = Context<ServiceConfig<FreshRssFields>>;

impl ServiceDefinition for FreshRss {
    type Config = FreshRssFields;

    fn name(&self) -> ServiceName {
        ServiceName::new_literal("freshrss")
    }

    fn stack(&self, ctx: &FreshRssContext) -> Result<Stack, DivbanError> {
        let mut container =
            StackContainer::new(ContainerName::new_literal("freshrss"), ContainerImage::new_literal(IMAGE));
        container.description = Some("FreshRSS feed aggregator".to_owned());

        container.volumes.push(VolumeMount {
            source: ctx.config.paths.data_dir.to_string(),
            target: "/var/www/FreshRSS/data".to_owned(),
            options: None,
        });

        container
            .environment
            .insert("FRESHRSS_ENV".to_owned(), "production".to_owned());
        container.environment.insert(
            "CRON_MIN".to_owned(),
            ctx.config
                .service
                .refresh_schedule
                .split_whitespace()
                .next()
                .unwrap_or("*/20")
                .to_owned(),
        );
        container
            .environment
            .insert("FRESHRSS_ADMIN_USERNAME".to_owned(), ctx.config.service.admin_username.clone());
        container.secrets.push(SecretMount::Env {
            name: "freshrss-admin-password".to_owned(),
            target: "FRESHRSS_ADMIN_PASSWORD".to_owned(),
        });

        let port = ctx.config.network.as_ref().and_then(|n| n.port).unwrap_or(8080);
        container.ports.push(PortMapping {
            host_ip: Some("127.0.0.1".to_owned()),
            host_port: port,
            container_port: 80,
            protocol: Protocol::Tcp,
        });

        container.health_check = Some(HealthCheck {
            cmd: "curl -f http://localhost/i/ || exit 1".to_owned(),
            interval: Some(crate::ids::Duration::new_literal("1m")),
            timeout: Some(crate::ids::Duration::new_literal("10s")),
            retries: Some(3),
            start_period: Some(crate::ids::Duration::new_literal("30s")),
        });
        container.service = Some(ServicePolicy {
            restart: Some(crate::quadlet::service::RestartPolicy::OnFailure),
            ..ServicePolicy::default()
        });

        Ok(Stack {
            name: "freshrss".to_owned(),
            network: None,
            containers: vec![container],
        })
    }

    fn secret_specs(&self, _ctx: &FreshRssContext) -> Vec<SecretSpec> {
        vec![SecretSpec::new("admin-password")]
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

    fn ctx(fields: FreshRssFields) -> FreshRssContext {
        let decoded = ServiceConfig {
            divban_config_schema_version: ConfigSchemaVersion::new_literal("1.0.0"),
            paths: PathsConfig {
                data_dir: AbsolutePath::new_literal("/srv/freshrss"),
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
            service: fields,
        };
        Context {
            config: decoded,
            paths: ServicePaths {
                data_dir: AbsolutePath::new_literal("/srv/freshrss"),
                quadlet_dir: AbsolutePath::new_literal("/home/freshrss/.config/containers/systemd"),
                config_dir: AbsolutePath::new_literal("/home/freshrss/.config/divban"),
                home_dir: AbsolutePath::new_literal("/home/freshrss"),
            },
            user: ServiceUser {
                name: Username::new_literal("freshrss"),
                uid: UserId::new_literal(1503),
                gid: GroupId::new_literal(1503),
            },
            options: ServiceOptions::default(),
            capabilities: SystemCapabilities::default(),
            logger: Arc::new(Logger::new()),
        }
    }

    #[test]
    fn single_container_with_no_shared_network() {
        let stack = FreshRss.stack(&ctx(FreshRssFields::default())).unwrap();
        assert_eq!(stack.containers.len(), 1);
        assert!(stack.network.is_none());
    }

    #[test]
    fn refresh_schedule_minute_field_becomes_cron_min() {
        let fields = FreshRssFields {
            refresh_schedule: "*/5 * * * *".to_owned(),
            ..FreshRssFields::default()
        };
        let stack = FreshRss.stack(&ctx(fields)).unwrap();
        assert_eq!(stack.containers[0].environment["CRON_MIN"], "*/5");
    }

    #[test]
    fn database_is_none_for_the_bundled_sqlite_store() {
        assert!(FreshRss.database(&ctx(FreshRssFields::default())).is_none());
    }
}
