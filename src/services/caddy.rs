//! Reverse proxy (C2 stack role): a single container serving a generated
//! `Caddyfile` that fronts the other managed services, with automatic TLS
//! left to Caddy itself rather than managed here.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::{
    config::ServiceConfig,
    context::Context,
    error::DivbanError,
    ids::{ContainerImage, ContainerName, ServiceName},
    service::ServiceDefinition,
    stack::{PortMapping, Protocol, ServicePolicy, Stack, StackContainer, VolumeMount},
};

const IMAGE: &str = "docker.io/library/caddy:2-alpine";

/// One reverse-proxied upstream: the public hostname and the internal
/// `host:port` Caddy forwards to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub hostname: String,
    pub upstream: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaddyFields {
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone)]
pub struct Caddy;

type CaddyContext = Context<ServiceConfig<CaddyFields>>;

impl ServiceDefinition for Caddy {
    type Config = CaddyFields;

    fn name(&self) -> ServiceName {
        ServiceName::new_literal("caddy")
    }

    fn stack(&self, ctx: &CaddyContext) -> Result<Stack, DivbanError> {
        let mut container =
            StackContainer::new(ContainerName::new_literal("caddy"), ContainerImage::new_literal(IMAGE));
        container.description = Some("Reverse proxy fronting the managed services".to_owned());

        let caddyfile_path = format!("{}/Caddyfile", ctx.paths.config_dir);
        container.volumes.push(VolumeMount {
            source: caddyfile_path,
            target: "/etc/caddy/Caddyfile".to_owned(),
            options: Some("ro".to_owned()),
        });
        container.volumes.push(VolumeMount {
            source: "caddy_data".to_owned(),
            target: "/data".to_owned(),
            options: None,
        });
        container.volumes.push(VolumeMount {
            source: "caddy_config".to_owned(),
            target: "/config".to_owned(),
            options: None,
        });

        let http_port = ctx.config.network.as_ref().and_then(|n| n.port).unwrap_or(80);
        container.ports.push(PortMapping {
            host_ip: None,
            host_port: http_port,
            container_port: 80,
            protocol: Protocol::Tcp,
        });
        container.ports.push(PortMapping {
            host_ip: None,
            host_port: 443,
            container_port: 443,
            protocol: Protocol::Tcp,
        });

        container.service = Some(ServicePolicy {
            restart: Some(crate::quadlet::service::RestartPolicy::OnFailure),
            ..ServicePolicy::default()
        });

        Ok(Stack {
            name: "caddy".to_owned(),
            network: None,
            containers: vec![container],
        })
    }

    fn other_files(&self, ctx: &CaddyContext) -> IndexMap<String, String> {
        let mut files = IndexMap::new();
        files.insert(
            format!("{}/Caddyfile", ctx.paths.config_dir),
            render_caddyfile(&ctx.config.service.routes),
        );
        files
    }
}

fn render_caddyfile(routes: &[Route]) -> String {
    let mut caddyfile = String::new();
    for route in routes {
        caddyfile.push_str(&route.hostname);
        caddyfile.push_str(" {\n    reverse_proxy ");
        caddyfile.push_str(&route.upstream);
        caddyfile.push_str("\n}\n\n");
    }
    caddyfile
}
