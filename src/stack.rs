//! The stack composer (C4): builds a dependency-ordered multi-container
//! stack from container definitions and renders it through the quadlet
//! generator (C3), emitting network and volume units alongside the
//! containers.

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};

use crate::{
    error::{ContainerError, DivbanError},
    ids::{AbsolutePath, ContainerImage, ContainerName, Duration},
    quadlet::{
        self, hardware::HardwareEffect, service::RestartPolicy, substitution::SubstitutionContext,
        Container, File, Network, Resource, Unit, Volume,
    },
};

/// A complete stack: an optional network shared by every container, and the
/// containers themselves.
#[derive(Debug, Clone)]
pub struct Stack {
    pub name: String,
    pub network: Option<StackNetwork>,
    pub containers: Vec<StackContainer>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StackNetwork {
    pub internal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        })
    }
}

#[derive(Debug, Clone)]
pub struct PortMapping {
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone)]
pub struct VolumeMount {
    /// An absolute host path (bind mount) or a bare name (named volume).
    pub source: String,
    pub target: String,
    pub options: Option<String>,
}

impl VolumeMount {
    #[must_use]
    pub fn is_named_volume(&self) -> bool {
        !self.source.starts_with('/')
    }
}

#[derive(Debug, Clone)]
pub enum SecretMount {
    Mount { name: String, target: Option<String> },
    Env { name: String, target: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub enum UserNs {
    #[default]
    Auto,
    Host,
    KeepId {
        uid: Option<u32>,
        gid: Option<u32>,
    },
}

impl UserNs {
    /// Renders as `keep-id:uid=<u>[,gid=<g>]`; `auto`/`host` have no suffix (§4.3.2).
    #[must_use]
    pub fn render(self) -> Option<String> {
        match self {
            Self::Auto | Self::Host => None,
            Self::KeepId { uid, gid } => {
                let mut s = "keep-id".to_owned();
                if let Some(uid) = uid {
                    s.push_str(&format!(":uid={uid}"));
                    if let Some(gid) = gid {
                        s.push_str(&format!(",gid={gid}"));
                    }
                } else if let Some(gid) = gid {
                    s.push_str(&format!(":gid={gid}"));
                }
                Some(s)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub cmd: String,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub start_period: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ServicePolicy {
    pub restart: Option<RestartPolicy>,
    pub restart_sec: Option<u64>,
    pub timeout_start_sec: Option<u64>,
    pub timeout_stop_sec: Option<u64>,
    pub start_limit_interval_sec: Option<u64>,
    pub start_limit_burst: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct StackContainer {
    pub name: ContainerName,
    pub image: ContainerImage,
    pub description: Option<String>,
    pub requires: Vec<ContainerName>,
    pub wants: Vec<ContainerName>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub environment: IndexMap<String, String>,
    pub environment_files: Vec<AbsolutePath>,
    pub secrets: Vec<SecretMount>,
    /// Pre-resolved hardware effect (devices/volumes/env/security/groups),
    /// merged in by the service's `stack()` builder before composition.
    pub hardware: HardwareEffect,
    pub user_ns: UserNs,
    pub health_check: Option<HealthCheck>,
    pub shm_size: Option<String>,
    pub read_only_rootfs: bool,
    pub no_new_privileges: bool,
    pub service: Option<ServicePolicy>,
}

impl StackContainer {
    #[must_use]
    pub fn new(name: ContainerName, image: ContainerImage) -> Self {
        Self {
            name,
            image,
            description: None,
            requires: Vec::new(),
            wants: Vec::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            environment: IndexMap::new(),
            environment_files: Vec::new(),
            secrets: Vec::new(),
            hardware: HardwareEffect::default(),
            user_ns: UserNs::default(),
            health_check: None,
            shm_size: None,
            read_only_rootfs: false,
            no_new_privileges: false,
            service: None,
        }
    }
}

/// The three categories of file the composer emits, keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct GeneratedStackFiles {
    pub containers: IndexMap<String, String>,
    pub networks: IndexMap<String, String>,
    pub volumes: IndexMap<String, String>,
}

impl GeneratedStackFiles {
    /// All files flattened into a single map, e.g. for writing to disk.
    #[must_use]
    pub fn all(&self) -> IndexMap<String, String> {
        let mut all = IndexMap::new();
        all.extend(self.networks.clone());
        all.extend(self.volumes.clone());
        all.extend(self.containers.clone());
        all
    }
}

fn service_unit(name: &str) -> String {
    format!("{name}.service")
}

/// Topologically sorts `containers` by `requires`, breaking ties
/// lexicographically by name for reproducible output (§5). A cycle is
/// reported as a container-engine generation failure.
fn topo_sort(containers: &[StackContainer]) -> Result<Vec<&StackContainer>, DivbanError> {
    let by_name: HashMap<&str, &StackContainer> =
        containers.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut in_degree: HashMap<&str, usize> =
        containers.iter().map(|c| (c.name.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for container in containers {
        for dep in &container.requires {
            *in_degree.entry(container.name.as_str()).or_insert(0) += 1;
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(container.name.as_str());
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();
    ready.sort_unstable();

    let mut ordered = Vec::with_capacity(containers.len());
    while !ready.is_empty() {
        let name = ready.remove(0);
        ordered.push(by_name[name]);
        if let Some(deps) = dependents.get(name) {
            let mut newly_ready = Vec::new();
            for &dependent in deps {
                let degree = in_degree.get_mut(dependent).expect("tracked in_degree");
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(dependent);
                }
            }
            newly_ready.sort_unstable();
            ready.extend(newly_ready);
            ready.sort_unstable();
        }
    }

    if ordered.len() != containers.len() {
        let stuck: Vec<_> = in_degree
            .into_iter()
            .filter(|&(_, deg)| deg > 0)
            .map(|(name, _)| name.to_owned())
            .collect();
        return Err(ContainerError::Generation(format!(
            "dependency cycle detected among containers: {}",
            stuck.join(", ")
        ))
        .into());
    }

    Ok(ordered)
}

/// Whether the host is running with SELinux in enforcing mode, gating the
/// `z` bind-mount relabel suffix (§4.3.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCapabilities {
    pub selinux_enforcing: bool,
}

fn render_volume(mount: &VolumeMount, caps: SystemCapabilities) -> String {
    let mut options = mount.options.clone();
    if caps.selinux_enforcing && !mount.is_named_volume() {
        let already_labeled = options
            .as_deref()
            .is_some_and(|o| o.split(',').any(|opt| opt == "z" || opt == "Z"));
        if !already_labeled {
            options = Some(match options {
                Some(existing) => format!("{existing},z"),
                None => "z".to_owned(),
            });
        }
    }

    match options {
        Some(options) => format!("{}:{}:{options}", mount.source, mount.target),
        None => format!("{}:{}", mount.source, mount.target),
    }
}

fn render_secret(secret: &SecretMount) -> String {
    match secret {
        SecretMount::Mount { name, target: None } => format!("{name},type=mount"),
        SecretMount::Mount {
            name,
            target: Some(target),
        } => format!("{name},type=mount,target={target}"),
        SecretMount::Env { name, target } => format!("{name},type=env,target={target}"),
    }
}

fn container_to_quadlet(
    container: &StackContainer,
    stack_name: &str,
    has_network: bool,
    caps: SystemCapabilities,
    substitution: &SubstitutionContext,
) -> File {
    let mut requires: Vec<String> = Vec::new();
    if has_network {
        requires.push(service_unit(&format!("{stack_name}-network")));
    }
    requires.extend(container.requires.iter().map(|c| service_unit(c.as_str())));
    let wants: Vec<String> = container.wants.iter().map(|c| service_unit(c.as_str())).collect();

    let unit = Unit {
        description: container.description.clone(),
        wants,
        requires,
        before: Vec::new(),
        after: Vec::new(),
    };

    let mut volumes: Vec<String> = container
        .volumes
        .iter()
        .map(|v| substitution.substitute(&render_volume(v, caps)))
        .collect();
    for (host, target) in &container.hardware.volumes {
        volumes.push(format!("{host}:{target}"));
    }

    let mut environment = container.environment.clone();
    for (key, value) in &container.hardware.environment {
        environment.insert(key.clone(), value.clone());
    }
    let environment = environment
        .into_iter()
        .map(|(k, v)| (k, substitution.substitute(&v)))
        .collect();

    let mut devices = container.hardware.devices.clone();
    devices.sort();

    let mut security_opt = container.hardware.security_opts.clone();
    security_opt.sort();

    let image = quadlet::hardware::apply_image_suffix(
        container.image.as_str(),
        container.hardware.image_suffix,
    );
    let image = match container.image.digest() {
        Some(digest) if !image.contains(digest) => format!("{image}@{digest}"),
        _ => image,
    };

    let quadlet_container = Container {
        container_name: container.name.to_string(),
        image,
        network: Some(format!("{stack_name}.network")),
        publish_port: container
            .ports
            .iter()
            .map(|p| {
                let host_ip = p.host_ip.as_deref().unwrap_or("");
                format!(
                    "{host_ip}:{}:{}/{}",
                    p.host_port, p.container_port, p.protocol
                )
            })
            .collect(),
        volume: volumes,
        environment,
        environment_file: container
            .environment_files
            .iter()
            .map(ToString::to_string)
            .collect(),
        secret: container.secrets.iter().map(render_secret).collect(),
        add_device: devices,
        security_opt,
        group_add: container.hardware.groups.clone(),
        user_ns: container.user_ns.render(),
        shm_size: container.shm_size.clone(),
        read_only: container.read_only_rootfs,
        no_new_privileges: container.no_new_privileges,
        health_cmd: container
            .health_check
            .as_ref()
            .map(|h| substitution.substitute(&h.cmd)),
        health_interval: container.health_check.as_ref().and_then(|h| h.interval).map(|d| d.to_string()),
        health_timeout: container.health_check.as_ref().and_then(|h| h.timeout).map(|d| d.to_string()),
        health_retries: container.health_check.as_ref().and_then(|h| h.retries),
        health_start_period: container
            .health_check
            .as_ref()
            .and_then(|h| h.start_period)
            .map(|d| d.to_string()),
        log_driver: Some("journald".to_owned()),
    };

    let service = container.service.as_ref().map(|policy| quadlet::service::Service {
        restart: policy.restart,
        restart_sec: policy.restart_sec,
        timeout_start_sec: policy.timeout_start_sec,
        timeout_stop_sec: policy.timeout_stop_sec,
        start_limit_interval_sec: policy.start_limit_interval_sec,
        start_limit_burst: policy.start_limit_burst,
    });

    File {
        unit: if unit.is_empty() { None } else { Some(unit) },
        resource: Resource::Container(Box::new(quadlet_container)),
        service,
    }
}

/// Composes a [`Stack`] into the file set the orchestrator writes to disk.
///
/// # Errors
///
/// Returns [`ContainerError::Generation`] wrapped in [`DivbanError`] when two
/// containers share a name or the dependency graph contains a cycle.
pub fn compose(
    stack: &Stack,
    caps: SystemCapabilities,
    substitution: &SubstitutionContext,
) -> Result<GeneratedStackFiles, DivbanError> {
    let mut seen = HashSet::new();
    for container in &stack.containers {
        if !seen.insert(container.name.as_str()) {
            return Err(ContainerError::Generation(format!(
                "duplicate container name `{}` in stack `{}`",
                container.name, stack.name
            ))
            .into());
        }
    }

    // Validates the graph is acyclic; the containers are re-emitted in
    // their original (declaration) order below since file output order
    // does not need to match start order, only determinism (§8 property 1).
    topo_sort(&stack.containers)?;

    let mut files = GeneratedStackFiles::default();

    if let Some(network) = stack.network {
        let unit = Network {
            network_name: format!("{}.network", stack.name),
            driver: Some("bridge".to_owned()),
            internal: network.internal,
        };
        files
            .networks
            .insert(format!("{}.network", stack.name), unit.to_string());
    }

    let mut named_volumes: IndexSet<String> = IndexSet::new();
    for container in &stack.containers {
        for mount in &container.volumes {
            if mount.is_named_volume() {
                named_volumes.insert(mount.source.clone());
            }
        }
    }
    for name in named_volumes {
        let unit = Volume {
            volume_name: name.clone(),
            description: None,
        };
        files.volumes.insert(format!("{name}.volume"), unit.to_string());
    }

    for container in &stack.containers {
        let file = container_to_quadlet(
            container,
            &stack.name,
            stack.network.is_some(),
            caps,
            substitution,
        );
        files
            .containers
            .insert(format!("{}.container", container.name), file.to_string());
    }

    Ok(files)
}

/// Containers in start order (topological, leaves of `requires` first).
///
/// # Errors
///
/// Returns an error if the dependency graph contains a cycle.
pub fn start_order(stack: &Stack) -> Result<Vec<&StackContainer>, DivbanError> {
    topo_sort(&stack.containers)
}

/// Containers in stop order: the exact reverse of [`start_order`].
///
/// # Errors
///
/// Returns an error if the dependency graph contains a cycle.
pub fn stop_order(stack: &Stack) -> Result<Vec<&StackContainer>, DivbanError> {
    let mut order = start_order(stack)?;
    order.reverse();
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &'static str, requires: &[&'static str]) -> StackContainer {
        let mut c = StackContainer::new(
            ContainerName::new_literal(name),
            ContainerImage::new_literal("alpine:3.19"),
        );
        c.requires = requires.iter().map(|n| ContainerName::new_literal(n)).collect();
        c
    }

    #[test]
    fn topo_sort_orders_dependencies_before_dependents() {
        let stack = Stack {
            name: "immich".to_owned(),
            network: Some(StackNetwork { internal: true }),
            containers: vec![
                container("immich-server", &["immich-redis", "immich-postgres"]),
                container("immich-redis", &[]),
                container("immich-postgres", &[]),
            ],
        };
        let order: Vec<_> = start_order(&stack).unwrap().iter().map(|c| c.name.to_string()).collect();
        let server_pos = order.iter().position(|n| n == "immich-server").unwrap();
        let redis_pos = order.iter().position(|n| n == "immich-redis").unwrap();
        let postgres_pos = order.iter().position(|n| n == "immich-postgres").unwrap();
        assert!(redis_pos < server_pos);
        assert!(postgres_pos < server_pos);
        // Neither requires the other, so ties break lexicographically by
        // name (§5): "immich-postgres" sorts before "immich-redis".
        assert!(postgres_pos < redis_pos);
    }

    #[test]
    fn stop_order_is_exact_reverse_of_start_order() {
        let stack = Stack {
            name: "immich".to_owned(),
            network: None,
            containers: vec![
                container("a", &[]),
                container("b", &["a"]),
            ],
        };
        let starts: Vec<_> = start_order(&stack).unwrap().iter().map(|c| c.name.to_string()).collect();
        let stops: Vec<_> = stop_order(&stack).unwrap().iter().map(|c| c.name.to_string()).collect();
        let mut reversed = starts.clone();
        reversed.reverse();
        assert_eq!(stops, reversed);
    }

    #[test]
    fn cycle_is_rejected() {
        let stack = Stack {
            name: "x".to_owned(),
            network: None,
            containers: vec![container("a", &["b"]), container("b", &["a"])],
        };
        assert!(topo_sort(&stack.containers).is_err());
    }

    #[test]
    fn duplicate_container_name_is_rejected() {
        let stack = Stack {
            name: "x".to_owned(),
            network: None,
            containers: vec![container("a", &[]), container("a", &[])],
        };
        let caps = SystemCapabilities::default();
        assert!(compose(&stack, caps, &SubstitutionContext::default()).is_err());
    }

    #[test]
    fn immich_generate_matches_scenario_s1() {
        let mut redis = container("immich-redis", &[]);
        redis.image = ContainerImage::new_literal("docker.io/library/redis:6.2");

        let mut postgres = container("immich-postgres", &[]);
        postgres.image = ContainerImage::new_literal("ghcr.io/immich-app/postgres:14");

        let mut server = container("immich-server", &["immich-redis", "immich-postgres"]);
        server.image = ContainerImage::new_literal("ghcr.io/immich-app/immich-server:v1.100.0");
        server.wants = vec![ContainerName::new_literal("immich-machine-learning")];
        server.ports.push(PortMapping {
            host_ip: Some("127.0.0.1".to_owned()),
            host_port: 2283,
            container_port: 2283,
            protocol: Protocol::Tcp,
        });

        let mut ml = container("immich-machine-learning", &[]);
        ml.image = ContainerImage::new_literal("ghcr.io/immich-app/immich-machine-learning:v1.100.0");
        ml.hardware = crate::quadlet::hardware::MlBackend::Cuda.effect();

        let stack = Stack {
            name: "immich".to_owned(),
            network: Some(StackNetwork { internal: true }),
            containers: vec![redis, postgres, server, ml],
        };

        let files = compose(&stack, SystemCapabilities::default(), &SubstitutionContext::default()).unwrap();

        assert!(files.containers.contains_key("immich-redis.container"));
        assert!(files.containers.contains_key("immich-postgres.container"));
        assert!(files.containers.contains_key("immich-server.container"));
        assert!(files.containers.contains_key("immich-machine-learning.container"));
        assert_eq!(files.networks.len(), 1);
        assert!(files.networks["immich.network"].contains("Internal=true"));

        let server_file = &files.containers["immich-server.container"];
        assert!(server_file.contains("PublishPort=127.0.0.1:2283:2283/tcp"));
        assert!(server_file.contains(
            "Requires=immich-network.service immich-redis.service immich-postgres.service"
        ));
        assert!(server_file.contains("Wants=immich-machine-learning.service"));

        let ml_file = &files.containers["immich-machine-learning.container"];
        assert!(ml_file.contains("Image=ghcr.io/immich-app/immich-machine-learning-cuda:v1.100.0"));
    }

    #[test]
    fn selinux_enforcing_relabels_bind_mounts_but_not_named_volumes() {
        let mut c = container("immich-server", &[]);
        c.volumes = vec![
            VolumeMount {
                source: "/srv/immich/upload".to_owned(),
                target: "/upload".to_owned(),
                options: None,
            },
            VolumeMount {
                source: "immich_pgdata".to_owned(),
                target: "/var/lib/postgresql/data".to_owned(),
                options: None,
            },
        ];
        let stack = Stack {
            name: "immich".to_owned(),
            network: None,
            containers: vec![c],
        };
        let caps = SystemCapabilities { selinux_enforcing: true };
        let files = compose(&stack, caps, &SubstitutionContext::default()).unwrap();
        let rendered = &files.containers["immich-server.container"];
        assert!(rendered.contains("Volume=/srv/immich/upload:/upload:z"));
        assert!(rendered.contains("Volume=immich_pgdata:/var/lib/postgresql/data\n"));
    }
}
