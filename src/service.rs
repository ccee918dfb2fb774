//! The service contract (C9): the object-safe [`Service`] trait every CLI
//! action dispatches through, and the narrower [`ServiceDefinition`] a
//! concrete service implements — [`ServiceRuntime`] bridges the two so a
//! service only has to describe its stack, not repeat the setup pipeline,
//! config decoding, or systemd plumbing every other service also needs.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::{
    backup::{self, BackupOutcome, BackupPayload},
    config::{self, ServiceConfig},
    context::{Context, ServiceOptions, ServicePaths, ServiceUser, SystemCapabilities},
    error::{ConfigError, ContainerError, DivbanError, SetupFailure},
    ids::{AbsolutePath, ServiceName},
    logger::Logger,
    orchestrator::{
        create_dirs_step, enable_services_step, generate_step, secrets_step, write_files_step, Cancellation, Pipeline,
        SetupState,
    },
    quadlet::substitution::SubstitutionContext,
    secret::SecretSpec,
    stack::{self, Stack},
    system::systemd::{JournalOptions, SystemdControl, UnitStatus},
};

/// Every file a `generate` produces, grouped by kind so a caller can choose
/// to inspect or write a subset; [`Self::all`] flattens them for the write
/// step. Quadlet/network/volume keys are bare filenames under the quadlet
/// directory; environment/other keys are already-absolute path strings.
#[derive(Debug, Clone, Default)]
pub struct GeneratedFiles {
    pub quadlets: IndexMap<String, String>,
    pub networks: IndexMap<String, String>,
    pub volumes: IndexMap<String, String>,
    pub environment: IndexMap<String, String>,
    pub other: IndexMap<String, String>,
}

impl GeneratedFiles {
    #[must_use]
    pub fn all(&self) -> IndexMap<String, String> {
        let mut all = IndexMap::new();
        all.extend(self.networks.clone());
        all.extend(self.volumes.clone());
        all.extend(self.quadlets.clone());
        all.extend(self.environment.clone());
        all.extend(self.other.clone());
        all
    }
}

/// The CLI-supplied record a [`Service`] call runs under. Deliberately not
/// generic (unlike [`Context`]) so [`Service`] stays object-safe; each
/// runtime decodes its own config from `config_path` on every call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub config_path: AbsolutePath,
    pub paths: ServicePaths,
    pub user: ServiceUser,
    pub options: ServiceOptions,
    pub capabilities: SystemCapabilities,
    pub logger: Arc<Logger>,
    /// Shared with the `ctrl_c()` listener task spawned once in `main`;
    /// polled by the setup pipeline between steps.
    pub cancellation: Cancellation,
}

#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub name: String,
    pub state: UnitStatus,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub containers: Vec<ContainerStatus>,
}

impl StatusReport {
    #[must_use]
    pub fn all_running(&self) -> bool {
        self.containers
            .iter()
            .all(|container| container.state == UnitStatus::Active)
    }
}

/// Options for [`Service::logs`].
#[derive(Debug, Clone, Default)]
pub struct LogsOptions {
    pub follow: bool,
    pub lines: Option<u32>,
    /// Restrict to one container; defaults to the stack's first container.
    pub container: Option<String>,
}

/// The uniform surface every CLI action dispatches through, independent of
/// which concrete service is named on the command line.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> ServiceName;

    /// Decodes and sanity-checks the config without touching the system.
    async fn validate(&self, invocation: &Invocation) -> Result<(), DivbanError>;

    /// Renders this service's quadlet units and supporting files without
    /// writing anything.
    async fn generate(&self, invocation: &Invocation) -> Result<GeneratedFiles, DivbanError>;

    /// Provisions secrets, writes generated files, and enables/starts the
    /// resulting units, rolling back everything already acquired if a step
    /// downstream fails.
    async fn setup(&self, invocation: &Invocation) -> Result<(), SetupFailure>;

    async fn start(&self, invocation: &Invocation) -> Result<(), DivbanError>;
    async fn stop(&self, invocation: &Invocation) -> Result<(), DivbanError>;
    async fn restart(&self, invocation: &Invocation) -> Result<(), DivbanError>;
    async fn status(&self, invocation: &Invocation) -> Result<StatusReport, DivbanError>;
    async fn logs(&self, invocation: &Invocation, options: &LogsOptions) -> Result<Vec<u8>, DivbanError>;
    async fn backup(&self, invocation: &Invocation) -> Result<BackupOutcome, DivbanError>;
    async fn restore(&self, invocation: &Invocation, archive_path: &Path) -> Result<BackupOutcome, DivbanError>;
}

/// What a concrete service actually has to describe: its config shape and
/// the stack it composes into. Everything else — the setup pipeline,
/// lifecycle dispatch, backup plumbing — is provided by [`ServiceRuntime`].
pub trait ServiceDefinition: Send + Sync + Clone + 'static {
    type Config: for<'de> serde::Deserialize<'de> + Send + Sync + Clone + 'static;

    fn name(&self) -> ServiceName;

    /// The config schema version this service's TOML file is checked
    /// against. Defaults to the crate-wide current version.
    #[must_use]
    fn config_schema_version(&self) -> crate::ids::ConfigSchemaVersion {
        config::CURRENT_CONFIG_SCHEMA_VERSION
    }

    /// Builds the container/network topology for this config. Receives the
    /// full decoded record — not just this service's flattened fields — so
    /// a stack builder can read the shared `hardware`/`backup` sections too.
    ///
    /// # Errors
    ///
    /// Returns a [`DivbanError`] if the config describes an invalid stack
    /// (e.g. an unresolvable hardware backend combination).
    fn stack(&self, ctx: &Context<ServiceConfig<Self::Config>>) -> Result<Stack, DivbanError>;

    /// The Postgres container backing this service, if any. Drives both
    /// `backup`/`restore`'s default payload and the logs fallback target.
    /// `None` by default, for services with no database.
    fn database(&self, _ctx: &Context<ServiceConfig<Self::Config>>) -> Option<crate::ids::ContainerName> {
        None
    }

    /// Placeholder substitution applied to templated file contents. A
    /// no-op by default; services with `${DB_USERNAME}`-style placeholders
    /// in health check commands override this.
    fn substitution(&self, _ctx: &Context<ServiceConfig<Self::Config>>) -> SubstitutionContext {
        SubstitutionContext::default()
    }

    /// Absolute-path-keyed environment files this service needs alongside
    /// its quadlet units (e.g. `immich.env`). Empty by default.
    fn environment_files(&self, _ctx: &Context<ServiceConfig<Self::Config>>) -> IndexMap<String, String> {
        IndexMap::new()
    }

    /// Any other absolute-path-keyed file this service needs written during
    /// setup (e.g. a reverse proxy's `Caddyfile`). Empty by default.
    fn other_files(&self, _ctx: &Context<ServiceConfig<Self::Config>>) -> IndexMap<String, String> {
        IndexMap::new()
    }

    /// Secrets this service needs provisioned before its first start. Empty
    /// by default.
    fn secret_specs(&self, _ctx: &Context<ServiceConfig<Self::Config>>) -> Vec<SecretSpec> {
        Vec::new()
    }
}

/// Bridges a [`ServiceDefinition`] into the object-safe [`Service`] trait,
/// decoding config fresh on every call rather than caching it across an
/// `Invocation`'s lifetime.
#[derive(Debug, Clone)]
pub struct ServiceRuntime<D> {
    definition: D,
}

impl<D> ServiceRuntime<D>
where
    D: ServiceDefinition,
{
    #[must_use]
    pub fn new(definition: D) -> Self {
        Self { definition }
    }

    async fn load_decoded(&self, invocation: &Invocation) -> Result<ServiceConfig<D::Config>, DivbanError> {
        config::load(invocation.config_path.as_path()).await
    }

    /// Builds the context a [`ServiceDefinition`] runs under, carrying the
    /// full decoded record (not just this service's flattened fields) so
    /// `stack`/`database`/etc. can read the shared `hardware`/`backup`
    /// sections alongside their own.
    fn context_for(
        &self,
        decoded: &ServiceConfig<D::Config>,
        invocation: &Invocation,
    ) -> Context<ServiceConfig<D::Config>> {
        Context {
            config: decoded.clone(),
            paths: ServicePaths {
                data_dir: decoded.paths.data_dir.clone(),
                quadlet_dir: invocation.paths.quadlet_dir.clone(),
                config_dir: invocation.paths.config_dir.clone(),
                home_dir: invocation.paths.home_dir.clone(),
            },
            user: invocation.user.clone(),
            options: invocation.options,
            capabilities: invocation.capabilities,
            logger: Arc::clone(&invocation.logger),
        }
    }

    async fn load_context(&self, invocation: &Invocation) -> Result<Context<ServiceConfig<D::Config>>, DivbanError> {
        let decoded = self.load_decoded(invocation).await?;
        Ok(self.context_for(&decoded, invocation))
    }

    fn generate_files(&self, ctx: &Context<ServiceConfig<D::Config>>) -> Result<GeneratedFiles, DivbanError> {
        let stack = self.definition.stack(ctx)?;
        let substitution = self.definition.substitution(ctx);
        let files = stack::compose(&stack, ctx.capabilities.into(), &substitution)?;
        Ok(GeneratedFiles {
            quadlets: files.containers,
            networks: files.networks,
            volumes: files.volumes,
            environment: self.definition.environment_files(ctx),
            other: self.definition.other_files(ctx),
        })
    }

    fn setup_directories(&self, ctx: &Context<ServiceConfig<D::Config>>) -> Vec<AbsolutePath> {
        vec![
            ctx.paths.data_dir.clone(),
            ctx.paths.quadlet_dir.clone(),
            ctx.paths.config_dir.clone(),
        ]
    }

    fn service_units(&self, stack: &Stack) -> Result<Vec<String>, DivbanError> {
        Ok(stack::start_order(stack)?
            .into_iter()
            .map(|container| format!("{}.service", container.name))
            .collect())
    }

    /// A database-backed service backs up/restores its database via
    /// `pg_dumpall`/`psql`; every other service backs up its data directory
    /// minus the config's excluded globs.
    fn backup_payload(&self, ctx: &Context<ServiceConfig<D::Config>>, exclude: Vec<String>) -> BackupPayload {
        match self.definition.database(ctx) {
            Some(container) => BackupPayload::Database { container },
            None => BackupPayload::Files { exclude },
        }
    }
}

/// Resolves `generated`'s bare quadlet/network/volume filenames against
/// `quadlet_dir`, and parses the already-absolute environment/other keys,
/// into the flat `(path, contents)` list [`write_files_step`] writes.
fn resolve_generated_paths<C>(
    generated: &GeneratedFiles,
    ctx: &Context<C>,
) -> Result<Vec<(AbsolutePath, String)>, DivbanError> {
    let mut files = Vec::new();
    for (name, contents) in generated
        .networks
        .iter()
        .chain(generated.volumes.iter())
        .chain(generated.quadlets.iter())
    {
        let path = AbsolutePath::try_from(ctx.paths.quadlet_dir.join(name)).map_err(|_| {
            ContainerError::Generation(format!("invalid quadlet unit filename `{name}`"))
        })?;
        files.push((path, contents.clone()));
    }
    for (path_str, contents) in generated.environment.iter().chain(generated.other.iter()) {
        let path: AbsolutePath = path_str.parse().map_err(|_| ConfigError::NotAbsolute {
            field: "generated file path",
            value: path_str.clone(),
        })?;
        files.push((path, contents.clone()));
    }
    Ok(files)
}

#[async_trait]
impl<D> Service for ServiceRuntime<D>
where
    D: ServiceDefinition,
{
    fn name(&self) -> ServiceName {
        self.definition.name()
    }

    async fn validate(&self, invocation: &Invocation) -> Result<(), DivbanError> {
        let ctx = self.load_context(invocation).await?;
        self.definition.stack(&ctx)?;
        Ok(())
    }

    async fn generate(&self, invocation: &Invocation) -> Result<GeneratedFiles, DivbanError> {
        let ctx = self.load_context(invocation).await?;
        self.generate_files(&ctx)
    }

    async fn setup(&self, invocation: &Invocation) -> Result<(), SetupFailure> {
        let ctx = self
            .load_context(invocation)
            .await
            .map_err(|cause| SetupFailure {
                cause,
                release_errors: Vec::new(),
            })?;

        let stack = self.definition.stack(&ctx).map_err(|cause| SetupFailure {
            cause,
            release_errors: Vec::new(),
        })?;
        let units = self.service_units(&stack).map_err(|cause| SetupFailure {
            cause,
            release_errors: Vec::new(),
        })?;
        let directories = self.setup_directories(&ctx);
        let secret_specs = self.definition.secret_specs(&ctx);
        let service_name = self.definition.name().to_string();

        let definition = self.definition.clone();
        let pipeline: Pipeline<ServiceConfig<D::Config>> = Pipeline::new()
            .add_step(secrets_step(service_name, secret_specs))
            .add_step(generate_step(move |ctx| definition_generate(&definition, ctx)))
            .add_step(create_dirs_step(directories))
            .add_step(write_files_step(move |state: &SetupState, ctx| {
                let generated = state
                    .generated
                    .as_ref()
                    .expect("generate_step populates state before write_files_step runs");
                resolve_generated_paths(generated, ctx)
            }))
            .add_step(enable_services_step(units, true));

        pipeline.execute(&ctx, &invocation.cancellation).await?;
        Ok(())
    }

    async fn start(&self, invocation: &Invocation) -> Result<(), DivbanError> {
        let ctx = self.load_context(invocation).await?;
        let stack = self.definition.stack(&ctx)?;
        let systemd = SystemdControl::new();
        systemd.daemon_reload(&ctx.user).await?;
        for container in stack::start_order(&stack)? {
            systemd
                .start_service(&ctx.user, &format!("{}.service", container.name))
                .await?;
        }
        Ok(())
    }

    async fn stop(&self, invocation: &Invocation) -> Result<(), DivbanError> {
        let ctx = self.load_context(invocation).await?;
        let stack = self.definition.stack(&ctx)?;
        let systemd = SystemdControl::new();
        for container in stack::stop_order(&stack)? {
            systemd
                .stop_service(&ctx.user, &format!("{}.service", container.name))
                .await?;
        }
        Ok(())
    }

    async fn restart(&self, invocation: &Invocation) -> Result<(), DivbanError> {
        let ctx = self.load_context(invocation).await?;
        let stack = self.definition.stack(&ctx)?;
        let systemd = SystemdControl::new();
        for container in stack::start_order(&stack)? {
            systemd
                .restart_service(&ctx.user, &format!("{}.service", container.name))
                .await?;
        }
        Ok(())
    }

    async fn status(&self, invocation: &Invocation) -> Result<StatusReport, DivbanError> {
        let ctx = self.load_context(invocation).await?;
        let stack = self.definition.stack(&ctx)?;
        let systemd = SystemdControl::new();
        let mut containers = Vec::new();
        for container in stack::start_order(&stack)? {
            let name = container.name.to_string();
            let state = systemd
                .status_service(&ctx.user, &format!("{name}.service"))
                .await?;
            containers.push(ContainerStatus { name, state });
        }
        Ok(StatusReport { containers })
    }

    async fn logs(&self, invocation: &Invocation, options: &LogsOptions) -> Result<Vec<u8>, DivbanError> {
        let ctx = self.load_context(invocation).await?;
        let stack = self.definition.stack(&ctx)?;
        let systemd = SystemdControl::new();

        let unit = match &options.container {
            Some(name) => format!("{name}.service"),
            None => {
                let first = stack
                    .containers
                    .first()
                    .map(|container| container.name.to_string())
                    .unwrap_or_else(|| stack.name.clone());
                format!("{first}.service")
            }
        };

        systemd
            .journalctl(
                &ctx.user,
                &unit,
                &JournalOptions {
                    follow: options.follow,
                    lines: options.lines,
                },
            )
            .await
    }

    async fn backup(&self, invocation: &Invocation) -> Result<BackupOutcome, DivbanError> {
        let decoded = self.load_decoded(invocation).await?;
        let ctx = self.context_for(&decoded, invocation);
        let payload = self.backup_payload(&ctx, decoded.backup.exclude.clone());
        backup::create_backup(
            &self.definition.name(),
            ctx.paths.data_dir.as_path(),
            &payload,
            decoded.backup.compression,
            &ctx.user,
        )
        .await
    }

    async fn restore(&self, invocation: &Invocation, archive_path: &Path) -> Result<BackupOutcome, DivbanError> {
        let decoded = self.load_decoded(invocation).await?;
        let ctx = self.context_for(&decoded, invocation);
        let payload = self.backup_payload(&ctx, decoded.backup.exclude.clone());
        backup::restore_backup(
            &self.definition.name(),
            ctx.paths.data_dir.as_path(),
            &payload,
            archive_path,
            &ctx.user,
        )
        .await?;
        let metadata = tokio::fs::metadata(archive_path)
            .await
            .map_err(|source| crate::error::SystemError::Read {
                path: archive_path.display().to_string(),
                source,
            })?;
        Ok(BackupOutcome {
            path: archive_path.to_path_buf(),
            size_bytes: metadata.len(),
        })
    }
}

/// Free function rather than a closure-captured method so `generate_step`'s
/// `'static` closure doesn't have to carry a borrow of `self`.
fn definition_generate<D>(
    definition: &D,
    ctx: &Context<ServiceConfig<D::Config>>,
) -> Result<GeneratedFiles, DivbanError>
where
    D: ServiceDefinition,
{
    let stack = definition.stack(ctx)?;
    let substitution = definition.substitution(ctx);
    let files = stack::compose(&stack, ctx.capabilities.into(), &substitution)?;
    Ok(GeneratedFiles {
        quadlets: files.containers,
        networks: files.networks,
        volumes: files.volumes,
        environment: definition.environment_files(ctx),
        other: definition.other_files(ctx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::ServiceOptions,
        ids::{ContainerImage, ContainerName, GroupId, UserId, Username},
    };
    use serde::Deserialize;

    #[derive(Debug, Clone, Deserialize)]
    struct DemoConfig {
        #[serde(default)]
        marker: Option<String>,
    }

    #[derive(Debug, Clone)]
    struct DemoService;

    impl ServiceDefinition for DemoService {
        type Config = DemoConfig;

        fn name(&self) -> ServiceName {
            ServiceName::new_literal("demo")
        }

        fn stack(&self, _ctx: &Context<ServiceConfig<Self::Config>>) -> Result<Stack, DivbanError> {
            let mut container = crate::stack::StackContainer::new(
                ContainerName::new_literal("demo"),
                ContainerImage::new_literal("docker.io/library/demo:1"),
            );
            container.requires = Vec::new();
            Ok(Stack {
                name: "demo".to_owned(),
                network: None,
                containers: vec![container],
            })
        }
    }

    fn invocation() -> Invocation {
        Invocation {
            config_path: AbsolutePath::new_literal("/does/not/exist.toml"),
            paths: ServicePaths {
                data_dir: AbsolutePath::new_literal("/srv/demo"),
                quadlet_dir: AbsolutePath::new_literal("/home/demo/.config/containers/systemd"),
                config_dir: AbsolutePath::new_literal("/home/demo/.config/divban"),
                home_dir: AbsolutePath::new_literal("/home/demo"),
            },
            user: ServiceUser {
                name: Username::new_literal("demo"),
                uid: UserId::new_literal(1500),
                gid: GroupId::new_literal(1500),
            },
            options: ServiceOptions::default(),
            capabilities: SystemCapabilities::default(),
            logger: Arc::new(Logger::new()),
            cancellation: Cancellation::new(),
        }
    }

    #[test]
    fn generated_files_all_merges_every_group_once() {
        let mut generated = GeneratedFiles::default();
        generated.networks.insert("demo.network".to_owned(), "[Network]".to_owned());
        generated.quadlets.insert("demo.container".to_owned(), "[Container]".to_owned());
        let all = generated.all();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn validate_reports_config_read_failure_for_a_missing_file() {
        let runtime = ServiceRuntime::new(DemoService);
        let result = runtime.validate(&invocation()).await;
        assert!(result.is_err());
    }
}
