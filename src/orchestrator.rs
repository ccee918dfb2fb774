//! The setup orchestrator (C8): a pipeline of resource steps, each carrying
//! a release action invoked in reverse acquisition order when a later step
//! fails. `SetupState` is the single growing struct every step reads and
//! extends in place of the intersection-typed state the design notes
//! describe for languages without them.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    context::Context,
    error::{DivbanError, SetupFailure, SystemError},
    ids::AbsolutePath,
    secret::SecretSpec,
    service::GeneratedFiles,
    system::{
        fs::{FileWrite, Filesystem},
        secret_store::{CreatedSecret, SecretStore},
        systemd::SystemdControl,
    },
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A cooperative cancellation flag: an `Arc<AtomicBool>` set by a
/// `tokio::signal::ctrl_c()` listener task spawned once in `main`, polled by
/// [`Pipeline::execute`] between steps (never inside a step's `acquire`, per
/// §5's "releases themselves are not cancellable"). Deliberately not built
/// on `tokio_util::sync::CancellationToken` — the flag this pattern needs is
/// small enough that the extra dependency buys nothing over a shared bool.
#[derive(Debug, Clone)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Sets the flag; called from the `ctrl_c()` listener task.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a release action runs because the pipeline failed downstream, or
/// because every step succeeded and this is final cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// The accumulated state of a setup pipeline. Each field is populated by
/// exactly one canonical step and may be read by any step after it.
#[derive(Debug, Default)]
pub struct SetupState {
    /// Populated by `secrets_step`.
    pub created_secrets: Option<Vec<CreatedSecret>>,
    /// Populated by `generate_step`.
    pub generated: Option<GeneratedFiles>,
    /// Populated by `create_dirs_step`; only the directories this run
    /// created, not every directory the service needs.
    pub created_directories: Option<Vec<AbsolutePath>>,
    /// Populated by `write_files_step`.
    pub file_writes: Option<Vec<FileWrite>>,
    /// Populated by `enable_services_step`.
    pub enabled_units: Option<Vec<String>>,
    /// Populated by `enable_services_step`, the subset of `enabled_units`
    /// actually started.
    pub started_units: Option<Vec<String>>,
}

type Acquire<C> =
    Box<dyn for<'a> Fn(&'a mut SetupState, &'a Context<C>) -> BoxFuture<'a, Result<(), DivbanError>> + Send + Sync>;
type Release<C> = Box<
    dyn for<'a> Fn(&'a SetupState, &'a Context<C>, Outcome) -> BoxFuture<'a, Result<(), DivbanError>>
        + Send
        + Sync,
>;

/// One step of the pipeline: an `acquire` that extends `SetupState`, and a
/// `release` that undoes it, invoked only if a later step fails.
pub struct SetupStep<C> {
    pub name: &'static str,
    acquire: Acquire<C>,
    release: Release<C>,
}

/// An ordered sequence of [`SetupStep`]s, run by [`Pipeline::execute`].
#[derive(Default)]
pub struct Pipeline<C> {
    steps: Vec<SetupStep<C>>,
}

impl<C> Pipeline<C> {
    #[must_use]
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    #[must_use]
    pub fn add_step(mut self, step: SetupStep<C>) -> Self {
        self.steps.push(step);
        self
    }

    /// Runs every step in order. On the first `acquire` failure, every
    /// already-pushed `release` runs in reverse order with
    /// [`Outcome::Failure`]; release errors are aggregated into the
    /// returned [`SetupFailure`] without overriding the original cause. On
    /// full success, every `release` runs once more with
    /// [`Outcome::Success`] for final cleanup (deleting file backups, for
    /// instance); those errors are logged, not propagated, since the
    /// pipeline itself did succeed.
    ///
    /// Between steps (never inside one), checks `cancellation`; a flag set
    /// by the `ctrl_c()` listener aborts the pipeline through the same
    /// release-in-reverse path as an `acquire` failure, with
    /// [`SystemError::Cancelled`] as the reported cause.
    pub async fn execute(
        self,
        ctx: &Context<C>,
        cancellation: &Cancellation,
    ) -> Result<SetupState, SetupFailure> {
        let mut state = SetupState::default();
        let mut completed: Vec<Release<C>> = Vec::new();
        let total = self.steps.len();

        for (index, step) in self.steps.into_iter().enumerate() {
            if cancellation.is_cancelled() {
                let mut release_errors = Vec::new();
                for release in completed.into_iter().rev() {
                    if let Err(err) = release(&state, ctx, Outcome::Failure).await {
                        release_errors.push(err);
                    }
                }
                return Err(SetupFailure {
                    cause: DivbanError::System(SystemError::Cancelled),
                    release_errors,
                });
            }

            ctx.logger.step(index + 1, total, step.name);
            match (step.acquire)(&mut state, ctx).await {
                Ok(()) => {
                    ctx.logger.success(step.name);
                    completed.push(step.release);
                }
                Err(cause) => {
                    ctx.logger.fail(step.name);
                    let mut release_errors = Vec::new();
                    for release in completed.into_iter().rev() {
                        if let Err(err) = release(&state, ctx, Outcome::Failure).await {
                            release_errors.push(err);
                        }
                    }
                    return Err(SetupFailure {
                        cause,
                        release_errors,
                    });
                }
            }
        }

        for release in completed.into_iter().rev() {
            if let Err(err) = release(&state, ctx, Outcome::Success).await {
                ctx.logger.warn(format!("cleanup after success reported: {err}"));
            }
        }

        Ok(state)
    }
}

fn noop_release<C>() -> Release<C> {
    Box::new(|_, _, _| Box::pin(async { Ok(()) }))
}

/// The first canonical step: creates any of `specs` that don't already
/// exist in the secret store, named `<service>-<name>`.
#[must_use]
pub fn secrets_step<C>(service: String, specs: Vec<SecretSpec>) -> SetupStep<C>
where
    C: Send + Sync + 'static,
{
    SetupStep {
        name: "provisioning secrets",
        acquire: Box::new(move |state, ctx| {
            let service = service.clone();
            let specs = specs.clone();
            Box::pin(async move {
                if ctx.options.dry_run {
                    state.created_secrets = Some(Vec::new());
                    return Ok(());
                }
                let store = SecretStore::new();
                let created = store
                    .ensure_service_secrets_tracked(&service, &specs, &ctx.user)
                    .await?;
                state.created_secrets = Some(created);
                Ok(())
            })
        }),
        release: Box::new(|state, ctx, outcome| {
            Box::pin(async move {
                if outcome == Outcome::Failure {
                    if let Some(created) = &state.created_secrets {
                        let names: Vec<String> =
                            created.iter().map(|secret| secret.full_name.clone()).collect();
                        SecretStore::new().delete_secrets(&ctx.user, &names).await;
                    }
                }
                Ok(())
            })
        }),
    }
}

/// The second canonical step, pure: runs `generate` (C3+C4) against the
/// context's config and capabilities. Has no release action.
#[must_use]
pub fn generate_step<C, F>(generate: F) -> SetupStep<C>
where
    C: Send + Sync + 'static,
    F: Fn(&Context<C>) -> Result<GeneratedFiles, DivbanError> + Send + Sync + 'static,
{
    SetupStep {
        name: "generating unit files",
        acquire: Box::new(move |state, ctx| {
            let result = generate(ctx);
            Box::pin(async move {
                state.generated = Some(result?);
                Ok(())
            })
        }),
        release: noop_release(),
    }
}

/// The third canonical step: creates every directory in `directories` that
/// doesn't already exist, chowned to the context's user.
#[must_use]
pub fn create_dirs_step<C>(directories: Vec<AbsolutePath>) -> SetupStep<C>
where
    C: Send + Sync + 'static,
{
    SetupStep {
        name: "creating directories",
        acquire: Box::new(move |state, ctx| {
            let directories = directories.clone();
            Box::pin(async move {
                if ctx.options.dry_run {
                    state.created_directories = Some(Vec::new());
                    return Ok(());
                }
                let created = Filesystem::ensure_directories_tracked(&directories, &ctx.user).await?;
                state.created_directories = Some(created);
                Ok(())
            })
        }),
        release: Box::new(|state, _ctx, outcome| {
            Box::pin(async move {
                if outcome == Outcome::Failure {
                    if let Some(created) = &state.created_directories {
                        Filesystem::remove_directories_reverse(created).await;
                    }
                }
                Ok(())
            })
        }),
    }
}

/// The fourth canonical step: writes the files `to_files` extracts from the
/// accumulated state (conventionally the quadlet units and environment
/// files from `state.generated`), backing up any pre-existing file first.
#[must_use]
pub fn write_files_step<C, F>(to_files: F) -> SetupStep<C>
where
    C: Send + Sync + 'static,
    F: Fn(&SetupState, &Context<C>) -> Result<Vec<(AbsolutePath, String)>, DivbanError> + Send + Sync + 'static,
{
    SetupStep {
        name: "writing generated files",
        acquire: Box::new(move |state, ctx| {
            let files_result = to_files(state, ctx);
            Box::pin(async move {
                let files = files_result?;
                if ctx.options.dry_run {
                    state.file_writes = Some(Vec::new());
                    return Ok(());
                }
                let writes = Filesystem::write_generated_files_tracked(&files).await?;
                state.file_writes = Some(writes);
                Ok(())
            })
        }),
        release: Box::new(|state, _ctx, outcome| {
            Box::pin(async move {
                if let Some(writes) = &state.file_writes {
                    match outcome {
                        Outcome::Failure => Filesystem::rollback_file_writes(writes).await,
                        Outcome::Success => Filesystem::cleanup_file_backups(writes).await,
                    }
                }
                Ok(())
            })
        }),
    }
}

/// The fifth canonical step: a single `daemon-reload`, then enables every
/// unit in `units`, starting them too when `start` is true.
#[must_use]
pub fn enable_services_step<C>(units: Vec<String>, start: bool) -> SetupStep<C>
where
    C: Send + Sync + 'static,
{
    SetupStep {
        name: "enabling services",
        acquire: Box::new(move |state, ctx| {
            let units = units.clone();
            Box::pin(async move {
                if ctx.options.dry_run {
                    state.enabled_units = Some(Vec::new());
                    state.started_units = Some(Vec::new());
                    return Ok(());
                }

                let systemd = SystemdControl::new();
                systemd.daemon_reload(&ctx.user).await?;

                let mut enabled = Vec::new();
                for unit in &units {
                    systemd.enable_service(&ctx.user, unit).await?;
                    enabled.push(unit.clone());
                }
                state.enabled_units = Some(enabled);

                let mut started = Vec::new();
                if start {
                    for unit in &units {
                        systemd.start_service(&ctx.user, unit).await?;
                        started.push(unit.clone());
                    }
                }
                state.started_units = Some(started);
                Ok(())
            })
        }),
        release: Box::new(|state, ctx, outcome| {
            Box::pin(async move {
                if outcome == Outcome::Failure {
                    let systemd = SystemdControl::new();
                    if let Some(started) = &state.started_units {
                        for unit in started.iter().rev() {
                            let _ = systemd.stop_service(&ctx.user, unit).await;
                        }
                    }
                    if let Some(enabled) = &state.enabled_units {
                        for unit in enabled.iter().rev() {
                            let _ = systemd.disable_service(&ctx.user, unit).await;
                        }
                    }
                }
                Ok(())
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::{ServiceOptions, ServicePaths, ServiceUser, SystemCapabilities},
        error::{ConfigError, DivbanError},
        ids::{GroupId, UserId, Username},
        logger::Logger,
    };
    use std::sync::Arc;

    fn ctx() -> Context<()> {
        Context {
            config: (),
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
        }
    }

    fn tracking_step(name: &'static str, log: Arc<std::sync::Mutex<Vec<&'static str>>>, fail: bool) -> SetupStep<()> {
        let acquire_log = Arc::clone(&log);
        let release_log = log;
        SetupStep {
            name,
            acquire: Box::new(move |_state, _ctx| {
                let acquire_log = Arc::clone(&acquire_log);
                Box::pin(async move {
                    acquire_log.lock().unwrap().push(name);
                    if fail {
                        return Err(DivbanError::Config(ConfigError::MissingField("x")));
                    }
                    Ok(())
                })
            }),
            release: Box::new(move |_state, _ctx, outcome| {
                let release_log = Arc::clone(&release_log);
                Box::pin(async move {
                    release_log.lock().unwrap().push(match outcome {
                        Outcome::Success => "release-success",
                        Outcome::Failure => "release-failure",
                    });
                    Ok(())
                })
            }),
        }
    }

    #[tokio::test]
    async fn successful_pipeline_releases_every_step_in_reverse_with_success_outcome() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .add_step(tracking_step("a", Arc::clone(&log), false))
            .add_step(tracking_step("b", Arc::clone(&log), false));

        pipeline.execute(&ctx(), &Cancellation::new()).await.unwrap();

        let recorded = log.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec!["a", "b", "release-success", "release-success"]
        );
    }

    #[tokio::test]
    async fn failing_step_releases_completed_steps_in_reverse_with_failure_outcome() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .add_step(tracking_step("a", Arc::clone(&log), false))
            .add_step(tracking_step("b", Arc::clone(&log), true))
            .add_step(tracking_step("c", Arc::clone(&log), false));

        let result = pipeline.execute(&ctx(), &Cancellation::new()).await;
        assert!(result.is_err());

        let recorded = log.lock().unwrap().clone();
        // "c" never runs because "b" failed; only "a" had completed, so only
        // its release fires.
        assert_eq!(recorded, vec!["a", "b", "release-failure"]);
    }

    #[tokio::test]
    async fn cancellation_aborts_before_the_next_step_and_releases_in_reverse() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let cancellation = Cancellation::new();
        let acquire_log = Arc::clone(&log);
        let release_log = Arc::clone(&log);
        let cancel_step = SetupStep {
            name: "a",
            acquire: Box::new({
                let cancellation = cancellation.clone();
                move |_state, _ctx| {
                    let acquire_log = Arc::clone(&acquire_log);
                    let cancellation = cancellation.clone();
                    Box::pin(async move {
                        acquire_log.lock().unwrap().push("a");
                        cancellation.cancel();
                        Ok(())
                    })
                }
            }),
            release: Box::new(move |_state, _ctx, outcome| {
                let release_log = Arc::clone(&release_log);
                Box::pin(async move {
                    release_log.lock().unwrap().push(match outcome {
                        Outcome::Success => "release-success",
                        Outcome::Failure => "release-failure",
                    });
                    Ok(())
                })
            }),
        };
        let pipeline = Pipeline::new()
            .add_step(cancel_step)
            .add_step(tracking_step("b", Arc::clone(&log), false));

        let result = pipeline.execute(&ctx(), &cancellation).await;
        assert!(matches!(
            result,
            Err(SetupFailure {
                cause: DivbanError::System(SystemError::Cancelled),
                ..
            })
        ));

        let recorded = log.lock().unwrap().clone();
        // "b" never runs: the flag is checked between steps, so step "a"
        // completes (and is released) but "b" never starts.
        assert_eq!(recorded, vec!["a", "release-failure"]);
    }

    #[tokio::test]
    async fn dry_run_write_files_step_reports_no_writes() {
        let mut dry_run_ctx = ctx();
        dry_run_ctx.options.dry_run = true;

        let step = write_files_step::<(), _>(|_state, _ctx| {
            Ok(vec![(AbsolutePath::new_literal("/srv/demo/demo.env"), "A=1".to_owned())])
        });
        let pipeline = Pipeline::new().add_step(step);

        let state = pipeline.execute(&dry_run_ctx, &Cancellation::new()).await.unwrap();
        assert_eq!(state.file_writes.unwrap().len(), 0);
    }
}
