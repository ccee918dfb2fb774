//! The CLI surface (A1): a `clap`-derived binary that builds a [`Context`]
//! per invocation and dispatches through the service registry (A5). Holds
//! no business logic of its own — every action is a one-line call into
//! [`service::Service`] or a fan-out over [`services::all_in_start_order`].

mod archive;
mod backup;
mod config;
mod context;
mod error;
mod escape;
mod ids;
mod logger;
mod orchestrator;
mod quadlet;
mod secret;
mod serde;
mod service;
mod services;
mod stack;
mod support;
mod system;

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand, ValueEnum};

use crate::{
    context::{ServiceOptions, ServicePaths, ServiceUser, SystemCapabilities},
    error::DivbanError,
    ids::{AbsolutePath, GroupId, ServiceName, UserId, Username},
    logger::{LogFormat, Logger},
    orchestrator::Cancellation,
    service::{Invocation, LogsOptions, Service},
};

/// Name under which fan-out commands target every registered service.
const ALL_TARGET: &str = "all";

#[derive(Parser, Debug)]
#[command(name = "divban", author, version, about = "Unified manager for a curated set of rootless Quadlet services")]
struct Cli {
    /// Service to operate on (e.g. `immich`), or `all` to fan out.
    target: String,

    #[command(subcommand)]
    action: Action,

    /// Override the config file divban reads for this service.
    ///
    /// Defaults to `<configDir>/<service>.toml`. Ignored by `validate` and
    /// `generate`, which take their own config path positionally.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    dry_run: bool,

    #[arg(long, global = true)]
    force: bool,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = Format::Pretty)]
    format: Format,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Format {
    Pretty,
    Json,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Pretty => Self::Pretty,
            Format::Json => Self::Json,
        }
    }
}

/// One arm per §6 CLI grammar entry; each variant carries exactly the
/// arguments that command documents.
#[derive(Subcommand, Debug, Clone)]
enum Action {
    /// Decode the config and report whether it's well-formed.
    Validate {
        config: PathBuf,
    },
    /// Render this service's quadlet units and supporting files.
    Generate {
        config: PathBuf,
        /// Write the rendered files under this directory instead of
        /// printing them to stdout.
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Provision secrets, write files, and enable/start the resulting units.
    Setup {
        config: PathBuf,
    },
    Start,
    Stop,
    Restart,
    Status,
    Logs {
        #[arg(long)]
        follow: bool,
        #[arg(short = 'n', long)]
        lines: Option<u32>,
        #[arg(short = 'c', long)]
        container: Option<String>,
    },
    Backup,
    Restore {
        path: PathBuf,
    },
}

impl Action {
    /// The §6 command name, used for error messages and `all` fan-out.
    fn label(&self) -> &'static str {
        match self {
            Self::Validate { .. } => "validate",
            Self::Generate { .. } => "generate",
            Self::Setup { .. } => "setup",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Status => "status",
            Self::Logs { .. } => "logs",
            Self::Backup => "backup",
            Self::Restore { .. } => "restore",
        }
    }

    /// Whether this action makes sense fanned out over every registered
    /// service at once. `validate`/`generate`/`setup`/`restore` each name a
    /// single file path that has no multi-service reading; `logs` would
    /// interleave unrelated journals. Only the lifecycle/status/backup
    /// actions fan out.
    fn supports_all(&self) -> bool {
        matches!(self, Self::Start | Self::Stop | Self::Restart | Self::Status | Self::Backup)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    color_eyre::install().ok();

    let cli = Cli::parse();

    let level = parse_log_level(&cli.log_level, cli.verbose);
    logger::install_subscriber(level, cli.format.into());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            let code = exit_code_for(&failure);
            eprintln!("{:?}", color_eyre::eyre::Report::new(failure));
            code
        }
    }
}

/// Top-level failure `main` can report: either a plain [`DivbanError`] or a
/// [`error::SetupFailure`] carrying release errors alongside the cause.
enum Failure {
    Plain(DivbanError),
    Setup(error::SetupFailure),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(err) => write!(f, "{err}"),
            Self::Setup(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Plain(err) => err.source(),
            Self::Setup(err) => Some(err),
        }
    }
}

impl From<DivbanError> for Failure {
    fn from(err: DivbanError) -> Self {
        Self::Plain(err)
    }
}

impl From<error::SetupFailure> for Failure {
    fn from(err: error::SetupFailure) -> Self {
        Self::Setup(err)
    }
}

fn exit_code_for(failure: &Failure) -> ExitCode {
    let code = match failure {
        Failure::Plain(err) => err.exit_code(),
        Failure::Setup(err) => err.exit_code(),
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn parse_log_level(raw: &str, verbose: bool) -> tracing::Level {
    if verbose {
        return tracing::Level::DEBUG;
    }
    raw.parse().unwrap_or(tracing::Level::INFO)
}

async fn run(cli: Cli) -> Result<(), Failure> {
    let logger = Arc::new(Logger::new());
    let user = current_user()?;
    let paths = resolve_paths()?;
    let options = ServiceOptions {
        dry_run: cli.dry_run,
        verbose: cli.verbose,
        force: cli.force,
    };
    let capabilities = SystemCapabilities {
        selinux_enforcing: detect_selinux_enforcing(),
    };

    let cancellation = Cancellation::new();
    tokio::spawn({
        let cancellation = cancellation.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancellation.cancel();
            }
        }
    });

    if cli.target == ALL_TARGET {
        if !cli.action.supports_all() {
            return Err(DivbanError::General(format!(
                "`{}` does not support `{ALL_TARGET}`; name a single service",
                cli.action.label()
            ))
            .into());
        }
        return run_all(&cli.action, &paths, &user, options, capabilities, &logger, &cancellation).await;
    }

    let service_name: ServiceName = cli
        .target
        .parse()
        .map_err(|_| DivbanError::General(format!("invalid service name `{}`", cli.target)))?;
    let service = services::lookup(&service_name)?;

    let config_path = config_path_for(&cli, &service_name, &paths)?;
    let invocation = Invocation {
        config_path,
        paths: paths.clone(),
        user: user.clone(),
        options,
        capabilities,
        logger: Arc::clone(&logger),
        cancellation,
    };

    dispatch(service.as_ref(), &cli.action, &invocation).await
}

/// Resolves the config path for a single-service invocation: the explicit
/// `--config` override when given, `validate`/`generate`/`setup`'s own
/// positional path, otherwise the conventional `<configDir>/<service>.toml`.
fn config_path_for(cli: &Cli, service_name: &ServiceName, paths: &ServicePaths) -> Result<AbsolutePath, Failure> {
    let explicit = match &cli.action {
        Action::Validate { config } | Action::Generate { config, .. } | Action::Setup { config } => Some(config.clone()),
        _ => cli.config.clone(),
    };

    let raw = explicit.unwrap_or_else(|| paths.config_dir.join(format!("{service_name}.toml")));
    AbsolutePath::try_from(raw.clone()).map_err(|_| {
        DivbanError::General(format!("config path `{}` is not absolute", raw.display())).into()
    })
}

async fn dispatch(service: &dyn Service, action: &Action, invocation: &Invocation) -> Result<(), Failure> {
    match action {
        Action::Validate { .. } => {
            service.validate(invocation).await?;
            invocation.logger.success("config is valid");
            Ok(())
        }
        Action::Generate { output, .. } => {
            let files = service.generate(invocation).await?;
            render_generated(&files, output.as_deref(), invocation).await
        }
        Action::Setup { .. } => {
            service.setup(invocation).await?;
            invocation.logger.success("setup complete");
            Ok(())
        }
        Action::Start => {
            service.start(invocation).await?;
            invocation.logger.success("started");
            Ok(())
        }
        Action::Stop => {
            service.stop(invocation).await?;
            invocation.logger.success("stopped");
            Ok(())
        }
        Action::Restart => {
            service.restart(invocation).await?;
            invocation.logger.success("restarted");
            Ok(())
        }
        Action::Status => {
            let report = service.status(invocation).await?;
            print_status(service.name().as_str(), &report);
            Ok(())
        }
        Action::Logs { follow, lines, container } => {
            let bytes = service
                .logs(
                    invocation,
                    &LogsOptions {
                        follow: *follow,
                        lines: *lines,
                        container: container.clone(),
                    },
                )
                .await?;
            std::io::Write::write_all(&mut std::io::stdout(), &bytes)
                .map_err(|source| DivbanError::System(error::SystemError::Write {
                    path: "<stdout>".to_owned(),
                    source,
                }))?;
            Ok(())
        }
        Action::Backup => {
            let outcome = service.backup(invocation).await?;
            println!("{} ({} bytes)", outcome.path.display(), outcome.size_bytes);
            Ok(())
        }
        Action::Restore { path } => {
            if !invocation.options.force {
                invocation
                    .logger
                    .warn("restoring without --force will still overwrite existing data files");
            }
            let outcome = service.restore(invocation, path).await?;
            println!("restored from {}", outcome.path.display());
            Ok(())
        }
    }
}

async fn render_generated(
    files: &service::GeneratedFiles,
    output: Option<&std::path::Path>,
    invocation: &Invocation,
) -> Result<(), Failure> {
    match output {
        None => {
            for (name, contents) in files.all() {
                println!("# {name}\n{contents}");
            }
            Ok(())
        }
        Some(dir) => {
            if invocation.options.dry_run {
                for name in files.all().keys() {
                    invocation.logger.info(format!("would write {}", dir.join(name).display()));
                }
                return Ok(());
            }
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| DivbanError::System(error::SystemError::CreateDirectory {
                    path: dir.display().to_string(),
                    source,
                }))?;
            for (name, contents) in files.all() {
                let path = dir.join(&name);
                tokio::fs::write(&path, contents)
                    .await
                    .map_err(|source| DivbanError::System(error::SystemError::Write {
                        path: path.display().to_string(),
                        source,
                    }))?;
            }
            invocation.logger.success(format!("wrote generated files to {}", dir.display()));
            Ok(())
        }
    }
}

fn print_status(name: &str, report: &service::StatusReport) {
    println!("{name}: {}", if report.all_running() { "running" } else { "degraded" });
    for container in &report.containers {
        println!("  {:<32} {:?}", container.name, container.state);
    }
}

/// Fans out `action` over every registered service, in start order for
/// `start`/`status`/`backup` and reverse (stop) order for `stop`/`restart`
/// — `restart` reverses too, so dependents restart before what they depend
/// on comes back, mirroring the teardown half of a restart rather than the
/// startup half.
async fn run_all(
    action: &Action,
    paths: &ServicePaths,
    user: &ServiceUser,
    options: ServiceOptions,
    capabilities: SystemCapabilities,
    logger: &Arc<Logger>,
    cancellation: &Cancellation,
) -> Result<(), Failure> {
    let ordered = match action {
        Action::Stop | Action::Restart => services::all_in_stop_order(),
        _ => services::all_in_start_order(),
    };

    for service in ordered {
        let service_name = service.name();
        let config_path = paths.config_dir.join(format!("{service_name}.toml"));
        let config_path = AbsolutePath::try_from(config_path.clone()).map_err(|_| {
            DivbanError::General(format!("config path `{}` is not absolute", config_path.display()))
        })?;
        let child_logger = Arc::new(logger.child(service_name.as_str()));
        let invocation = Invocation {
            config_path,
            paths: paths.clone(),
            user: user.clone(),
            options,
            capabilities,
            logger: child_logger,
            cancellation: cancellation.clone(),
        };
        dispatch(service.as_ref(), action, &invocation).await?;
    }
    Ok(())
}

fn current_user() -> Result<ServiceUser, Failure> {
    let name = std::env::var("USER")
        .ok()
        .and_then(|raw| raw.parse::<Username>().ok())
        .unwrap_or_else(|| Username::new_literal("divban"));
    let (uid, gid) = current_ids();
    Ok(ServiceUser {
        name,
        uid: UserId::try_from(uid).expect("UserId::try_from never fails"),
        gid: GroupId::try_from(gid).expect("GroupId::try_from never fails"),
    })
}

#[cfg(unix)]
fn current_ids() -> (u32, u32) {
    (rustix::process::getuid().as_raw(), rustix::process::getgid().as_raw())
}

#[cfg(not(unix))]
fn current_ids() -> (u32, u32) {
    (0, 0)
}

/// Resolves the four [`ServicePaths`] conventionally, rooted at the
/// invoking user's home directory: quadlet units under
/// `~/.config/containers/systemd`, divban's own config/data bookkeeping
/// under `~/.config/divban`. `data_dir` here is a placeholder overwritten
/// per service by that service's own `paths.dataDir` once its config is
/// decoded (see [`service::ServiceRuntime::context_for`]); only
/// `quadlet_dir`/`config_dir`/`home_dir` are load-bearing at this point.
fn resolve_paths() -> Result<ServicePaths, Failure> {
    let home = dirs::home_dir().ok_or_else(|| DivbanError::General("could not resolve home directory".to_owned()))?;
    let home_dir = AbsolutePath::try_from(home.clone())
        .map_err(|_| DivbanError::General(format!("home directory `{}` is not absolute", home.display())))?;
    let quadlet_dir = AbsolutePath::try_from(home.join(".config/containers/systemd"))
        .expect("joining an absolute path with a relative suffix stays absolute");
    let config_dir = AbsolutePath::try_from(home.join(".config/divban"))
        .expect("joining an absolute path with a relative suffix stays absolute");
    Ok(ServicePaths {
        data_dir: home_dir.clone(),
        quadlet_dir,
        config_dir,
        home_dir,
    })
}

/// Host SELinux status, read the same way container tooling conventionally
/// probes it: `/sys/fs/selinux/enforce` holds `"1"` when enforcing, `"0"`
/// when permissive, and is absent entirely on a non-SELinux host.
fn detect_selinux_enforcing() -> bool {
    std::fs::read_to_string("/sys/fs/selinux/enforce")
        .map(|contents| contents.trim() == "1")
        .unwrap_or(false)
}
