//! systemd control: a thin layer over `systemctl --user` / `journalctl
//! --user` subprocesses. Deliberately opaque — never a D-Bus session — so
//! exec-as-user and "the engine's systemd instance" stay a single
//! process-execution seam to reason about and to fake in tests (§4.7).

use std::time::Duration;

use crate::{
    context::ServiceUser,
    error::{DivbanError, ServiceError, SystemError},
    support::combinators::{retry, RetryPolicy},
    system::process::{ExecOptions, ProcessRunner},
};

/// Retry budget for the adapter-boundary retry described in §4.9: up to 3
/// attempts, doubling from a 200ms base delay, applied only to failures the
/// process layer itself reports as transient (a timeout, or the user
/// systemd instance's bus being briefly unavailable).
const SYSTEMCTL_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    base_delay: Duration::from_millis(200),
};

/// Whether `err` looks like a transient failure to talk to the user
/// systemd/D-Bus instance rather than a real unit-operation failure.
fn is_retryable(err: &DivbanError) -> bool {
    match err {
        DivbanError::System(SystemError::Timeout { .. }) => true,
        DivbanError::System(SystemError::Write { source, .. }) => matches!(
            source.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
        ),
        _ => false,
    }
}

/// The reported state of a systemd unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Active,
    Inactive,
    Failed,
    Unknown,
}

impl UnitStatus {
    fn from_is_active_output(stdout: &str) -> Self {
        match stdout.trim() {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Options for [`SystemdControl::journalctl`].
#[derive(Debug, Clone, Default)]
pub struct JournalOptions {
    pub follow: bool,
    pub lines: Option<u32>,
}

/// Drives `systemctl --user`/`journalctl --user` as `user`, always through
/// the [`ProcessRunner`] so rootless execution is enforced uniformly.
#[derive(Debug, Clone)]
pub struct SystemdControl {
    runner: ProcessRunner,
}

impl Default for SystemdControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemdControl {
    #[must_use]
    pub fn new() -> Self {
        Self {
            runner: ProcessRunner,
        }
    }

    /// Reloads the user systemd instance's unit cache. Must run once after
    /// any quadlet file is written, before enabling the units it generates.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::DaemonReload`] if `systemctl --user
    /// daemon-reload` exits non-zero.
    pub async fn daemon_reload(&self, user: &ServiceUser) -> Result<(), DivbanError> {
        let output = self
            .systemctl(user, &["daemon-reload".to_owned()])
            .await?;
        if !output.success() {
            return Err(ServiceError::DaemonReload(output.stderr_str().into_owned()).into());
        }
        Ok(())
    }

    /// Enables `unit`. Enabling an already-enabled unit is idempotent and
    /// reports success (§8, tested property 5).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnitOperation`] on any other non-zero exit.
    pub async fn enable_service(&self, user: &ServiceUser, unit: &str) -> Result<(), DivbanError> {
        self.unit_action(user, "enable", unit).await
    }

    /// Disables `unit`. Disabling an already-disabled unit is treated as
    /// success.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnitOperation`] on any other non-zero exit.
    pub async fn disable_service(&self, user: &ServiceUser, unit: &str) -> Result<(), DivbanError> {
        self.unit_action(user, "disable", unit).await
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::UnitOperation`] if `systemctl --user start`
    /// exits non-zero.
    pub async fn start_service(&self, user: &ServiceUser, unit: &str) -> Result<(), DivbanError> {
        self.unit_action(user, "start", unit).await
    }

    /// Stopping an already-stopped unit is treated as success.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnitOperation`] on any other non-zero exit.
    pub async fn stop_service(&self, user: &ServiceUser, unit: &str) -> Result<(), DivbanError> {
        self.unit_action(user, "stop", unit).await
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::UnitOperation`] if `systemctl --user restart`
    /// exits non-zero.
    pub async fn restart_service(&self, user: &ServiceUser, unit: &str) -> Result<(), DivbanError> {
        self.unit_action(user, "restart", unit).await
    }

    /// Reports `unit`'s current state. Never returns an `Err` for a
    /// `systemctl` process that ran but reported a non-active unit:
    /// `is-active`'s own non-zero exit for `inactive`/`failed` is expected
    /// and folded into [`UnitStatus`] rather than surfaced as a failure.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnitOperation`] only if the `systemctl`
    /// process itself could not be spawned or timed out.
    pub async fn status_service(
        &self,
        user: &ServiceUser,
        unit: &str,
    ) -> Result<UnitStatus, DivbanError> {
        let output = self
            .systemctl(user, &["is-active".to_owned(), unit.to_owned()])
            .await?;
        Ok(UnitStatus::from_is_active_output(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    /// Streams `journalctl --user -u <unit>` output, returning the raw
    /// captured bytes. Follow mode is bounded by `options`'s caller-supplied
    /// timeout through [`ExecOptions`] rather than run unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnitOperation`] if `journalctl` cannot be run.
    pub async fn journalctl(
        &self,
        user: &ServiceUser,
        unit: &str,
        options: &JournalOptions,
    ) -> Result<Vec<u8>, DivbanError> {
        let mut args = vec!["--user".to_owned(), "-u".to_owned(), unit.to_owned()];
        if let Some(lines) = options.lines {
            args.push("-n".to_owned());
            args.push(lines.to_string());
        }
        if options.follow {
            args.push("-f".to_owned());
        }

        let output = self
            .runner
            .run_as_user(user, "journalctl", &args, ExecOptions::default())
            .await?;
        if !output.success() {
            return Err(ServiceError::UnitOperation {
                action: "journalctl",
                unit: unit.to_owned(),
                detail: output.stderr_str().into_owned(),
            }
            .into());
        }
        Ok(output.stdout)
    }

    async fn unit_action(
        &self,
        user: &ServiceUser,
        action: &'static str,
        unit: &str,
    ) -> Result<(), DivbanError> {
        let output = self
            .systemctl(user, &[action.to_owned(), unit.to_owned()])
            .await?;
        if output.success() {
            return Ok(());
        }
        let stderr = output.stderr_str();
        let idempotent = matches!(action, "enable" | "disable" | "stop")
            && (stderr.contains("already") || stderr.contains("not loaded"));
        if idempotent {
            return Ok(());
        }
        Err(ServiceError::UnitOperation {
            action,
            unit: unit.to_owned(),
            detail: stderr.into_owned(),
        }
        .into())
    }

    async fn systemctl(
        &self,
        user: &ServiceUser,
        args: &[String],
    ) -> Result<crate::system::process::ExecOutput, DivbanError> {
        let mut full_args = vec!["--user".to_owned()];
        full_args.extend_from_slice(args);
        retry(SYSTEMCTL_RETRY, is_retryable, || {
            self.runner
                .run_as_user(user, "systemctl", &full_args, ExecOptions::default())
        })
        .await
    }
}
