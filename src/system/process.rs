//! The process runner: executes a command as the caller's own identity,
//! honoring a timeout. Rootless execution means this crate never attempts
//! privilege elevation — it only ever runs as the user invoking it, and
//! refuses when asked to impersonate a different uid (§4.7).

use std::time::Duration;

use tokio::io::AsyncWriteExt;

use crate::{
    context::ServiceUser,
    error::{DivbanError, SystemError},
    escape,
};

/// Options honored by [`ProcessRunner::run_as_user`].
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub timeout: Duration,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
    pub stdin: Option<Vec<u8>>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            capture_stdout: true,
            capture_stderr: true,
            stdin: None,
        }
    }
}

/// The result of a finished (non-timed-out) process execution.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    #[must_use]
    pub fn stderr_str(&self) -> std::borrow::Cow<str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Runs commands on behalf of the orchestrator and system adapters, always
/// as the current process's own uid/gid.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Runs `command` with `args` as `user`, who must match the current
    /// process identity (rootless execution never elevates).
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::UserMismatch`] if `user.uid` differs from the
    /// current process uid, [`SystemError::Timeout`] if the process exceeds
    /// `options.timeout` (the child is killed), or
    /// [`SystemError::ProcessFailed`]-shaped errors are *not* raised here:
    /// a non-zero exit code is reported in [`ExecOutput::exit_code`], not as
    /// an `Err` — callers decide whether a given exit code is fatal.
    pub async fn run_as_user(
        &self,
        user: &ServiceUser,
        command: &str,
        args: &[String],
        options: ExecOptions,
    ) -> Result<ExecOutput, DivbanError> {
        self.verify_identity(user)?;

        let rendered = escape::command_join(std::iter::once(command).chain(args.iter().map(String::as_str)));

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args);
        cmd.kill_on_drop(true);
        cmd.stdin(if options.stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        });
        cmd.stdout(if options.capture_stdout {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        });
        cmd.stderr(if options.capture_stderr {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|source| SystemError::Write {
            path: rendered.clone(),
            source,
        })?;

        if let Some(stdin_bytes) = &options.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(stdin_bytes)
                    .await
                    .map_err(|source| SystemError::Write {
                        path: rendered.clone(),
                        source,
                    })?;
            }
        }

        let wait = tokio::time::timeout(options.timeout, child.wait_with_output());
        let output = match wait.await {
            Ok(result) => result.map_err(|source| SystemError::Write {
                path: rendered.clone(),
                source,
            })?,
            Err(_elapsed) => {
                return Err(SystemError::Timeout {
                    command: rendered,
                    timeout_secs: options.timeout.as_secs(),
                }
                .into());
            }
        };

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn verify_identity(&self, user: &ServiceUser) -> Result<(), DivbanError> {
        let current = current_uid();
        if current != user.uid.get() {
            return Err(SystemError::UserMismatch {
                expected: user.uid.get(),
                actual: current,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    rustix::process::getuid().as_raw()
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}
