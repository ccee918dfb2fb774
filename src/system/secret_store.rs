//! The secret store adapter: wraps `podman secret` as the engine's secret
//! store, naming every secret `<service>-<name>` so each service's secrets
//! partition from every other service's without a lock (§4.11).

use crate::{
    context::ServiceUser,
    error::{ContainerError, DivbanError},
    secret::{generate_password, SecretSpec},
    system::process::{ExecOptions, ProcessRunner},
};

/// A single secret created during `ensure_service_secrets_tracked`, named as
/// it exists in the store (`<service>-<name>`).
#[derive(Debug, Clone)]
pub struct CreatedSecret {
    pub full_name: String,
}

/// Drives `podman secret` as `user`.
#[derive(Debug, Clone)]
pub struct SecretStore {
    runner: ProcessRunner,
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            runner: ProcessRunner,
        }
    }

    /// Returns whether `<service>-<name>` exists in the store.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::SecretStoreUnavailable`] if `podman secret
    /// inspect` could not be run at all (not merely "not found").
    pub async fn secret_exists(&self, user: &ServiceUser, full_name: &str) -> Result<bool, DivbanError> {
        let output = self
            .runner
            .run_as_user(
                user,
                "podman",
                &[
                    "secret".to_owned(),
                    "inspect".to_owned(),
                    full_name.to_owned(),
                ],
                ExecOptions::default(),
            )
            .await?;
        Ok(output.success())
    }

    /// Creates every secret in `specs` that does not already exist under
    /// `<service>-<name>`, generating a fresh password for each, and
    /// reports the full names of the ones actually created (idempotent
    /// create, §8 property 6).
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::SecretStoreUnavailable`] if `podman secret
    /// create` fails for a reason other than the secret already existing.
    pub async fn ensure_service_secrets_tracked(
        &self,
        service: &str,
        specs: &[SecretSpec],
        user: &ServiceUser,
    ) -> Result<Vec<CreatedSecret>, DivbanError> {
        let mut created = Vec::new();
        for spec in specs {
            let full_name = format!("{service}-{}", spec.name);
            if self.secret_exists(user, &full_name).await? {
                continue;
            }

            let password = generate_password(spec.length);
            let output = self
                .runner
                .run_as_user(
                    user,
                    "podman",
                    &[
                        "secret".to_owned(),
                        "create".to_owned(),
                        full_name.clone(),
                        "-".to_owned(),
                    ],
                    ExecOptions {
                        stdin: Some(password.into_bytes()),
                        ..ExecOptions::default()
                    },
                )
                .await?;
            if !output.success() {
                return Err(ContainerError::SecretStoreUnavailable(
                    output.stderr_str().into_owned(),
                )
                .into());
            }
            created.push(CreatedSecret { full_name });
        }
        Ok(created)
    }

    /// Removes every named secret, ignoring "no such secret" so a retried
    /// rollback is idempotent.
    pub async fn delete_secrets(&self, user: &ServiceUser, full_names: &[String]) {
        for full_name in full_names {
            let _ = self
                .runner
                .run_as_user(
                    user,
                    "podman",
                    &["secret".to_owned(), "rm".to_owned(), full_name.clone()],
                    ExecOptions::default(),
                )
                .await;
        }
    }

    /// Lists every secret name currently in the store whose name starts
    /// with `<service>-`.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::SecretStoreUnavailable`] if `podman secret
    /// ls` fails.
    pub async fn list_secrets(
        &self,
        user: &ServiceUser,
        service: &str,
    ) -> Result<Vec<String>, DivbanError> {
        let output = self
            .runner
            .run_as_user(
                user,
                "podman",
                &[
                    "secret".to_owned(),
                    "ls".to_owned(),
                    "--format".to_owned(),
                    "{{.Name}}".to_owned(),
                ],
                ExecOptions::default(),
            )
            .await?;
        if !output.success() {
            return Err(ContainerError::SecretStoreUnavailable(
                output.stderr_str().into_owned(),
            )
            .into());
        }

        let prefix = format!("{service}-");
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|name| name.starts_with(&prefix))
            .map(str::to_owned)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_secret_name_is_service_prefixed() {
        let spec = SecretSpec::new("db-password");
        let full_name = format!("{}-{}", "immich", spec.name);
        assert_eq!(full_name, "immich-db-password");
    }
}
