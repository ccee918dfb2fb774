//! Context wiring (C10): the five records every operation runs under,
//! threaded explicitly through the orchestrator and service contract rather
//! than reached for as globals.

use std::sync::Arc;

use crate::{
    ids::{AbsolutePath, GroupId, UserId, Username},
    logger::Logger,
};

/// Where this service's files live on disk.
#[derive(Debug, Clone)]
pub struct ServicePaths {
    pub data_dir: AbsolutePath,
    pub quadlet_dir: AbsolutePath,
    pub config_dir: AbsolutePath,
    pub home_dir: AbsolutePath,
}

/// The rootless identity every process action runs as.
#[derive(Debug, Clone)]
pub struct ServiceUser {
    pub name: Username,
    pub uid: UserId,
    pub gid: GroupId,
}

/// CLI-level behavior flags, orthogonal to any one service's config.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceOptions {
    pub dry_run: bool,
    pub verbose: bool,
    pub force: bool,
}

/// Host capabilities that change how generated artifacts must look.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCapabilities {
    pub selinux_enforcing: bool,
}

impl From<SystemCapabilities> for crate::stack::SystemCapabilities {
    fn from(caps: SystemCapabilities) -> Self {
        Self {
            selinux_enforcing: caps.selinux_enforcing,
        }
    }
}

/// Everything an operation needs, generic over the service's decoded config
/// type. Constructed once per CLI invocation and passed by reference.
#[derive(Debug, Clone)]
pub struct Context<C> {
    pub config: C,
    pub paths: ServicePaths,
    pub user: ServiceUser,
    pub options: ServiceOptions,
    pub capabilities: SystemCapabilities,
    pub logger: Arc<Logger>,
}

impl<C> Context<C> {
    /// Rebuild this context around a different config value, keeping every
    /// other record — used when a single invocation decodes one config but
    /// needs to hand a related type to a sub-step.
    pub fn with_config<D>(&self, config: D) -> Context<D> {
        Context {
            config,
            paths: self.paths.clone(),
            user: self.user.clone(),
            options: self.options,
            capabilities: self.capabilities,
            logger: Arc::clone(&self.logger),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> ServicePaths {
        ServicePaths {
            data_dir: AbsolutePath::new_literal("/srv/immich"),
            quadlet_dir: AbsolutePath::new_literal("/home/immich/.config/containers/systemd"),
            config_dir: AbsolutePath::new_literal("/home/immich/.config/divban"),
            home_dir: AbsolutePath::new_literal("/home/immich"),
        }
    }

    fn user() -> ServiceUser {
        ServiceUser {
            name: Username::new_literal("immich"),
            uid: UserId::new_literal(1500),
            gid: GroupId::new_literal(1500),
        }
    }

    #[test]
    fn with_config_preserves_every_other_record() {
        let ctx = Context {
            config: 1u32,
            paths: paths(),
            user: user(),
            options: ServiceOptions {
                dry_run: true,
                ..ServiceOptions::default()
            },
            capabilities: SystemCapabilities {
                selinux_enforcing: true,
            },
            logger: Arc::new(Logger::new()),
        };

        let retyped = ctx.with_config("immich".to_owned());
        assert_eq!(retyped.config, "immich");
        assert_eq!(retyped.user.name.as_str(), "immich");
        assert!(retyped.options.dry_run);
        assert!(retyped.capabilities.selinux_enforcing);
    }

    #[test]
    fn converts_into_stack_capabilities() {
        let caps = SystemCapabilities {
            selinux_enforcing: true,
        };
        let stack_caps: crate::stack::SystemCapabilities = caps.into();
        assert!(stack_caps.selinux_enforcing);
    }
}
