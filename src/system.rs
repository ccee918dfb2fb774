//! System adapters (C7): thin, testable wrappers around every external
//! interaction the orchestrator and service contract need — running a
//! process as a specific user, driving `systemctl --user`/`journalctl
//! --user`, filesystem primitives with backup-and-replace semantics, and the
//! container engine's secret store.

pub mod fs;
pub mod process;
pub mod secret_store;
pub mod systemd;

pub use self::{
    fs::Filesystem,
    process::{ExecOptions, ExecOutput, ProcessRunner},
    secret_store::SecretStore,
    systemd::{SystemdControl, UnitStatus},
};
