use std::fmt::{self, Display, Formatter};

/// The `[Service]` section of a generated `.container` quadlet file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Service {
    pub restart: Option<RestartPolicy>,
    pub restart_sec: Option<u64>,
    pub timeout_start_sec: Option<u64>,
    pub timeout_stop_sec: Option<u64>,
    pub start_limit_interval_sec: Option<u64>,
    pub start_limit_burst: Option<u32>,
}

impl Service {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Display for Service {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(f, "[Service]")?;

        if let Some(restart) = self.restart {
            writeln!(f, "Restart={restart}")?;
        }
        if let Some(restart_sec) = self.restart_sec {
            writeln!(f, "RestartSec={restart_sec}")?;
        }
        if let Some(timeout) = self.timeout_start_sec {
            writeln!(f, "TimeoutStartSec={timeout}")?;
        }
        if let Some(timeout) = self.timeout_stop_sec {
            writeln!(f, "TimeoutStopSec={timeout}")?;
        }
        if let Some(interval) = self.start_limit_interval_sec {
            writeln!(f, "StartLimitIntervalSec={interval}")?;
        }
        if let Some(burst) = self.start_limit_burst {
            writeln!(f, "StartLimitBurst={burst}")?;
        }

        Ok(())
    }
}

/// Possible service restart configurations.
///
/// From [systemd.service](https://www.freedesktop.org/software/systemd/man/systemd.service.html#Restart=)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    OnSuccess,
    OnFailure,
    OnAbnormal,
    OnWatchdog,
    OnAbort,
    Always,
}

impl Display for RestartPolicy {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            Self::No => "no",
            Self::OnSuccess => "on-success",
            Self::OnFailure => "on-failure",
            Self::OnAbnormal => "on-abnormal",
            Self::OnWatchdog => "on-watchdog",
            Self::OnAbort => "on-abort",
            Self::Always => "always",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_restart_policy_and_timeouts() {
        let service = Service {
            restart: Some(RestartPolicy::OnFailure),
            restart_sec: Some(5),
            timeout_start_sec: Some(30),
            timeout_stop_sec: Some(30),
            ..Service::default()
        };
        assert_eq!(
            service.to_string(),
            "[Service]\n\
            Restart=on-failure\n\
            RestartSec=5\n\
            TimeoutStartSec=30\n\
            TimeoutStopSec=30\n"
        );
    }

    #[test]
    fn empty_service_is_empty() {
        assert!(Service::default().is_empty());
    }
}
