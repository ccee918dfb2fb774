//! A small wrapper around `tracing` that gives every component the fixed
//! vocabulary the orchestrator and CLI expect (`step`, `success`, `fail`,
//! prefixed child loggers) instead of sprinkling `tracing::info!` calls with
//! ad hoc formatting throughout the codebase.
//!
//! The logger is always passed down through [`crate::context::Context`];
//! nothing in this crate reaches for a global subscriber macro directly
//! outside of this module and the subscriber installed in `main`.

use std::fmt;

use tracing::Level;

/// A structured logger, optionally prefixed, that renders through `tracing`.
///
/// Cloning a [`Logger`] is cheap; [`Logger::child`] returns a new logger with
/// an extended prefix rather than mutating the parent.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    prefix: Option<String>,
}

impl Logger {
    #[must_use]
    pub fn new() -> Self {
        Self { prefix: None }
    }

    /// Returns a new logger whose messages are prefixed with `prefix`,
    /// nested under this logger's own prefix if it has one.
    #[must_use]
    pub fn child(&self, prefix: impl fmt::Display) -> Self {
        let prefix = match &self.prefix {
            Some(existing) => format!("{existing}/{prefix}"),
            None => prefix.to_string(),
        };
        Self {
            prefix: Some(prefix),
        }
    }

    fn format(&self, msg: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("[{prefix}] {msg}"),
            None => msg.to_owned(),
        }
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.emit(Level::DEBUG, msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.emit(Level::INFO, msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.emit(Level::WARN, msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.emit(Level::ERROR, msg.as_ref());
    }

    /// A distinguished info-level message for a successfully completed step.
    pub fn success(&self, msg: impl AsRef<str>) {
        tracing::info!(outcome = "success", "{}", self.format(msg.as_ref()));
    }

    /// A distinguished error-level message for a step that did not complete.
    pub fn fail(&self, msg: impl AsRef<str>) {
        tracing::error!(outcome = "fail", "{}", self.format(msg.as_ref()));
    }

    /// Renders `"[i/n] msg"` at info level, the canonical progress format
    /// used by the setup pipeline.
    pub fn step(&self, i: usize, n: usize, msg: impl AsRef<str>) {
        self.info(format!("[{i}/{n}] {}", msg.as_ref()));
    }

    fn emit(&self, level: Level, msg: &str) {
        let rendered = self.format(msg);
        match level {
            Level::DEBUG => tracing::debug!("{rendered}"),
            Level::INFO => tracing::info!("{rendered}"),
            Level::WARN => tracing::warn!("{rendered}"),
            Level::ERROR => tracing::error!("{rendered}"),
            Level::TRACE => tracing::trace!("{rendered}"),
        }
    }
}

/// Output format for the stderr sink, selected by the `--format` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Installs the global `tracing` subscriber used by the binary.
///
/// `pretty` renders human-readable text to stderr; `json` renders
/// newline-delimited JSON to stderr, suitable for machine consumption. The
/// filter level comes from `--log-level`/`--verbose`, falling back to the
/// `RUST_LOG` environment variable when unset.
pub fn install_subscriber(level: tracing::Level, format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_nests_prefixes() {
        let root = Logger::new();
        let service = root.child("immich");
        let step = service.child("setup");
        assert_eq!(step.format("ready"), "[immich/setup] ready");
    }

    #[test]
    fn unprefixed_logger_passes_message_through() {
        let root = Logger::new();
        assert_eq!(root.format("hello"), "hello");
    }
}
