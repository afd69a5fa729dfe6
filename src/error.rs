//! Failures of a single service operation.
//!
//! None of these escape the supervisor: each is logged to the service's
//! channel, recorded as the service's last error, and reflected in its phase.
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service directory has no manifest; the start is aborted and the
    /// service stays stopped.
    #[error("{service}: {} not found", path.display())]
    MissingManifest { service: String, path: PathBuf },

    /// The install command failed or timed out; the service process is never
    /// spawned.
    #[error("{service}: dependency install failed: {reason}")]
    DependencyInstall { service: String, reason: String },

    /// The OS refused to create the process.
    #[error("{service}: failed to spawn `{command}`: {source}")]
    Spawn {
        service: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Neither a readiness marker nor a listening port was observed in time.
    #[error("{service}: not ready after {}", humantime::format_duration(*timeout))]
    ReadinessTimeout { service: String, timeout: Duration },

    /// Graceful termination did not finish within the grace period.
    #[error("{service}: did not exit within {} of SIGTERM, killed", humantime::format_duration(*grace))]
    StopTimeout { service: String, grace: Duration },

    #[error("{service}: cannot install dependencies while the service is running")]
    AlreadyRunning { service: String },

    #[error("unknown service `{name}`{}", suggestion.as_ref().map(|s| format!(" (did you mean `{}`?)", s)).unwrap_or_default())]
    UnknownService {
        name: String,
        suggestion: Option<String>,
    },
}
