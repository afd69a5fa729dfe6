pub mod ports;
pub mod process;
pub mod service;
pub mod supervisor;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::model::PanelConfig;
use crate::config::validate::find_closest_match;
use crate::doctor::{self, DependencyReport};
use crate::error::ServiceError;
use crate::ui::logs::{LogHub, LogLevel, COMBINED};

use service::{ServiceSpec, ServiceStatus};
use supervisor::{ManagedService, RunSettings};

/// Extra time `run_until_shutdown` allows on top of the stop grace before
/// giving up on a clean stop.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(5);

/// A command a front end can issue. Parsed from the web form's `action`
/// field and from console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    StartAll,
    StopAll,
    Start(String),
    Stop(String),
    InstallDeps,
    ClearLogs,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown action `{0}`")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let action = match s {
            "start_all" => Action::StartAll,
            "stop_all" => Action::StopAll,
            "install_deps" => Action::InstallDeps,
            "clear_logs" => Action::ClearLogs,
            _ => match (s.strip_prefix("start_"), s.strip_prefix("stop_")) {
                (Some(id), _) if !id.is_empty() => Action::Start(id.to_string()),
                (_, Some(id)) if !id.is_empty() => Action::Stop(id.to_string()),
                _ => return Err(UnknownAction(s.to_string())),
            },
        };
        Ok(action)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::StartAll => f.write_str("start_all"),
            Action::StopAll => f.write_str("stop_all"),
            Action::Start(id) => write!(f, "start_{}", id),
            Action::Stop(id) => write!(f, "stop_{}", id),
            Action::InstallDeps => f.write_str("install_deps"),
            Action::ClearLogs => f.write_str("clear_logs"),
        }
    }
}

/// Status snapshot served as `GET /api/status`: one display label per
/// service id at the top level, plus the dependency summary and details.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub labels: BTreeMap<String, String>,
    pub dependencies: String,
    pub services: BTreeMap<String, ServiceStatus>,
}

/// Owns every managed service and is the only way front ends reach them.
pub struct Supervisor {
    order: Vec<String>,
    services: BTreeMap<String, Arc<ManagedService>>,
    logs: Arc<LogHub>,
    start_delay: Duration,
    stop_grace: Duration,
    tools: Vec<String>,
    dependencies: Mutex<Option<DependencyReport>>,
}

impl Supervisor {
    /// Build a supervisor over a resolved config. Service directories are
    /// anchored at `root`.
    pub fn new(config: &PanelConfig, root: &Path, logs: Arc<LogHub>) -> Self {
        let settings = RunSettings {
            stop_grace: config.project.stop_grace,
            install_timeout: config.project.install_timeout,
        };
        let order = config.ordered_service_names();
        let services = order
            .iter()
            .filter_map(|id| {
                let cfg = config.services.get(id)?;
                let spec = ServiceSpec::from_config(id, cfg, root);
                Some((
                    id.clone(),
                    ManagedService::new(spec, Arc::clone(&logs), settings),
                ))
            })
            .collect();

        Self {
            order,
            services,
            logs,
            start_delay: config.project.start_delay,
            stop_grace: config.project.stop_grace,
            tools: doctor::DEFAULT_TOOLS.iter().map(|t| t.to_string()).collect(),
            dependencies: Mutex::new(None),
        }
    }

    /// Replace the toolchain list the dependency report checks.
    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn logs(&self) -> &Arc<LogHub> {
        &self.logs
    }

    /// Service ids in start-all order.
    pub fn service_ids(&self) -> &[String] {
        &self.order
    }

    fn service(&self, id: &str) -> Result<&Arc<ManagedService>, ServiceError> {
        self.services.get(id).ok_or_else(|| ServiceError::UnknownService {
            name: id.to_string(),
            suggestion: find_closest_match(id, &self.order).map(str::to_string),
        })
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<ManagedService>> {
        self.order.iter().filter_map(|id| self.services.get(id))
    }

    /// Start one service. `Ok(false)` when it was already active.
    pub fn start(&self, id: &str) -> Result<bool, ServiceError> {
        self.service(id)?.start()
    }

    /// Stop one service. `Ok(false)` when it was already stopped.
    pub async fn stop(&self, id: &str) -> Result<bool, ServiceError> {
        Ok(self.service(id)?.stop().await)
    }

    /// Start every service in order, pausing `start_delay` between
    /// services. Failures are logged per service and do not stop the rest.
    pub async fn start_all(&self) {
        self.logs
            .event(COMBINED, LogLevel::Info, "Starting all services...");
        let mut first = true;
        for svc in self.ordered() {
            if !first {
                tokio::time::sleep(self.start_delay).await;
            }
            first = false;
            if let Err(err) = svc.start() {
                // Already logged on the service channel.
                warn!(service = %svc.spec().id, "start_all: {}", err);
            }
        }
    }

    /// Stop every service concurrently.
    pub async fn stop_all(&self) {
        self.logs
            .event(COMBINED, LogLevel::Info, "Stopping all services...");
        let stops = self.ordered().map(|svc| svc.stop());
        let stopped = futures_util::future::join_all(stops).await;
        let count = stopped.into_iter().filter(|s| *s).count();
        info!(count, "services stopped");
        self.logs
            .event(COMBINED, LogLevel::Info, "All services stopped");
    }

    pub fn status(&self) -> StatusReport {
        let services: BTreeMap<String, ServiceStatus> = self
            .ordered()
            .map(|svc| (svc.spec().id.clone(), svc.status()))
            .collect();
        let labels = services
            .iter()
            .map(|(id, status)| (id.clone(), status.state.clone()))
            .collect();
        StatusReport {
            labels,
            dependencies: self.dependency_summary(),
            services,
        }
    }

    pub fn service_status(&self, id: &str) -> Result<ServiceStatus, ServiceError> {
        Ok(self.service(id)?.status())
    }

    fn dependency_summary(&self) -> String {
        self.dependencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.summary().to_string())
            .unwrap_or_else(|| doctor::CHECKING.to_string())
    }

    pub fn dependency_report(&self) -> Option<DependencyReport> {
        self.dependencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-run the dependency checks, log them to `combined` and keep the
    /// result for status queries.
    pub async fn check_dependencies(&self) -> DependencyReport {
        self.logs
            .event(COMBINED, LogLevel::Info, "Checking dependencies...");
        let tools: Vec<&str> = self.tools.iter().map(String::as_str).collect();
        let specs: Vec<&ServiceSpec> = self.ordered().map(|s| s.spec()).collect();
        let report = DependencyReport::collect(&tools, &specs).await;
        for line in report.lines() {
            let level = if line.starts_with("[ok]") {
                LogLevel::Info
            } else {
                LogLevel::Warn
            };
            self.logs.event(COMBINED, level, line);
        }
        self.logs
            .event(COMBINED, LogLevel::Info, report.summary());
        *self
            .dependencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        report
    }

    /// Rendered lines of one channel, oldest first.
    pub fn channel_logs(&self, channel: &str) -> Vec<String> {
        self.logs.snapshot(channel)
    }

    pub fn all_logs(&self) -> BTreeMap<String, Vec<String>> {
        self.logs.snapshot_all()
    }

    /// Clear one channel, or every channel when `channel` is `None`.
    pub fn clear_logs(&self, channel: Option<&str>) {
        match channel {
            Some(name) => self.logs.clear(name),
            None => self.logs.clear_all(),
        }
    }

    /// Run every service's install command, then refresh the dependency
    /// report. Services with a live child are skipped with an error.
    pub async fn install_deps(&self) -> Vec<ServiceError> {
        self.logs
            .event(COMBINED, LogLevel::Info, "Installing dependencies...");
        let mut errors = Vec::new();
        for svc in self.ordered() {
            if let Err(err) = svc.install().await {
                errors.push(err);
            }
        }
        self.check_dependencies().await;
        errors
    }

    /// Mark services whose port already has a listener that is not ours.
    pub fn detect_external(&self) -> Vec<(String, u16)> {
        let mut found = Vec::new();
        for svc in self.ordered() {
            if let Some(port) = svc.detect_external() {
                let spec = svc.spec();
                info!(service = %spec.id, port, "already running outside devpanel");
                self.logs.event(
                    &spec.id,
                    LogLevel::Info,
                    format!("{} already running on port {}", spec.label, port),
                );
                found.push((spec.id.clone(), port));
            }
        }
        found
    }

    /// Single command entry point for front ends.
    pub async fn dispatch(&self, action: Action) -> Result<(), ServiceError> {
        info!(%action, "dispatch");
        match action {
            Action::StartAll => self.start_all().await,
            Action::StopAll => self.stop_all().await,
            Action::Start(id) => {
                self.start(&id)?;
            }
            Action::Stop(id) => {
                self.stop(&id).await?;
            }
            Action::InstallDeps => {
                self.install_deps().await;
            }
            Action::ClearLogs => self.clear_logs(None),
        }
        Ok(())
    }

    /// Drive `frontend` until it finishes or the process is asked to shut
    /// down, then stop every service. Returns the front end's result.
    pub async fn run_until_shutdown<F>(&self, frontend: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        let result = tokio::select! {
            r = frontend => r,
            _ = shutdown_signal() => {
                eprintln!("\nShutting down...");
                Ok(())
            }
        };

        match tokio::time::timeout(self.stop_grace + SHUTDOWN_SLACK, self.stop_all()).await {
            Ok(()) => info!("All services stopped cleanly"),
            Err(_) => warn!("Shutdown timed out -- remaining processes are killed on exit"),
        }
        result
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
