use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::model::{ReadyMarker, ServiceConfig};

// ---------------------------------------------------------------------------
// ServiceSpec: immutable launch descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub id: String,
    pub label: String,
    pub dir: PathBuf,
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub port: u16,
    pub fallback_ports: Vec<u16>,
    pub ready: Vec<ReadyMarker>,
    pub manifest: String,
    pub install_command: String,
    pub install_marker: String,
    pub settle: Duration,
    pub ready_timeout: Duration,
}

impl ServiceSpec {
    /// Build a spec from (template-resolved) config, anchoring the service
    /// directory at `root` unless it is absolute.
    pub fn from_config(id: &str, cfg: &ServiceConfig, root: &Path) -> Self {
        let expanded = crate::platform::expand_home(&cfg.path);
        let dir = Path::new(&expanded);
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            root.join(dir)
        };
        Self {
            id: id.to_string(),
            label: cfg.label.clone().unwrap_or_else(|| id.to_string()),
            dir,
            command: cfg.command.clone(),
            env: cfg.env.clone(),
            port: cfg.port,
            fallback_ports: cfg.fallback_ports.clone(),
            ready: cfg.ready.clone(),
            manifest: cfg.manifest.clone(),
            install_command: cfg.install.clone(),
            install_marker: cfg.install_marker.clone(),
            settle: cfg.settle,
            ready_timeout: cfg.ready_timeout,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(&self.manifest)
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest_path().is_file()
    }

    pub fn install_marker_path(&self) -> PathBuf {
        self.dir.join(&self.install_marker)
    }

    /// Dependencies are considered installed once the marker path exists.
    /// An empty install command disables the step entirely.
    pub fn needs_install(&self) -> bool {
        !self.install_command.trim().is_empty() && !self.install_marker_path().exists()
    }

    /// Expected port followed by the fallback ports, without duplicates.
    pub fn probe_ports(&self) -> Vec<u16> {
        let mut ports = vec![self.port];
        for p in &self.fallback_ports {
            if !ports.contains(p) {
                ports.push(*p);
            }
        }
        ports
    }

    pub fn is_ready_line(&self, line: &str) -> bool {
        self.ready.iter().any(|m| m.matches(line))
    }
}

// ---------------------------------------------------------------------------
// ServicePhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePhase {
    #[default]
    Stopped,
    InstallingDeps,
    Starting,
    Running,
    Failed,
}

impl ServicePhase {
    /// An attempt is in flight or a child may be alive.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ServicePhase::InstallingDeps | ServicePhase::Starting | ServicePhase::Running
        )
    }
}

impl fmt::Display for ServicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServicePhase::Stopped => "Stopped",
            ServicePhase::InstallingDeps => "Installing dependencies",
            ServicePhase::Starting => "Starting",
            ServicePhase::Running => "Running",
            ServicePhase::Failed => "Failed",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// ServiceState: mutable, guarded by the per-service lock
// ---------------------------------------------------------------------------

/// Ownership of a spawned child: the exit watcher task holds the process
/// handle, and cancelling `cancel` asks it to stop the child.
pub struct RunHandle {
    pub pid: Option<u32>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

/// A stop in progress. Later stops wait on `done` instead of returning
/// while the child is still in its grace period.
pub struct Teardown {
    pub pid: Option<u32>,
    pub done: watch::Receiver<bool>,
}

impl Teardown {
    /// Resolves once the stop that owns this teardown has finished.
    pub async fn finished(mut done: watch::Receiver<bool>) {
        // A dropped sender means the owning stop is gone as well.
        let _ = done.wait_for(|finished| *finished).await;
    }
}

#[derive(Default)]
pub struct ServiceState {
    pub phase: ServicePhase,
    /// Bumped by every start and every stop. Work belonging to an older
    /// attempt must not change the phase.
    pub attempt: u64,
    pub run: Option<RunHandle>,
    /// Set while a stop tears down the child.
    pub stopping: Option<Teardown>,
    pub last_exit: Option<i32>,
    pub last_error: Option<String>,
    pub bound_port: Option<u16>,
    pub external_port: Option<u16>,
}

impl ServiceState {
    /// Compare-and-set: move to `next` only if `attempt` is still current and
    /// the phase is one of `expected`.
    pub fn transition(&mut self, attempt: u64, expected: &[ServicePhase], next: ServicePhase) -> bool {
        if self.attempt != attempt || !expected.contains(&self.phase) {
            return false;
        }
        self.phase = next;
        true
    }

    /// True while a start would be refused.
    pub fn is_busy(&self) -> bool {
        self.phase.is_active() || self.run.is_some() || self.stopping.is_some()
    }

    pub fn snapshot(&self, spec: &ServiceSpec) -> ServiceStatus {
        ServiceStatus {
            id: spec.id.clone(),
            label: spec.label.clone(),
            phase: self.phase,
            state: self.display_label(spec),
            pid: self
                .run
                .as_ref()
                .and_then(|r| r.pid)
                .or_else(|| self.stopping.as_ref().and_then(|t| t.pid)),
            port: self.bound_port.or(self.external_port).unwrap_or(spec.port),
            external: self.external_port.is_some() && self.run.is_none(),
            last_exit: self.last_exit,
            last_error: self.last_error.clone(),
        }
    }

    fn display_label(&self, spec: &ServiceSpec) -> String {
        if self.stopping.is_some() {
            return "Stopping".to_string();
        }
        match (self.phase, self.bound_port, self.external_port) {
            (ServicePhase::Stopped, _, Some(port)) if port == spec.port => {
                "Running (External)".to_string()
            }
            (ServicePhase::Stopped, _, Some(port)) => {
                format!("Running (External - Port {})", port)
            }
            (ServicePhase::Running, Some(port), _) if port != spec.port => {
                format!("Running (Port {})", port)
            }
            (phase, _, _) => phase.to_string(),
        }
    }
}

/// Point-in-time view of one service for status consumers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceStatus {
    pub id: String,
    pub label: String,
    pub phase: ServicePhase,
    /// Display label, e.g. "Running" or "Running (External)".
    pub state: String,
    pub pid: Option<u32>,
    pub port: u16,
    pub external: bool,
    pub last_exit: Option<i32>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::PanelConfig;

    fn spec(root: &Path) -> ServiceSpec {
        let config = PanelConfig::builtin();
        ServiceSpec::from_config("frontend", &config.services["frontend"], root)
    }

    #[test]
    fn spec_paths_are_anchored_at_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let s = spec(tmp.path());
        assert_eq!(s.dir, tmp.path().join("admin-frontend"));
        assert_eq!(s.manifest_path(), tmp.path().join("admin-frontend/package.json"));
        assert!(!s.has_manifest());
        assert!(s.needs_install());
    }

    #[test]
    fn install_marker_skips_install() {
        let tmp = tempfile::TempDir::new().unwrap();
        let s = spec(tmp.path());
        std::fs::create_dir_all(s.install_marker_path()).unwrap();
        assert!(!s.needs_install());

        let mut s = spec(tmp.path());
        s.install_command = String::new();
        std::fs::remove_dir_all(s.install_marker_path()).unwrap();
        assert!(!s.needs_install());
    }

    #[test]
    fn probe_ports_dedupes_and_keeps_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut s = spec(tmp.path());
        s.fallback_ports = vec![3000, 3469, 3001, 3000];
        assert_eq!(s.probe_ports(), vec![3469, 3000, 3001]);
    }

    #[test]
    fn frontend_ready_markers() {
        let tmp = tempfile::TempDir::new().unwrap();
        let s = spec(tmp.path());
        assert!(s.is_ready_line("  ✓ Ready in 2.3s"));
        assert!(s.is_ready_line("  - Local:        http://localhost:3469"));
        assert!(s.is_ready_line("event - compiled client and server successfully, READY"));
        assert!(!s.is_ready_line("compiling /page ..."));
    }

    #[test]
    fn transition_is_compare_and_set() {
        let mut st = ServiceState {
            attempt: 3,
            phase: ServicePhase::Starting,
            ..Default::default()
        };

        assert!(!st.transition(2, &[ServicePhase::Starting], ServicePhase::Running));
        assert_eq!(st.phase, ServicePhase::Starting);
        assert!(!st.transition(3, &[ServicePhase::InstallingDeps], ServicePhase::Running));
        assert!(st.transition(3, &[ServicePhase::Starting], ServicePhase::Running));
        assert_eq!(st.phase, ServicePhase::Running);
    }

    #[test]
    fn labels_for_external_and_fallback_ports() {
        let tmp = tempfile::TempDir::new().unwrap();
        let s = spec(tmp.path());
        let mut st = ServiceState::default();
        assert_eq!(st.snapshot(&s).state, "Stopped");

        st.external_port = Some(3469);
        assert_eq!(st.snapshot(&s).state, "Running (External)");
        st.external_port = Some(3001);
        let snap = st.snapshot(&s);
        assert_eq!(snap.state, "Running (External - Port 3001)");
        assert!(snap.external);
        assert_eq!(snap.port, 3001);

        let mut st = ServiceState::default();
        st.phase = ServicePhase::Running;
        st.bound_port = Some(3000);
        assert_eq!(st.snapshot(&s).state, "Running (Port 3000)");
        st.bound_port = Some(3469);
        assert_eq!(st.snapshot(&s).state, "Running");
    }

    #[test]
    fn teardown_reports_stopping_with_the_old_pid() {
        let tmp = tempfile::TempDir::new().unwrap();
        let s = spec(tmp.path());
        let (_tx, done) = watch::channel(false);
        let st = ServiceState {
            phase: ServicePhase::Running,
            stopping: Some(Teardown {
                pid: Some(4242),
                done,
            }),
            ..Default::default()
        };
        let snap = st.snapshot(&s);
        assert_eq!(snap.state, "Stopping");
        assert_eq!(snap.pid, Some(4242));
        assert!(st.is_busy());
    }

    #[tokio::test]
    async fn teardown_waiters_wake_when_the_stop_finishes() {
        let (tx, done) = watch::channel(false);
        let waiter = tokio::spawn(Teardown::finished(done.clone()));
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        tx.send_replace(true);
        waiter.await.unwrap();

        // A sender dropped without finishing must not hang the waiter.
        let (tx, done) = watch::channel(false);
        drop(tx);
        Teardown::finished(done).await;
    }

    #[test]
    fn phase_display_and_activity() {
        assert_eq!(ServicePhase::InstallingDeps.to_string(), "Installing dependencies");
        assert!(ServicePhase::Starting.is_active());
        assert!(!ServicePhase::Failed.is_active());
        assert!(!ServicePhase::Stopped.is_active());
    }
}
