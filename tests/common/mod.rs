#![allow(dead_code)]
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use devpanel::config::load_resolved;
use devpanel::orchestrator::service::{ServicePhase, ServiceStatus};
use devpanel::orchestrator::Supervisor;
use devpanel::ui::logs::LogHub;
use tempfile::TempDir;

pub struct TestProject {
    pub dir: TempDir,
    pub config_path: PathBuf,
}

impl TestProject {
    pub fn new(config_toml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("devpanel.toml");
        std::fs::write(&config_path, config_toml).unwrap();
        Self { dir, config_path }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Create a service directory with a manifest and installed deps.
    pub fn add_service_dir(&self, path: &str) -> PathBuf {
        let dir = self.dir.path().join(path);
        std::fs::create_dir_all(dir.join("node_modules")).unwrap();
        std::fs::write(dir.join("package.json"), "{}").unwrap();
        dir
    }

    /// Load the config and build a supervisor that skips toolchain checks.
    pub fn supervisor(&self) -> Arc<Supervisor> {
        let config = load_resolved(Some(&self.config_path)).unwrap();
        let logs = Arc::new(LogHub::with_channels(
            config.project.log_capacity,
            config.services.keys().map(String::as_str),
        ));
        Arc::new(Supervisor::new(&config, self.root(), logs).with_tools(&[]))
    }
}

/// Two services announcing readiness on stdout, then idling.
pub fn two_service_config(api_port: u16, frontend_port: u16, extra_api: &str) -> String {
    format!(
        r#"
[project]
name = "test-panel"
start_order = ["api", "frontend"]
start_delay = "100ms"
stop_grace = "2s"

[services.api]
label = "API Server"
path = "api-server"
command = "{extra_api}echo 'Server running on port {api_port}'; sleep 30"
port = {api_port}
ready = ["Server running on port {api_port}"]
settle = "200ms"
ready_timeout = "10s"

[services.frontend]
label = "Frontend"
path = "admin-frontend"
command = "echo 'Ready in 12ms'; sleep 30"
port = {frontend_port}
ready = ["Ready in"]
settle = "200ms"
ready_timeout = "10s"
"#
    )
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn free_ports(count: usize) -> Vec<u16> {
    // Bind all at once to avoid reuse, then drop
    let listeners: Vec<_> = (0..count)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect()
}

pub async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub async fn wait_for_phase(
    supervisor: &Supervisor,
    id: &str,
    phase: ServicePhase,
    timeout: Duration,
) -> ServiceStatus {
    let start = std::time::Instant::now();
    loop {
        let status = supervisor.service_status(id).unwrap();
        if status.phase == phase || start.elapsed() > timeout {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn pid_alive(pid: u32) -> bool {
    devpanel::platform::is_process_alive(pid)
}
