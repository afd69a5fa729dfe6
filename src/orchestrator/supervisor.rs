use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::orchestrator::ports::{self, PortConflict};
use crate::orchestrator::process::{self, OutputStream, ProcessHandle, WaitOutcome};
use crate::orchestrator::service::{
    RunHandle, ServicePhase, ServiceSpec, ServiceState, ServiceStatus, Teardown,
};
use crate::platform::Termination;
use crate::ui::logs::{LogHub, LogLevel};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long an exited child's remaining output may take to reach the log.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub stop_grace: Duration,
    pub install_timeout: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(10),
            install_timeout: Duration::from_secs(120),
        }
    }
}

// ---------------------------------------------------------------------------
// ManagedService: one service's lifecycle
// ---------------------------------------------------------------------------

/// Drives one service through install, spawn, readiness and exit.
///
/// Phase changes happen under `state` and are keyed by the attempt number,
/// so a stop that races an in-flight start always wins.
pub struct ManagedService {
    spec: ServiceSpec,
    state: Mutex<ServiceState>,
    logs: Arc<LogHub>,
    settings: RunSettings,
    /// Serializes installs so a restart never runs two installs in one
    /// directory.
    install_lock: tokio::sync::Mutex<()>,
}

impl ManagedService {
    pub fn new(spec: ServiceSpec, logs: Arc<LogHub>, settings: RunSettings) -> Arc<Self> {
        Arc::new(Self {
            spec,
            state: Mutex::new(ServiceState::default()),
            logs,
            settings,
            install_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> ServiceStatus {
        self.lock().snapshot(&self.spec)
    }

    pub fn phase(&self) -> ServicePhase {
        self.lock().phase
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.lock().attempt == attempt
    }

    fn is_starting(&self, attempt: u64) -> bool {
        let st = self.lock();
        st.attempt == attempt && st.phase == ServicePhase::Starting
    }

    fn log(&self, level: LogLevel, text: impl Into<String>) {
        self.logs.event(&self.spec.id, level, text);
    }

    /// Log a failure to the service channel and to tracing.
    fn report(&self, err: &ServiceError) {
        warn!(service = %self.spec.id, "{}", err);
        self.log(LogLevel::Error, err.to_string());
    }

    // -----------------------------------------------------------------------
    // start
    // -----------------------------------------------------------------------

    /// Begin a start attempt. Returns `Ok(false)` when the service is
    /// already installing, starting, running or stopping.
    ///
    /// On success the phase is `InstallingDeps` or `Starting` before this
    /// returns; the rest of the attempt runs on a spawned task.
    pub fn start(self: &Arc<Self>) -> Result<bool, ServiceError> {
        let (attempt, installing) = {
            let mut st = self.lock();
            if st.is_busy() {
                debug!(service = %self.spec.id, phase = %st.phase, "start ignored, already active");
                return Ok(false);
            }
            if !self.spec.has_manifest() {
                let err = ServiceError::MissingManifest {
                    service: self.spec.id.clone(),
                    path: self.spec.manifest_path(),
                };
                st.phase = ServicePhase::Stopped;
                st.last_error = Some(err.to_string());
                drop(st);
                self.report(&err);
                return Err(err);
            }
            let installing = self.spec.needs_install();
            st.attempt += 1;
            st.phase = if installing {
                ServicePhase::InstallingDeps
            } else {
                ServicePhase::Starting
            };
            st.last_error = None;
            st.last_exit = None;
            st.bound_port = None;
            st.external_port = None;
            (st.attempt, installing)
        };

        info!(service = %self.spec.id, attempt, installing, "starting");
        self.log(LogLevel::Info, format!("Starting {}...", self.spec.label));
        tokio::spawn(Arc::clone(self).run_attempt(attempt));
        Ok(true)
    }

    async fn run_attempt(self: Arc<Self>, attempt: u64) {
        let installing = self.lock().phase == ServicePhase::InstallingDeps;
        if installing {
            let result = {
                let _guard = self.install_lock.lock().await;
                // A previous attempt may have finished the install meanwhile.
                if self.spec.needs_install() {
                    self.run_install().await
                } else {
                    Ok(())
                }
            };
            if let Err(err) = result {
                self.fail(attempt, err);
                return;
            }
            let proceed = self.lock().transition(
                attempt,
                &[ServicePhase::InstallingDeps],
                ServicePhase::Starting,
            );
            if !proceed {
                self.log(
                    LogLevel::Info,
                    format!("{} was stopped during install, not starting", self.spec.label),
                );
                return;
            }
        }

        // Listeners that predate the spawn cannot prove readiness.
        let candidates = self.spec.probe_ports();
        let busy: Vec<u16> = candidates
            .iter()
            .copied()
            .filter(|p| ports::is_port_in_use(*p))
            .collect();
        if busy.contains(&self.spec.port) {
            let conflict = PortConflict {
                service: self.spec.id.clone(),
                port: self.spec.port,
                owner: ports::identify_port_owner(self.spec.port),
            };
            warn!(service = %self.spec.id, port = self.spec.port, "{}", conflict);
            self.log(LogLevel::Warn, conflict.to_string());
        }
        let probe: Vec<u16> = candidates.into_iter().filter(|p| !busy.contains(p)).collect();

        if !self.is_current(attempt) {
            return;
        }

        let (handle, output) = match process::spawn(&self.spec) {
            Ok(spawned) => spawned,
            Err(err) => {
                self.fail(attempt, err);
                return;
            }
        };
        let pid = handle.pid();
        let spawned_at = tokio::time::Instant::now();
        let cancel = CancellationToken::new();

        let rejected = {
            let mut st = self.lock();
            if st.attempt == attempt && st.phase == ServicePhase::Starting {
                let task = tokio::spawn(Arc::clone(&self).watch_exit(
                    attempt,
                    handle,
                    output,
                    probe.clone(),
                    cancel.clone(),
                ));
                st.run = Some(RunHandle {
                    pid,
                    cancel: cancel.clone(),
                    task,
                });
                None
            } else {
                Some(handle)
            }
        };
        if let Some(mut handle) = rejected {
            handle.stop(self.settings.stop_grace).await;
            self.log(
                LogLevel::Info,
                format!("{} was stopped while starting", self.spec.label),
            );
            return;
        }

        info!(service = %self.spec.id, pid = ?pid, "process spawned");
        self.log(
            LogLevel::Info,
            match pid {
                Some(pid) => format!("{} started (PID {})", self.spec.label, pid),
                None => format!("{} started", self.spec.label),
            },
        );

        self.watch_readiness(attempt, probe, spawned_at, cancel).await;
    }

    /// Record a failed attempt. A missing manifest leaves the service
    /// stopped; anything else marks it failed.
    fn fail(&self, attempt: u64, err: ServiceError) {
        let next = match err {
            ServiceError::MissingManifest { .. } => ServicePhase::Stopped,
            _ => ServicePhase::Failed,
        };
        {
            let mut st = self.lock();
            if st.transition(
                attempt,
                &[ServicePhase::InstallingDeps, ServicePhase::Starting],
                next,
            ) {
                st.last_error = Some(err.to_string());
            }
        }
        self.report(&err);
    }

    fn mark_ready(&self, attempt: u64, port: Option<u16>, via: &str) {
        let ready = {
            let mut st = self.lock();
            let ok = st.transition(attempt, &[ServicePhase::Starting], ServicePhase::Running);
            if ok {
                st.bound_port = port.or(Some(self.spec.port));
            }
            ok
        };
        if ready {
            info!(service = %self.spec.id, port = ?port, via, "service ready");
            match port {
                Some(port) => self.log(
                    LogLevel::Info,
                    format!("{} is running on port {}", self.spec.label, port),
                ),
                None => self.log(LogLevel::Info, format!("{} is running", self.spec.label)),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Per-attempt tasks
    // -----------------------------------------------------------------------

    /// Owns the child: waits for it to exit on its own, or stops it when the
    /// run handle is cancelled.
    async fn watch_exit(
        self: Arc<Self>,
        attempt: u64,
        mut handle: ProcessHandle,
        output: OutputStream,
        probe: Vec<u16>,
        cancel: CancellationToken,
    ) {
        let drain = tokio::spawn(Arc::clone(&self).drain_output(attempt, output, probe));

        let requested = tokio::select! {
            _ = handle.wait() => false,
            _ = cancel.cancelled() => true,
        };
        if requested {
            if handle.stop(self.settings.stop_grace).await == Termination::Killed {
                let err = ServiceError::StopTimeout {
                    service: self.spec.id.clone(),
                    grace: self.settings.stop_grace,
                };
                warn!(service = %self.spec.id, "{}", err);
                self.log(LogLevel::Warn, err.to_string());
            }
        }
        // Ends readiness polling for this attempt.
        cancel.cancel();
        let _ = tokio::time::timeout(DRAIN_GRACE, drain).await;

        let code = handle.try_exit_code().unwrap_or(-1);
        if requested {
            // `stop` owns the phase change.
            self.lock().last_exit = Some(code);
            return;
        }

        {
            let mut st = self.lock();
            if st.attempt == attempt {
                st.run = None;
                st.last_exit = Some(code);
                st.bound_port = None;
                // A readiness timeout stays visible after the exit.
                if st.phase != ServicePhase::Failed {
                    st.phase = ServicePhase::Stopped;
                }
                if code != 0 {
                    st.last_error = Some(format!("exited with code {}", code));
                }
            }
        }
        if code == 0 {
            info!(service = %self.spec.id, "process exited");
            self.log(LogLevel::Info, format!("{} exited", self.spec.label));
        } else {
            warn!(service = %self.spec.id, code, "process exited with failure");
            self.log(
                LogLevel::Error,
                format!("{} exited with code {}", self.spec.label, code),
            );
        }
    }

    /// Sole reader of the child's output: appends every line to the service
    /// channel and watches for readiness markers.
    async fn drain_output(self: Arc<Self>, attempt: u64, mut output: OutputStream, probe: Vec<u16>) {
        while let Some(line) = output.next_line().await {
            if line.is_stderr {
                self.logs.append_stderr(&self.spec.id, line.text.as_str());
            } else {
                self.logs.append(&self.spec.id, line.text.as_str());
            }
            if self.spec.is_ready_line(&line.text) && self.is_starting(attempt) {
                // Dev servers may settle on a fallback port; report the one
                // actually listening when it can be seen.
                let port = ports::first_listening(&probe);
                self.mark_ready(attempt, port, "output");
            }
        }
        debug!(service = %self.spec.id, "output drained");
    }

    /// Poll the expected and fallback ports after the settle delay until one
    /// listens, the attempt ends, or the readiness timeout expires.
    async fn watch_readiness(
        &self,
        attempt: u64,
        probe: Vec<u16>,
        spawned_at: tokio::time::Instant,
        cancel: CancellationToken,
    ) {
        let deadline = spawned_at + self.spec.ready_timeout;
        let this = self;
        let candidates = probe.as_slice();
        let poll = async {
            tokio::time::sleep(self.spec.settle).await;
            (|| async move { this.probe_once(attempt, candidates) })
                .retry(
                    ConstantBuilder::default()
                        .with_delay(READY_POLL_INTERVAL)
                        .with_max_times(usize::MAX),
                )
                .notify(|err: &anyhow::Error, dur: Duration| {
                    debug!(service = %self.spec.id, "readiness probe: {}, retrying in {:?}", err, dur);
                })
                .await
        };

        let result = tokio::select! {
            r = tokio::time::timeout_at(deadline, poll) => r,
            _ = cancel.cancelled() => return,
        };

        match result {
            Ok(Ok(Some(port))) => self.mark_ready(attempt, Some(port), "port"),
            Ok(Ok(None)) => {}
            Ok(Err(_)) | Err(_) => {
                let err = ServiceError::ReadinessTimeout {
                    service: self.spec.id.clone(),
                    timeout: self.spec.ready_timeout,
                };
                let failed = {
                    let mut st = self.lock();
                    let ok =
                        st.transition(attempt, &[ServicePhase::Starting], ServicePhase::Failed);
                    if ok {
                        st.last_error = Some(err.to_string());
                    }
                    ok
                };
                if failed {
                    self.report(&err);
                    self.log(
                        LogLevel::Warn,
                        format!("{} left running; stop it to clean up", self.spec.label),
                    );
                }
            }
        }
    }

    /// `Ok(None)` once the attempt no longer needs a port, `Ok(Some)` when a
    /// candidate listens, `Err` to keep polling.
    fn probe_once(&self, attempt: u64, probe: &[u16]) -> anyhow::Result<Option<u16>> {
        if !self.is_starting(attempt) {
            return Ok(None);
        }
        match ports::first_listening(probe) {
            Some(port) => Ok(Some(port)),
            None => anyhow::bail!("no listener on {:?} yet", probe),
        }
    }

    // -----------------------------------------------------------------------
    // stop
    // -----------------------------------------------------------------------

    /// Stop the service. Idempotent: returns `false` when there was nothing
    /// to stop. Never fails; a child that ignores the graceful signal is
    /// killed after the grace period.
    ///
    /// A stop that arrives while another one is tearing the child down waits
    /// for that teardown, so the service is stopped whenever this returns.
    pub async fn stop(&self) -> bool {
        // Err carries the teardown to wait for, if another stop owns one.
        let claimed = {
            let mut st = self.lock();
            if let Some(teardown) = &st.stopping {
                Err(Some(teardown.done.clone()))
            } else if st.phase == ServicePhase::Stopped && st.run.is_none() {
                Err(None)
            } else {
                st.attempt += 1;
                let run = st.run.take();
                let mut done_tx = None;
                match &run {
                    Some(run) => {
                        let (tx, done) = watch::channel(false);
                        st.stopping = Some(Teardown { pid: run.pid, done });
                        done_tx = Some(tx);
                    }
                    None => {
                        st.phase = ServicePhase::Stopped;
                        st.bound_port = None;
                    }
                }
                Ok((run, st.attempt, done_tx))
            }
        };
        let (run, attempt, done_tx) = match claimed {
            Ok(claimed) => claimed,
            Err(Some(done)) => {
                debug!(service = %self.spec.id, "stop already in progress, waiting");
                Teardown::finished(done).await;
                return false;
            }
            Err(None) => return false,
        };

        if let Some(run) = run {
            info!(service = %self.spec.id, pid = ?run.pid, "stopping");
            self.log(LogLevel::Info, format!("Stopping {}...", self.spec.label));
            run.cancel.cancel();
            if let Err(e) = run.task.await {
                warn!(service = %self.spec.id, error = %e, "exit watcher failed");
            }
            let mut st = self.lock();
            st.stopping = None;
            if st.attempt == attempt {
                st.phase = ServicePhase::Stopped;
                st.bound_port = None;
            }
        }
        if let Some(tx) = done_tx {
            tx.send_replace(true);
        }

        self.log(LogLevel::Info, format!("{} stopped", self.spec.label));
        true
    }

    // -----------------------------------------------------------------------
    // install / external detection
    // -----------------------------------------------------------------------

    /// Run the install command regardless of the marker. Refused while a
    /// child of this service is alive.
    pub async fn install(&self) -> Result<(), ServiceError> {
        let result = self.try_install().await;
        if let Err(ref err) = result {
            self.lock().last_error = Some(err.to_string());
            self.report(err);
        }
        result
    }

    async fn try_install(&self) -> Result<(), ServiceError> {
        let busy = self.lock().is_busy();
        if busy {
            return Err(ServiceError::AlreadyRunning {
                service: self.spec.id.clone(),
            });
        }
        if !self.spec.has_manifest() {
            return Err(ServiceError::MissingManifest {
                service: self.spec.id.clone(),
                path: self.spec.manifest_path(),
            });
        }
        let _guard = self.install_lock.lock().await;
        self.run_install().await
    }

    async fn run_install(&self) -> Result<(), ServiceError> {
        let command = &self.spec.install_command;
        let install_err = |reason: String| ServiceError::DependencyInstall {
            service: self.spec.id.clone(),
            reason,
        };

        info!(service = %self.spec.id, command = %command, "installing dependencies");
        self.log(
            LogLevel::Info,
            format!("Installing {} dependencies: {}", self.spec.label, command),
        );

        let (mut handle, mut output) =
            process::spawn_command(&self.spec.id, &self.spec.dir, command, &BTreeMap::new())
                .map_err(|e| install_err(e.to_string()))?;

        let logs = Arc::clone(&self.logs);
        let channel = self.spec.id.clone();
        let drain = tokio::spawn(async move {
            while let Some(line) = output.next_line().await {
                if line.is_stderr {
                    logs.append_stderr(&channel, line.text);
                } else {
                    logs.append(&channel, line.text);
                }
            }
        });

        let outcome = handle.wait_timeout(self.settings.install_timeout).await;
        if outcome == WaitOutcome::TimedOut {
            handle.stop(self.settings.stop_grace).await;
        }
        let _ = tokio::time::timeout(DRAIN_GRACE, drain).await;

        match outcome {
            WaitOutcome::Exited(0) => {
                self.log(
                    LogLevel::Info,
                    format!("{} dependencies installed", self.spec.label),
                );
                Ok(())
            }
            WaitOutcome::Exited(code) => Err(install_err(format!(
                "`{}` exited with code {}",
                command, code
            ))),
            WaitOutcome::TimedOut => Err(install_err(format!(
                "`{}` timed out after {}",
                command,
                humantime::format_duration(self.settings.install_timeout)
            ))),
        }
    }

    /// Probe the service's ports while it is not managed here; a listener
    /// means someone else already runs it.
    pub fn detect_external(&self) -> Option<u16> {
        if self.lock().is_busy() {
            return None;
        }
        let found = ports::first_listening(&self.spec.probe_ports());
        let mut st = self.lock();
        if st.is_busy() {
            return None;
        }
        st.external_port = found;
        found
    }
}
