//! Child process runner: spawn a shell command in its own process group,
//! merge its stdout and stderr into one line stream, and tear it down
//! gracefully with escalation to a forced kill.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::orchestrator::service::ServiceSpec;
use crate::platform::{self, ProcessGroupHandle, Termination};

/// One line of child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub text: String,
    pub is_stderr: bool,
}

/// Merged stdout + stderr of a child. Yields `None` once both pipes hit EOF.
pub struct OutputStream {
    rx: mpsc::Receiver<OutputLine>,
}

impl OutputStream {
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(i32),
    TimedOut,
}

pub struct ProcessHandle {
    name: String,
    child: Child,
    pid: Option<u32>,
    group: Option<ProcessGroupHandle>,
    exit_code: Option<i32>,
}

/// Map an exit status to a single code; signal deaths become `128 + signo`
/// the way shells report them.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    -1
}

/// Spawn `command` through the user's shell in `dir` with `env` layered on
/// top of the inherited environment.
pub fn spawn_command(
    name: &str,
    dir: &Path,
    command: &str,
    env: &BTreeMap<String, String>,
) -> std::io::Result<(ProcessHandle, OutputStream)> {
    let mut cmd = platform::shell_command(command);
    cmd.current_dir(dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    platform::configure_process_group(&mut cmd);

    let mut child = cmd.spawn()?;
    let pid = child.id();
    let group = platform::post_spawn_setup(pid);
    debug!(service = %name, pid = ?pid, shell = %platform::shell_name(), command, "child spawned");

    let (tx, rx) = mpsc::channel(1024);
    if let Some(out) = child.stdout.take() {
        tokio::spawn(pump_lines(name.to_string(), out, false, tx.clone()));
    }
    if let Some(err) = child.stderr.take() {
        tokio::spawn(pump_lines(name.to_string(), err, true, tx));
    }

    Ok((
        ProcessHandle {
            name: name.to_string(),
            child,
            pid,
            group,
            exit_code: None,
        },
        OutputStream { rx },
    ))
}

/// Spawn a service's launch command. Fails without creating a process when
/// the service directory has no manifest.
pub fn spawn(spec: &ServiceSpec) -> Result<(ProcessHandle, OutputStream), ServiceError> {
    if !spec.has_manifest() {
        return Err(ServiceError::MissingManifest {
            service: spec.id.clone(),
            path: spec.manifest_path(),
        });
    }
    spawn_command(&spec.id, &spec.dir, &spec.command, &spec.env).map_err(|source| {
        ServiceError::Spawn {
            service: spec.id.clone(),
            command: spec.command.clone(),
            source,
        }
    })
}

async fn pump_lines<R>(name: String, pipe: R, is_stderr: bool, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send(OutputLine { text, is_stderr }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(service = %name, error = %e, is_stderr, "output read error");
                let _ = tx
                    .send(OutputLine {
                        text: format!("<unreadable output: {}>", e),
                        is_stderr,
                    })
                    .await;
                break;
            }
        }
    }
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Send the graceful signal to the whole group. Returns false when the
    /// process is already gone.
    pub fn terminate(&mut self) -> bool {
        if self.try_exit_code().is_some() {
            return false;
        }
        match self.pid {
            Some(pid) => platform::signal_terminate(pid),
            None => false,
        }
    }

    /// Force-kill the whole group and reap the child.
    pub async fn kill(&mut self) {
        platform::kill_child(&mut self.child, self.pid, self.group.as_ref()).await;
        self.try_exit_code();
    }

    /// Wait for exit. Cancel safe.
    pub async fn wait(&mut self) -> i32 {
        if let Some(code) = self.exit_code {
            return code;
        }
        let code = match self.child.wait().await {
            Ok(status) => exit_code(status),
            Err(e) => {
                warn!(service = %self.name, error = %e, "wait() failed");
                -1
            }
        };
        self.exit_code = Some(code);
        code
    }

    pub async fn wait_timeout(&mut self, timeout: Duration) -> WaitOutcome {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(code) => WaitOutcome::Exited(code),
            Err(_) => WaitOutcome::TimedOut,
        }
    }

    /// Non-blocking poll for the exit code.
    pub fn try_exit_code(&mut self) -> Option<i32> {
        if self.exit_code.is_none() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.exit_code = Some(exit_code(status));
            }
        }
        self.exit_code
    }

    /// Graceful terminate, wait up to `grace`, then force-kill. A process
    /// that already exited counts as stopped.
    pub async fn stop(&mut self, grace: Duration) -> Termination {
        if self.try_exit_code().is_some() {
            return Termination::AlreadyExited;
        }
        let outcome =
            platform::terminate_child(&mut self.child, self.pid, self.group.as_ref(), grace).await;
        self.try_exit_code();
        outcome
    }
}
