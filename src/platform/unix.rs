use std::collections::HashSet;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

use super::Termination;

/// No-op handle on Unix: group cleanup uses killpg with the child PID.
pub struct ProcessGroupHandle;

/// Return the user's default shell from `$SHELL`, falling back to `sh`.
fn user_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string())
}

/// Human-readable description of the shell for log messages.
pub fn shell_name() -> String {
    let shell = user_shell();
    format!("{} -lc", shell)
}

pub fn shell_command(command: &str) -> Command {
    let shell = user_shell();
    let mut cmd = Command::new(&shell);
    // Login shell (-l) sources the user's profile so that nvm/volta style
    // PATH customisations for node and npm are visible.
    cmd.arg("-l").arg("-c").arg(command);
    cmd
}

pub fn configure_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

pub fn post_spawn_setup(_child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    // On Unix, process group is configured before spawn via process_group(0).
    None
}

pub fn signal_terminate(child_pid: u32) -> bool {
    let pgid = Pid::from_raw(child_pid as i32);
    match killpg(pgid, Signal::SIGTERM) {
        Ok(()) => {
            debug!(pid = child_pid, "sent SIGTERM to process group");
            true
        }
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!(pid = child_pid, error = %e, "killpg(SIGTERM) failed");
            false
        }
    }
}

pub async fn kill_child(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    _group_handle: Option<&ProcessGroupHandle>,
) {
    if let Some(pid) = child_pid {
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pid, error = %e, "killpg(SIGKILL) failed"),
        }
    }
    // Covers the leader even if the group signal was refused.
    let _ = child.start_kill();
    let _ = child.wait().await;
}

pub async fn terminate_child(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    group_handle: Option<&ProcessGroupHandle>,
    grace: Duration,
) -> Termination {
    if let Ok(Some(_)) = child.try_wait() {
        debug!(pid = child_pid, "child already exited");
        return Termination::AlreadyExited;
    }

    let Some(pid) = child_pid else {
        kill_child(child, None, group_handle).await;
        return Termination::Killed;
    };

    match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => debug!(pid, "sent SIGTERM to process group"),
        Err(Errno::ESRCH) => {
            debug!(pid, "process group already exited");
            let _ = child.wait().await;
            return Termination::AlreadyExited;
        }
        Err(e) => {
            warn!(pid, error = %e, "killpg(SIGTERM) failed, killing");
            kill_child(child, child_pid, group_handle).await;
            return Termination::Killed;
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(_status)) => {
            debug!(pid, "child exited after SIGTERM");
            Termination::Graceful
        }
        _ => {
            warn!(
                pid,
                grace = %humantime::format_duration(grace),
                "child did not exit after SIGTERM, sending SIGKILL to process group"
            );
            kill_child(child, child_pid, group_handle).await;
            Termination::Killed
        }
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    if kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    // A zombie still answers signal 0; treat it as gone.
    #[cfg(target_os = "linux")]
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        if let Some(state) = stat.rsplit(')').next().and_then(|s| s.split_whitespace().next()) {
            return state != "Z" && state != "X";
        }
    }
    true
}

const TCP_LISTEN: &str = "0A";

/// Parse one `/proc/net/tcp{,6}` table into `(port, inode)` pairs of sockets
/// in the LISTEN state.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_listen_table(content: &str) -> Vec<(u16, String)> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                return None;
            }
            let port_hex = fields[1].rsplit(':').next()?;
            let port = u16::from_str_radix(port_hex, 16).ok()?;
            Some((port, fields[9].to_string()))
        })
        .collect()
}

#[cfg(target_os = "linux")]
fn read_listen_tables() -> Option<Vec<(u16, String)>> {
    let mut any = false;
    let mut entries = Vec::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(content) = std::fs::read_to_string(table) {
            any = true;
            entries.extend(parse_listen_table(&content));
        }
    }
    any.then_some(entries)
}

#[cfg(target_os = "linux")]
pub fn listening_ports() -> Option<HashSet<u16>> {
    read_listen_tables().map(|entries| entries.into_iter().map(|(port, _)| port).collect())
}

#[cfg(not(target_os = "linux"))]
pub fn listening_ports() -> Option<HashSet<u16>> {
    None
}

#[cfg(target_os = "linux")]
pub fn identify_port_owner(port: u16) -> Option<String> {
    let inode = read_listen_tables()?
        .into_iter()
        .find(|(p, inode)| *p == port && inode != "0")
        .map(|(_, inode)| inode)?;
    let needle = format!("socket:[{}]", inode);

    let proc_dir = std::fs::read_dir("/proc").ok()?;
    for entry in proc_dir.flatten() {
        let pid_str = entry.file_name().to_string_lossy().to_string();
        if !pid_str.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(fds) = std::fs::read_dir(format!("/proc/{}/fd", pid_str)) else {
            continue;
        };
        let owns = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .map(|link| link.to_string_lossy() == needle)
                .unwrap_or(false)
        });
        if !owns {
            continue;
        }
        let cmd = std::fs::read_to_string(format!("/proc/{}/cmdline", pid_str))
            .map(|c| c.replace('\0', " ").trim().to_string())
            .unwrap_or_default();
        if cmd.is_empty() {
            return Some(format!("PID {}", pid_str));
        }
        if cmd.chars().count() > 60 {
            let short: String = cmd.chars().take(57).collect();
            return Some(format!("{}... (PID {})", short, pid_str));
        }
        return Some(format!("{} (PID {})", cmd, pid_str));
    }

    None
}

#[cfg(not(target_os = "linux"))]
pub fn identify_port_owner(_port: u16) -> Option<String> {
    None
}
