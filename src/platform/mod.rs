use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

pub use imp::ProcessGroupHandle;

/// How a child ended up gone after [`terminate_child`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited before any signal was delivered.
    AlreadyExited,
    /// The process exited within the grace period.
    Graceful,
    /// The grace period elapsed (or signalling failed) and the process was killed.
    Killed,
}

/// Create a platform-appropriate shell command.
/// Unix: `$SHELL -l -c <command>`, Windows: `cmd.exe /C <command>`
pub fn shell_command(command: &str) -> Command {
    imp::shell_command(command)
}

/// Configure the command to run in a new process group.
/// Unix: `process_group(0)`, Windows: `CREATE_NEW_PROCESS_GROUP`
pub fn configure_process_group(cmd: &mut Command) {
    imp::configure_process_group(cmd)
}

/// Perform any post-spawn setup (e.g., Job Object on Windows).
/// Returns a handle that must be kept alive for the process lifetime.
pub fn post_spawn_setup(child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    imp::post_spawn_setup(child_pid)
}

/// Ask the child's process group to exit, wait up to `grace`, then kill it.
/// Never fails: a child that is already gone counts as terminated.
pub async fn terminate_child(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    group_handle: Option<&ProcessGroupHandle>,
    grace: Duration,
) -> Termination {
    imp::terminate_child(child, child_pid, group_handle, grace).await
}

/// Send only the graceful signal (SIGTERM / CTRL_BREAK) to the child's group.
/// Returns false when the group no longer exists.
pub fn signal_terminate(child_pid: u32) -> bool {
    imp::signal_terminate(child_pid)
}

/// Forcefully kill the child's whole process group.
pub async fn kill_child(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    group_handle: Option<&ProcessGroupHandle>,
) {
    imp::kill_child(child, child_pid, group_handle).await
}

/// Check if a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    imp::is_process_alive(pid)
}

/// Get the current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Expand leading `~` or `$HOME` in a path string to the actual home directory.
///
/// Returns the original string unchanged when no home directory is available
/// or the string doesn't start with `~` or `$HOME`.
pub fn expand_home(path: &str) -> String {
    if let Some(home) = home_dir() {
        let home = home.to_string_lossy();
        if path == "~" || path == "$HOME" {
            return home.to_string();
        }
        if path.starts_with("~/") {
            return format!("{}{}", home, &path[1..]);
        }
        if path.starts_with("$HOME/") || path.starts_with("$HOME\\") {
            return format!("{}{}", home, &path[5..]);
        }
    }
    path.to_string()
}

/// Identify which process owns a given TCP port.
pub fn identify_port_owner(port: u16) -> Option<String> {
    imp::identify_port_owner(port)
}

/// Enumerate locally bound TCP ports in the LISTEN state.
///
/// Returns `None` when the host does not expose a socket table to this
/// process (non-Linux, or the table is unreadable).
pub fn listening_ports() -> Option<HashSet<u16>> {
    imp::listening_ports()
}

/// Shell name for log messages.
pub fn shell_name() -> String {
    imp::shell_name()
}


#[cfg(test)]
pub mod test_commands {
    #[cfg(unix)]
    pub fn sleep_long() -> &'static str {
        "sleep 60"
    }
    #[cfg(windows)]
    pub fn sleep_long() -> &'static str {
        // `timeout` exits immediately when stdout is piped (non-interactive).
        // `ping` with 61 attempts (~1s each) reliably blocks for ~60s.
        "ping -n 61 127.0.0.1 > nul"
    }

    #[cfg(unix)]
    pub fn ignore_term() -> &'static str {
        "trap '' TERM; echo trapped; sleep 60"
    }

    #[cfg(unix)]
    pub fn exit_success() -> &'static str {
        "exit 0"
    }
    #[cfg(windows)]
    pub fn exit_success() -> &'static str {
        "exit /b 0"
    }

    #[cfg(unix)]
    pub fn exit_failure() -> &'static str {
        "exit 3"
    }
    #[cfg(windows)]
    pub fn exit_failure() -> &'static str {
        "exit /b 3"
    }
}
