//! Toolchain and per-project dependency checks behind the `dependencies`
//! status field.

use std::process::Stdio;

use serde::Serialize;
use tracing::debug;

use crate::orchestrator::service::ServiceSpec;
use crate::platform;

/// Tools every service command relies on, checked through the login shell
/// so version managers on the user's PATH are honored.
pub const DEFAULT_TOOLS: &[&str] = &["node", "npm"];

pub const ALL_AVAILABLE: &str = "All dependencies available";
pub const SOME_MISSING: &str = "Some dependencies missing";
pub const CHECKING: &str = "Checking...";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolCheck {
    pub name: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProjectCheck {
    pub service: String,
    pub label: String,
    pub manifest: bool,
    pub installed: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DependencyReport {
    pub tools: Vec<ToolCheck>,
    pub projects: Vec<ProjectCheck>,
}

impl DependencyReport {
    pub async fn collect(tools: &[&str], specs: &[&ServiceSpec]) -> Self {
        let mut report = DependencyReport::default();
        for tool in tools {
            report.tools.push(ToolCheck {
                name: tool.to_string(),
                version: tool_version(tool).await,
            });
        }
        for spec in specs {
            report.projects.push(ProjectCheck {
                service: spec.id.clone(),
                label: spec.label.clone(),
                manifest: spec.has_manifest(),
                installed: !spec.needs_install(),
            });
        }
        report
    }

    pub fn all_available(&self) -> bool {
        self.tools.iter().all(|t| t.version.is_some())
            && self.projects.iter().all(|p| p.manifest && p.installed)
    }

    pub fn summary(&self) -> &'static str {
        if self.all_available() {
            ALL_AVAILABLE
        } else {
            SOME_MISSING
        }
    }

    /// One `[ok]`/`[!!]` line per check, for the log.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for tool in &self.tools {
            match &tool.version {
                Some(v) => out.push(format!("[ok] {:<16} {}", tool.name, v)),
                None => out.push(format!("[!!] {:<16} not found", tool.name)),
            }
        }
        for project in &self.projects {
            let line = if !project.manifest {
                format!("[!!] {:<16} manifest missing", project.label)
            } else if !project.installed {
                format!("[!!] {:<16} dependencies not installed", project.label)
            } else {
                format!("[ok] {:<16} dependencies installed", project.label)
            };
            out.push(line);
        }
        out
    }
}

async fn tool_version(tool: &str) -> Option<String> {
    let mut cmd = platform::shell_command(&format!("{} --version", tool));
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    let output = match cmd.output().await {
        Ok(output) => output,
        Err(e) => {
            debug!(tool, error = %e, "version check failed to run");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    // Some tools print their version to stderr; login shells may also print
    // banners, so take the last non-empty line.
    let text = if stdout.trim().is_empty() {
        String::from_utf8_lossy(&output.stderr).to_string()
    } else {
        stdout.to_string()
    };
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
}
