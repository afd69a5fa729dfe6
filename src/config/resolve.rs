use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "devpanel.toml";

/// Walk up the directory tree from `start`, checking for `filename` at each level.
/// Returns the full path to the file if found, or None if the root is reached
/// without finding it.
pub fn find_config(start: &Path, filename: &str) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Resolve the config file path. If `cli_file` is provided, verify it exists and
/// return it. Otherwise, search from `start` upward for "devpanel.toml".
///
/// A missing config is not an error: the panel falls back to the built-in
/// API server + frontend layout.
pub fn resolve_config(cli_file: Option<&Path>, start: &Path) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = cli_file {
        if path.is_file() {
            return Ok(Some(path.canonicalize()?));
        }
        anyhow::bail!("Config file not found: {}", path.display());
    }

    Ok(find_config(start, CONFIG_FILENAME))
}

/// Pick the directory service paths and `logs/` are relative to: an explicit
/// `--root`, else the directory holding the config file, else `cwd`.
pub fn resolve_project_root(
    cli_root: Option<&Path>,
    config_path: Option<&Path>,
    cwd: &Path,
) -> anyhow::Result<PathBuf> {
    if let Some(root) = cli_root {
        if !root.is_dir() {
            anyhow::bail!("Project root is not a directory: {}", root.display());
        }
        return Ok(root.canonicalize()?);
    }
    if let Some(parent) = config_path.and_then(Path::parent) {
        return Ok(parent.to_path_buf());
    }
    Ok(cwd.to_path_buf())
}
