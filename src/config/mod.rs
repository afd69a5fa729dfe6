pub mod interpolate;
pub mod model;
pub mod resolve;
pub mod validate;

use std::path::Path;

use anyhow::bail;

use model::PanelConfig;

/// Read and parse a config file. When the file defines no services the
/// built-in API server + frontend pair is used.
pub fn load_config(path: &Path) -> anyhow::Result<(PanelConfig, String)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let mut config: PanelConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    if config.services.is_empty() {
        let builtin = PanelConfig::builtin();
        config.services = builtin.services;
        if config.project.start_order.is_empty() {
            config.project.start_order = builtin.project.start_order;
        }
    }
    Ok((config, content))
}

/// Load (or default), validate and resolve templates in one step.
pub fn load_resolved(path: Option<&Path>) -> anyhow::Result<PanelConfig> {
    let (mut config, source, filename) = match path {
        Some(p) => {
            let (config, source) = load_config(p)?;
            let filename = p
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| resolve::CONFIG_FILENAME.to_string());
            (config, source, filename)
        }
        None => (
            PanelConfig::builtin(),
            String::new(),
            resolve::CONFIG_FILENAME.to_string(),
        ),
    };

    if let Err(errors) = validate::validate(&config, &source, &filename) {
        let mut msg = String::from("Configuration errors:\n");
        for err in &errors {
            msg.push_str(&format!("  - {}\n", err));
        }
        bail!("{}", msg.trim_end());
    }

    if let Err(errors) = interpolate::resolve_config_templates(&mut config) {
        let mut msg = String::from("Template errors:\n");
        for err in &errors {
            msg.push_str(&format!("  - {}\n", err));
        }
        bail!("{}", msg.trim_end());
    }

    Ok(config)
}
