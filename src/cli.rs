use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "devpanel",
    version,
    about = "Local development control panel for an API server and a frontend"
)]
pub struct Cli {
    /// Use the web panel even when an interactive terminal is available
    #[arg(long)]
    pub web: bool,

    /// Port for the web panel (overrides project.web_port)
    #[arg(long, env = "DEVPANEL_PORT")]
    pub port: Option<u16>,

    /// Use a specific config file
    #[arg(short = 'f', long = "file")]
    pub config_file: Option<PathBuf>,

    /// Directory service paths and logs/ are relative to
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Do not open a browser for the web panel (browsers are never opened;
    /// accepted for compatibility)
    #[arg(long)]
    pub no_open: bool,
}
