use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use devpanel::cli::Cli;
use devpanel::config;
use devpanel::config::resolve::{resolve_config, resolve_project_root};
use devpanel::dashboard::server::{bind, start_dashboard_server};
use devpanel::orchestrator::ports::{check_all_ports, format_port_conflicts};
use devpanel::orchestrator::Supervisor;
use devpanel::ui::console;
use devpanel::ui::logs::{log_file_path, spawn_file_writer, LogHub, LogWriter, COMBINED};
use devpanel::ui::summary::print_startup_summary;

const SERVER_DRAIN: std::time::Duration = std::time::Duration::from_secs(3);

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with env-filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_panel(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_panel(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("reading the current directory")?;
    let config_path = resolve_config(cli.config_file.as_deref(), &cwd)?;
    let root = resolve_project_root(cli.root.as_deref(), config_path.as_deref(), &cwd)?;
    let config = config::load_resolved(config_path.as_deref())?;
    match &config_path {
        Some(path) => info!(config = %path.display(), root = %root.display(), "config loaded"),
        None => info!(root = %root.display(), "no devpanel.toml found, using built-in services"),
    }

    let logs = Arc::new(LogHub::with_channels(
        config.project.log_capacity,
        config.services.keys().map(String::as_str),
    ));
    let log_path = log_file_path(&root, &config.project.logs_dir, Local::now());
    match spawn_file_writer(&logs, &log_path) {
        Ok(_) => info!(path = %log_path.display(), "writing run log"),
        Err(e) => warn!(path = %log_path.display(), error = %e, "cannot create run log"),
    }

    let max_name_len = config
        .services
        .keys()
        .map(String::len)
        .chain([COMBINED.len()])
        .max()
        .unwrap_or(0);
    tokio::spawn(LogWriter::new(logs.subscribe(), max_name_len).run());

    let conflicts = check_all_ports(&config);
    if !conflicts.is_empty() {
        eprintln!("{}", format_port_conflicts(&conflicts));
    }

    let supervisor = Arc::new(Supervisor::new(&config, &root, logs));
    supervisor.detect_external();
    {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            supervisor.check_dependencies().await;
        });
    }

    let use_web = cli.web || !std::io::stdin().is_terminal();
    if use_web {
        if !cli.web {
            println!("Note: no interactive terminal, using the web panel");
        }
        let listener = bind(cli.port.unwrap_or(config.project.web_port)).await?;
        let url = format!("http://localhost:{}", listener.local_addr()?.port());
        print_startup_summary(&config.project.name, &supervisor.status(), Some(&url));
        // The server ends on its own error, or on `cancel` once every
        // service has been stopped.
        let cancel = CancellationToken::new();
        let server = tokio::spawn({
            let cancel = cancel.clone();
            let served = start_dashboard_server(listener, Arc::clone(&supervisor), cancel.clone());
            async move {
                let result = served.await;
                cancel.cancel();
                result
            }
        });
        let result = supervisor
            .run_until_shutdown(async {
                cancel.cancelled().await;
                Ok(())
            })
            .await;
        cancel.cancel();
        let served = match tokio::time::timeout(SERVER_DRAIN, server).await {
            Ok(joined) => joined.context("web panel task failed")?,
            Err(_) => {
                warn!("web panel did not close its connections in time");
                Ok(())
            }
        };
        result.and(served)
    } else {
        print_startup_summary(&config.project.name, &supervisor.status(), None);
        supervisor
            .run_until_shutdown(console::run(Arc::clone(&supervisor)))
            .await
    }
}
