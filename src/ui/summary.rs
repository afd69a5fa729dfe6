use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::orchestrator::service::ServicePhase;
use crate::orchestrator::StatusReport;

fn phase_cell(phase: ServicePhase, label: &str, use_color: bool) -> String {
    if !use_color {
        return format!("\u{25cf} {}", label);
    }
    match phase {
        ServicePhase::Running => format!("{} {}", "\u{25cf}".green(), label.green()),
        ServicePhase::Starting | ServicePhase::InstallingDeps => {
            format!("{} {}", "\u{25cf}".yellow(), label.yellow())
        }
        ServicePhase::Failed => format!("{} {}", "\u{25cf}".red(), label.red()),
        ServicePhase::Stopped if label.starts_with("Running") => {
            format!("{} {}", "\u{25cf}".cyan(), label.cyan())
        }
        ServicePhase::Stopped => format!("{} {}", "\u{25cf}".dimmed(), label),
    }
}

/// Status table: one row per service plus the dependency summary.
pub fn render_status_table(report: &StatusReport, use_color: bool) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(if use_color {
            ContentArrangement::Dynamic
        } else {
            ContentArrangement::Disabled
        });

    table.set_header(vec![
        Cell::new("Service").set_alignment(CellAlignment::Left),
        Cell::new("URL").set_alignment(CellAlignment::Left),
        Cell::new("PID").set_alignment(CellAlignment::Right),
        Cell::new("Status").set_alignment(CellAlignment::Left),
    ]);

    for status in report.services.values() {
        let pid = status
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mut state = phase_cell(status.phase, &status.state, use_color);
        if let Some(err) = &status.last_error {
            state.push_str(&format!(" ({})", err));
        }
        table.add_row(vec![
            Cell::new(&status.label),
            Cell::new(format!("http://localhost:{}", status.port)),
            Cell::new(pid),
            Cell::new(state),
        ]);
    }

    let mut out = String::new();
    // Indent the table by 2 spaces
    for line in table.to_string().lines() {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&format!("  Dependencies: {}\n", report.dependencies));
    out
}

pub fn print_status(report: &StatusReport) {
    let use_color = std::io::stdout().is_terminal();
    println!();
    print!("{}", render_status_table(report, use_color));
    println!();
}

/// Banner printed once the front end is chosen.
pub fn print_startup_summary(project: &str, report: &StatusReport, web_url: Option<&str>) {
    let use_color = std::io::stdout().is_terminal();

    println!();
    if use_color {
        println!("  {} {}", "devpanel".bold(), project.cyan());
    } else {
        println!("  devpanel {}", project);
    }
    println!();
    print!("{}", render_status_table(report, use_color));

    println!();
    match web_url {
        Some(url) => println!("  Control panel: {}", url),
        None => println!("  Type `help` for commands."),
    }
    if use_color {
        println!("  Press {} to stop", "Ctrl+C".bold());
    } else {
        println!("  Press Ctrl+C to stop");
    }
    println!();
}
