//! Interactive terminal front end: reads commands from stdin while the log
//! writer streams every line to stdout.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::orchestrator::{Action, Supervisor};
use crate::ui::filter::LogFilter;
use crate::ui::logs::COMBINED;
use crate::ui::summary;

const DEFAULT_TAIL: usize = 50;

pub const HELP: &str = "\
Commands:
  start [id|all]           start one service, or all in order
  stop [id|all]            stop one service, or all
  status                   show the status table
  logs [channel] [filter]  print recent lines (filter: pattern, level=<lvl>, stderr)
  clear [channel]          clear one log channel, or all
  install                  run every service's install command
  help                     show this help
  quit                     stop everything and exit";

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Dispatch(Action),
    Status,
    Logs { channel: String, filter: Vec<String> },
    Clear(Option<String>),
    Help,
    Quit,
}

/// Parse one line of console input. Blank input yields `Ok(None)`.
pub fn parse_command(input: &str) -> Result<Option<ConsoleCommand>, String> {
    let words: Vec<&str> = input.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (verb, args) {
        ("start", [] | ["all"]) => ConsoleCommand::Dispatch(Action::StartAll),
        ("start", [id]) => ConsoleCommand::Dispatch(Action::Start(id.to_string())),
        ("stop", [] | ["all"]) => ConsoleCommand::Dispatch(Action::StopAll),
        ("stop", [id]) => ConsoleCommand::Dispatch(Action::Stop(id.to_string())),
        ("status" | "ps", []) => ConsoleCommand::Status,
        ("logs", []) => ConsoleCommand::Logs {
            channel: COMBINED.to_string(),
            filter: Vec::new(),
        },
        ("logs", [channel, rest @ ..]) => ConsoleCommand::Logs {
            channel: channel.to_string(),
            filter: rest.iter().map(|w| w.to_string()).collect(),
        },
        ("clear", []) => ConsoleCommand::Clear(None),
        ("clear", [channel]) => ConsoleCommand::Clear(Some(channel.to_string())),
        ("install", []) => ConsoleCommand::Dispatch(Action::InstallDeps),
        ("help" | "?", []) => ConsoleCommand::Help,
        ("quit" | "exit" | "q", []) => ConsoleCommand::Quit,
        // The web form's action names work here too.
        (raw, []) => match raw.parse::<Action>() {
            Ok(action) => ConsoleCommand::Dispatch(action),
            Err(e) => return Err(format!("{} (type `help`)", e)),
        },
        _ => return Err(format!("bad arguments for `{}` (type `help`)", verb)),
    };
    Ok(Some(command))
}

/// Run the console until `quit`. If stdin closes, wait for a shutdown
/// signal instead.
pub async fn run(supervisor: Arc<Supervisor>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed, console input disabled");
                std::future::pending::<()>().await;
                continue;
            }
            Err(e) => anyhow::bail!("reading console input: {}", e),
        };

        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => return Ok(()),
            Ok(Some(command)) => execute(&supervisor, command),
            Err(msg) => eprintln!("{}", msg),
        }
    }
}

fn execute(supervisor: &Arc<Supervisor>, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Dispatch(action) => {
            // Long actions (install, start-all) must not block input.
            let supervisor = Arc::clone(supervisor);
            tokio::spawn(async move {
                if let Err(e) = supervisor.dispatch(action).await {
                    eprintln!("{}", e);
                }
            });
        }
        ConsoleCommand::Status => summary::print_status(&supervisor.status()),
        ConsoleCommand::Logs { channel, filter } => {
            let words: Vec<&str> = filter.iter().map(String::as_str).collect();
            match LogFilter::from_words(&words) {
                Ok(filter) => {
                    let lines = supervisor.logs().tail(&channel, supervisor.logs().capacity());
                    let matching: Vec<_> = lines.iter().filter(|l| filter.matches(l)).collect();
                    let skip = matching.len().saturating_sub(DEFAULT_TAIL);
                    for line in matching.into_iter().skip(skip) {
                        println!("{}", line.render_tagged());
                    }
                }
                Err(msg) => eprintln!("{}", msg),
            }
        }
        ConsoleCommand::Clear(channel) => {
            supervisor.clear_logs(channel.as_deref());
            println!("Logs cleared.");
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(input: &str) -> ConsoleCommand {
        parse_command(input).unwrap().unwrap()
    }

    #[test]
    fn start_and_stop_forms() {
        assert_eq!(parsed("start"), ConsoleCommand::Dispatch(Action::StartAll));
        assert_eq!(parsed("start all"), ConsoleCommand::Dispatch(Action::StartAll));
        assert_eq!(
            parsed("  start   api "),
            ConsoleCommand::Dispatch(Action::Start("api".into()))
        );
        assert_eq!(parsed("stop"), ConsoleCommand::Dispatch(Action::StopAll));
        assert_eq!(
            parsed("stop frontend"),
            ConsoleCommand::Dispatch(Action::Stop("frontend".into()))
        );
        assert_eq!(
            parsed("stop_api"),
            ConsoleCommand::Dispatch(Action::Stop("api".into()))
        );
    }

    #[test]
    fn other_commands() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parsed("status"), ConsoleCommand::Status);
        assert_eq!(parsed("install"), ConsoleCommand::Dispatch(Action::InstallDeps));
        assert_eq!(parsed("clear"), ConsoleCommand::Clear(None));
        assert_eq!(parsed("clear api"), ConsoleCommand::Clear(Some("api".into())));
        assert_eq!(parsed("q"), ConsoleCommand::Quit);
        assert_eq!(
            parsed("logs"),
            ConsoleCommand::Logs {
                channel: COMBINED.into(),
                filter: vec![]
            }
        );
        assert_eq!(
            parsed("logs api level=warn timeout"),
            ConsoleCommand::Logs {
                channel: "api".into(),
                filter: vec!["level=warn".into(), "timeout".into()]
            }
        );
    }

    #[test]
    fn unknown_input_is_an_error() {
        assert!(parse_command("reboot").unwrap_err().contains("unknown action"));
        assert!(parse_command("status now").is_err());
        assert!(parse_command("start a b").is_err());
    }
}
