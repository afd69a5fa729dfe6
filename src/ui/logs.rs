use chrono::{DateTime, Local};
use dashmap::DashMap;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::ui::buffer::LogBuffer;

/// Aggregate channel every service line is fanned into.
pub const COMBINED: &str = "combined";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// LogLevel: detected from log line text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static LOG_LEVEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b(trace|debug|info|warn(?:ing)?|error)\b"#).unwrap());

/// Detect log level from a line of text.
pub fn detect_log_level(text: &str) -> Option<LogLevel> {
    LOG_LEVEL_RE.find(text).and_then(|m| {
        let s = m.as_str().to_lowercase();
        match s.as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    })
}

// ---------------------------------------------------------------------------
// LogLine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    /// Channel the line was appended to (a service id or `combined`).
    pub channel: String,
    pub text: String,
    pub is_stderr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
}

impl LogLine {
    /// `[2024-05-01 12:00:00] text`
    pub fn render(&self) -> String {
        format!("[{}] {}", self.timestamp.format(TIMESTAMP_FORMAT), self.text)
    }

    /// Like [`render`](Self::render) but tagged with the source channel, for
    /// views that mix channels.
    pub fn render_tagged(&self) -> String {
        if self.channel == COMBINED {
            return self.render();
        }
        format!(
            "[{}] [{}] {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.channel,
            self.text
        )
    }
}

// ---------------------------------------------------------------------------
// LogHub: named bounded channels with fan-in to `combined`
// ---------------------------------------------------------------------------

pub struct LogHub {
    channels: DashMap<String, LogBuffer>,
    capacity: usize,
    tx: broadcast::Sender<LogLine>,
}

impl LogHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(4096);
        let channels = DashMap::new();
        channels.insert(COMBINED.to_string(), LogBuffer::new(capacity));
        Self {
            channels,
            capacity,
            tx,
        }
    }

    /// Pre-create empty channels so they show up in snapshots before the
    /// first line arrives.
    pub fn with_channels<'a>(capacity: usize, names: impl IntoIterator<Item = &'a str>) -> Self {
        let hub = Self::new(capacity);
        for name in names {
            hub.channels
                .entry(name.to_string())
                .or_insert_with(|| LogBuffer::new(capacity));
        }
        hub
    }

    /// Timestamp `text` and append it to `channel` and, once, to `combined`.
    pub fn append(&self, channel: &str, text: impl Into<String>) -> LogLine {
        let text = text.into();
        let level = detect_log_level(&text);
        self.push(channel, text, false, level)
    }

    /// Append a line captured from a child's stderr.
    pub fn append_stderr(&self, channel: &str, text: impl Into<String>) -> LogLine {
        let text = text.into();
        let level = detect_log_level(&text);
        self.push(channel, text, true, level)
    }

    /// Append a supervisor event with an explicit level.
    pub fn event(&self, channel: &str, level: LogLevel, text: impl Into<String>) -> LogLine {
        self.push(channel, text.into(), false, Some(level))
    }

    fn push(&self, channel: &str, text: String, is_stderr: bool, level: Option<LogLevel>) -> LogLine {
        let line = LogLine {
            timestamp: Local::now(),
            channel: channel.to_string(),
            text,
            is_stderr,
            level,
        };
        if channel != COMBINED {
            self.channels
                .entry(channel.to_string())
                .or_insert_with(|| LogBuffer::new(self.capacity))
                .push(line.clone());
        }
        self.channels
            .entry(COMBINED.to_string())
            .or_insert_with(|| LogBuffer::new(self.capacity))
            .push(line.clone());
        // No subscribers is fine.
        let _ = self.tx.send(line.clone());
        line
    }

    /// Owned copy of a channel's rendered lines, oldest first. Unknown
    /// channels are empty.
    pub fn snapshot(&self, channel: &str) -> Vec<String> {
        let Some(buf) = self.channels.get(channel) else {
            return Vec::new();
        };
        if channel == COMBINED {
            buf.all().into_iter().map(LogLine::render_tagged).collect()
        } else {
            buf.all().into_iter().map(LogLine::render).collect()
        }
    }

    /// Last `n` raw lines of a channel.
    pub fn tail(&self, channel: &str, n: usize) -> Vec<LogLine> {
        self.channels
            .get(channel)
            .map(|buf| buf.tail(n).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshot_all(&self) -> BTreeMap<String, Vec<String>> {
        self.channel_names()
            .into_iter()
            .map(|name| {
                let lines = self.snapshot(&name);
                (name, lines)
            })
            .collect()
    }

    /// Empty exactly one channel. Lines already fanned into other channels
    /// stay where they are.
    pub fn clear(&self, channel: &str) {
        if let Some(mut buf) = self.channels.get_mut(channel) {
            buf.clear();
        }
    }

    pub fn clear_all(&self) {
        for mut entry in self.channels.iter_mut() {
            entry.value_mut().clear();
        }
    }

    pub fn len(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|b| b.len()).unwrap_or(0)
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Per-run log file
// ---------------------------------------------------------------------------

/// `<root>/<logs_dir>/devpanel-YYYYmmdd-HHMMSS.log`
pub fn log_file_path(root: &Path, logs_dir: &str, started: DateTime<Local>) -> PathBuf {
    root.join(logs_dir)
        .join(format!("devpanel-{}.log", started.format("%Y%m%d-%H%M%S")))
}

/// Create the log file and spawn a task that appends every hub line to it
/// until the hub is dropped.
pub fn spawn_file_writer(hub: &LogHub, path: &Path) -> std::io::Result<JoinHandle<()>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut rx = hub.subscribe();
    let path = path.to_path_buf();
    Ok(tokio::spawn(async move {
        let mut writer = std::io::BufWriter::new(file);
        loop {
            match rx.recv().await {
                Ok(line) => {
                    if writeln!(writer, "{}", line.render_tagged())
                        .and_then(|_| writer.flush())
                        .is_err()
                    {
                        warn!(path = %path.display(), "log file write failed, giving up");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    let _ = writeln!(writer, "... {} lines skipped", n);
                }
            }
        }
    }))
}

// ---------------------------------------------------------------------------
// LogWriter: colored terminal output with owo-colors
// ---------------------------------------------------------------------------

pub struct LogWriter {
    rx: broadcast::Receiver<LogLine>,
    max_name_len: usize,
    use_color: bool,
}

/// Color palette for channel names (using owo-colors).
const SERVICE_COLORS: &[fn(&str) -> String] = &[
    |s| format!("{}", s.cyan()),
    |s| format!("{}", s.yellow()),
    |s| format!("{}", s.green()),
    |s| format!("{}", s.magenta()),
    |s| format!("{}", s.blue()),
    |s| format!("{}", s.red()),
];

fn format_level(level: &LogLevel, use_color: bool) -> String {
    if !use_color {
        return format!("{:>5} ", level.as_str());
    }
    match level {
        LogLevel::Trace => format!("{} ", level.as_str().dimmed()),
        LogLevel::Debug => format!("{} ", level.as_str().blue()),
        LogLevel::Info => format!("{} ", level.as_str().green()),
        LogLevel::Warn => format!("{} ", level.as_str().yellow()),
        LogLevel::Error => format!("{} ", level.as_str().red()),
    }
}

impl LogWriter {
    pub fn new(rx: broadcast::Receiver<LogLine>, max_name_len: usize) -> Self {
        Self {
            rx,
            max_name_len,
            use_color: std::io::stdout().is_terminal(),
        }
    }

    /// Render one line the way [`run`](Self::run) prints it.
    pub fn format_line(&self, line: &LogLine, color_idx: usize) -> String {
        let mut buf = String::new();

        if self.use_color {
            buf.push_str(&format!("{} ", line.timestamp.format("%H:%M:%S").dimmed()));
            let colored_name = SERVICE_COLORS[color_idx % SERVICE_COLORS.len()](&line.channel);
            let padding = self.max_name_len.saturating_sub(line.channel.len());
            for _ in 0..padding {
                buf.push(' ');
            }
            buf.push_str(&colored_name);
            buf.push_str(&format!(" {} ", "|".dimmed()));
        } else {
            buf.push_str(&format!(
                "{} {:>width$} | ",
                line.timestamp.format("%H:%M:%S"),
                line.channel,
                width = self.max_name_len,
            ));
        }

        if let Some(ref level) = line.level {
            buf.push_str(&format_level(level, self.use_color));
        }

        if self.use_color && line.is_stderr {
            buf.push_str(&format!("{}", line.text.red()));
        } else {
            buf.push_str(&line.text);
        }
        buf
    }

    pub async fn run(mut self) {
        let mut color_map: BTreeMap<String, usize> = BTreeMap::new();
        let mut next_color = 0usize;

        loop {
            let line = match self.rx.recv().await {
                Ok(line) => line,
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            };
            let color_idx = *color_map.entry(line.channel.clone()).or_insert_with(|| {
                let idx = next_color;
                next_color = (next_color + 1) % SERVICE_COLORS.len();
                idx
            });

            // Build the whole line first; a StdoutLock must not be held
            // across the await above.
            println!("{}", self.format_line(&line, color_idx));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
