use regex::Regex;

use crate::ui::logs::{LogLevel, LogLine};

/// Predicate chain applied to log lines by the console `logs` command and
/// the web panel's log query.
#[derive(Debug, Default)]
pub struct LogFilter {
    pub min_level: Option<LogLevel>,
    pub include: Option<Regex>,
    pub stderr_only: bool,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from console words: `level=<lvl>`, `stderr`, and at
    /// most one pattern (a regex matched against the line text).
    pub fn from_words(words: &[&str]) -> Result<Self, String> {
        let mut filter = LogFilter::new();
        for word in words {
            if let Some(level) = word.strip_prefix("level=") {
                filter.min_level = Some(parse_level(level)?);
            } else if *word == "stderr" {
                filter.stderr_only = true;
            } else if filter.include.is_some() {
                return Err(format!("only one pattern allowed, got extra `{}`", word));
            } else {
                let re = Regex::new(word).map_err(|e| format!("bad pattern `{}`: {}", word, e))?;
                filter.include = Some(re);
            }
        }
        Ok(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.min_level.is_none() && self.include.is_none() && !self.stderr_only
    }

    /// Returns true if the log line matches all filter predicates.
    pub fn matches(&self, line: &LogLine) -> bool {
        if let Some(min) = &self.min_level {
            // Lines without a detected level pass.
            if let Some(level) = &line.level {
                if level < min {
                    return false;
                }
            }
        }

        if let Some(ref re) = self.include {
            if !re.is_match(&line.text) {
                return false;
            }
        }

        !(self.stderr_only && !line.is_stderr)
    }
}

pub fn parse_level(raw: &str) -> Result<LogLevel, String> {
    match raw.to_ascii_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(format!("unknown level `{}`", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn make_line(text: &str, level: Option<LogLevel>) -> LogLine {
        LogLine {
            timestamp: Local::now(),
            channel: "api".to_string(),
            text: text.to_string(),
            is_stderr: false,
            level,
        }
    }

    #[test]
    fn empty_filter_matches_all() {
        let filter = LogFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&make_line("hello", None)));
        assert!(filter.matches(&make_line("world", Some(LogLevel::Error))));
    }

    #[test]
    fn level_filter() {
        let filter = LogFilter {
            min_level: Some(LogLevel::Warn),
            ..LogFilter::new()
        };
        assert!(filter.matches(&make_line("error msg", Some(LogLevel::Error))));
        assert!(filter.matches(&make_line("warn msg", Some(LogLevel::Warn))));
        assert!(!filter.matches(&make_line("info msg", Some(LogLevel::Info))));
        assert!(filter.matches(&make_line("plain msg", None)));
    }

    #[test]
    fn words_build_a_combined_filter() {
        let filter = LogFilter::from_words(&["level=warn", "data(base)?"]).unwrap();
        assert!(filter.matches(&make_line("database error", Some(LogLevel::Error))));
        assert!(!filter.matches(&make_line("database info", Some(LogLevel::Info))));
        assert!(!filter.matches(&make_line("cache error", Some(LogLevel::Error))));
    }

    #[test]
    fn stderr_only_filter() {
        let filter = LogFilter::from_words(&["stderr"]).unwrap();
        let mut line = make_line("error output", None);
        assert!(!filter.matches(&line));
        line.is_stderr = true;
        assert!(filter.matches(&line));
    }

    #[test]
    fn bad_words_are_rejected() {
        assert!(LogFilter::from_words(&["level=loud"]).is_err());
        assert!(LogFilter::from_words(&["("]).is_err());
        assert!(LogFilter::from_words(&["a", "b"]).is_err());
    }
}
