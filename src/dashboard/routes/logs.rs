use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use regex::Regex;
use serde::Deserialize;

use crate::ui::filter::{parse_level, LogFilter};
use crate::ui::logs::{LogLine, COMBINED};

use super::DashboardState;

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    /// Only this channel.
    pub channel: Option<String>,
    /// Regex matched against line text.
    pub grep: Option<String>,
    /// Minimum detected level.
    pub level: Option<String>,
}

impl LogQuery {
    fn filter(&self) -> Result<LogFilter, String> {
        let mut filter = LogFilter::new();
        if let Some(level) = &self.level {
            filter.min_level = Some(parse_level(level)?);
        }
        if let Some(pattern) = &self.grep {
            filter.include =
                Some(Regex::new(pattern).map_err(|e| format!("bad pattern: {}", e))?);
        }
        Ok(filter)
    }
}

/// `{channel: [rendered lines]}` for every channel, or the requested one.
pub async fn list_logs(
    State(state): State<DashboardState>,
    Query(query): Query<LogQuery>,
) -> impl IntoResponse {
    let filter = match query.filter() {
        Ok(filter) => filter,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };
    let supervisor = &state.supervisor;

    if query.channel.is_none() && filter.is_empty() {
        return Json(supervisor.all_logs()).into_response();
    }

    let hub = supervisor.logs();
    let channels = match &query.channel {
        Some(channel) => vec![channel.clone()],
        None => hub.channel_names(),
    };
    let logs: BTreeMap<String, Vec<String>> = channels
        .into_iter()
        .map(|channel| {
            let render = if channel == COMBINED {
                LogLine::render_tagged
            } else {
                LogLine::render
            };
            let lines = hub
                .tail(&channel, hub.capacity())
                .iter()
                .filter(|l| filter.matches(l))
                .map(render)
                .collect();
            (channel, lines)
        })
        .collect();
    Json(logs).into_response()
}
