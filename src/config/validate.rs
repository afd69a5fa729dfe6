// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use std::collections::BTreeMap;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::PanelConfig;

// ---------------------------------------------------------------------------
// ConfigDiagnostic: miette-powered validation error
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("unknown service `{service}` in start_order")]
    #[diagnostic(code(devpanel::unknown_start_order_entry))]
    UnknownStartOrderEntry {
        #[source_code]
        src: NamedSource<String>,
        #[label("not defined under [services]")]
        span: SourceSpan,
        #[help]
        advice: String,
        service: String,
    },

    #[error("port {port} is used by multiple services: {services:?}")]
    #[diagnostic(code(devpanel::duplicate_port))]
    DuplicatePort {
        #[source_code]
        src: NamedSource<String>,
        #[label("duplicate port")]
        span: SourceSpan,
        port: u16,
        services: Vec<String>,
    },

    #[error("service `{service}` has an empty command")]
    #[diagnostic(code(devpanel::empty_command))]
    EmptyCommand {
        #[source_code]
        src: NamedSource<String>,
        #[label("command is empty")]
        span: SourceSpan,
        service: String,
    },

    #[error("service `{service}` has an empty path")]
    #[diagnostic(code(devpanel::empty_path))]
    EmptyPath {
        #[source_code]
        src: NamedSource<String>,
        #[label("path is empty")]
        span: SourceSpan,
        service: String,
    },

    #[error("service `{service}` has an empty readiness marker")]
    #[diagnostic(
        code(devpanel::empty_ready_marker),
        help("an empty marker matches every line; remove it or give it text")
    )]
    EmptyReadyMarker {
        #[source_code]
        src: NamedSource<String>,
        #[label("empty marker")]
        span: SourceSpan,
        service: String,
    },

    #[error("service `{service}` uses port 0")]
    #[diagnostic(
        code(devpanel::zero_port),
        help("readiness is probed on a fixed port; pick the port the dev server binds")
    )]
    ZeroPort {
        #[source_code]
        src: NamedSource<String>,
        #[label("port 0")]
        span: SourceSpan,
        service: String,
    },

    #[error("log_capacity must be at least 1")]
    #[diagnostic(code(devpanel::zero_log_capacity))]
    ZeroLogCapacity {
        #[source_code]
        src: NamedSource<String>,
        #[label("capacity 0")]
        span: SourceSpan,
    },
}

// ---------------------------------------------------------------------------
// Source span helpers
// ---------------------------------------------------------------------------

/// Find the byte offset of a TOML table header like `[services.api]`.
fn find_table_span(source: &str, section: &str, name: &str) -> SourceSpan {
    let patterns = [
        format!("[{}.{}]", section, name),
        format!("[{}.{}", section, name), // nested like [services.api.env]
    ];

    for pat in &patterns {
        if let Some(pos) = source.find(pat) {
            let name_start = pos + 1 + section.len() + 1; // skip '[', section, '.'
            return (name_start, name.len()).into();
        }
    }

    if let Some(pos) = source.find(name) {
        return (pos, name.len()).into();
    }

    (0, 0).into()
}

/// Find the byte offset of a specific field value in a TOML table.
fn find_field_span(source: &str, table_header: &str, field: &str) -> Option<SourceSpan> {
    let search_start = source.find(table_header)?;
    let after_header = &source[search_start..];

    let field_prefix = format!("{} =", field);
    let field_prefix2 = format!("{}=", field);

    for prefix in [&field_prefix, &field_prefix2] {
        if let Some(rel_pos) = after_header.find(prefix.as_str()) {
            let abs_pos = search_start + rel_pos;
            let val_start = source[abs_pos..].find('=').map(|p| abs_pos + p + 1)?;
            let val_trimmed = source[val_start..].trim_start();
            let trim_offset = val_start + (source[val_start..].len() - val_trimmed.len());
            let val_end = val_trimmed.find('\n').unwrap_or(val_trimmed.len());
            return Some((trim_offset, val_end).into());
        }
    }

    None
}

fn find_service_field_span(source: &str, name: &str, field: &str) -> SourceSpan {
    find_field_span(source, &format!("[services.{}]", name), field)
        .unwrap_or_else(|| find_table_span(source, "services", name))
}

/// Find a quoted value inside the `start_order` array.
fn find_start_order_value(source: &str, value: &str) -> SourceSpan {
    let start = source.find("start_order").unwrap_or(0);
    let quoted = format!("\"{}\"", value);
    match source[start..].find(&quoted) {
        Some(rel) => (start + rel + 1, value.len()).into(),
        None => (start, "start_order".len().min(source.len() - start)).into(),
    }
}

// ---------------------------------------------------------------------------
// Similarity suggestions
// ---------------------------------------------------------------------------

pub fn find_closest_match<'a>(name: &str, candidates: &'a [String]) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let score = strsim::jaro_winkler(name, candidate);
        if score >= 0.8 && best.is_none_or(|(_, s)| score > s) {
            best = Some((candidate.as_str(), score));
        }
    }
    best.map(|(name, _)| name)
}

// ---------------------------------------------------------------------------
// Main validation function
// ---------------------------------------------------------------------------

pub fn validate(
    config: &PanelConfig,
    source: &str,
    filename: &str,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = NamedSource::new(filename, source.to_string());
    let available: Vec<String> = config.services.keys().cloned().collect();

    for name in &config.project.start_order {
        if !config.services.contains_key(name) {
            let advice = match find_closest_match(name, &available) {
                Some(s) => format!("did you mean `{}`?", s),
                None => format!("available services: {:?}", available),
            };
            errors.push(ConfigDiagnostic::UnknownStartOrderEntry {
                src: src.clone(),
                span: find_start_order_value(source, name),
                advice,
                service: name.clone(),
            });
        }
    }

    let mut port_owners: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for (name, svc) in &config.services {
        if svc.command.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyCommand {
                src: src.clone(),
                span: find_service_field_span(source, name, "command"),
                service: name.clone(),
            });
        }
        if svc.path.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyPath {
                src: src.clone(),
                span: find_service_field_span(source, name, "path"),
                service: name.clone(),
            });
        }
        if svc.ready.iter().any(|m| m.text.is_empty()) {
            errors.push(ConfigDiagnostic::EmptyReadyMarker {
                src: src.clone(),
                span: find_service_field_span(source, name, "ready"),
                service: name.clone(),
            });
        }
        if svc.port == 0 {
            errors.push(ConfigDiagnostic::ZeroPort {
                src: src.clone(),
                span: find_service_field_span(source, name, "port"),
                service: name.clone(),
            });
        } else {
            port_owners.entry(svc.port).or_default().push(name.clone());
        }
    }

    for (port, services) in port_owners {
        if services.len() > 1 {
            errors.push(ConfigDiagnostic::DuplicatePort {
                src: src.clone(),
                span: find_service_field_span(source, &services[1], "port"),
                port,
                services,
            });
        }
    }

    if config.project.log_capacity == 0 {
        errors.push(ConfigDiagnostic::ZeroLogCapacity {
            src: src.clone(),
            span: find_field_span(source, "[project]", "log_capacity")
                .unwrap_or_else(|| (0, 0).into()),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
