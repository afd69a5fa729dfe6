use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::config::model::PanelConfig;

/// Minimum Jaro-Winkler score to consider a template variable a close match.
const TEMPLATE_SUGGESTION_THRESHOLD: f64 = 0.8;

/// Compiled pattern matching `{{ path.to.value }}` template expressions.
static TEMPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([\w.]+)\s*\}\}").expect("template regex must compile"));

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unresolved variable '{{{{{{ {variable} }}}}}}' in {field}{}", suggestion.as_ref().map(|s| format!(" (did you mean `{}`?)", s)).unwrap_or_default())]
    UnresolvedVariable {
        field: String,
        variable: String,
        suggestion: Option<String>,
    },
}

/// Find the closest matching template variable name using Jaro-Winkler similarity.
fn find_closest_template_var<'a>(name: &str, vars: &'a HashMap<String, String>) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for key in vars.keys() {
        let score = strsim::jaro_winkler(name, key);
        if score >= TEMPLATE_SUGGESTION_THRESHOLD && best.is_none_or(|(_, s)| score > s) {
            best = Some((key.as_str(), score));
        }
    }
    best.map(|(name, _)| name)
}

/// Resolve all `{{ var }}` expressions in `input` using `vars`.
///
/// Every referenced variable is checked before anything is replaced, so the
/// error list names all unresolved references at once.
pub fn resolve_template(
    input: &str,
    vars: &HashMap<String, String>,
    field_context: &str,
) -> Result<String, Vec<TemplateError>> {
    let errors: Vec<TemplateError> = TEMPLATE_RE
        .captures_iter(input)
        .filter_map(|cap| {
            let variable = cap[1].to_string();
            if vars.contains_key(&variable) {
                None
            } else {
                let suggestion = find_closest_template_var(&variable, vars).map(String::from);
                Some(TemplateError::UnresolvedVariable {
                    field: field_context.to_string(),
                    variable,
                    suggestion,
                })
            }
        })
        .collect();

    if !errors.is_empty() {
        return Err(errors);
    }

    let resolved = TEMPLATE_RE
        .replace_all(input, |cap: &regex::Captures| {
            let key = &cap[1];
            vars.get(key).cloned().unwrap_or_default()
        })
        .into_owned();

    Ok(resolved)
}

/// Build the lookup table for a parsed config.
///
/// Produced keys:
///   - `project.name`
///   - `services.{name}.port`
///   - `services.{name}.path`
pub fn build_template_vars(config: &PanelConfig) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("project.name".to_string(), config.project.name.clone());
    for (name, svc) in &config.services {
        vars.insert(format!("services.{name}.port"), svc.port.to_string());
        vars.insert(format!("services.{name}.path"), svc.path.clone());
    }
    vars
}

/// Resolve templates in every service's command, env values and readiness
/// markers in place. Returns all unresolved references across the config.
pub fn resolve_config_templates(config: &mut PanelConfig) -> Result<(), Vec<TemplateError>> {
    let vars = build_template_vars(config);
    let mut errors = Vec::new();

    for (name, svc) in config.services.iter_mut() {
        match resolve_template(&svc.command, &vars, &format!("services.{name}.command")) {
            Ok(v) => svc.command = v,
            Err(e) => errors.extend(e),
        }
        for (key, value) in svc.env.iter_mut() {
            match resolve_template(value, &vars, &format!("services.{name}.env.{key}")) {
                Ok(v) => *value = v,
                Err(e) => errors.extend(e),
            }
        }
        for (i, marker) in svc.ready.iter_mut().enumerate() {
            match resolve_template(&marker.text, &vars, &format!("services.{name}.ready[{i}]")) {
                Ok(v) => marker.text = v,
                Err(e) => errors.extend(e),
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
