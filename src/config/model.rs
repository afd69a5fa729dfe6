use serde::{de, Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PanelConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProjectConfig {
    #[serde(default = "default_project_name")]
    pub name: String,
    /// Order used by start-all. Services missing from the list start after
    /// the listed ones, alphabetically.
    #[serde(default)]
    pub start_order: Vec<String>,
    #[serde(default = "default_start_delay", deserialize_with = "de_duration")]
    pub start_delay: Duration,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    #[serde(default = "default_stop_grace", deserialize_with = "de_duration")]
    pub stop_grace: Duration,
    #[serde(default = "default_install_timeout", deserialize_with = "de_duration")]
    pub install_timeout: Duration,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            start_order: Vec::new(),
            start_delay: default_start_delay(),
            log_capacity: default_log_capacity(),
            web_port: default_web_port(),
            stop_grace: default_stop_grace(),
            install_timeout: default_install_timeout(),
            logs_dir: default_logs_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Human-readable name used in status output, e.g. "API Server".
    #[serde(default)]
    pub label: Option<String>,
    pub path: String,
    pub command: String,
    pub port: u16,
    /// Alternate ports the dev server may pick when `port` is taken.
    #[serde(default)]
    pub fallback_ports: Vec<u16>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ready: Vec<ReadyMarker>,
    #[serde(default = "default_manifest")]
    pub manifest: String,
    #[serde(default = "default_install")]
    pub install: String,
    #[serde(default = "default_install_marker")]
    pub install_marker: String,
    #[serde(default = "default_settle", deserialize_with = "de_duration")]
    pub settle: Duration,
    #[serde(default = "default_ready_timeout", deserialize_with = "de_duration")]
    pub ready_timeout: Duration,
}

/// A substring whose appearance in service output proves readiness.
///
/// Accepts either a bare string (case-sensitive) or a table
/// `{ text = "ready", ignore_case = true }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyMarker {
    pub text: String,
    pub ignore_case: bool,
}

impl ReadyMarker {
    pub fn exact(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ignore_case: false,
        }
    }

    pub fn ignore_case(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ignore_case: true,
        }
    }

    pub fn matches(&self, line: &str) -> bool {
        if self.ignore_case {
            line.to_lowercase().contains(&self.text.to_lowercase())
        } else {
            line.contains(&self.text)
        }
    }
}

impl<'de> Deserialize<'de> for ReadyMarker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ReadyMarkerVisitor;

        impl<'de> de::Visitor<'de> for ReadyMarkerVisitor {
            type Value = ReadyMarker;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or a table with `text` and `ignore_case`")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<ReadyMarker, E> {
                Ok(ReadyMarker::exact(value))
            }

            fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> Result<ReadyMarker, A::Error> {
                let mut text: Option<String> = None;
                let mut ignore_case = false;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "text" => text = Some(map.next_value()?),
                        "ignore_case" => ignore_case = map.next_value()?,
                        other => {
                            return Err(de::Error::unknown_field(other, &["text", "ignore_case"]))
                        }
                    }
                }
                let text = text.ok_or_else(|| de::Error::missing_field("text"))?;
                Ok(ReadyMarker { text, ignore_case })
            }
        }

        deserializer.deserialize_any(ReadyMarkerVisitor)
    }
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(de::Error::custom)
}

fn default_project_name() -> String {
    "devpanel".to_string()
}

fn default_start_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_log_capacity() -> usize {
    1000
}

fn default_web_port() -> u16 {
    8080
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_install_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_logs_dir() -> String {
    "logs".to_string()
}

fn default_manifest() -> String {
    "package.json".to_string()
}

fn default_install() -> String {
    "npm install".to_string()
}

fn default_install_marker() -> String {
    "node_modules".to_string()
}

fn default_settle() -> Duration {
    Duration::from_secs(5)
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(30)
}

pub const API_PORT: u16 = 3470;
pub const FRONTEND_PORT: u16 = 3469;

impl PanelConfig {
    /// The API server + frontend pair used when no devpanel.toml exists.
    pub fn builtin() -> Self {
        let mut services = BTreeMap::new();

        let mut api_env = BTreeMap::new();
        api_env.insert("PORT".to_string(), "{{ services.api.port }}".to_string());
        api_env.insert("NODE_ENV".to_string(), "development".to_string());
        services.insert(
            "api".to_string(),
            ServiceConfig {
                label: Some("API Server".to_string()),
                path: "api-server".to_string(),
                command: "npm run dev".to_string(),
                port: API_PORT,
                fallback_ports: Vec::new(),
                env: api_env,
                ready: vec![
                    ReadyMarker::exact("Server running on port {{ services.api.port }}"),
                    ReadyMarker::exact("listening on port {{ services.api.port }}"),
                ],
                manifest: default_manifest(),
                install: default_install(),
                install_marker: default_install_marker(),
                settle: Duration::from_secs(5),
                ready_timeout: Duration::from_secs(30),
            },
        );

        let mut frontend_env = BTreeMap::new();
        frontend_env.insert(
            "PORT".to_string(),
            "{{ services.frontend.port }}".to_string(),
        );
        frontend_env.insert(
            "NEXT_PUBLIC_API_URL".to_string(),
            "http://localhost:{{ services.api.port }}/api".to_string(),
        );
        frontend_env.insert(
            "NEXT_PUBLIC_WS_URL".to_string(),
            "ws://localhost:{{ services.api.port }}/ws".to_string(),
        );
        services.insert(
            "frontend".to_string(),
            ServiceConfig {
                label: Some("Frontend".to_string()),
                path: "admin-frontend".to_string(),
                command: "npm run dev".to_string(),
                port: FRONTEND_PORT,
                fallback_ports: vec![3000, 3001, 3002, 3003],
                env: frontend_env,
                ready: vec![
                    ReadyMarker::exact("Ready in"),
                    ReadyMarker::exact("Local:"),
                    ReadyMarker::ignore_case("ready"),
                ],
                manifest: default_manifest(),
                install: default_install(),
                install_marker: default_install_marker(),
                settle: Duration::from_secs(10),
                ready_timeout: Duration::from_secs(90),
            },
        );

        Self {
            project: ProjectConfig {
                start_order: vec!["api".to_string(), "frontend".to_string()],
                ..ProjectConfig::default()
            },
            services,
        }
    }

    /// Services in start-all order: `project.start_order` first, then any
    /// remaining services alphabetically.
    pub fn ordered_service_names(&self) -> Vec<String> {
        let mut order: Vec<String> = self
            .project
            .start_order
            .iter()
            .filter(|name| self.services.contains_key(*name))
            .cloned()
            .collect();
        for name in self.services.keys() {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_service() {
        let toml_str = r#"
            [services.api]
            path = "api-server"
            command = "npm run dev"
            port = 3470
        "#;
        let config: PanelConfig = toml::from_str(toml_str).unwrap();
        let api = &config.services["api"];
        assert_eq!(api.port, 3470);
        assert_eq!(api.manifest, "package.json");
        assert_eq!(api.install, "npm install");
        assert_eq!(api.install_marker, "node_modules");
        assert_eq!(api.settle, Duration::from_secs(5));
        assert_eq!(api.ready_timeout, Duration::from_secs(30));
        assert!(api.ready.is_empty());
        assert_eq!(config.project.log_capacity, 1000);
        assert_eq!(config.project.stop_grace, Duration::from_secs(10));
        assert_eq!(config.project.install_timeout, Duration::from_secs(120));
    }

    #[test]
    fn parse_durations_with_humantime() {
        let toml_str = r#"
            [project]
            start_delay = "500ms"
            stop_grace = "3s"

            [services.web]
            path = "web"
            command = "npm start"
            port = 3000
            settle = "250ms"
            ready_timeout = "2m"
        "#;
        let config: PanelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.project.start_delay, Duration::from_millis(500));
        assert_eq!(config.project.stop_grace, Duration::from_secs(3));
        assert_eq!(config.services["web"].settle, Duration::from_millis(250));
        assert_eq!(config.services["web"].ready_timeout, Duration::from_secs(120));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let toml_str = r#"
            [project]
            start_delay = "soon"
        "#;
        assert!(toml::from_str::<PanelConfig>(toml_str).is_err());
    }

    #[test]
    fn ready_marker_string_or_table() {
        let toml_str = r#"
            [services.web]
            path = "web"
            command = "npm start"
            port = 3000
            ready = ["Local:", { text = "ready", ignore_case = true }]
        "#;
        let config: PanelConfig = toml::from_str(toml_str).unwrap();
        let ready = &config.services["web"].ready;
        assert_eq!(ready[0], ReadyMarker::exact("Local:"));
        assert_eq!(ready[1], ReadyMarker::ignore_case("ready"));
    }

    #[test]
    fn ready_marker_table_requires_text() {
        let toml_str = r#"
            [services.web]
            path = "web"
            command = "npm start"
            port = 3000
            ready = [{ ignore_case = true }]
        "#;
        assert!(toml::from_str::<PanelConfig>(toml_str).is_err());
    }

    #[test]
    fn marker_matching_respects_case_flag() {
        let exact = ReadyMarker::exact("Ready in");
        assert!(exact.matches("  ✓ Ready in 2.1s"));
        assert!(!exact.matches("ready in 2.1s"));

        let loose = ReadyMarker::ignore_case("ready");
        assert!(loose.matches("Compiled, READY for requests"));
        assert!(!loose.matches("compiling..."));
    }

    #[test]
    fn builtin_has_api_then_frontend() {
        let config = PanelConfig::builtin();
        assert_eq!(config.ordered_service_names(), vec!["api", "frontend"]);
        assert_eq!(config.services["api"].port, API_PORT);
        assert_eq!(config.services["frontend"].port, FRONTEND_PORT);
        assert_eq!(
            config.services["frontend"].fallback_ports,
            vec![3000, 3001, 3002, 3003]
        );
        assert!(config.services["frontend"].ready_timeout > config.services["api"].ready_timeout);
    }

    #[test]
    fn ordered_names_appends_unlisted_services() {
        let toml_str = r#"
            [project]
            start_order = ["worker", "ghost"]

            [services.web]
            path = "web"
            command = "npm start"
            port = 3000

            [services.api]
            path = "api"
            command = "npm start"
            port = 3001

            [services.worker]
            path = "worker"
            command = "npm start"
            port = 3002
        "#;
        let config: PanelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.ordered_service_names(), vec!["worker", "api", "web"]);
    }
}
