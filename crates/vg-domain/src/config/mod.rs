mod platform;
mod server;

pub use platform::{LlmGatewayConfig, PlatformConfig, SttConfig, TtsConfig};
pub use server::{CorsConfig, ServerConfig};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration, assembled from environment variables with an optional
/// TOML file overlay. See `Config::validate` for the checks run once at
/// startup before the server is allowed to bind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            ConfigSeverity::Error => "error",
            ConfigSeverity::Warning => "warning",
        };
        write!(f, "[{level}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Load configuration from environment variables, optionally overlaid with
    /// a TOML file at `path` (file values win over env-derived defaults).
    pub fn load(toml_path: Option<&std::path::Path>) -> Result<Self, crate::Error> {
        let mut config = Config::default();

        if let Some(path) = toml_path {
            let raw = std::fs::read_to_string(path)?;
            config = toml::from_str(&raw)
                .map_err(|e| crate::Error::Config(format!("invalid TOML at {path:?}: {e}")))?;
        }

        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| crate::Error::Config(format!("PORT is not a valid u16: {port}")))?;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.server.log_level = level;
        }

        Ok(config)
    }

    /// Run every structural and cross-field check. Callers abort startup if
    /// any `ConfigSeverity::Error` entry is present; warnings are logged only.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must not be 0".into(),
            });
        }

        if self.server.host.trim().is_empty() {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.server.cors.allowed_origins.iter().any(|o| o == "*") {
            issues.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard CORS origin allows any site to open a session".into(),
            });
        }

        self.check_url("platform.stt.base_url", &self.platform.stt.base_url, &mut issues);
        self.check_url("platform.tts.base_url", &self.platform.tts.base_url, &mut issues);
        self.check_url("platform.llm.base_url", &self.platform.llm.base_url, &mut issues);

        if self.platform.stt.sample_rate != 16_000 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "platform.stt.sample_rate".into(),
                message: format!(
                    "expected 16000 Hz, got {}; upstream may reject the stream",
                    self.platform.stt.sample_rate
                ),
            });
        }

        if self.platform.tts.sample_rate != 24_000 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "platform.tts.sample_rate".into(),
                message: format!(
                    "expected 24000 Hz, got {}",
                    self.platform.tts.sample_rate
                ),
            });
        }

        if self.platform.stt.refresh_at_fraction <= 0.0 || self.platform.stt.refresh_at_fraction >= 1.0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "platform.stt.refresh_at_fraction".into(),
                message: "must be strictly between 0 and 1".into(),
            });
        }

        if self.platform.llm.max_tool_iterations == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "platform.llm.max_tool_iterations".into(),
                message: "must allow at least one tool iteration".into(),
            });
        }

        for (name, env_var) in [
            ("platform.stt.api_key_env", &self.platform.stt.api_key_env),
            ("platform.tts.api_key_env", &self.platform.tts.api_key_env),
            ("platform.llm.api_key_env", &self.platform.llm.api_key_env),
        ] {
            if std::env::var(env_var).is_err() {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: name.into(),
                    message: format!("environment variable {env_var} is not set"),
                });
            }
        }

        issues
    }

    fn check_url(&self, field: &str, url: &str, issues: &mut Vec<ConfigError>) {
        let ok = url.starts_with("http://")
            || url.starts_with("https://")
            || url.starts_with("ws://")
            || url.starts_with("wss://");
        if !ok {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: format!("{url} must use http(s):// or ws(s)://"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::default()
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|i| i.field == field)
    }

    #[test]
    fn default_config_has_no_errors() {
        let issues = valid_config().validate();
        assert!(
            issues.iter().all(|i| i.severity != ConfigSeverity::Error),
            "unexpected errors: {issues:?}"
        );
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut c = valid_config();
        c.server.port = 0;
        let issues = c.validate();
        let issue = find_issue(&issues, "server.port").expect("missing issue");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn empty_host_is_an_error() {
        let mut c = valid_config();
        c.server.host = "".into();
        let issues = c.validate();
        assert!(find_issue(&issues, "server.host").is_some());
    }

    #[test]
    fn wildcard_cors_is_a_warning_not_an_error() {
        let mut c = valid_config();
        c.server.cors.allowed_origins = vec!["*".into()];
        let issues = c.validate();
        let issue = find_issue(&issues, "server.cors.allowed_origins").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn bad_url_scheme_is_an_error() {
        let mut c = valid_config();
        c.platform.llm.base_url = "ftp://example.com".into();
        let issues = c.validate();
        assert!(find_issue(&issues, "platform.llm.base_url").is_some());
    }

    #[test]
    fn refresh_fraction_out_of_range_is_an_error() {
        let mut c = valid_config();
        c.platform.stt.refresh_at_fraction = 1.0;
        let issues = c.validate();
        assert!(find_issue(&issues, "platform.stt.refresh_at_fraction").is_some());
    }

    #[test]
    fn zero_tool_iterations_is_an_error() {
        let mut c = valid_config();
        c.platform.llm.max_tool_iterations = 0;
        let issues = c.validate();
        assert!(find_issue(&issues, "platform.llm.max_tool_iterations").is_some());
    }
}
