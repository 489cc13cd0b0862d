//! Configuration management for the pagebus host.
//!
//! Loads the TOML configuration describing the page, the candidate plugins
//! with their load rules, per-plugin global config and logging settings.

use page_event_system::{LoadRule, PluginSpec, PluginFactory};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn default_metadata_prefix() -> String {
    page_event_system::DEFAULT_METADATA_PREFIX.to_string()
}

fn default_cookie_file() -> String {
    ".pagebus_cookies.json".to_string()
}

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// The page being orchestrated
    pub page: PageSettings,
    /// Where the test-mode cookie is persisted
    #[serde(default)]
    pub test_mode: TestModeSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
    /// Plugin id -> configuration, overriding per-plugin `config`
    #[serde(default)]
    pub plugin_config: HashMap<String, toml::Value>,
    /// Candidate plugins, admitted in this order
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSettings {
    /// Page URL; its query string may toggle test mode
    pub url: String,
    /// JSON file seeding the global page data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<String>,
    /// JSON file standing in for page-embedded markup (`data` and `events`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_file: Option<String>,
    /// Prefix used when collecting embedded metadata
    #[serde(default = "default_metadata_prefix")]
    pub metadata_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestModeSettings {
    #[serde(default = "default_cookie_file")]
    pub cookie_file: String,
}

impl Default for TestModeSettings {
    fn default() -> Self {
        Self {
            cookie_file: default_cookie_file(),
        }
    }
}

/// Logging output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

/// One candidate plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEntry {
    /// Id of a built-in plugin factory
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<toml::Value>,
    /// Declarative load rule; admitted unconditionally when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<toml::Value>,
}

fn to_json(value: &toml::Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

impl PluginEntry {
    pub fn config_json(&self) -> serde_json::Value {
        self.config.as_ref().map(to_json).unwrap_or(serde_json::Value::Null)
    }

    pub fn load_rule(&self) -> LoadRule {
        self.rule
            .as_ref()
            .map(|rule| LoadRule::from_value(&to_json(rule)))
            .unwrap_or_default()
    }

    /// Builds the spec for this entry with the given factory.
    pub fn to_spec(&self, factory: Arc<dyn PluginFactory>) -> PluginSpec {
        PluginSpec::new(factory)
            .with_config(self.config_json())
            .with_rule(self.load_rule())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            page: PageSettings {
                url: "https://example.com/".to_string(),
                data_file: None,
                metadata_file: None,
                metadata_prefix: default_metadata_prefix(),
            },
            test_mode: TestModeSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
            plugin_config: HashMap::new(),
            plugins: vec![PluginEntry {
                id: "event_logger".to_string(),
                config: None,
                rule: Some(toml::Value::Boolean(true)),
            }],
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration is written to the
    /// path and returned.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Per-plugin global config as JSON.
    pub fn global_config(&self) -> HashMap<String, serde_json::Value> {
        self.plugin_config
            .iter()
            .map(|(id, value)| (id.clone(), to_json(value)))
            .collect()
    }

    /// Validates the configuration for consistency.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if let Some(index) = self.plugins.iter().position(|p| p.id.trim().is_empty()) {
            return Err(format!("Plugin entry #{} has an empty id", index + 1));
        }

        if self.test_mode.cookie_file.is_empty() {
            return Err("Test mode cookie file cannot be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_event_system::evaluate;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.page.url, "https://example.com/");
        assert_eq!(config.page.metadata_prefix, "page");
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.plugins[0].id, "event_logger");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pagebus.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.page.url, "https://example.com/");
        assert!(path.exists());

        // The written default parses back to the same shape.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.plugins[0].id, "event_logger");
        assert_eq!(reloaded.test_mode.cookie_file, ".pagebus_cookies.json");
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[page]
url = "https://shop.example/kettle?pagebus_test_mode=1"
data_file = "page.json"

[logging]
level = "debug"
json_format = true

[plugin_config.event_journal]
path = "/tmp/journal.jsonl"

[[plugins]]
id = "event_logger"

[[plugins]]
id = "event_journal"
rule = { rule = { path = "page.type", equals = "product" }, test = true }
"#;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pagebus.toml");
        tokio::fs::write(&path, toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.page.data_file.as_deref(), Some("page.json"));
        assert_eq!(config.page.metadata_prefix, "page");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert_eq!(config.plugins.len(), 2);
        assert_eq!(
            config.global_config()["event_journal"],
            json!({ "path": "/tmp/journal.jsonl" })
        );

        let data = json!({ "page": { "type": "product" } }).as_object().unwrap().clone();
        let logger_rule = config.plugins[0].load_rule();
        assert!(evaluate(&logger_rule, &data, false));

        let journal_rule = config.plugins[1].load_rule();
        assert!(matches!(journal_rule, LoadRule::Gated { test: true, .. }));
        assert!(!evaluate(&journal_rule, &data, false));
        assert!(evaluate(&journal_rule, &data, true));
    }

    #[test]
    fn test_malformed_rule_from_toml() {
        let entry: PluginEntry = toml::from_str("id = \"x\"\nrule = \"sometimes\"").unwrap();
        assert!(matches!(entry.load_rule(), LoadRule::Malformed(_)));
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        let result = config.validate();
        assert!(result.unwrap_err().contains("Invalid log level"));
    }

    #[test]
    fn test_validation_empty_plugin_id() {
        let mut config = AppConfig::default();
        config.plugins.push(PluginEntry {
            id: " ".to_string(),
            config: None,
            rule: None,
        });
        let result = config.validate();
        assert!(result.unwrap_err().contains("#2"));
    }

    #[test]
    fn test_validation_valid_log_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let mut config = AppConfig::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "Level '{}' should be valid", level);
        }
    }
}
