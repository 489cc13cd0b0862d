//! Built-in plugins available to configuration entries by id.

use page_event_system::{
    EventSubscriber, Orchestrator, PluginContext, PluginError, PluginFactory,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

pub const EVENT_LOGGER_ID: &str = "event_logger";
pub const EVENT_JOURNAL_ID: &str = "event_journal";

/// Every built-in factory keyed by plugin id.
pub fn builtin_factories() -> HashMap<String, Arc<dyn PluginFactory>> {
    let factories: Vec<Arc<dyn PluginFactory>> =
        vec![Arc::new(EventLoggerFactory), Arc::new(EventJournalFactory)];
    factories
        .into_iter()
        .map(|factory| (factory.id().to_string(), factory))
        .collect()
}

/// Logs every event it receives.
///
/// Config: `{ "ignore": ["name", ...] }` skips the listed event names.
pub struct EventLoggerFactory;

struct EventLogger {
    ignore: Vec<String>,
    orchestrator: Weak<Orchestrator>,
}

impl PluginFactory for EventLoggerFactory {
    fn id(&self) -> &str {
        EVENT_LOGGER_ID
    }

    fn create(&self, context: PluginContext) -> Result<Arc<dyn EventSubscriber>, PluginError> {
        let ignore = match context.config.get("ignore") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(names)) => names
                .iter()
                .map(|name| {
                    name.as_str().map(str::to_string).ok_or_else(|| {
                        PluginError::Construction(format!("ignore entry {name} is not a string"))
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(PluginError::Construction(format!(
                    "ignore must be a list of event names, got {other}"
                )))
            }
        };

        Ok(Arc::new(EventLogger {
            ignore,
            orchestrator: context.orchestrator,
        }))
    }
}

impl EventSubscriber for EventLogger {
    fn handle_event(&self, name: &str, payload: &Value, timestamp: u64) -> Result<(), PluginError> {
        if self.ignore.iter().any(|ignored| ignored == name) {
            return Ok(());
        }

        let test_mode = self
            .orchestrator
            .upgrade()
            .map(|orchestrator| orchestrator.in_test_mode())
            .unwrap_or(false);
        info!("📨 [{}] {} {} (test mode: {})", timestamp, name, payload, test_mode);
        Ok(())
    }

    fn subscriber_name(&self) -> &str {
        EVENT_LOGGER_ID
    }
}

/// Appends every event as one JSON line to a file.
///
/// Config: `{ "path": "events.jsonl" }` (required).
pub struct EventJournalFactory;

struct EventJournal {
    path: PathBuf,
    file: Mutex<File>,
}

#[derive(Serialize)]
struct JournalLine<'a> {
    name: &'a str,
    payload: &'a Value,
    timestamp: u64,
}

impl PluginFactory for EventJournalFactory {
    fn id(&self) -> &str {
        EVENT_JOURNAL_ID
    }

    fn create(&self, context: PluginContext) -> Result<Arc<dyn EventSubscriber>, PluginError> {
        let path = context
            .config
            .get("path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| PluginError::Construction("event_journal needs a `path`".to_string()))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                PluginError::Construction(format!("cannot open journal {}: {}", path.display(), e))
            })?;
        debug!("Opened event journal {}", path.display());

        Ok(Arc::new(EventJournal {
            path,
            file: Mutex::new(file),
        }))
    }
}

impl EventSubscriber for EventJournal {
    fn handle_event(&self, name: &str, payload: &Value, timestamp: u64) -> Result<(), PluginError> {
        let line = serde_json::to_string(&JournalLine {
            name,
            payload,
            timestamp,
        })
        .map_err(|e| PluginError::HandlerFailed(e.to_string()))?;

        let mut file = self.file.lock();
        writeln!(file, "{line}").map_err(|e| {
            PluginError::HandlerFailed(format!("write to {} failed: {}", self.path.display(), e))
        })
    }

    fn subscriber_name(&self) -> &str {
        EVENT_JOURNAL_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_event_system::{InitOptions, PluginSpec};
    use serde_json::json;
    use tempfile::TempDir;

    fn page_data() -> Value {
        json!({
            "page": { "type": "product", "name": "Kettle" },
            "site": { "id": "shop" },
            "user": {}
        })
    }

    #[test]
    fn test_builtin_ids() {
        let factories = builtin_factories();
        assert!(factories.contains_key(EVENT_LOGGER_ID));
        assert!(factories.contains_key(EVENT_JOURNAL_ID));
    }

    #[test]
    fn test_journal_records_replayed_and_live_events() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let orchestrator = Orchestrator::new();
        orchestrator.broadcast("early", json!({ "n": 1 }));

        let options = InitOptions::new().with_data(page_data()).with_plugin(
            PluginSpec::new(builtin_factories()[EVENT_JOURNAL_ID].clone())
                .with_config(json!({ "path": path.to_str().unwrap() })),
        );
        assert!(orchestrator.initialize(options).unwrap());
        orchestrator.broadcast("late", Value::Null);

        let content = std::fs::read_to_string(&path).unwrap();
        let names: Vec<String> = content
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).unwrap()["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["early", "initialize", "late"]);
    }

    #[test]
    fn test_journal_without_path_is_rejected() {
        let orchestrator = Orchestrator::new();
        let options = InitOptions::new()
            .with_data(page_data())
            .with_plugin(PluginSpec::new(Arc::new(EventJournalFactory)));
        assert!(orchestrator.initialize(options).is_err());
    }

    #[test]
    fn test_logger_rejects_bad_ignore_list() {
        let orchestrator = Orchestrator::new();
        let options = InitOptions::new().with_data(page_data()).with_plugin(
            PluginSpec::new(Arc::new(EventLoggerFactory)).with_config(json!({ "ignore": "all" })),
        );
        assert!(orchestrator.initialize(options).is_err());

        let orchestrator = Orchestrator::new();
        let options = InitOptions::new().with_data(page_data()).with_plugin(
            PluginSpec::new(Arc::new(EventLoggerFactory))
                .with_config(json!({ "ignore": ["initialize"] })),
        );
        assert!(orchestrator.initialize(options).unwrap());
        assert!(orchestrator.get_plugin_by_id(EVENT_LOGGER_ID).unwrap().is_some());
    }
}
