//! Page-embedded metadata collaborator.
//!
//! Markup scanning lives outside this crate. The orchestrator only needs two
//! things from it: extra data fields to merge into the global data, and any
//! events the page declared inline.

use crate::rules::GlobalData;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source of page-embedded data and declarative events.
pub trait MetadataSource: Send + Sync {
    /// Merges fields found under `prefix` into `target`, overwriting existing
    /// top-level keys.
    fn collect_data(&self, prefix: &str, target: &mut GlobalData);

    /// Events declared inline under `prefix`, in document order, as
    /// `(name, payload)` pairs.
    fn collect_events(&self, prefix: &str) -> Vec<(String, Value)>;
}

/// Metadata source for hosts without embedded markup.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetadata;

impl MetadataSource for NoMetadata {
    fn collect_data(&self, _prefix: &str, _target: &mut GlobalData) {}

    fn collect_events(&self, _prefix: &str) -> Vec<(String, Value)> {
        Vec::new()
    }
}

/// A declared inline event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedEvent {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

/// Metadata already extracted from a page, e.g. loaded from a JSON file.
///
/// Data keys and event names may carry the scan prefix (`"page:"`-style or
/// `"page-"`-style); the prefix is stripped when collected. Unprefixed
/// entries are taken as they are.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StaticMetadata {
    #[serde(default)]
    pub data: GlobalData,
    #[serde(default)]
    pub events: Vec<EmbeddedEvent>,
}

fn strip_prefix<'a>(key: &'a str, prefix: &str) -> &'a str {
    key.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(':').or_else(|| rest.strip_prefix('-')))
        .unwrap_or(key)
}

impl MetadataSource for StaticMetadata {
    fn collect_data(&self, prefix: &str, target: &mut GlobalData) {
        for (key, value) in &self.data {
            target.insert(strip_prefix(key, prefix).to_string(), value.clone());
        }
    }

    fn collect_events(&self, prefix: &str) -> Vec<(String, Value)> {
        self.events
            .iter()
            .map(|event| (strip_prefix(&event.name, prefix).to_string(), event.payload.clone()))
            .collect()
    }
}
