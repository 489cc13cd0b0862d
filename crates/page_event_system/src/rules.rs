//! Plugin load rules and their evaluation.
//!
//! A rule decides whether a candidate plugin is admitted during
//! initialization. Rules are either a literal boolean, a predicate over the
//! global page data, or a predicate gated on the test-mode flag.

use crate::utils::{is_truthy, lookup_path};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Global page data: a JSON object keyed by top-level section.
pub type GlobalData = Map<String, Value>;

/// Predicate over the global page data.
pub type Predicate = Arc<dyn Fn(&GlobalData) -> bool + Send + Sync>;

/// Admission rule for a candidate plugin.
#[derive(Clone)]
pub enum LoadRule {
    /// Admit (or reject) unconditionally
    Static(bool),
    /// Admit when the predicate holds
    Predicate(Predicate),
    /// Evaluate `rule` only when `test` is false, or when `test` is true and
    /// test mode is active; reject otherwise
    Gated { rule: Predicate, test: bool },
    /// A rule that could not be understood; always rejects
    Malformed(Value),
}

impl std::fmt::Debug for LoadRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadRule::Static(b) => f.debug_tuple("Static").field(b).finish(),
            LoadRule::Predicate(_) => f.write_str("Predicate(<fn>)"),
            LoadRule::Gated { test, .. } => f
                .debug_struct("Gated")
                .field("rule", &"<fn>")
                .field("test", test)
                .finish(),
            LoadRule::Malformed(v) => f.debug_tuple("Malformed").field(v).finish(),
        }
    }
}

impl Default for LoadRule {
    fn default() -> Self {
        LoadRule::Static(true)
    }
}

impl From<bool> for LoadRule {
    fn from(value: bool) -> Self {
        LoadRule::Static(value)
    }
}

impl LoadRule {
    /// Wraps a closure as a predicate rule.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&GlobalData) -> bool + Send + Sync + 'static,
    {
        LoadRule::Predicate(Arc::new(f))
    }

    /// Wraps a closure as a structured rule with an explicit `test` flag.
    pub fn gated<F>(f: F, test: bool) -> Self
    where
        F: Fn(&GlobalData) -> bool + Send + Sync + 'static,
    {
        LoadRule::Gated {
            rule: Arc::new(f),
            test,
        }
    }

    /// Builds a rule from its declarative JSON form.
    ///
    /// * `true` / `false`: static rule
    /// * `{ "path": "page.type", "equals": "article" }`: predicate; without
    ///   `equals` the value at `path` is tested for truthiness
    /// * `{ "rule": <predicate>, "test": true }`: gated rule
    ///
    /// Anything else becomes [`LoadRule::Malformed`].
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(b) => LoadRule::Static(*b),
            Value::Object(obj) if obj.contains_key("rule") => {
                let test = obj.get("test").map(is_truthy).unwrap_or(false);
                match predicate_from_value(&obj["rule"]) {
                    Some(rule) => LoadRule::Gated { rule, test },
                    None => LoadRule::Malformed(value.clone()),
                }
            }
            Value::Object(_) => match predicate_from_value(value) {
                Some(rule) => LoadRule::Predicate(rule),
                None => LoadRule::Malformed(value.clone()),
            },
            other => LoadRule::Malformed(other.clone()),
        }
    }
}

fn predicate_from_value(value: &Value) -> Option<Predicate> {
    match value {
        Value::Bool(b) => {
            let b = *b;
            Some(Arc::new(move |_: &GlobalData| b))
        }
        Value::Object(obj) => {
            let path = obj.get("path")?.as_str()?.to_string();
            let expected = obj.get("equals").cloned();
            Some(Arc::new(move |data: &GlobalData| {
                let actual = lookup_path(data, &path);
                match &expected {
                    Some(expected) => actual == Some(expected),
                    None => actual.map(is_truthy).unwrap_or(false),
                }
            }))
        }
        _ => None,
    }
}

/// Decides whether a rule admits its plugin.
pub fn evaluate(rule: &LoadRule, data: &GlobalData, test_mode_active: bool) -> bool {
    match rule {
        LoadRule::Static(b) => *b,
        LoadRule::Predicate(predicate) => predicate(data),
        LoadRule::Gated { rule, test } => {
            if !*test || test_mode_active {
                rule(data)
            } else {
                false
            }
        }
        LoadRule::Malformed(value) => {
            warn!("⚠️ Malformed load rule {}, rejecting plugin", value);
            false
        }
    }
}
