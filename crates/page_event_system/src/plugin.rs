//! Plugin factories, plugin specs and the plugin registry.
//!
//! A plugin is any [`EventSubscriber`] built by a [`PluginFactory`]. The
//! factory carries the plugin's stable id; instances receive a back
//! reference to the orchestrator, the live global data and their effective
//! configuration when constructed.

use crate::error::{OrchestratorError, PluginError};
use crate::events::{EventQueue, EventSubscriber};
use crate::orchestrator::{Orchestrator, SharedData};
use crate::rules::LoadRule;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Everything a plugin receives at construction time.
#[derive(Clone)]
pub struct PluginContext {
    /// Back reference to the owning orchestrator
    pub orchestrator: Weak<Orchestrator>,
    /// The live global data; plugins observe in-place updates
    pub data: SharedData,
    /// Global config override for this plugin id, else the per-plugin `PluginSpec` config
    pub config: Value,
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("orchestrator", &self.orchestrator.upgrade().is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Builds instances of one plugin type.
pub trait PluginFactory: Send + Sync {
    /// Globally unique id shared by every instance of this plugin type.
    fn id(&self) -> &str;

    fn create(&self, context: PluginContext) -> Result<Arc<dyn EventSubscriber>, PluginError>;
}

/// Factory backed by a closure.
pub struct FnPluginFactory<F> {
    id: String,
    build: F,
}

impl<F> PluginFactory for FnPluginFactory<F>
where
    F: Fn(PluginContext) -> Result<Arc<dyn EventSubscriber>, PluginError> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn create(&self, context: PluginContext) -> Result<Arc<dyn EventSubscriber>, PluginError> {
        (self.build)(context)
    }
}

/// Wraps a closure into a shareable plugin factory.
pub fn plugin_factory<F>(id: impl Into<String>, build: F) -> Arc<dyn PluginFactory>
where
    F: Fn(PluginContext) -> Result<Arc<dyn EventSubscriber>, PluginError> + Send + Sync + 'static,
{
    Arc::new(FnPluginFactory {
        id: id.into(),
        build,
    })
}

/// A candidate plugin declared at initialization.
#[derive(Clone)]
pub struct PluginSpec {
    pub factory: Arc<dyn PluginFactory>,
    pub config: Value,
    pub rule: LoadRule,
}

impl std::fmt::Debug for PluginSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSpec")
            .field("id", &self.factory.id())
            .field("config", &self.config)
            .field("rule", &self.rule)
            .finish()
    }
}

impl PluginSpec {
    /// Spec with no config that is always admitted.
    pub fn new(factory: Arc<dyn PluginFactory>) -> Self {
        Self {
            factory,
            config: Value::Null,
            rule: LoadRule::default(),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_rule(mut self, rule: impl Into<LoadRule>) -> Self {
        self.rule = rule.into();
        self
    }
}

/// Gives queue log lines the plugin id.
struct NamedSubscriber {
    id: String,
    inner: Arc<dyn EventSubscriber>,
}

impl EventSubscriber for NamedSubscriber {
    fn handle_event(&self, name: &str, payload: &Value, timestamp: u64) -> Result<(), PluginError> {
        self.inner.handle_event(name, payload, timestamp)
    }

    fn subscriber_name(&self) -> &str {
        &self.id
    }
}

struct RegisteredPlugin {
    id: String,
    instance: Arc<dyn EventSubscriber>,
}

/// Append-only list of admitted plugin instances.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<Vec<RegisteredPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a plugin, registers it, catches it up on the queue's
    /// history and subscribes it for future broadcasts.
    ///
    /// Fails with [`OrchestratorError::InvalidSubscriber`] when the factory id
    /// is empty or the factory cannot build an instance.
    pub fn admit(
        &self,
        factory: &dyn PluginFactory,
        context: PluginContext,
        queue: &EventQueue,
    ) -> Result<Arc<dyn EventSubscriber>, OrchestratorError> {
        let instance = Self::construct(factory, context)?;
        self.register(factory.id(), instance.clone(), queue);
        Ok(instance)
    }

    /// Builds an instance without registering it anywhere.
    pub fn construct(
        factory: &dyn PluginFactory,
        context: PluginContext,
    ) -> Result<Arc<dyn EventSubscriber>, OrchestratorError> {
        let id = factory.id();
        if id.is_empty() {
            return Err(OrchestratorError::InvalidSubscriber(
                "plugin factory reported an empty id".to_string(),
            ));
        }

        factory
            .create(context)
            .map_err(|e| OrchestratorError::InvalidSubscriber(format!("plugin '{}': {}", id, e)))
    }

    /// Registers an already constructed instance and subscribes it with
    /// history replay.
    pub fn register(&self, id: &str, instance: Arc<dyn EventSubscriber>, queue: &EventQueue) {
        self.plugins.write().push(RegisteredPlugin {
            id: id.to_string(),
            instance: instance.clone(),
        });

        let backlog = queue.len();
        queue.subscribe(
            Arc::new(NamedSubscriber {
                id: id.to_string(),
                inner: instance,
            }),
            true,
        );

        debug!("Plugin '{}' caught up on {} recorded events", id, backlog);
        info!("🔌 Admitted plugin '{}'", id);
    }

    /// First plugin registered under `id`, if any.
    pub fn get_by_id(&self, id: &str) -> Option<Arc<dyn EventSubscriber>> {
        self.plugins
            .read()
            .iter()
            .find(|plugin| plugin.id == id)
            .map(|plugin| plugin.instance.clone())
    }

    /// Ids of every admitted plugin, in admission order.
    pub fn ids(&self) -> Vec<String> {
        self.plugins.read().iter().map(|p| p.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
