//! The orchestrator: lifecycle state machine, global data and plugin
//! admission, sitting on top of the event queue.
//!
//! Lifecycle is `Uninitialized -> Initializing -> Ready`. `initialize` runs
//! at most once to completion:
//!
//! 1. seed data from the options and merge page-embedded fields
//! 2. validate the required `page`, `site` and `user` sections
//! 3. store the per-plugin global config
//! 4. construct every candidate whose load rule accepts, broadcast
//!    page-declared events, then register and catch up the constructed
//!    plugins
//! 5. flip to `Ready`
//! 6. broadcast the synthetic `"initialize"` event with the full data
//! 7. resolve the readiness latch
//!
//! A validation or construction failure leaves the orchestrator
//! `Uninitialized`, with no plugin registered, and safe to retry. Broadcasting is allowed in any state; events sent before
//! initialization are recorded and replayed to plugins as they are admitted.

use crate::error::{OrchestratorError, ValidationError};
use crate::events::{Event, EventQueue, EventSubscriber, QueueStats};
use crate::metadata::{MetadataSource, NoMetadata};
use crate::plugin::{PluginContext, PluginFactory, PluginRegistry, PluginSpec};
use crate::readiness::ReadinessLatch;
use crate::rules::{evaluate, GlobalData};
use crate::test_mode::{self, CookieStore, MemoryCookieStore};
use crate::utils::{is_truthy, lookup_path};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Global data shared between the orchestrator and its plugins.
pub type SharedData = Arc<RwLock<GlobalData>>;

/// Name of the synthetic event broadcast once the orchestrator is ready.
pub const INITIALIZE_EVENT: &str = "initialize";

/// Prefix handed to the metadata source unless the builder overrides it.
pub const DEFAULT_METADATA_PREFIX: &str = "page";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Input to [`Orchestrator::initialize`].
#[derive(Debug, Default, Clone)]
pub struct InitOptions {
    /// Seed for the global data
    pub data: Option<GlobalData>,
    /// Plugin id -> configuration, overriding per-plugin `PluginSpec` config
    pub config: Option<HashMap<String, Value>>,
    /// Candidate plugins, admitted in order
    pub plugins: Vec<PluginSpec>,
}

impl InitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the data from a JSON value; non-object values are ignored.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = match data {
            Value::Object(map) => Some(map),
            _ => None,
        };
        self
    }

    pub fn with_config(mut self, config: HashMap<String, Value>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_plugin(mut self, spec: PluginSpec) -> Self {
        self.plugins.push(spec);
        self
    }
}

/// Checks the required sections in fixed order: page, site, user.
///
/// "Non-empty" follows JS truthiness: `page.type`, `page.name` and `site.id`
/// are missing when absent, `null`, `false`, `0` or `""`. Any other value,
/// including non-string ones like `5`, is accepted. `user` only has to be
/// present and non-null.
pub fn validate_data(data: &GlobalData) -> Result<(), ValidationError> {
    let present = |path: &str| lookup_path(data, path).map(is_truthy).unwrap_or(false);

    if !present("page.type") || !present("page.name") {
        return Err(ValidationError::MissingPageData);
    }
    if !present("site.id") {
        return Err(ValidationError::MissingSiteData);
    }
    if matches!(data.get("user"), None | Some(Value::Null)) {
        return Err(ValidationError::MissingUserData);
    }
    Ok(())
}

/// Configures an [`Orchestrator`] before it is created.
pub struct OrchestratorBuilder {
    cookies: Option<Arc<dyn CookieStore>>,
    page_url: String,
    metadata: Arc<dyn MetadataSource>,
    metadata_prefix: String,
}

impl OrchestratorBuilder {
    fn new() -> Self {
        Self {
            cookies: None,
            page_url: String::new(),
            metadata: Arc::new(NoMetadata),
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
        }
    }

    /// Cookie store holding the persisted test-mode flag.
    pub fn cookies(mut self, cookies: Arc<dyn CookieStore>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    /// URL of the hosting page; its query string can toggle test mode.
    pub fn page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = url.into();
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataSource>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn metadata_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metadata_prefix = prefix.into();
        self
    }

    /// Creates the orchestrator. The test-mode flag is computed here and
    /// fixed for the orchestrator's lifetime.
    pub fn build(self) -> Arc<Orchestrator> {
        let cookies = self
            .cookies
            .unwrap_or_else(|| Arc::new(MemoryCookieStore::new()));
        let test_mode = test_mode::detect(cookies.as_ref(), &self.page_url);

        Arc::new_cyclic(|self_ref| Orchestrator {
            self_ref: self_ref.clone(),
            state: Mutex::new(LifecycleState::Uninitialized),
            data: SharedData::default(),
            config: RwLock::new(HashMap::new()),
            queue: EventQueue::new(),
            registry: PluginRegistry::new(),
            readiness: ReadinessLatch::new(),
            test_mode,
            metadata: self.metadata,
            metadata_prefix: self.metadata_prefix,
            embedded_events_sent: AtomicBool::new(false),
        })
    }
}

/// Page-level event orchestrator.
///
/// Created explicitly by the host and always handed out as an `Arc`, so
/// plugins can hold a weak back reference to it.
pub struct Orchestrator {
    self_ref: Weak<Orchestrator>,
    state: Mutex<LifecycleState>,
    data: SharedData,
    config: RwLock<HashMap<String, Value>>,
    queue: EventQueue,
    registry: PluginRegistry,
    readiness: ReadinessLatch,
    test_mode: bool,
    metadata: Arc<dyn MetadataSource>,
    metadata_prefix: String,
    embedded_events_sent: AtomicBool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &*self.state.lock())
            .field("test_mode", &self.test_mode)
            .field("plugins", &self.registry.len())
            .field("queue", &self.queue)
            .finish()
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Orchestrator with an in-memory cookie store, no page URL and no
    /// embedded metadata.
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    /// Runs the initialization sequence.
    ///
    /// Returns `Ok(true)` when this call initialized the orchestrator and
    /// `Ok(false)` when it was already initializing or ready, in which case
    /// nothing is re-run.
    pub fn initialize(&self, options: InitOptions) -> Result<bool, OrchestratorError> {
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Uninitialized {
                warn!("⚠️ initialize called while {:?}, ignoring", *state);
                return Ok(false);
            }
            *state = LifecycleState::Initializing;
        }

        match self.run_initialization(options) {
            Ok(()) => Ok(true),
            Err(e) => {
                *self.state.lock() = LifecycleState::Uninitialized;
                error!("❌ Initialization failed: {}", e);
                Err(e)
            }
        }
    }

    fn run_initialization(&self, options: InitOptions) -> Result<(), OrchestratorError> {
        let mut data = options.data.unwrap_or_default();
        self.metadata.collect_data(&self.metadata_prefix, &mut data);

        validate_data(&data)?;
        *self.data.write() = data;
        *self.config.write() = options.config.unwrap_or_default();

        let accepted: Vec<&PluginSpec> = options
            .plugins
            .iter()
            .filter(|spec| {
                let admitted = evaluate(&spec.rule, &self.data.read(), self.test_mode);
                if !admitted {
                    debug!("Load rule rejected plugin '{}'", spec.factory.id());
                }
                admitted
            })
            .collect();

        // Build every accepted plugin before registering any of them, so a
        // failing factory leaves nothing behind and a retry starts clean.
        let mut constructed = Vec::with_capacity(accepted.len());
        for spec in accepted {
            let context = self.context_for(spec.factory.as_ref(), spec.config.clone());
            let instance = PluginRegistry::construct(spec.factory.as_ref(), context)?;
            constructed.push((spec.factory.id(), instance));
        }

        if !self.embedded_events_sent.swap(true, Ordering::SeqCst) {
            for (name, payload) in self.metadata.collect_events(&self.metadata_prefix) {
                self.queue.broadcast_event(name, payload);
            }
        }

        for (id, instance) in constructed {
            self.registry.register(id, instance, &self.queue);
        }

        *self.state.lock() = LifecycleState::Ready;
        info!(
            "✅ Orchestrator ready with {} plugins (test mode: {})",
            self.registry.len(),
            self.test_mode
        );

        let payload = Value::Object(self.data.read().clone());
        self.queue.broadcast_event(INITIALIZE_EVENT, payload);
        self.readiness.resolve();
        Ok(())
    }

    fn context_for(&self, factory: &dyn PluginFactory, config: Value) -> PluginContext {
        let config = self
            .config
            .read()
            .get(factory.id())
            .cloned()
            .unwrap_or(config);

        PluginContext {
            orchestrator: self.self_ref.clone(),
            data: self.data.clone(),
            config,
        }
    }

    /// Admits a plugin outside of `initialize`, bypassing load rules.
    pub fn add_plugin(
        &self,
        factory: Arc<dyn PluginFactory>,
        config: Value,
    ) -> Result<Arc<dyn EventSubscriber>, OrchestratorError> {
        let context = self.context_for(factory.as_ref(), config);
        self.registry.admit(factory.as_ref(), context, &self.queue)
    }

    /// Broadcasts an event in any lifecycle state.
    pub fn broadcast(&self, name: impl Into<String>, payload: Value) {
        self.queue.broadcast_event(name, payload);
    }

    /// Snapshot of the global data.
    pub fn get_data(&self) -> Result<GlobalData, OrchestratorError> {
        self.ensure_ready()?;
        Ok(self.data.read().clone())
    }

    pub fn get_plugin_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Arc<dyn EventSubscriber>>, OrchestratorError> {
        self.ensure_ready()?;
        Ok(self.registry.get_by_id(id))
    }

    fn ensure_ready(&self) -> Result<(), OrchestratorError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(OrchestratorError::NotInitialized)
        }
    }

    /// Future completing once initialization has finished, including the
    /// `"initialize"` broadcast. Never fails.
    pub fn when_ready(&self) -> impl Future<Output = ()> + Send + 'static {
        self.readiness.wait()
    }

    pub fn is_ready(&self) -> bool {
        *self.state.lock() == LifecycleState::Ready
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn in_test_mode(&self) -> bool {
        self.test_mode
    }

    /// Every event broadcast so far, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.queue.history()
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_data() -> Value {
        json!({
            "page": { "type": "article", "name": "Launch" },
            "site": { "id": "site-1" },
            "user": {}
        })
    }

    fn map(value: Value) -> GlobalData {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_validation_order() {
        assert_eq!(validate_data(&map(json!({}))), Err(ValidationError::MissingPageData));
        assert_eq!(
            validate_data(&map(json!({ "page": {} }))),
            Err(ValidationError::MissingPageData)
        );
        assert_eq!(
            validate_data(&map(json!({ "page": { "type": "a", "name": "" } }))),
            Err(ValidationError::MissingPageData)
        );
        assert_eq!(
            validate_data(&map(json!({ "page": { "type": "a", "name": "b" } }))),
            Err(ValidationError::MissingSiteData)
        );
        assert_eq!(
            validate_data(&map(json!({
                "page": { "type": "a", "name": "b" },
                "site": { "id": "s" }
            }))),
            Err(ValidationError::MissingUserData)
        );
        assert_eq!(validate_data(&map(valid_data())), Ok(()));
    }

    #[test]
    fn test_validation_uses_truthiness() {
        let mut data = map(valid_data());
        data.insert("page".to_string(), json!({ "type": 0, "name": "Home" }));
        assert_eq!(validate_data(&data), Err(ValidationError::MissingPageData));

        data.insert("page".to_string(), json!({ "type": 5, "name": "Home" }));
        assert_eq!(validate_data(&data), Ok(()));

        data.insert("site".to_string(), json!({ "id": false }));
        assert_eq!(validate_data(&data), Err(ValidationError::MissingSiteData));

        data.insert("site".to_string(), json!({ "id": "main" }));
        data.insert("user".to_string(), json!(0));
        assert_eq!(validate_data(&data), Ok(()));
    }

    #[test]
    fn test_accessors_require_ready() {
        let orchestrator = Orchestrator::new();
        assert_eq!(orchestrator.state(), LifecycleState::Uninitialized);
        assert!(matches!(orchestrator.get_data(), Err(OrchestratorError::NotInitialized)));
        assert!(matches!(
            orchestrator.get_plugin_by_id("x"),
            Err(OrchestratorError::NotInitialized)
        ));

        assert!(orchestrator.initialize(InitOptions::new().with_data(valid_data())).unwrap());
        assert!(orchestrator.is_ready());
        assert_eq!(orchestrator.get_data().unwrap(), map(valid_data()));
        assert!(orchestrator.get_plugin_by_id("x").unwrap().is_none());
    }

    #[test]
    fn test_failed_initialize_is_retryable() {
        let orchestrator = Orchestrator::new();
        let err = orchestrator
            .initialize(InitOptions::new().with_data(json!({ "page": {} })))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(ValidationError::MissingPageData)));
        assert_eq!(orchestrator.state(), LifecycleState::Uninitialized);
        assert!(orchestrator.history().is_empty());

        assert!(orchestrator.initialize(InitOptions::new().with_data(valid_data())).unwrap());
        assert_eq!(orchestrator.history().len(), 1);
        assert_eq!(orchestrator.history()[0].name, INITIALIZE_EVENT);
        assert_eq!(orchestrator.history()[0].payload, valid_data());
    }

    #[test]
    fn test_second_initialize_is_ignored() {
        let orchestrator = Orchestrator::new();
        assert!(orchestrator.initialize(InitOptions::new().with_data(valid_data())).unwrap());
        assert!(!orchestrator.initialize(InitOptions::new()).unwrap());
        assert_eq!(orchestrator.history().len(), 1);
    }

    #[test]
    fn test_test_mode_from_url() {
        let orchestrator = Orchestrator::builder()
            .page_url("https://example.com/?pagebus_test_mode=1")
            .build();
        assert!(orchestrator.in_test_mode());
        assert!(!Orchestrator::new().in_test_mode());
    }

    #[test]
    fn test_with_data_ignores_non_objects() {
        assert!(InitOptions::new().with_data(json!([1, 2])).data.is_none());
        assert!(InitOptions::new().with_data(valid_data()).data.is_some());
    }
}
