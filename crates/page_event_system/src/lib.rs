//! # Page Event System
//!
//! A page-level event orchestrator. It aggregates structured page data,
//! admits plugins whose load rules accept, and broadcasts named events to
//! every admitted plugin with at-least-once delivery, including replay of
//! events that were broadcast before a plugin was admitted.
//!
//! ## Architecture Overview
//!
//! - [`EventQueue`]: append-only event history plus live subscribers;
//!   subscribing can replay the full history synchronously
//! - [`LoadRule`] / [`evaluate`]: admission decision from the page data and
//!   the test-mode flag
//! - [`PluginRegistry`]: constructs, registers and catches up plugins
//! - [`Orchestrator`]: lifecycle state machine tying the above together,
//!   with a one-shot readiness future
//!
//! Markup scanning and cookie storage are collaborators supplied by the
//! host through [`MetadataSource`] and [`CookieStore`].
//!
//! ## Quick Start
//!
//! ```rust
//! use page_event_system::*;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl EventSubscriber for Printer {
//!     fn handle_event(&self, name: &str, _payload: &Value, _ts: u64) -> Result<(), PluginError> {
//!         println!("got {}", name);
//!         Ok(())
//!     }
//! }
//!
//! let orchestrator = Orchestrator::new();
//! orchestrator.broadcast("early", json!({ "a": 1 }));
//!
//! let printer = plugin_factory("printer", |_ctx| Ok(Arc::new(Printer) as Arc<dyn EventSubscriber>));
//! let options = InitOptions::new()
//!     .with_data(json!({
//!         "page": { "type": "home", "name": "Home" },
//!         "site": { "id": "main" },
//!         "user": {}
//!     }))
//!     .with_plugin(PluginSpec::new(printer));
//!
//! // Prints "got early", then "got initialize".
//! assert!(orchestrator.initialize(options).unwrap());
//! assert!(orchestrator.is_ready());
//! ```

pub mod error;
pub mod events;
pub mod metadata;
pub mod orchestrator;
pub mod plugin;
pub mod readiness;
pub mod rules;
pub mod test_mode;
pub mod utils;

pub use error::{OrchestratorError, PluginError, ValidationError};
pub use events::{Event, EventQueue, EventSubscriber, QueueStats};
pub use metadata::{EmbeddedEvent, MetadataSource, NoMetadata, StaticMetadata};
pub use orchestrator::{
    validate_data, InitOptions, LifecycleState, Orchestrator, OrchestratorBuilder, SharedData,
    DEFAULT_METADATA_PREFIX, INITIALIZE_EVENT,
};
pub use plugin::{plugin_factory, FnPluginFactory, PluginContext, PluginFactory, PluginRegistry, PluginSpec};
pub use readiness::ReadinessLatch;
pub use rules::{evaluate, GlobalData, LoadRule, Predicate};
pub use test_mode::{CookieOptions, CookieStore, MemoryCookieStore};
pub use utils::current_timestamp_millis;
