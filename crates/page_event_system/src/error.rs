//! Error types for the page event system.
//!
//! Validation errors are fatal to `initialize` and leave the orchestrator
//! inert. Plugin errors come from factories and event handlers; handler
//! failures are logged by the queue rather than propagated.

/// Required page data that was missing or malformed.
///
/// The checks run page, then site, then user. Only the first failing check is
/// reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// `page.type` or `page.name` is missing or empty
    #[error("Missing page data: `page.type` and `page.name` must be non-empty")]
    MissingPageData,
    /// `site.id` is missing or empty
    #[error("Missing site data: `site.id` must be non-empty")]
    MissingSiteData,
    /// `user` is absent
    #[error("Missing user data: `user` must be present")]
    MissingUserData,
}

/// Errors surfaced by the orchestrator's public operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Initialization input failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A plugin factory did not satisfy the plugin contract
    #[error("Invalid subscriber: {0}")]
    InvalidSubscriber(String),
    /// An accessor that needs a ready orchestrator was called too early
    #[error("Orchestrator is not initialized")]
    NotInitialized,
}

/// Errors raised by plugins, either while being constructed or while handling
/// an event.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The factory could not build a plugin instance
    #[error("Plugin construction failed: {0}")]
    Construction(String),
    /// An event handler reported a failure
    #[error("Plugin handler failed: {0}")]
    HandlerFailed(String),
}
