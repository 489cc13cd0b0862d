//! Test-mode detection.
//!
//! Test mode is a page-scoped flag persisted through a cookie. A query
//! parameter on the page URL switches it on (setting the cookie) or off
//! (removing it). The flag is computed once, when the orchestrator is built.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Cookie carrying the persisted test-mode flag.
pub const TEST_MODE_COOKIE: &str = "pagebus_test_mode";

/// Query parameter that activates (`1`/`true`) or deactivates (`0`/`false`)
/// test mode.
pub const TEST_MODE_PARAM: &str = "pagebus_test_mode";

/// Lifetime of the test-mode cookie once set.
pub const TEST_MODE_COOKIE_TTL: Duration = Duration::from_secs(30 * 60);

/// Attributes passed along with cookie writes and removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: String,
    pub max_age: Option<Duration>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            max_age: None,
        }
    }
}

/// Cookie collaborator used for the test-mode flag.
pub trait CookieStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str, options: &CookieOptions);
    fn remove(&self, name: &str, options: &CookieOptions);
}

/// In-process cookie jar. Expiry is recorded but not enforced.
#[derive(Debug, Default)]
pub struct MemoryCookieStore {
    cookies: Mutex<HashMap<String, (String, CookieOptions)>>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options the named cookie was last written with.
    pub fn options(&self, name: &str) -> Option<CookieOptions> {
        self.cookies.lock().get(name).map(|(_, options)| options.clone())
    }
}

impl CookieStore for MemoryCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        self.cookies.lock().get(name).map(|(value, _)| value.clone())
    }

    fn set(&self, name: &str, value: &str, options: &CookieOptions) {
        self.cookies
            .lock()
            .insert(name.to_string(), (value.to_string(), options.clone()));
    }

    fn remove(&self, name: &str, _options: &CookieOptions) {
        self.cookies.lock().remove(name);
    }
}

/// What the page URL asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Activate,
    Deactivate,
    Nothing,
}

fn requested(page_url: &str) -> Request {
    let url = match Url::parse(page_url) {
        Ok(url) => url,
        Err(e) => {
            if !page_url.is_empty() {
                warn!("⚠️ Could not parse page URL '{}': {}", page_url, e);
            }
            return Request::Nothing;
        }
    };

    url.query_pairs()
        .filter(|(key, _)| key == TEST_MODE_PARAM)
        .last()
        .map(|(_, value)| match &*value {
            "1" | "true" => Request::Activate,
            "0" | "false" => Request::Deactivate,
            _ => Request::Nothing,
        })
        .unwrap_or(Request::Nothing)
}

/// Computes the test-mode flag, updating the cookie as a side effect.
pub fn detect(cookies: &dyn CookieStore, page_url: &str) -> bool {
    let options = CookieOptions::default();
    let has_cookie = cookies.get(TEST_MODE_COOKIE).is_some();

    match (has_cookie, requested(page_url)) {
        (true, Request::Deactivate) => {
            cookies.remove(TEST_MODE_COOKIE, &options);
            info!("🧪 Test mode deactivated by URL");
            false
        }
        (true, _) => {
            debug!("🧪 Test mode active from cookie");
            true
        }
        (false, Request::Activate) => {
            let options = CookieOptions {
                max_age: Some(TEST_MODE_COOKIE_TTL),
                ..options
            };
            cookies.set(TEST_MODE_COOKIE, "1", &options);
            info!("🧪 Test mode activated by URL");
            true
        }
        (false, _) => false,
    }
}
