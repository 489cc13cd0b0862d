//! File-backed cookie store so the test-mode flag survives between runs.

use page_event_system::{current_timestamp_millis, CookieOptions, CookieStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCookie {
    value: String,
    path: String,
    /// Unix millis after which the cookie is gone; `None` never expires
    expires_at: Option<u64>,
}

impl StoredCookie {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Cookie jar persisted as a JSON file.
///
/// I/O failures are logged and otherwise ignored; a missing or corrupt file
/// reads as an empty jar.
pub struct FileCookieStore {
    path: PathBuf,
    cookies: Mutex<HashMap<String, StoredCookie>>,
}

impl FileCookieStore {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let cookies = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("⚠️ Ignoring unreadable cookie file {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        debug!("Opened cookie file {} ({} cookies)", path.display(), cookies.len());

        Self {
            path,
            cookies: Mutex::new(cookies),
        }
    }

    fn persist(&self, cookies: &HashMap<String, StoredCookie>) {
        let result = serde_json::to_string_pretty(cookies)
            .map_err(|e| e.to_string())
            .and_then(|content| std::fs::write(&self.path, content).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!("⚠️ Failed to write cookie file {}: {}", self.path.display(), e);
        }
    }
}

impl CookieStore for FileCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        let now = current_timestamp_millis();
        let mut cookies = self.cookies.lock();
        match cookies.get(name) {
            Some(cookie) if cookie.is_expired(now) => {
                cookies.remove(name);
                self.persist(&cookies);
                None
            }
            Some(cookie) => Some(cookie.value.clone()),
            None => None,
        }
    }

    fn set(&self, name: &str, value: &str, options: &CookieOptions) {
        let expires_at = options
            .max_age
            .map(|ttl| current_timestamp_millis() + ttl.as_millis() as u64);
        let mut cookies = self.cookies.lock();
        cookies.insert(
            name.to_string(),
            StoredCookie {
                value: value.to_string(),
                path: options.path.clone(),
                expires_at,
            },
        );
        self.persist(&cookies);
    }

    fn remove(&self, name: &str, _options: &CookieOptions) {
        let mut cookies = self.cookies.lock();
        if cookies.remove(name).is_some() {
            self.persist(&cookies);
        }
    }
}
