//! Process-wide static-push registry
//!
//! Maps full push URLs to live [`StaticPush`] relays with a refcount per URL:
//! every service that starts a relay takes a reference, and the relay object
//! disappears when the last service releases it. The app-keyed upstream URL
//! table lives here too; populating it is the config loader's job.

use std::sync::Arc;

use dashmap::DashMap;

use super::static_push::{RelayConnector, StaticPush};
use crate::error::{Error, Result};

struct RelayEntry {
    push: Arc<StaticPush>,
    refs: usize,
}

/// Registry of upstream relays and their URL configuration
pub struct StaticPushRegistry {
    connector: Arc<dyn RelayConnector>,
    urls: DashMap<String, Vec<String>>,
    relays: DashMap<String, RelayEntry>,
}

impl StaticPushRegistry {
    pub fn new(connector: Arc<dyn RelayConnector>) -> Self {
        Self {
            connector,
            urls: DashMap::new(),
            relays: DashMap::new(),
        }
    }

    /// Declare the upstream base URLs for an application name
    pub fn register_app(&self, app: impl Into<String>, urls: Vec<String>) {
        self.urls.insert(app.into(), urls);
    }

    /// Upstream base URLs declared for `app`
    pub fn urls_for(&self, app: &str) -> Vec<String> {
        self.urls.get(app).map(|e| e.value().clone()).unwrap_or_default()
    }

    /// Full push URLs for a stream key
    ///
    /// A key `app/stream` combined with base URL `rtmp://up/live` yields
    /// `rtmp://up/live/stream`. Keys without a `/` have no relay targets.
    pub fn push_urls_for_key(&self, key: &str) -> Vec<String> {
        let Some((app, stream)) = key.split_once('/') else {
            return Vec::new();
        };
        self.urls_for(app)
            .into_iter()
            .map(|base| format!("{base}/{stream}"))
            .collect()
    }

    /// Whether at least one relay object currently exists for this key
    pub fn has_relays_for_key(&self, key: &str) -> bool {
        self.push_urls_for_key(key)
            .iter()
            .any(|url| self.relays.contains_key(url))
    }

    /// Get the relay for `url`, creating it if absent; takes a reference
    pub fn get_or_create(&self, url: &str) -> Arc<StaticPush> {
        let mut entry = self.relays.entry(url.to_string()).or_insert_with(|| RelayEntry {
            push: Arc::new(StaticPush::new(url, Arc::clone(&self.connector))),
            refs: 0,
        });
        entry.refs += 1;
        Arc::clone(&entry.push)
    }

    /// Get an existing relay without touching its refcount
    pub fn get(&self, url: &str) -> Result<Arc<StaticPush>> {
        self.relays
            .get(url)
            .map(|e| Arc::clone(&e.push))
            .ok_or_else(|| Error::NoRelay(url.to_string()))
    }

    /// Drop one reference; the relay is stopped and removed when none remain
    pub fn release(&self, url: &str) {
        let remove = match self.relays.get_mut(url) {
            Some(mut entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs == 0
            }
            None => false,
        };
        if remove {
            if let Some((_, entry)) = self.relays.remove(url) {
                entry.push.stop();
            }
            tracing::debug!(url = %url, "static push released");
        }
    }

    /// Number of live relay objects
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }
}

impl std::fmt::Debug for StaticPushRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticPushRegistry")
            .field("apps", &self.urls.len())
            .field("relays", &self.relays.len())
            .finish()
    }
}
