//! Keyed registry of stream services
//!
//! The [`StreamServer`] is the front door of the switchboard: transports hand
//! it publishers and subscribers, it resolves the per-key [`StreamService`]
//! and wires the endpoint in. A background sweeper evicts services whose
//! endpoints have all gone stale.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::service::StreamService;
use crate::config::SwitchboardConfig;
use crate::endpoint::{ReadCloser, WriteCloser};
use crate::error::Result;
use crate::relay::StaticPushRegistry;
use crate::stats::StreamSummary;

/// Registry mapping stream keys to their services
pub struct StreamServer {
    services: DashMap<String, Arc<StreamService>>,
    statics: Arc<StaticPushRegistry>,
    config: SwitchboardConfig,
}

impl StreamServer {
    /// Create a server; fails on invalid configuration
    pub fn new(
        config: SwitchboardConfig,
        statics: Arc<StaticPushRegistry>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            services: DashMap::new(),
            statics,
            config,
        }))
    }

    /// Install a publisher for its stream key
    ///
    /// If the key has a service with a different publisher UID, the service
    /// is swapped: a fresh one takes over the key, subscribers are
    /// transplanted with rebased timestamps, and the old service is
    /// discarded. The same UID (or a service without a reader yet) reuses
    /// the existing service.
    pub fn handle_reader(&self, r: Arc<dyn ReadCloser>) {
        let info = r.info();
        tracing::debug!(stream = %info.key, uid = %info.uid, "handle reader");

        let service = match self.service(&info.key) {
            Some(existing) => {
                let id = existing.publisher_uid();
                if !id.is_empty() && id != info.uid {
                    // New publisher on the key: move the subscribers into a
                    // fresh service, swap the registry entry, then stop the
                    // old fan-out loop. Draining before the stop keeps the
                    // old loop's teardown from closing the transplanted
                    // subscribers.
                    let fresh = StreamService::new(
                        self.config.gop_num,
                        existing.info(),
                        Arc::clone(&self.statics),
                    );
                    existing.copy(&fresh);
                    self.services.insert(info.key.clone(), Arc::clone(&fresh));
                    if let Err(e) = existing.trans_stop() {
                        tracing::debug!(stream = %info.key, error = %e, "trans_stop");
                    }
                    fresh
                } else {
                    // Same UID (or no reader yet): `add_reader` supersedes
                    // any loop still running, keeping subscribers attached.
                    tracing::debug!(stream = %info.key, "renewing service reader");
                    existing
                }
            }
            None => {
                let service = StreamService::new(
                    self.config.gop_num,
                    info.clone(),
                    Arc::clone(&self.statics),
                );
                self.services.insert(info.key.clone(), Arc::clone(&service));
                service
            }
        };

        service.add_reader(r);
    }

    /// Attach a subscriber to its stream key
    ///
    /// When no service exists yet, an empty one is created to reserve the
    /// key but the writer is NOT attached; it only starts receiving once a
    /// later `handle_writer` call finds the service in place.
    pub fn handle_writer(&self, w: Arc<dyn WriteCloser>) {
        let info = w.info();
        tracing::debug!(stream = %info.key, uid = %info.uid, "handle writer");

        match self.service(&info.key) {
            Some(service) => service.add_writer(w),
            None => {
                tracing::debug!(stream = %info.key, "no service for writer, reserving key");
                let service = StreamService::new(
                    self.config.gop_num,
                    info.clone(),
                    Arc::clone(&self.statics),
                );
                self.services.insert(info.key.clone(), service);
            }
        }
    }

    /// Look up the service for a key
    pub fn service(&self, key: &str) -> Option<Arc<StreamService>> {
        self.services.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Number of registered services
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Run one sweep: drop stale endpoints, evict services with none left
    pub fn check_alive(&self) {
        let dead: Vec<String> = self
            .services
            .iter()
            .filter(|e| e.value().check_alive() == 0)
            .map(|e| e.key().clone())
            .collect();

        for key in dead {
            self.services.remove(&key);
            tracing::info!(stream = %key, "service evicted, no live endpoints");
        }
    }

    /// Spawn the background sweeper
    ///
    /// Sweeps every `check_alive_interval`, clamped to at least one second.
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_check_alive(self: &Arc<Self>) -> JoinHandle<()> {
        let server = Arc::clone(self);
        let interval = server
            .config
            .check_alive_interval
            .max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a freshly started
            // server does not sweep before any endpoint had a chance to act.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                server.check_alive();
            }
        })
    }

    /// Snapshots of every registered service
    pub fn stream_summaries(&self) -> Vec<StreamSummary> {
        self.services.iter().map(|e| e.value().stats()).collect()
    }
}

impl std::fmt::Debug for StreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamServer")
            .field("services", &self.services.len())
            .finish()
    }
}
