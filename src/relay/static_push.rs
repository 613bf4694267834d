//! Outbound static-push relay
//!
//! A [`StaticPush`] mirrors a locally published stream to one predeclared
//! upstream RTMP target. The actual RTMP client connection is an external
//! collaborator reached through the [`RelayConnector`] seam; the relay itself
//! owns a bounded queue and a forwarding task so that upstream congestion
//! never blocks the primary fan-out loop.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::endpoint::WriteCloser;
use crate::error::Result;
use crate::media::Packet;

/// Queue depth between the fan-out loop and the upstream connection.
/// Roughly two seconds of a 30fps A/V stream.
const RELAY_QUEUE_DEPTH: usize = 128;

/// Factory for upstream relay connections
///
/// Implemented by the RTMP client transport. `connect` is called on every
/// relay start, so reconnect policy lives in the implementation.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn WriteCloser>>;
}

/// One upstream relay, identified by its full push URL
pub struct StaticPush {
    url: String,
    connector: Arc<dyn RelayConnector>,
    tx: Mutex<Option<mpsc::Sender<Packet>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StaticPush {
    pub(crate) fn new(url: impl Into<String>, connector: Arc<dyn RelayConnector>) -> Self {
        Self {
            url: url.into(),
            connector,
            tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Full push URL this relay feeds
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the forwarding task is up
    pub fn is_running(&self) -> bool {
        self.tx.lock().unwrap().is_some()
    }

    /// Connect upstream and spawn the forwarding task
    ///
    /// Idempotent: starting a running relay is a no-op. A connect failure is
    /// returned to the caller, which logs and skips this relay.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let sink = self.connector.connect(&self.url).await?;
        let (tx, mut rx) = mpsc::channel::<Packet>(RELAY_QUEUE_DEPTH);

        let url = self.url.clone();
        let handle = tokio::spawn(async move {
            while let Some(mut p) = rx.recv().await {
                if let Err(e) = sink.write(&mut p).await {
                    tracing::warn!(url = %url, error = %e, "static push write failed, stopping relay");
                    break;
                }
            }
            sink.close("static push stopped");
        });

        *self.tx.lock().unwrap() = Some(tx);
        *self.task.lock().unwrap() = Some(handle);
        tracing::debug!(url = %self.url, "static push started");
        Ok(())
    }

    /// Drop the queue and let the forwarding task drain out
    pub fn stop(&self) {
        let tx = self.tx.lock().unwrap().take();
        if tx.is_some() {
            tracing::debug!(url = %self.url, "static push stopped");
        }
        // Closing the sender ends the forwarding task once the queue drains;
        // dropping the handle detaches it.
        self.task.lock().unwrap().take();
    }

    /// Enqueue one packet for the upstream
    ///
    /// Never blocks: when the queue is full or the relay is down the packet
    /// is dropped. The primary fan-out must not feel upstream backpressure.
    pub fn write_packet(&self, p: Packet) {
        let tx = self.tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            if let Err(e) = tx.try_send(p) {
                tracing::debug!(url = %self.url, error = %e, "static push queue full, dropping packet");
            }
        }
    }
}

impl std::fmt::Debug for StaticPush {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticPush")
            .field("url", &self.url)
            .field("running", &self.is_running())
            .finish()
    }
}
