//! Endpoint contracts
//!
//! Transports (RTMP sessions, HTTP-FLV responses, HLS muxers, relay clients)
//! surface to the switchboard as [`ReadCloser`] publishers and [`WriteCloser`]
//! subscribers. The switchboard never sees wire formats, only these
//! capability traits.
//!
//! Both contracts are object-safe: services hold `Arc<dyn ReadCloser>` /
//! `Arc<dyn WriteCloser>`, and `alive()` / `close()` may be called from the
//! sweeper while a `read()` or `write()` is in flight on another task.
//! Implementations use interior mutability; `close()` must be idempotent and
//! must unblock an in-flight `read()`.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;
use crate::media::Packet;

/// Stream descriptor attached to every endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    /// Stream key, `app/stream`
    pub key: String,
    /// Per-connection unique ID
    pub uid: String,
    /// Interactive endpoint (player) vs persistent (static-push relay)
    pub inter: bool,
}

impl Info {
    pub fn new(key: impl Into<String>, uid: impl Into<String>, inter: bool) -> Self {
        Self {
            key: key.into(),
            uid: uid.into(),
            inter,
        }
    }
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.key, self.uid)
    }
}

/// Publisher endpoint contract
#[async_trait]
pub trait ReadCloser: Send + Sync {
    /// Stream descriptor for this endpoint
    fn info(&self) -> Info;

    /// Activity within the endpoint's configured window
    fn alive(&self) -> bool;

    /// Idempotent close; unblocks any in-flight `read`
    fn close(&self, reason: &str);

    /// Fill `out` with the next packet; an error means the reader is dead
    async fn read(&self, out: &mut Packet) -> Result<()>;
}

/// Subscriber endpoint contract
#[async_trait]
pub trait WriteCloser: Send + Sync {
    /// Stream descriptor for this endpoint
    fn info(&self) -> Info;

    /// Activity within the endpoint's configured window
    fn alive(&self) -> bool;

    /// Idempotent close
    fn close(&self, reason: &str);

    /// Recompute the zero-offset used to translate publisher timestamps,
    /// called when the subscriber is migrated across a service swap
    fn calc_base_timestamp(&self);

    /// Write one packet; the implementation may rewrite `p.timestamp`
    async fn write(&self, p: &mut Packet) -> Result<()>;
}

/// Shared endpoint bookkeeping
///
/// Transports embed one of these to get the aliveness and timestamp-rebasing
/// half of the contracts for free: `touch()` on every frame, `alive()` against
/// the configured window, and the last-seen video/audio timestamps that
/// [`EndpointBase::calc_base_timestamp`] folds into the rebasing origin.
#[derive(Debug)]
pub struct EndpointBase {
    timeout: Duration,
    last_active: Mutex<Instant>,
    base_timestamp: AtomicU32,
    last_video_ts: AtomicU32,
    last_audio_ts: AtomicU32,
}

impl EndpointBase {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_active: Mutex::new(Instant::now()),
            base_timestamp: AtomicU32::new(0),
            last_video_ts: AtomicU32::new(0),
            last_audio_ts: AtomicU32::new(0),
        }
    }

    /// Record activity, resetting the aliveness window
    pub fn touch(&self) {
        *self.last_active.lock().unwrap() = Instant::now();
    }

    /// Activity seen within the timeout window
    pub fn alive(&self) -> bool {
        self.last_active.lock().unwrap().elapsed() < self.timeout
    }

    /// Track the last timestamp seen per media kind
    pub fn record_timestamp(&self, p: &Packet) {
        if p.is_video {
            self.last_video_ts.store(p.timestamp, Ordering::Relaxed);
        } else if !p.is_metadata {
            self.last_audio_ts.store(p.timestamp, Ordering::Relaxed);
        }
    }

    /// Current rebasing origin
    pub fn base_timestamp(&self) -> u32 {
        self.base_timestamp.load(Ordering::Relaxed)
    }

    /// Fold the last seen timestamps into the rebasing origin
    pub fn calc_base_timestamp(&self) {
        let video = self.last_video_ts.load(Ordering::Relaxed);
        let audio = self.last_audio_ts.load(Ordering::Relaxed);
        self.base_timestamp.store(video.max(audio), Ordering::Relaxed);
    }
}
