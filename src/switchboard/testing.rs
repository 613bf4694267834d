//! Test doubles for the endpoint contracts
//!
//! Manual mocks with concrete behavior: a scripted publisher that hands out
//! a queue of packets and a recording subscriber that keeps everything it is
//! written. Both embed [`EndpointBase`] like real transports and allow their
//! aliveness to be forced for sweeper tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::endpoint::{EndpointBase, Info, ReadCloser, WriteCloser};
use crate::error::{Error, Result};
use crate::media::{AacPacketType, AvcPacketType, Packet, SoundFormat, VideoFrameType};
use crate::relay::{RelayConnector, StaticPushRegistry};

/// Relay connector for tests without static push configured; must never run
pub(crate) struct PanicConnector;

#[async_trait]
impl RelayConnector for PanicConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn WriteCloser>> {
        panic!("unexpected relay connect to {url}");
    }
}

/// Registry backed by [`PanicConnector`]
pub(crate) fn empty_statics() -> Arc<StaticPushRegistry> {
    Arc::new(StaticPushRegistry::new(Arc::new(PanicConnector)))
}

/// Wait until `cond` holds, panicking after two seconds
pub(crate) async fn eventually<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

pub(crate) fn metadata() -> Packet {
    Packet::metadata(Bytes::from_static(b"onMetaData"))
}

pub(crate) fn video_seq() -> Packet {
    Packet::video(
        0,
        Bytes::from_static(&[0x17, 0x00]),
        VideoFrameType::Keyframe,
        AvcPacketType::SequenceHeader,
    )
}

pub(crate) fn audio_seq() -> Packet {
    Packet::audio(
        0,
        Bytes::from_static(&[0xAF, 0x00]),
        SoundFormat::Aac,
        AacPacketType::SequenceHeader,
    )
}

pub(crate) fn keyframe(ts: u32) -> Packet {
    Packet::video(
        ts,
        Bytes::from_static(&[0x17, 0x01]),
        VideoFrameType::Keyframe,
        AvcPacketType::Nalu,
    )
}

pub(crate) fn inter(ts: u32) -> Packet {
    Packet::video(
        ts,
        Bytes::from_static(&[0x27, 0x01]),
        VideoFrameType::InterFrame,
        AvcPacketType::Nalu,
    )
}

/// Scripted publisher endpoint
pub(crate) struct ScriptedReader {
    info: Info,
    base: EndpointBase,
    queue: Mutex<VecDeque<Packet>>,
    finished: AtomicBool,
    closed: Mutex<Option<String>>,
    alive_override: Mutex<Option<bool>>,
    notify: Notify,
}

impl ScriptedReader {
    pub fn new(key: &str, uid: &str) -> Arc<Self> {
        Arc::new(Self {
            info: Info::new(key, uid, false),
            base: EndpointBase::new(Duration::from_secs(5)),
            queue: Mutex::new(VecDeque::new()),
            finished: AtomicBool::new(false),
            closed: Mutex::new(None),
            alive_override: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    /// Queue one packet for the fan-out loop to read
    pub fn feed(&self, p: Packet) {
        self.queue.lock().unwrap().push_back(p);
        self.notify.notify_one();
    }

    pub fn feed_all(&self, packets: impl IntoIterator<Item = Packet>) {
        {
            let mut queue = self.queue.lock().unwrap();
            queue.extend(packets);
        }
        self.notify.notify_one();
    }

    /// Packets queued but not yet read
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Make reads fail once the queue drains, like a dropped connection
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn set_alive(&self, alive: bool) {
        *self.alive_override.lock().unwrap() = Some(alive);
    }

    pub fn close_reason(&self) -> Option<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReadCloser for ScriptedReader {
    fn info(&self) -> Info {
        self.info.clone()
    }

    fn alive(&self) -> bool {
        self.alive_override
            .lock()
            .unwrap()
            .unwrap_or_else(|| self.base.alive())
    }

    fn close(&self, reason: &str) {
        let mut closed = self.closed.lock().unwrap();
        if closed.is_none() {
            *closed = Some(reason.to_string());
        }
        self.notify.notify_one();
    }

    async fn read(&self, out: &mut Packet) -> Result<()> {
        loop {
            if self.closed.lock().unwrap().is_some() {
                return Err(Error::ReadFailed("reader closed".into()));
            }
            if let Some(p) = self.queue.lock().unwrap().pop_front() {
                self.base.touch();
                *out = p;
                return Ok(());
            }
            if self.finished.load(Ordering::Acquire) {
                return Err(Error::ReadFailed("end of stream".into()));
            }
            self.notify.notified().await;
        }
    }
}

/// Recording subscriber endpoint
pub(crate) struct RecordingWriter {
    info: Info,
    base: EndpointBase,
    received: Mutex<Vec<Packet>>,
    writes: AtomicUsize,
    /// Writes numbered `fail_from` (1-based) and later fail
    fail_from: Mutex<Option<usize>>,
    closed: Mutex<Option<String>>,
    alive_override: Mutex<Option<bool>>,
    calc_calls: AtomicUsize,
}

impl RecordingWriter {
    pub fn new(key: &str, uid: &str) -> Arc<Self> {
        Self::with_inter(key, uid, true)
    }

    /// A persistent subscriber, like a static-push relay sink
    pub fn persistent(key: &str, uid: &str) -> Arc<Self> {
        Self::with_inter(key, uid, false)
    }

    fn with_inter(key: &str, uid: &str, inter: bool) -> Arc<Self> {
        Arc::new(Self {
            info: Info::new(key, uid, inter),
            base: EndpointBase::new(Duration::from_secs(5)),
            received: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
            fail_from: Mutex::new(None),
            closed: Mutex::new(None),
            alive_override: Mutex::new(None),
            calc_calls: AtomicUsize::new(0),
        })
    }

    pub fn received(&self) -> Vec<Packet> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_timestamps(&self) -> Vec<u32> {
        self.received.lock().unwrap().iter().map(|p| p.timestamp).collect()
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn set_fail_from(&self, nth_write: usize) {
        *self.fail_from.lock().unwrap() = Some(nth_write);
    }

    pub fn set_alive(&self, alive: bool) {
        *self.alive_override.lock().unwrap() = Some(alive);
    }

    pub fn close_reason(&self) -> Option<String> {
        self.closed.lock().unwrap().clone()
    }

    pub fn calc_base_timestamp_calls(&self) -> usize {
        self.calc_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl WriteCloser for RecordingWriter {
    fn info(&self) -> Info {
        self.info.clone()
    }

    fn alive(&self) -> bool {
        self.alive_override
            .lock()
            .unwrap()
            .unwrap_or_else(|| self.base.alive())
    }

    fn close(&self, reason: &str) {
        let mut closed = self.closed.lock().unwrap();
        if closed.is_none() {
            *closed = Some(reason.to_string());
        }
    }

    fn calc_base_timestamp(&self) {
        self.calc_calls.fetch_add(1, Ordering::Relaxed);
        self.base.calc_base_timestamp();
    }

    async fn write(&self, p: &mut Packet) -> Result<()> {
        let nth = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(from) = *self.fail_from.lock().unwrap() {
            if nth >= from {
                return Err(Error::WriteFailed("subscriber gone".into()));
            }
        }
        self.base.touch();
        self.base.record_timestamp(p);
        self.received.lock().unwrap().push(p.clone());
        Ok(())
    }
}
