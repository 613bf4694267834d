//! Switchboard demo with synthetic endpoints
//!
//! Run with: cargo run --example relay_demo
//!
//! A synthetic publisher generates a metadata packet, both sequence headers
//! and then a keyframe every ten frames. One viewer joins a second into the
//! broadcast and is primed from the replay cache before going live. The
//! stream is also mirrored to a fake upstream target to show static push.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use relay_rs::endpoint::EndpointBase;
use relay_rs::media::{
    AacPacketType, AvcPacketType, Packet, SoundFormat, VideoFrameType,
};
use relay_rs::{
    Error, Info, ReadCloser, RelayConnector, Result, StaticPushRegistry, StreamServer,
    SwitchboardConfig, WriteCloser,
};

const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const GOP_FRAMES: u32 = 10;

/// Publisher generating an endless synthetic A/V feed
struct SyntheticPublisher {
    info: Info,
    base: EndpointBase,
    frame: AtomicU32,
}

impl SyntheticPublisher {
    fn new(key: &str, uid: &str) -> Self {
        Self {
            info: Info::new(key, uid, false),
            base: EndpointBase::new(Duration::from_secs(10)),
            frame: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ReadCloser for SyntheticPublisher {
    fn info(&self) -> Info {
        self.info.clone()
    }

    fn alive(&self) -> bool {
        self.base.alive()
    }

    fn close(&self, reason: &str) {
        tracing::info!(publisher = %self.info, reason, "publisher closed");
    }

    async fn read(&self, out: &mut Packet) -> Result<()> {
        tokio::time::sleep(FRAME_INTERVAL).await;
        self.base.touch();

        let n = self.frame.fetch_add(1, Ordering::Relaxed);
        let ts = n.wrapping_mul(FRAME_INTERVAL.as_millis() as u32);

        *out = match n {
            0 => Packet::metadata(Bytes::from_static(b"onMetaData")),
            1 => Packet::video(
                ts,
                Bytes::from_static(&[0x17, 0x00]),
                VideoFrameType::Keyframe,
                AvcPacketType::SequenceHeader,
            ),
            2 => Packet::audio(
                ts,
                Bytes::from_static(&[0xAF, 0x00]),
                SoundFormat::Aac,
                AacPacketType::SequenceHeader,
            ),
            n if (n - 3) % GOP_FRAMES == 0 => Packet::video(
                ts,
                Bytes::from_static(&[0x17, 0x01, 0xAA]),
                VideoFrameType::Keyframe,
                AvcPacketType::Nalu,
            ),
            _ => Packet::video(
                ts,
                Bytes::from_static(&[0x27, 0x01, 0xBB]),
                VideoFrameType::InterFrame,
                AvcPacketType::Nalu,
            ),
        };
        Ok(())
    }
}

/// Subscriber logging what it receives
struct ConsoleViewer {
    info: Info,
    base: EndpointBase,
    received: AtomicUsize,
}

impl ConsoleViewer {
    fn new(key: &str, uid: &str) -> Self {
        Self {
            info: Info::new(key, uid, true),
            base: EndpointBase::new(Duration::from_secs(10)),
            received: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WriteCloser for ConsoleViewer {
    fn info(&self) -> Info {
        self.info.clone()
    }

    fn alive(&self) -> bool {
        self.base.alive()
    }

    fn close(&self, reason: &str) {
        tracing::info!(viewer = %self.info, reason, "viewer closed");
    }

    fn calc_base_timestamp(&self) {
        self.base.calc_base_timestamp();
    }

    async fn write(&self, p: &mut Packet) -> Result<()> {
        self.base.touch();
        self.base.record_timestamp(p);

        let n = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        let kind = if p.is_metadata {
            "metadata"
        } else if p.is_video_sequence_header() {
            "video seqhdr"
        } else if p.is_audio_sequence_header() {
            "audio seqhdr"
        } else if p.is_keyframe() {
            "keyframe"
        } else {
            "frame"
        };

        // The primed prefix in full, then a sample of the live feed
        if n <= 16 || n % 30 == 0 {
            tracing::info!(viewer = %self.info, n, kind, ts = p.timestamp, "received");
        }
        Ok(())
    }
}

/// Fake upstream: hands out a counting sink instead of an RTMP client
struct FakeUpstream;

struct UpstreamSink {
    info: Info,
    base: EndpointBase,
    received: AtomicUsize,
}

#[async_trait]
impl WriteCloser for UpstreamSink {
    fn info(&self) -> Info {
        self.info.clone()
    }

    fn alive(&self) -> bool {
        self.base.alive()
    }

    fn close(&self, reason: &str) {
        let total = self.received.load(Ordering::Relaxed);
        tracing::info!(relay = %self.info, reason, total, "upstream sink closed");
    }

    fn calc_base_timestamp(&self) {
        self.base.calc_base_timestamp();
    }

    async fn write(&self, p: &mut Packet) -> Result<()> {
        self.base.touch();
        self.base.record_timestamp(p);
        self.received.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl RelayConnector for FakeUpstream {
    async fn connect(&self, url: &str) -> Result<Arc<dyn WriteCloser>> {
        if !url.starts_with("rtmp://") {
            return Err(Error::NoRelay(url.to_string()));
        }
        tracing::info!(url, "upstream connected");
        Ok(Arc::new(UpstreamSink {
            info: Info::new(url, "upstream-sink", false),
            base: EndpointBase::new(Duration::from_secs(10)),
            received: AtomicUsize::new(0),
        }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relay_rs=debug".into()),
        )
        .init();

    let statics = Arc::new(StaticPushRegistry::new(Arc::new(FakeUpstream)));
    statics.register_app("live", vec!["rtmp://upstream.example/live".into()]);

    let server = StreamServer::new(SwitchboardConfig::default().gop_num(1), statics)?;
    let sweeper = server.spawn_check_alive();

    server.handle_reader(Arc::new(SyntheticPublisher::new("live/demo", "publisher-1")));

    // Let the publisher build up a GOP before anyone watches
    tokio::time::sleep(Duration::from_secs(1)).await;
    server.handle_writer(Arc::new(ConsoleViewer::new("live/demo", "viewer-1")));

    tokio::time::sleep(Duration::from_secs(2)).await;
    for summary in server.stream_summaries() {
        tracing::info!(
            key = %summary.key,
            publisher = %summary.publisher_uid,
            subscribers = summary.subscriber_count,
            gop_groups = summary.gop_groups,
            cached_packets = summary.cached_packets,
            "stream summary"
        );
    }

    if let Some(service) = server.service("live/demo") {
        service.trans_stop()?;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    sweeper.abort();
    Ok(())
}
