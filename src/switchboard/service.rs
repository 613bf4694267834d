//! Per-key stream service
//!
//! A [`StreamService`] ties one publisher to N subscribers: a single fan-out
//! task reads packets from the publisher, routes them through the replay
//! cache, mirrors them to any static-push relays, and writes them to every
//! subscriber. Subscriber failures remove only that subscriber; a publisher
//! failure tears the whole service down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::endpoint::{Info, ReadCloser, WriteCloser};
use crate::error::{Error, Result};
use crate::media::Packet;
use crate::relay::StaticPushRegistry;
use crate::stats::StreamSummary;

/// A subscriber and its priming state
struct Subscriber {
    writer: Arc<dyn WriteCloser>,
    primed: AtomicBool,
}

/// One stream: a replay cache, at most one publisher, N subscribers
pub struct StreamService {
    info: RwLock<Info>,
    cache: Mutex<Cache>,
    reader: RwLock<Option<Arc<dyn ReadCloser>>>,
    subscribers: DashMap<String, Subscriber>,
    /// Stop token of the currently running fan-out loop. `None` until the
    /// first `add_reader`; a cancelled token means the loop has been told to
    /// exit. Each loop gets a fresh token so a renewal can never be confused
    /// with the stop of a previous loop.
    stop: Mutex<Option<CancellationToken>>,
    statics: Arc<StaticPushRegistry>,
}

impl StreamService {
    pub fn new(gop_num: usize, info: Info, statics: Arc<StaticPushRegistry>) -> Arc<Self> {
        Arc::new(Self {
            info: RwLock::new(info),
            cache: Mutex::new(Cache::new(gop_num)),
            reader: RwLock::new(None),
            subscribers: DashMap::new(),
            stop: Mutex::new(None),
            statics,
        })
    }

    /// Descriptor of the current publisher (or of the endpoint that created
    /// this service while it waits for one)
    pub fn info(&self) -> Info {
        self.info.read().unwrap().clone()
    }

    pub(crate) fn set_info(&self, info: Info) {
        *self.info.write().unwrap() = info;
    }

    /// UID of the installed publisher, empty when none
    pub fn publisher_uid(&self) -> String {
        self.reader
            .read()
            .unwrap()
            .as_ref()
            .map(|r| r.info().uid)
            .unwrap_or_default()
    }

    /// Number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn current_reader(&self) -> Option<Arc<dyn ReadCloser>> {
        self.reader.read().unwrap().clone()
    }

    /// Install the publisher and spawn the fan-out loop
    ///
    /// A loop still running for a previous reader is superseded: the new
    /// reader and stop token are installed first, then the old loop is
    /// cancelled. By the time it observes the cancel it finds a foreign
    /// reader in the slot and leaves the subscribers and relays to the new
    /// loop, so a same-UID publisher restart never disconnects anyone.
    pub fn add_reader(self: &Arc<Self>, r: Arc<dyn ReadCloser>) {
        let token = CancellationToken::new();
        let superseded = {
            let mut reader = self.reader.write().unwrap();
            let mut stop = self.stop.lock().unwrap();
            *reader = Some(Arc::clone(&r));
            stop.replace(token.clone())
        };
        if let Some(old) = superseded {
            old.cancel();
        }

        let service = Arc::clone(self);
        tokio::spawn(service.run(r, token));
    }

    /// Register a subscriber keyed by its UID, unprimed
    pub fn add_writer(&self, w: Arc<dyn WriteCloser>) {
        let info = w.info();
        self.subscribers.insert(
            info.uid.clone(),
            Subscriber {
                writer: w,
                primed: AtomicBool::new(false),
            },
        );
        tracing::debug!(stream = %info.key, uid = %info.uid, "subscriber added");
    }

    /// Signal the fan-out loop to exit
    ///
    /// Fails when no loop is running: before the first `add_reader`, or after
    /// the loop has already been stopped.
    pub fn trans_stop(&self) -> Result<()> {
        let slot = self.stop.lock().unwrap();
        match slot.as_ref() {
            Some(token) if !token.is_cancelled() => {
                tracing::debug!(stream = %self.info().key, "stopping fan-out loop");
                token.cancel();
                Ok(())
            }
            _ => Err(Error::InternalAssertion(format!(
                "trans_stop: no fan-out loop running for {}",
                self.info().key
            ))),
        }
    }

    /// Remove stale endpoints, returning the count of still-live ones
    ///
    /// A dead reader is closed in place (the fan-out loop notices on its next
    /// read); dead subscribers are closed and removed.
    pub fn check_alive(&self) -> usize {
        let mut n = 0;

        if let Some(r) = self.current_reader() {
            if r.alive() {
                n += 1;
            } else {
                r.close("read timeout");
            }
        }

        let mut stale = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().writer.alive() {
                n += 1;
            } else {
                stale.push(entry.key().clone());
            }
        }
        for uid in stale {
            if let Some((_, sub)) = self.subscribers.remove(&uid) {
                tracing::info!(stream = %self.info().key, uid = %uid, "write timeout, removing subscriber");
                sub.writer.close("write timeout");
            }
        }

        n
    }

    /// Move every subscriber into `dst`, rebasing its timestamp origin first
    ///
    /// Used on a service swap: the new publisher restarts timestamps, so each
    /// writer recomputes its zero-offset before joining the new service.
    /// Transplanted subscribers arrive unprimed and replay the new cache.
    pub fn copy(&self, dst: &StreamService) {
        dst.set_info(self.info());

        let uids: Vec<String> = self.subscribers.iter().map(|e| e.key().clone()).collect();
        for uid in uids {
            if let Some((_, sub)) = self.subscribers.remove(&uid) {
                sub.writer.calc_base_timestamp();
                dst.add_writer(sub.writer);
            }
        }
    }

    /// Snapshot for the admin surface
    pub fn stats(&self) -> StreamSummary {
        let (gop_groups, cached_packets) = {
            let cache = self.cache.lock().unwrap();
            (cache.gop_groups(), cache.cached_packets())
        };
        StreamSummary {
            key: self.info().key,
            publisher_uid: self.publisher_uid(),
            subscriber_count: self.subscribers.len(),
            gop_groups,
            cached_packets,
        }
    }

    /// The fan-out loop: one task per service
    async fn run(self: Arc<Self>, reader: Arc<dyn ReadCloser>, token: CancellationToken) {
        let info = reader.info();
        tracing::debug!(stream = %info.key, uid = %info.uid, "fan-out loop started");

        self.start_static_push().await;

        let mut p = Packet::default();
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.teardown(&reader).await;
                    return;
                }
                res = reader.read(&mut p) => {
                    if let Err(e) = res {
                        tracing::debug!(stream = %info.key, error = %e, "source read failed, stopping service");
                        // Self-signal; the next iteration observes the stop.
                        token.cancel();
                        continue;
                    }
                }
            }

            if self.is_send_static_push() {
                self.send_static_push(&p);
            }

            self.cache.lock().unwrap().write(p.clone());

            self.fan_out(&p).await;
        }
    }

    /// Deliver one packet to every subscriber, priming fresh ones
    async fn fan_out(&self, p: &Packet) {
        // Snapshot so no map shard is locked across a write.
        let targets: Vec<(String, Arc<dyn WriteCloser>, bool)> = self
            .subscribers
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    Arc::clone(&e.value().writer),
                    e.value().primed.load(Ordering::Acquire),
                )
            })
            .collect();

        for (uid, writer, primed) in targets {
            if !primed {
                // The replay snapshot already contains the packet just
                // written to the cache, so priming substitutes for the live
                // send on this iteration.
                let replay = self.cache.lock().unwrap().playback();
                let mut failed = false;
                for cached in replay {
                    let mut copy = cached;
                    if let Err(e) = writer.write(&mut copy).await {
                        tracing::debug!(uid = %uid, error = %e, "cache replay failed, removing subscriber");
                        self.subscribers.remove(&uid);
                        failed = true;
                        break;
                    }
                }
                if !failed {
                    if let Some(sub) = self.subscribers.get(&uid) {
                        sub.primed.store(true, Ordering::Release);
                    }
                }
            } else {
                // Writers may rewrite the timestamp, so each gets its own copy.
                let mut copy = p.clone();
                if let Err(e) = writer.write(&mut copy).await {
                    tracing::debug!(uid = %uid, error = %e, "write failed, removing subscriber");
                    self.subscribers.remove(&uid);
                }
            }
        }
    }

    /// Close out the loop's resources
    ///
    /// When the service has been renewed (a new reader installed over this
    /// loop), only the loop's own reader is closed: the subscribers and the
    /// static-push references now belong to the new loop.
    async fn teardown(&self, own_reader: &Arc<dyn ReadCloser>) {
        let renewed = {
            let slot = self.reader.read().unwrap();
            !slot
                .as_ref()
                .map(|r| Arc::ptr_eq(r, own_reader))
                .unwrap_or(false)
        };

        if renewed {
            // The new loop holds its own relay references; hand back only
            // ours and leave the relays running for it.
            self.release_static_push();
        } else {
            self.stop_static_push();
        }

        own_reader.close("stop service");
        tracing::debug!(publisher = %own_reader.info(), "publisher closed");

        if renewed {
            return;
        }

        let interactive: Vec<String> = self
            .subscribers
            .iter()
            .filter(|e| e.value().writer.info().inter)
            .map(|e| e.key().clone())
            .collect();
        for uid in interactive {
            if let Some((_, sub)) = self.subscribers.remove(&uid) {
                sub.writer.close("closed");
                tracing::debug!(subscriber = %sub.writer.info(), "player closed and removed");
            }
        }
    }

    /// Start a relay to every upstream declared for this stream's app
    ///
    /// Acquisition or connect failures are logged and skipped; they never
    /// abort the fan-out.
    async fn start_static_push(&self) {
        let key = self.info().key;
        for url in self.statics.push_urls_for_key(&key) {
            let push = self.statics.get_or_create(&url);
            match push.start().await {
                Ok(()) => tracing::debug!(stream = %key, url = %url, "static push up"),
                Err(e) => {
                    tracing::warn!(stream = %key, url = %url, error = %e, "static push start failed")
                }
            }
        }
    }

    fn stop_static_push(&self) {
        let key = self.info().key;
        for url in self.statics.push_urls_for_key(&key) {
            match self.statics.get(&url) {
                Ok(push) => {
                    push.stop();
                    self.statics.release(&url);
                }
                Err(e) => tracing::debug!(stream = %key, url = %url, error = %e, "stop static push"),
            }
        }
    }

    fn release_static_push(&self) {
        for url in self.statics.push_urls_for_key(&self.info().key) {
            self.statics.release(&url);
        }
    }

    fn is_send_static_push(&self) -> bool {
        self.statics.has_relays_for_key(&self.info().key)
    }

    fn send_static_push(&self, p: &Packet) {
        let key = self.info().key;
        for url in self.statics.push_urls_for_key(&key) {
            match self.statics.get(&url) {
                Ok(push) => push.write_packet(p.clone()),
                Err(e) => tracing::debug!(stream = %key, url = %url, error = %e, "send static push"),
            }
        }
    }
}

impl std::fmt::Debug for StreamService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamService")
            .field("info", &self.info())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::relay::RelayConnector;
    use crate::switchboard::testing::*;

    /// Connector handing out one fixed recording sink
    struct RecordingConnector {
        sink: Arc<RecordingWriter>,
    }

    #[async_trait]
    impl RelayConnector for RecordingConnector {
        async fn connect(&self, _url: &str) -> Result<Arc<dyn WriteCloser>> {
            Ok(Arc::clone(&self.sink) as Arc<dyn WriteCloser>)
        }
    }

    fn statics() -> Arc<StaticPushRegistry> {
        empty_statics()
    }

    fn service(gop_num: usize, key: &str, statics: Arc<StaticPushRegistry>) -> Arc<StreamService> {
        StreamService::new(gop_num, Info::new(key, "", false), statics)
    }

    #[tokio::test]
    async fn test_cold_subscribe_receives_cache_then_live() {
        let svc = service(1, "live/cam", statics());
        let reader = ScriptedReader::new("live/cam", "pub-1");

        reader.feed_all([
            metadata(),
            video_seq(),
            audio_seq(),
            keyframe(100),
            inter(133),
            inter(166),
            keyframe(199),
            inter(232),
        ]);
        svc.add_reader(reader.clone() as Arc<dyn ReadCloser>);

        // With one retained GOP only [K@199, P@232] survive next to the
        // three special slots.
        eventually(
            || reader.pending() == 0 && svc.stats().cached_packets == 5,
            "publisher backlog cached",
        )
        .await;

        let sub = RecordingWriter::new("live/cam", "sub-1");
        svc.add_writer(sub.clone() as Arc<dyn WriteCloser>);

        reader.feed(inter(265));
        eventually(|| sub.received_count() == 6, "subscriber primed and live").await;

        let got = sub.received();
        assert!(got[0].is_metadata);
        assert!(got[1].is_video_sequence_header());
        assert!(got[2].is_audio_sequence_header());
        assert!(got[3].is_keyframe());
        assert_eq!(
            &sub.received_timestamps()[3..],
            &[199, 232, 265],
            "replay starts at the cached keyframe"
        );

        // Subsequent packets take the live path
        reader.feed(inter(298));
        eventually(|| sub.received_count() == 7, "live packet delivered").await;
        assert_eq!(*sub.received_timestamps().last().unwrap(), 298);
    }

    #[tokio::test]
    async fn test_gop_trim_with_two_groups() {
        let svc = service(2, "live/cam", statics());
        let reader = ScriptedReader::new("live/cam", "pub-1");

        reader.feed_all([
            metadata(),
            video_seq(),
            audio_seq(),
            keyframe(100),
            inter(133),
            inter(166),
            keyframe(199),
            inter(232),
            keyframe(265),
            inter(298),
        ]);
        svc.add_reader(reader.clone() as Arc<dyn ReadCloser>);

        eventually(
            || reader.pending() == 0 && svc.stats().cached_packets == 7,
            "oldest group trimmed",
        )
        .await;
        assert_eq!(svc.stats().gop_groups, 2);

        let sub = RecordingWriter::new("live/cam", "sub-1");
        svc.add_writer(sub.clone() as Arc<dyn WriteCloser>);
        reader.feed(inter(331));

        eventually(|| sub.received_count() == 8, "two-group replay").await;
        assert_eq!(
            &sub.received_timestamps()[3..],
            &[199, 232, 265, 298, 331]
        );
    }

    #[tokio::test]
    async fn test_priming_substitutes_for_live_send() {
        let svc = service(1, "live/cam", statics());
        let reader = ScriptedReader::new("live/cam", "pub-1");
        let sub = RecordingWriter::new("live/cam", "sub-1");

        svc.add_writer(sub.clone() as Arc<dyn WriteCloser>);
        svc.add_reader(reader.clone() as Arc<dyn ReadCloser>);

        // The very first packet ever seen: the subscriber is primed from a
        // cache that already reflects it, and it is not written twice.
        reader.feed(keyframe(100));
        eventually(|| sub.received_count() > 0, "first packet primed").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sub.received_timestamps(), [100]);

        reader.feed(inter(133));
        eventually(|| sub.received_count() == 2, "second packet live").await;
        assert_eq!(sub.received_timestamps(), [100, 133]);
    }

    #[tokio::test]
    async fn test_failing_subscriber_removed_others_unaffected() {
        let svc = service(1, "live/cam", statics());
        let reader = ScriptedReader::new("live/cam", "pub-1");
        let healthy = RecordingWriter::new("live/cam", "sub-ok");
        let flaky = RecordingWriter::new("live/cam", "sub-flaky");

        svc.add_writer(healthy.clone() as Arc<dyn WriteCloser>);
        svc.add_writer(flaky.clone() as Arc<dyn WriteCloser>);
        svc.add_reader(reader.clone() as Arc<dyn ReadCloser>);

        reader.feed(keyframe(100));
        reader.feed(inter(133));
        eventually(
            || healthy.received_count() == 2 && flaky.received_count() == 2,
            "both subscribers live",
        )
        .await;

        // Third live write fails
        flaky.set_fail_from(3);
        reader.feed(inter(166));
        eventually(|| svc.subscriber_count() == 1, "flaky subscriber removed").await;

        reader.feed(inter(199));
        eventually(|| healthy.received_count() == 4, "healthy subscriber unaffected").await;
        assert_eq!(flaky.received_count(), 2);

        // Reader plus the one remaining subscriber
        assert_eq!(svc.check_alive(), 2);
    }

    #[tokio::test]
    async fn test_teardown_closes_interactive_subscribers_only() {
        let svc = service(1, "live/cam", statics());
        let reader = ScriptedReader::new("live/cam", "pub-1");
        let player = RecordingWriter::new("live/cam", "sub-player");
        let relay = RecordingWriter::persistent("live/cam", "sub-relay");

        svc.add_writer(player.clone() as Arc<dyn WriteCloser>);
        svc.add_writer(relay.clone() as Arc<dyn WriteCloser>);
        svc.add_reader(reader.clone() as Arc<dyn ReadCloser>);

        reader.feed(keyframe(100));
        eventually(|| player.received_count() == 1, "subscribers primed").await;

        svc.trans_stop().unwrap();
        eventually(|| svc.subscriber_count() == 1, "player removed").await;

        assert_eq!(reader.close_reason().as_deref(), Some("stop service"));
        assert_eq!(player.close_reason().as_deref(), Some("closed"));
        assert_eq!(relay.close_reason(), None, "persistent subscriber kept");

        // The loop is gone now; a second stop is an error
        assert!(matches!(
            svc.trans_stop(),
            Err(Error::InternalAssertion(_))
        ));
    }

    #[tokio::test]
    async fn test_trans_stop_without_loop_fails() {
        let svc = service(1, "live/cam", statics());
        assert!(matches!(
            svc.trans_stop(),
            Err(Error::InternalAssertion(_))
        ));
    }

    #[tokio::test]
    async fn test_read_error_tears_service_down() {
        let svc = service(1, "live/cam", statics());
        let reader = ScriptedReader::new("live/cam", "pub-1");
        let sub = RecordingWriter::new("live/cam", "sub-1");

        svc.add_writer(sub.clone() as Arc<dyn WriteCloser>);
        svc.add_reader(reader.clone() as Arc<dyn ReadCloser>);

        reader.feed(keyframe(100));
        eventually(|| sub.received_count() == 1, "subscriber primed").await;

        reader.finish();
        eventually(|| svc.subscriber_count() == 0, "teardown after read error").await;
        assert_eq!(reader.close_reason().as_deref(), Some("stop service"));
        assert_eq!(sub.close_reason().as_deref(), Some("closed"));
    }

    #[tokio::test]
    async fn test_check_alive_prunes_stale_endpoints() {
        let svc = service(1, "live/cam", statics());
        let reader = ScriptedReader::new("live/cam", "pub-1");
        let sub_a = RecordingWriter::new("live/cam", "sub-a");
        let sub_b = RecordingWriter::new("live/cam", "sub-b");

        svc.add_writer(sub_a.clone() as Arc<dyn WriteCloser>);
        svc.add_writer(sub_b.clone() as Arc<dyn WriteCloser>);
        svc.add_reader(reader.clone() as Arc<dyn ReadCloser>);

        assert_eq!(svc.check_alive(), 3);

        sub_b.set_alive(false);
        assert_eq!(svc.check_alive(), 2);
        assert_eq!(sub_b.close_reason().as_deref(), Some("write timeout"));
        assert_eq!(svc.subscriber_count(), 1);

        reader.set_alive(false);
        assert_eq!(svc.check_alive(), 1);
        assert_eq!(reader.close_reason().as_deref(), Some("read timeout"));
        // The dead reader stays installed; the loop notices on its next read
        assert_eq!(svc.publisher_uid(), "pub-1");
    }

    #[tokio::test]
    async fn test_copy_transplants_subscribers_with_rebase() {
        let reg = statics();
        let src = service(1, "live/cam", Arc::clone(&reg));
        let dst = service(1, "live/cam", reg);
        let sub_a = RecordingWriter::new("live/cam", "sub-a");
        let sub_b = RecordingWriter::new("live/cam", "sub-b");

        src.add_writer(sub_a.clone() as Arc<dyn WriteCloser>);
        src.add_writer(sub_b.clone() as Arc<dyn WriteCloser>);

        src.copy(&dst);

        assert_eq!(src.subscriber_count(), 0);
        assert_eq!(dst.subscriber_count(), 2);
        assert_eq!(sub_a.calc_base_timestamp_calls(), 1);
        assert_eq!(sub_b.calc_base_timestamp_calls(), 1);
    }

    #[tokio::test]
    async fn test_static_push_mirrors_stream() {
        let sink = RecordingWriter::persistent("up/cam", "relay-sink");
        let reg = Arc::new(StaticPushRegistry::new(Arc::new(RecordingConnector {
            sink: Arc::clone(&sink),
        })));
        reg.register_app("live", vec!["rtmp://up/live".into()]);

        let svc = service(1, "live/cam", Arc::clone(&reg));
        let reader = ScriptedReader::new("live/cam", "pub-1");
        svc.add_reader(reader.clone() as Arc<dyn ReadCloser>);

        eventually(|| reg.relay_count() == 1, "relay created").await;

        reader.feed(metadata());
        reader.feed(keyframe(100));
        eventually(|| sink.received_count() == 2, "packets mirrored upstream").await;

        svc.trans_stop().unwrap();
        eventually(|| reg.relay_count() == 0, "relay stopped and released").await;
    }
}
