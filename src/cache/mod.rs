//! Per-stream replay cache
//!
//! Everything a late subscriber needs before it can join a live stream:
//! the stream metadata, both sequence headers, and a short GOP replay
//! buffer. [`Cache::write`] classifies each inbound packet into one of the
//! four slots; [`Cache::send`] replays the whole state in decode order.
//!
//! Audio packets that are not AAC sequence headers flow into the GOP buffer
//! alongside video, which keeps the A/V interleave intact during replay.

mod gop;
mod special;

pub use gop::GopCache;
pub use special::SpecialCache;

use crate::endpoint::WriteCloser;
use crate::error::Result;
use crate::media::{Packet, PacketHeader};

/// Composite cache: metadata + sequence header latches + GOP ring
#[derive(Debug)]
pub struct Cache {
    metadata: SpecialCache,
    video_seq: SpecialCache,
    audio_seq: SpecialCache,
    gop: GopCache,
}

impl Cache {
    /// Create a cache retaining up to `gop_num` GOPs
    pub fn new(gop_num: usize) -> Self {
        Self {
            metadata: SpecialCache::new(),
            video_seq: SpecialCache::new(),
            audio_seq: SpecialCache::new(),
            gop: GopCache::new(gop_num),
        }
    }

    /// Classify one inbound packet into its slot
    pub fn write(&mut self, p: Packet) {
        if p.is_metadata {
            self.metadata.write(p);
            return;
        }

        match p.header {
            PacketHeader::Audio(h) if !p.is_video => {
                if h.is_sequence_header() {
                    self.audio_seq.write(p);
                    return;
                }
            }
            PacketHeader::Video(h) if p.is_video => {
                if h.is_sequence_header() {
                    self.video_seq.write(p);
                    return;
                }
            }
            _ => {}
        }

        self.gop.write(p);
    }

    /// Replay the cached state in decode order: metadata, video sequence
    /// header, audio sequence header, then the GOP buffer. The first write
    /// error aborts and is returned.
    pub async fn send(&self, w: &dyn WriteCloser) -> Result<()> {
        self.metadata.send(w).await?;
        self.video_seq.send(w).await?;
        self.audio_seq.send(w).await?;
        self.gop.send(w).await?;
        Ok(())
    }

    /// Snapshot of the cached packets in send order
    ///
    /// The fan-out loop primes subscribers from this snapshot so the cache
    /// lock is never held across a subscriber write.
    pub fn playback(&self) -> Vec<Packet> {
        let mut packets = Vec::with_capacity(3 + self.gop.packet_count());
        if let Some(p) = self.metadata.packet() {
            packets.push(p.clone());
        }
        if let Some(p) = self.video_seq.packet() {
            packets.push(p.clone());
        }
        if let Some(p) = self.audio_seq.packet() {
            packets.push(p.clone());
        }
        packets.extend(self.gop.packets().cloned());
        packets
    }

    /// Number of retained GOP groups
    pub fn gop_groups(&self) -> usize {
        self.gop.group_count()
    }

    /// Total retained packets across all slots
    pub fn cached_packets(&self) -> usize {
        let specials = [&self.metadata, &self.video_seq, &self.audio_seq]
            .iter()
            .filter(|c| c.packet().is_some())
            .count();
        specials + self.gop.packet_count()
    }
}
