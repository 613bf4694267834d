//! GOP replay buffer for late-joiner support
//!
//! A fresh subscriber needs at least one video keyframe before it can decode
//! anything, so the switchboard keeps the last N GOPs and replays them on
//! subscribe. One GOP is the minimum that guarantees decode startup with
//! bounded memory; operators can raise the capacity to trade memory for a
//! smoother join.

use std::collections::VecDeque;

use crate::endpoint::WriteCloser;
use crate::error::Result;
use crate::media::Packet;

/// One group of pictures: a keyframe and everything up to the next one,
/// audio and data packets interleaved in arrival order
#[derive(Debug, Default)]
struct Gop {
    packets: Vec<Packet>,
}

/// Bounded ring of recent GOPs, trimmed on keyframes
#[derive(Debug)]
pub struct GopCache {
    groups: VecDeque<Gop>,
    capacity: usize,
    started: bool,
}

impl GopCache {
    /// Create a cache holding up to `capacity` groups (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: VecDeque::new(),
            capacity: capacity.max(1),
            started: false,
        }
    }

    /// Route one packet into the buffer
    ///
    /// A video keyframe opens a new group and evicts the oldest groups down
    /// to capacity. Packets arriving before the first keyframe are dropped;
    /// they are not decodable by a late joiner anyway.
    pub fn write(&mut self, p: Packet) {
        if p.is_keyframe() {
            self.groups.push_back(Gop::default());
            self.started = true;
            while self.groups.len() > self.capacity {
                self.groups.pop_front();
            }
        } else if !self.started {
            return;
        }

        if let Some(group) = self.groups.back_mut() {
            group.packets.push(p);
        }
    }

    /// Replay every cached packet in order; the first error aborts
    pub async fn send(&self, w: &dyn WriteCloser) -> Result<()> {
        for p in self.packets() {
            let mut copy = p.clone();
            w.write(&mut copy).await?;
        }
        Ok(())
    }

    /// Cached packets, oldest group first
    pub fn packets(&self) -> impl Iterator<Item = &Packet> {
        self.groups.iter().flat_map(|g| g.packets.iter())
    }

    /// Whether a keyframe has been seen yet
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Number of retained groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of retained packets across all groups
    pub fn packet_count(&self) -> usize {
        self.groups.iter().map(|g| g.packets.len()).sum()
    }
}
