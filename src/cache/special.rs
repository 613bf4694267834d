//! Single-slot latch for metadata and sequence headers
//!
//! Metadata, the AVC decoder configuration and the AAC AudioSpecificConfig
//! each occur at most once per publisher session (re-sent on encoder
//! reconfiguration). A subscriber only ever needs the most recent instance,
//! so one slot that overwrites on write is enough.

use crate::endpoint::WriteCloser;
use crate::error::Result;
use crate::media::Packet;

/// Latch holding the most recent special packet
#[derive(Debug, Default)]
pub struct SpecialCache {
    packet: Option<Packet>,
}

impl SpecialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `p`, overwriting any previous packet
    pub fn write(&mut self, p: Packet) {
        self.packet = Some(p);
    }

    /// Get the latched packet, if any
    pub fn packet(&self) -> Option<&Packet> {
        self.packet.as_ref()
    }

    /// Emit the latched packet if present, propagating the write error
    pub async fn send(&self, w: &dyn WriteCloser) -> Result<()> {
        if let Some(p) = &self.packet {
            let mut copy = p.clone();
            w.write(&mut copy).await?;
        }
        Ok(())
    }
}
