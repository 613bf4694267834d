//! Media data model
//!
//! This module provides:
//! - The [`Packet`] carrier moved between endpoints
//! - Typed packet headers for classification without payload sniffing
//! - The FLV-derived frame type, codec and format enums

mod packet;

pub use packet::{
    AacPacketType, AudioHeader, AvcPacketType, Packet, PacketHeader, SoundFormat, VideoFrameType,
    VideoHeader,
};
