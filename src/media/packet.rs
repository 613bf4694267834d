//! Media packet model
//!
//! A [`Packet`] is the unit the switchboard moves around: one media frame
//! (or metadata blob) plus the flags the cache and fan-out need to route it.
//! The payload is `bytes::Bytes`, so the per-subscriber copies made by the
//! fan-out loop only bump a reference count.
//!
//! The typed [`PacketHeader`] replaces wire-level sniffing: the ingest
//! transport decodes the first payload bytes once and the rest of the crate
//! works off the tagged variant.

use bytes::Bytes;

/// Video frame type (upper 4 bits of the first FLV video byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe = 1,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame = 2,
    /// Disposable inter frame (H.263 only)
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// AVC packet type (byte after the video tag header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// Sequence header (AVCDecoderConfigurationRecord)
    SequenceHeader = 0,
    /// NAL units
    Nalu = 1,
    /// End of sequence
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// Audio sound format (upper 4 bits of the first FLV audio byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundFormat {
    /// Linear PCM, platform endian
    LinearPcmPlatform = 0,
    /// ADPCM
    Adpcm = 1,
    /// MP3
    Mp3 = 2,
    /// Linear PCM, little endian
    LinearPcmLe = 3,
    /// Nellymoser 16kHz mono
    Nellymoser16kMono = 4,
    /// Nellymoser 8kHz mono
    Nellymoser8kMono = 5,
    /// Nellymoser
    Nellymoser = 6,
    /// G.711 A-law
    G711ALaw = 7,
    /// G.711 mu-law
    G711MuLaw = 8,
    /// AAC
    Aac = 10,
    /// Speex
    Speex = 11,
    /// MP3 8kHz
    Mp38k = 14,
    /// Device-specific sound
    DeviceSpecific = 15,
}

impl SoundFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(SoundFormat::LinearPcmPlatform),
            1 => Some(SoundFormat::Adpcm),
            2 => Some(SoundFormat::Mp3),
            3 => Some(SoundFormat::LinearPcmLe),
            4 => Some(SoundFormat::Nellymoser16kMono),
            5 => Some(SoundFormat::Nellymoser8kMono),
            6 => Some(SoundFormat::Nellymoser),
            7 => Some(SoundFormat::G711ALaw),
            8 => Some(SoundFormat::G711MuLaw),
            10 => Some(SoundFormat::Aac),
            11 => Some(SoundFormat::Speex),
            14 => Some(SoundFormat::Mp38k),
            15 => Some(SoundFormat::DeviceSpecific),
            _ => None,
        }
    }
}

/// AAC packet type (byte after the audio tag header, AAC only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    /// Sequence header (AudioSpecificConfig)
    SequenceHeader = 0,
    /// Raw AAC frame data
    Raw = 1,
}

impl AacPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AacPacketType::SequenceHeader),
            1 => Some(AacPacketType::Raw),
            _ => None,
        }
    }
}

/// Typed header of a video packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoHeader {
    /// Frame type from the tag header
    pub frame_type: VideoFrameType,
    /// AVC packet type
    pub packet_type: AvcPacketType,
}

impl VideoHeader {
    /// Check if this frame starts a GOP
    pub fn is_keyframe(&self) -> bool {
        self.frame_type.is_keyframe()
    }

    /// Check if this is a decoder configuration frame
    pub fn is_sequence_header(&self) -> bool {
        self.packet_type == AvcPacketType::SequenceHeader
    }
}

/// Typed header of an audio packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    /// Codec of the audio payload
    pub sound_format: SoundFormat,
    /// AAC packet type; `Raw` for non-AAC formats
    pub aac_packet_type: AacPacketType,
}

impl AudioHeader {
    /// Check if this is an AAC AudioSpecificConfig frame
    pub fn is_sequence_header(&self) -> bool {
        self.sound_format == SoundFormat::Aac
            && self.aac_packet_type == AacPacketType::SequenceHeader
    }
}

/// Tagged packet header
///
/// `None` covers metadata packets and payloads the ingest transport could not
/// classify; the cache routes those through the GOP path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketHeader {
    Video(VideoHeader),
    Audio(AudioHeader),
    #[default]
    None,
}

/// A single media unit moving through the switchboard
///
/// Cheap to clone: the payload is reference-counted. Writers may rewrite
/// `timestamp` in place, which is why the fan-out loop hands each subscriber
/// its own copy.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    /// Whether the payload is video data
    pub is_video: bool,
    /// Whether the payload is an out-of-band stream description
    pub is_metadata: bool,
    /// Presentation timestamp in milliseconds, 32-bit wrapping
    pub timestamp: u32,
    /// RTMP message stream ID
    pub stream_id: u32,
    /// Opaque frame payload
    pub payload: Bytes,
    /// Typed header, decoded once at ingest
    pub header: PacketHeader,
}

impl Packet {
    /// Create a video packet
    pub fn video(
        timestamp: u32,
        payload: Bytes,
        frame_type: VideoFrameType,
        packet_type: AvcPacketType,
    ) -> Self {
        Self {
            is_video: true,
            is_metadata: false,
            timestamp,
            stream_id: 0,
            payload,
            header: PacketHeader::Video(VideoHeader {
                frame_type,
                packet_type,
            }),
        }
    }

    /// Create an audio packet
    pub fn audio(
        timestamp: u32,
        payload: Bytes,
        sound_format: SoundFormat,
        aac_packet_type: AacPacketType,
    ) -> Self {
        Self {
            is_video: false,
            is_metadata: false,
            timestamp,
            stream_id: 0,
            payload,
            header: PacketHeader::Audio(AudioHeader {
                sound_format,
                aac_packet_type,
            }),
        }
    }

    /// Create a metadata packet
    pub fn metadata(payload: Bytes) -> Self {
        Self {
            is_video: false,
            is_metadata: true,
            timestamp: 0,
            stream_id: 0,
            payload,
            header: PacketHeader::None,
        }
    }

    /// Check if this is a video keyframe
    pub fn is_keyframe(&self) -> bool {
        match self.header {
            PacketHeader::Video(h) => self.is_video && h.is_keyframe(),
            _ => false,
        }
    }

    /// Check if this is an AVC sequence header
    pub fn is_video_sequence_header(&self) -> bool {
        match self.header {
            PacketHeader::Video(h) => self.is_video && h.is_sequence_header(),
            _ => false,
        }
    }

    /// Check if this is an AAC sequence header
    pub fn is_audio_sequence_header(&self) -> bool {
        match self.header {
            PacketHeader::Audio(h) => !self.is_video && h.is_sequence_header(),
            _ => false,
        }
    }

    /// Get the payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
