//! Introspection snapshots for the admin surface
//!
//! The HTTP admin API is an external collaborator; it renders its stream
//! table from these snapshots rather than reaching into live state.

/// Point-in-time summary of one stream service
#[derive(Debug, Clone)]
pub struct StreamSummary {
    /// Stream key
    pub key: String,
    /// UID of the current publisher, empty when none
    pub publisher_uid: String,
    /// Number of attached subscribers
    pub subscriber_count: usize,
    /// GOP groups currently retained
    pub gop_groups: usize,
    /// Packets retained across all cache slots
    pub cached_packets: usize,
}
