//! # relay-rs
//!
//! A live media relay switchboard: one publisher in, N subscribers out, per
//! stream key. Transports (RTMP, HTTP-FLV, HLS) stay outside; they surface
//! endpoints through the [`ReadCloser`] and [`WriteCloser`] contracts and the
//! switchboard handles everything in between:
//!
//! - per-key stream lifecycle through the [`StreamServer`] registry
//! - a bounded GOP replay cache so late joiners start decoding immediately
//! - a fan-out loop that isolates slow or broken subscribers
//! - aliveness-based garbage collection of dead endpoints
//! - mirroring of published streams to predeclared upstream RTMP targets
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use relay_rs::{StaticPushRegistry, StreamServer, SwitchboardConfig};
//! # use relay_rs::RelayConnector;
//! # fn rtmp_client_connector() -> Arc<dyn RelayConnector> { unimplemented!() }
//!
//! # fn main() -> relay_rs::Result<()> {
//! let statics = Arc::new(StaticPushRegistry::new(rtmp_client_connector()));
//! statics.register_app("live", vec!["rtmp://upstream/live".into()]);
//!
//! let server = StreamServer::new(SwitchboardConfig::default().gop_num(2), statics)?;
//! let _sweeper = server.spawn_check_alive();
//!
//! // Transports call server.handle_reader(..) / server.handle_writer(..)
//! // with their endpoints as connections arrive.
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod media;
pub mod relay;
pub mod stats;
pub mod switchboard;

pub use cache::{Cache, GopCache, SpecialCache};
pub use config::SwitchboardConfig;
pub use endpoint::{EndpointBase, Info, ReadCloser, WriteCloser};
pub use error::{Error, Result};
pub use media::{Packet, PacketHeader};
pub use relay::{RelayConnector, StaticPush, StaticPushRegistry};
pub use stats::StreamSummary;
pub use switchboard::{StreamServer, StreamService};
