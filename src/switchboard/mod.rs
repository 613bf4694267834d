//! Stream switchboard
//!
//! The switchboard ties ingest and egress transports together: the
//! [`StreamServer`] registry resolves stream keys to per-key
//! [`StreamService`]s, and each service runs one fan-out task copying packets
//! from its publisher to every subscriber.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<StreamServer>
//!                  ┌──────────────────────────┐
//!                  │ services: key ─► Arc<    │
//!                  │   StreamService {        │
//!                  │     cache, reader,       │
//!                  │     subscribers,         │
//!                  │   }>                     │
//!                  └────────────┬─────────────┘
//!                               │ one fan-out task per service
//!            ┌──────────────────┼──────────────────┐
//!            ▼                  ▼                  ▼
//!       [Publisher]       [Subscriber]       [Static push]
//!       reader.read()     writer.write()     relay queue
//! ```
//!
//! A new subscriber is primed from the replay cache (metadata, sequence
//! headers, buffered GOPs) before it switches to live packets, so a decoder
//! can start immediately instead of waiting for the next keyframe.

pub mod server;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use server::StreamServer;
pub use service::StreamService;
