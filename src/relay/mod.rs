//! Static-push relays to upstream RTMP targets
//!
//! When an application name has upstream URLs declared, every stream
//! published under it is mirrored to `base_url/stream` on each target.
//! Relays are persistent endpoints: they survive publisher churn and are
//! shared between services through a refcounted process-wide registry.

mod registry;
mod static_push;

pub use registry::StaticPushRegistry;
pub use static_push::{RelayConnector, StaticPush};
