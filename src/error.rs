//! Crate-wide error types
//!
//! Endpoint I/O failures are carried as `ReadFailed` / `WriteFailed` and decide
//! the fate of the endpoint that produced them: a failed reader ends its
//! service, a failed writer is dropped from the fan-out. `Timeout` is
//! synthesised by the aliveness sweeper and handled the same way.

use thiserror::Error;

/// Error type for switchboard operations
#[derive(Debug, Error)]
pub enum Error {
    /// Reading from a publisher endpoint failed (EOF or transport error)
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// Writing to a subscriber endpoint failed
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// An endpoint exceeded its activity window
    #[error("endpoint timed out: {0}")]
    Timeout(String),

    /// No static-push relay is registered for the given URL
    #[error("no relay for {0}")]
    NoRelay(String),

    /// Configuration rejected during validation
    #[error("bad configuration: {0}")]
    BadConfig(String),

    /// An internal precondition was violated
    #[error("internal assertion: {0}")]
    InternalAssertion(String),
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;
