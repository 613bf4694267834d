//! Switchboard configuration

use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration consumed by the switchboard core
///
/// Transport settings (listen addresses, chunk sizes, static-push URL lists)
/// belong to the external collaborators.
#[derive(Debug, Clone)]
pub struct SwitchboardConfig {
    /// GOP groups retained per stream for late joiners
    pub gop_num: usize,

    /// Interval of the aliveness sweeper; values under one second are
    /// clamped up when the sweeper is spawned
    pub check_alive_interval: Duration,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            gop_num: 1,
            check_alive_interval: Duration::from_secs(5),
        }
    }
}

impl SwitchboardConfig {
    /// Set the number of retained GOPs
    pub fn gop_num(mut self, n: usize) -> Self {
        self.gop_num = n;
        self
    }

    /// Set the sweeper interval
    pub fn check_alive_interval(mut self, interval: Duration) -> Self {
        self.check_alive_interval = interval;
        self
    }

    /// Reject configurations the core cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.gop_num == 0 {
            return Err(Error::BadConfig("gop_num must be at least 1".into()));
        }
        Ok(())
    }
}
