//! Settings fixed for the life of an orchestrator.

use std::time::Duration;

use crate::error::{PoolError, Result};
use crate::pool::ExecutionKind;

/// Default iteration budget.
pub const DEFAULT_MAX_ITERS: u32 = 80;

/// Default interval at which parked workers look for `continue`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything needed to build an orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolConfig {
    /// Grid width in pixels.
    pub width: usize,
    /// Grid height in pixels.
    pub height: usize,
    /// Workers per generation.
    pub workers: usize,
    /// The kind of the first generation.
    pub kind: ExecutionKind,
    /// The iteration budget of the first cycle.
    pub max_iters: u32,
    /// How often a parked worker polls for `continue` or `terminate`.
    /// Also bounds how long a parked worker takes to notice termination.
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            width: 800,
            height: 600,
            workers: default_workers(),
            kind: ExecutionKind::Process,
            max_iters: DEFAULT_MAX_ITERS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PoolConfig {
    /// A default configuration for a `width` x `height` grid.
    pub fn new(width: usize, height: usize) -> Self {
        PoolConfig {
            width,
            height,
            ..Default::default()
        }
    }

    /// Reject settings no pool can run with.  Grids with no rows are
    /// fine; every worker just gets an empty band.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        Ok(())
    }
}

/// Half the cores, plus one.
pub fn default_workers() -> usize {
    1 + num_cpus::get() / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.workers >= 1);
        assert_eq!(config.max_iters, 80);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = PoolConfig {
            workers: 0,
            ..PoolConfig::new(10, 4)
        };
        match config.validate() {
            Err(PoolError::ZeroWorkers) => {}
            other => panic!("expected ZeroWorkers, got {:?}", other),
        }
    }

    #[test]
    fn empty_grids_are_allowed() {
        assert!(PoolConfig::new(0, 0).validate().is_ok());
    }
}
