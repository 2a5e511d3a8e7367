//! Generations of worker threads.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{trace, warn};

use super::{ExecutionKind, GenerationStatus, WorkerGroup};
use crate::error::{PoolError, Result};
use crate::sync::Synchronizer;
use crate::worker::Worker;

enum Slot {
    Running(JoinHandle<u64>),
    Exited,
    Failed,
}

/// One named thread per worker.  The frame is shared through an `Arc`,
/// and the synchronizer is an ordinary heap allocation.
pub struct ThreadGeneration {
    sync: Arc<Synchronizer>,
    slots: Vec<Slot>,
}

impl ThreadGeneration {
    /// Number of threads that have not been joined yet.
    pub fn live(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| match s {
                Slot::Running(_) => true,
                _ => false,
            })
            .count()
    }
}

impl WorkerGroup for ThreadGeneration {
    const KIND: ExecutionKind = ExecutionKind::Thread;

    fn synchronizer(group_size: usize, poll_interval: Duration) -> Result<Synchronizer> {
        Ok(Synchronizer::local(group_size, poll_interval))
    }

    fn start(workers: Vec<Worker>, sync: Arc<Synchronizer>) -> Result<Self> {
        let mut slots = Vec::with_capacity(workers.len());
        for worker in workers {
            let id = worker.id();
            let spawned = thread::Builder::new()
                .name(format!("mandel-worker-{}", id))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => slots.push(Slot::Running(handle)),
                Err(source) => {
                    // The threads already running would wait at the
                    // barrier forever for the one that never started.
                    sync.terminate();
                    return Err(PoolError::Spawn {
                        kind: Self::KIND,
                        id,
                        source,
                    });
                }
            }
        }
        Ok(ThreadGeneration { sync, slots })
    }

    fn sync(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    fn poll(&mut self) -> GenerationStatus {
        for (id, slot) in self.slots.iter_mut().enumerate() {
            let finished = match slot {
                Slot::Running(handle) => handle.is_finished(),
                _ => false,
            };
            if !finished {
                continue;
            }
            if let Slot::Running(handle) = std::mem::replace(slot, Slot::Exited) {
                match handle.join() {
                    Ok(cycles) => trace!("thread worker {} exited after {} cycles", id, cycles),
                    Err(_) => {
                        warn!("thread worker {} panicked", id);
                        *slot = Slot::Failed;
                    }
                }
            }
        }

        let mut status = GenerationStatus {
            kind: Self::KIND,
            live: 0,
            exited: 0,
            failed: 0,
            terminating: self.sync.is_terminated(),
        };
        for slot in &self.slots {
            match slot {
                Slot::Running(_) => status.live += 1,
                Slot::Exited => status.exited += 1,
                Slot::Failed => status.failed += 1,
            }
        }
        status
    }

    fn kill(&mut self) {
        // Threads cannot be killed.  They stay counted as live, so the
        // pool keeps the generation draining until each one has seen
        // `terminate` and left on its own.
        self.sync.terminate();
        let live = self.live();
        if live > 0 {
            warn!("{} thread workers cannot be killed; waiting for them to leave", live);
        }
    }
}

impl Drop for ThreadGeneration {
    fn drop(&mut self) {
        self.sync.terminate();
    }
}
