// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The worker synchronizer.
//!
//! One synchronizer drives one generation of workers through compute
//! cycles in lockstep.  It owns a barrier sized to the group and four
//! flags:
//!
//! * `busy`: the group is inside a cycle;
//! * `done`: every worker has finished the cycle and is parked, so the
//!   grid may be read;
//! * `continue`: the orchestrator has consumed the frame and the
//!   parked workers may start the next cycle;
//! * `terminate`: the generation is shutting down.  Never cleared.
//!
//! A cycle, seen from the workers:
//!
//! ```text
//!   before_hook: barrier; leader clears `continue`, sets `busy`
//!   compute:     each worker writes only its own rows
//!   after_hook:  barrier; leader clears `busy`, sets `done`;
//!                everyone polls until `continue` or `terminate`
//! ```
//!
//! Only the last worker to reach a barrier (its leader) writes the
//! group flags, so a slow worker can never re-raise `done` after the
//! orchestrator has already released the group.  The orchestrator
//! owns the other side: it reads the grid only while `done` is set
//! and then calls `release`, which clears `done` and raises
//! `continue`.
//!
//! Everything lives in a `#[repr(C)]` block of atomics.  For thread
//! generations the block is an ordinary heap allocation; for process
//! generations it is placed in a shared mapping before the workers are
//! forked.  The barrier spins on that same memory, so the protocol is
//! identical for both.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::utils::{Backoff, CachePadded};

use crate::error::Result;
use crate::shared::SharedRegion;

/// How long a barrier waiter sleeps once spinning stops paying off.
const BARRIER_NAP: Duration = Duration::from_micros(200);

/// What a worker learned from a barrier wait.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arrival {
    /// The last worker to arrive.  Exactly one per crossing.
    Leader,
    /// Any other worker.
    Follower,
    /// The generation was terminated while waiting.
    Aborted,
}

/// A reusable barrier built only from atomics, so that it works inside
/// memory shared between processes.  Waiters spin, then yield, then
/// nap, and they give up as soon as the abort flag they are handed
/// goes up.
#[repr(C)]
pub struct SpinBarrier {
    parties: usize,
    arrived: CachePadded<AtomicUsize>,
    phase: CachePadded<AtomicUsize>,
}

impl SpinBarrier {
    /// A barrier for `parties` waiters.
    pub fn new(parties: usize) -> Self {
        SpinBarrier {
            parties,
            arrived: CachePadded::new(AtomicUsize::new(0)),
            phase: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Block until all parties have arrived, or until `abort` is set.
    pub fn wait(&self, abort: &AtomicBool) -> Arrival {
        let phase = self.phase.load(Ordering::Acquire);
        if self.arrived.fetch_add(1, Ordering::AcqRel) + 1 == self.parties {
            self.arrived.store(0, Ordering::Relaxed);
            self.phase.fetch_add(1, Ordering::AcqRel);
            return Arrival::Leader;
        }

        let backoff = Backoff::new();
        while self.phase.load(Ordering::Acquire) == phase {
            if abort.load(Ordering::SeqCst) {
                return Arrival::Aborted;
            }
            if backoff.is_completed() {
                thread::sleep(BARRIER_NAP);
            } else {
                backoff.snooze();
            }
        }
        Arrival::Follower
    }
}

/// Where a generation is in its cycle, as seen by the orchestrator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not yet started, or released and not yet back at work.
    Idle,
    /// Computing.
    Busy,
    /// Finished and parked; the grid may be read.
    Done,
    /// Shutting down.
    Terminated,
}

#[repr(C)]
struct SyncState {
    busy: CachePadded<AtomicBool>,
    done: CachePadded<AtomicBool>,
    resume: CachePadded<AtomicBool>,
    terminate: CachePadded<AtomicBool>,
    cycles: CachePadded<AtomicU64>,
    barrier: SpinBarrier,
}

impl SyncState {
    fn new(group_size: usize) -> Self {
        SyncState {
            busy: CachePadded::new(AtomicBool::new(false)),
            done: CachePadded::new(AtomicBool::new(false)),
            resume: CachePadded::new(AtomicBool::new(false)),
            terminate: CachePadded::new(AtomicBool::new(false)),
            cycles: CachePadded::new(AtomicU64::new(0)),
            barrier: SpinBarrier::new(group_size),
        }
    }
}

enum Placement {
    Local(Box<SyncState>),
    Shared(SharedRegion<SyncState>),
}

/// The rendezvous protocol for one generation.  Shared by reference
/// (`Arc`) between the pool manager, the orchestrator, and every worker.
pub struct Synchronizer {
    group_size: usize,
    poll_interval: Duration,
    placement: Placement,
}

impl Synchronizer {
    /// A synchronizer for threads of this process.
    pub fn local(group_size: usize, poll_interval: Duration) -> Self {
        Synchronizer {
            group_size,
            poll_interval,
            placement: Placement::Local(Box::new(SyncState::new(group_size))),
        }
    }

    /// A synchronizer that keeps working after `fork()`.
    pub fn shared(group_size: usize, poll_interval: Duration) -> Result<Self> {
        Ok(Synchronizer {
            group_size,
            poll_interval,
            placement: Placement::Shared(SharedRegion::new(1, |_| SyncState::new(group_size))?),
        })
    }

    fn state(&self) -> &SyncState {
        match self.placement {
            Placement::Local(ref state) => &**state,
            Placement::Shared(ref region) => region.get(0),
        }
    }

    /// Number of workers in the group.  Fixed for the generation's life.
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Called by every worker at the top of its loop.  Returns `false`
    /// if the generation was terminated while the worker waited.
    pub fn worker_before_hook(&self) -> bool {
        let s = self.state();
        match s.barrier.wait(&s.terminate) {
            Arrival::Aborted => false,
            Arrival::Leader => {
                if s.terminate.load(Ordering::SeqCst) {
                    return false;
                }
                s.resume.store(false, Ordering::SeqCst);
                s.busy.store(true, Ordering::SeqCst);
                true
            }
            Arrival::Follower => !s.terminate.load(Ordering::SeqCst),
        }
    }

    /// Called by every worker once its rows are written.  Waits for the
    /// rest of the group, announces the frame, then parks until the
    /// orchestrator releases the group.  Returns `false` once the
    /// generation is terminating.
    pub fn worker_after_hook(&self) -> bool {
        let s = self.state();
        match s.barrier.wait(&s.terminate) {
            Arrival::Aborted => return false,
            Arrival::Leader => {
                s.cycles.fetch_add(1, Ordering::SeqCst);
                s.busy.store(false, Ordering::SeqCst);
                s.done.store(true, Ordering::SeqCst);
            }
            Arrival::Follower => {}
        }

        let backoff = Backoff::new();
        loop {
            if s.terminate.load(Ordering::SeqCst) {
                return false;
            }
            if s.resume.load(Ordering::SeqCst) {
                return true;
            }
            if backoff.is_completed() {
                thread::sleep(self.poll_interval);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Hand the group its next cycle.  Only call after `is_done`
    /// returned true and the grid has been read.
    pub fn release(&self) {
        let s = self.state();
        s.done.store(false, Ordering::SeqCst);
        s.resume.store(true, Ordering::SeqCst);
    }

    /// Ask every worker to leave its loop.  Returns immediately; the
    /// workers drain on their own.
    pub fn terminate(&self) {
        let s = self.state();
        s.terminate.store(true, Ordering::SeqCst);
        s.resume.store(true, Ordering::SeqCst);
    }

    /// True while the group is computing.
    pub fn is_busy(&self) -> bool {
        self.state().busy.load(Ordering::SeqCst)
    }

    /// True while a finished frame is waiting to be consumed.
    pub fn is_done(&self) -> bool {
        self.state().done.load(Ordering::SeqCst)
    }

    /// True once `terminate` has been called.
    pub fn is_terminated(&self) -> bool {
        self.state().terminate.load(Ordering::SeqCst)
    }

    /// True when every worker is parked after a finished cycle, which
    /// is when the orchestrator may change the next cycle's inputs.
    pub fn is_parked(&self) -> bool {
        self.is_done() && !self.is_busy() && !self.is_terminated()
    }

    /// Cycles completed by this generation.
    pub fn completed_cycles(&self) -> u64 {
        self.state().cycles.load(Ordering::SeqCst)
    }

    /// The flags folded into one state.
    pub fn phase(&self) -> Phase {
        if self.is_terminated() {
            Phase::Terminated
        } else if self.is_done() {
            Phase::Done
        } else if self.is_busy() {
            Phase::Busy
        } else {
            Phase::Idle
        }
    }
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("group_size", &self.group_size)
            .field("phase", &self.phase())
            .field("cycles", &self.completed_cycles())
            .finish()
    }
}
