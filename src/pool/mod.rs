// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The worker pool manager.
//!
//! Workers come in generations.  A generation is a fixed-size group of
//! workers of one execution kind, sharing one synchronizer.  The pool
//! keeps at most one generation *active*.  Switching kinds terminates
//! the active generation and parks it on a draining list; the new kind
//! is not started until every worker of every draining generation has
//! exited, so two generations never write the grid at the same time.

mod process;
mod thread;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub use self::process::ProcessGeneration;
pub use self::thread::ThreadGeneration;

use crate::error::Result;
use crate::frame::FrameBuffer;
use crate::kernel::Kernel;
use crate::ranges::divide_into_ranges;
use crate::sync::Synchronizer;
use crate::worker::Worker;

/// How the workers of a generation run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionKind {
    /// One forked process per worker; the frame lives in shared memory.
    Process,
    /// One thread per worker inside this process.
    Thread,
}

impl ExecutionKind {
    /// The other kind.
    pub fn toggled(self) -> ExecutionKind {
        match self {
            ExecutionKind::Process => ExecutionKind::Thread,
            ExecutionKind::Thread => ExecutionKind::Process,
        }
    }

    /// Lower-case name, as accepted by `FromStr`.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionKind::Process => "process",
            ExecutionKind::Thread => "thread",
        }
    }
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "process" => Ok(ExecutionKind::Process),
            "thread" => Ok(ExecutionKind::Thread),
            other => Err(format!("unknown execution kind '{}'", other)),
        }
    }
}

/// A snapshot of the workers of one generation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GenerationStatus {
    /// The kind of the generation.
    pub kind: ExecutionKind,
    /// Workers that have not exited yet.
    pub live: usize,
    /// Workers that exited normally.
    pub exited: usize,
    /// Workers that died: a panic in a thread, or a non-zero exit
    /// status or signal in a process.
    pub failed: usize,
    /// Whether `terminate` has been raised.
    pub terminating: bool,
}

impl GenerationStatus {
    /// Every worker has exited.
    pub fn is_drained(&self) -> bool {
        self.live == 0
    }

    /// A worker left while nobody asked it to.  The rest of the group
    /// is now stuck at a barrier, and will stay there until the
    /// generation is terminated.
    pub fn is_stalled(&self) -> bool {
        !self.terminating && (self.exited > 0 || self.failed > 0)
    }
}

/// The operations both generation variants provide.
pub trait WorkerGroup: Sized {
    /// The kind this variant implements.
    const KIND: ExecutionKind;

    /// A synchronizer suitable for this kind of worker.
    fn synchronizer(group_size: usize, poll_interval: Duration) -> Result<Synchronizer>;

    /// Start one task per worker.
    fn start(workers: Vec<Worker>, sync: Arc<Synchronizer>) -> Result<Self>;

    /// The generation's synchronizer.
    fn sync(&self) -> &Arc<Synchronizer>;

    /// Reap exited workers and report on the group.
    fn poll(&mut self) -> GenerationStatus;

    /// Ask every worker to leave.  Returns without waiting.
    fn stop(&self) {
        self.sync().terminate();
    }

    /// Last resort for workers that did not drain in time.
    fn kill(&mut self);
}

/// The active or draining generation, whichever kind it is.
pub enum Generation {
    /// Worker processes.
    Process(ProcessGeneration),
    /// Worker threads.
    Thread(ThreadGeneration),
}

impl Generation {
    /// Partition the frame's rows and start a generation of `workers`
    /// workers of the given kind.
    pub fn spawn(
        kind: ExecutionKind,
        workers: usize,
        poll_interval: Duration,
        frame: &Arc<FrameBuffer>,
        kernel: &Kernel,
    ) -> Result<Generation> {
        match kind {
            ExecutionKind::Process => {
                build::<ProcessGeneration>(workers, poll_interval, frame, kernel)
                    .map(Generation::Process)
            }
            ExecutionKind::Thread => {
                build::<ThreadGeneration>(workers, poll_interval, frame, kernel)
                    .map(Generation::Thread)
            }
        }
    }

    /// The kind of this generation.
    pub fn kind(&self) -> ExecutionKind {
        match self {
            Generation::Process(_) => ProcessGeneration::KIND,
            Generation::Thread(_) => ThreadGeneration::KIND,
        }
    }

    /// The generation's synchronizer.
    pub fn sync(&self) -> &Arc<Synchronizer> {
        match self {
            Generation::Process(g) => g.sync(),
            Generation::Thread(g) => g.sync(),
        }
    }

    /// Reap exited workers and report on the group.
    pub fn poll(&mut self) -> GenerationStatus {
        match self {
            Generation::Process(g) => g.poll(),
            Generation::Thread(g) => g.poll(),
        }
    }

    /// Raise `terminate` for the whole group.
    pub fn stop(&self) {
        match self {
            Generation::Process(g) => g.stop(),
            Generation::Thread(g) => g.stop(),
        }
    }

    /// Force the group down.
    pub fn kill(&mut self) {
        match self {
            Generation::Process(g) => g.kill(),
            Generation::Thread(g) => g.kill(),
        }
    }

    /// True once every worker has exited.
    pub fn is_drained(&mut self) -> bool {
        self.poll().is_drained()
    }
}

fn build<G: WorkerGroup>(
    workers: usize,
    poll_interval: Duration,
    frame: &Arc<FrameBuffer>,
    kernel: &Kernel,
) -> Result<G> {
    let ranges = divide_into_ranges(frame.height(), workers)?;
    let sync = Arc::new(G::synchronizer(workers, poll_interval)?);
    let members = ranges
        .into_iter()
        .enumerate()
        .map(|(id, rows)| Worker::new(id, rows, frame.clone(), sync.clone(), kernel.clone()))
        .collect();
    G::start(members, sync)
}

/// What `select_kind` did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reconcile {
    /// The requested kind is already running.
    Unchanged,
    /// A previous generation is still draining; try again later.
    Deferred,
    /// A new generation of the requested kind was started.
    Started,
}

/// Owns the live generation and any generations still draining.
pub struct PoolManager {
    workers: usize,
    poll_interval: Duration,
    active: Option<Generation>,
    draining: Vec<Generation>,
}

impl PoolManager {
    /// A pool that will start generations of `workers` workers.  Nothing
    /// runs until the first `select_kind`.
    pub fn new(workers: usize, poll_interval: Duration) -> Self {
        PoolManager {
            workers,
            poll_interval,
            active: None,
            draining: Vec::new(),
        }
    }

    /// Make sure a generation of `kind` is running.  If another kind is
    /// active it is terminated, and the switch is deferred until it has
    /// fully drained; callers simply ask again on a later tick.
    pub fn select_kind(
        &mut self,
        kind: ExecutionKind,
        frame: &Arc<FrameBuffer>,
        kernel: &Kernel,
    ) -> Result<Reconcile> {
        if let Some(ref active) = self.active {
            if active.kind() == kind {
                return Ok(Reconcile::Unchanged);
            }
            debug!("switching from {} to {} workers", active.kind(), kind);
        }
        self.terminate_current();

        if !self.reap_draining() {
            debug!("deferring {} workers until the previous generation drains", kind);
            return Ok(Reconcile::Deferred);
        }

        debug!("starting {} {} workers", self.workers, kind);
        let generation = Generation::spawn(kind, self.workers, self.poll_interval, frame, kernel)?;
        self.active = Some(generation);
        Ok(Reconcile::Started)
    }

    /// Raise `terminate` on the active generation and move it to the
    /// draining list.  Does not wait.
    pub fn terminate_current(&mut self) {
        if let Some(generation) = self.active.take() {
            debug!("terminating {} workers", generation.kind());
            generation.stop();
            self.draining.push(generation);
        }
    }

    /// Drop draining generations whose workers have all exited.  True
    /// when nothing is left draining.
    pub fn reap_draining(&mut self) -> bool {
        self.draining.retain_mut(|g| !g.is_drained());
        self.draining.is_empty()
    }

    /// The active generation's synchronizer, if any.
    pub fn active_synchronizer(&self) -> Option<&Arc<Synchronizer>> {
        self.active.as_ref().map(|g| g.sync())
    }

    /// The kind of the active generation, if any.
    pub fn active_kind(&self) -> Option<ExecutionKind> {
        self.active.as_ref().map(|g| g.kind())
    }

    /// Report on the active generation, reaping any workers that left.
    pub fn active_status(&mut self) -> Option<GenerationStatus> {
        let status = self.active.as_mut().map(|g| g.poll());
        if let Some(s) = status {
            if s.is_stalled() {
                warn!(
                    "{} generation stalled: {} exited, {} failed, {} still waiting",
                    s.kind, s.exited, s.failed, s.live
                );
            }
        }
        status
    }

    /// True while a terminated generation still has live workers.
    pub fn is_draining(&mut self) -> bool {
        !self.reap_draining()
    }

    /// Terminate everything and wait up to `timeout` for the workers to
    /// exit.  Whatever is still alive afterwards is killed.  Returns
    /// whether everything drained on its own.
    ///
    /// Worker processes are reaped by the kill.  Worker threads cannot
    /// be killed, so a generation of threads that outlives the timeout
    /// stays on the draining list, and no new generation starts until
    /// it has left.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.terminate_current();
        let deadline = Instant::now() + timeout;
        while !self.reap_draining() {
            if Instant::now() >= deadline {
                warn!(
                    "{} generation(s) did not drain within {:?}; killing",
                    self.draining.len(),
                    timeout
                );
                for generation in &mut self.draining {
                    generation.kill();
                }
                self.reap_draining();
                return false;
            }
            sleep(self.poll_interval.min(Duration::from_millis(5)));
        }
        true
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        self.terminate_current();
    }
}
