// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The orchestrator: the one object a renderer and a controller talk
//! to.
//!
//! A renderer loop drives it once per tick:
//!
//! ```no_run
//! use mandelpool::{kernel, Orchestrator, PoolConfig};
//!
//! let mut viz = Orchestrator::new(PoolConfig::new(320, 240), kernel::mandelbrot()).unwrap();
//! for _ in 0..100 {
//!     viz.controls_mut().zoom_in(1.0);
//!     viz.update().unwrap();
//!     if let Some(frame) = viz.get_frame() {
//!         println!("{} pixels", frame.pixels().len());
//!     } // the workers resume here, when `frame` drops
//! }
//! ```
//!
//! The orchestrator never blocks on the workers.  It looks at the
//! synchronizer's flags and only acts when they say it is safe.

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::PoolConfig;
use crate::controls::Controls;
use crate::error::Result;
use crate::frame::{FrameBuffer, Grid};
use crate::kernel::Kernel;
use crate::planes::{PlaneMapper, Viewport};
use crate::pool::{ExecutionKind, PoolManager, Reconcile};
use crate::sync::{Phase, Synchronizer};

/// What `update` did this tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Update {
    /// Workers are mid-cycle, or a previous generation is still
    /// draining; nothing was changed.
    Waiting,
    /// The controls were copied into the frame buffer and the pool was
    /// reconciled with the requested kind.
    Applied(Reconcile),
}

/// A summary of the pool for status displays.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolStatus {
    /// Kind of the active generation, if one is running.
    pub kind: Option<ExecutionKind>,
    /// Kind the controller asked for.
    pub requested: ExecutionKind,
    /// Where the active generation is in its cycle.
    pub phase: Option<Phase>,
    /// Workers of the active generation still alive.
    pub live_workers: usize,
    /// A terminated generation has not finished exiting.
    pub draining: bool,
    /// The active generation lost a worker and cannot finish a cycle.
    pub stalled: bool,
    /// Cycles completed by the active generation.
    pub completed_cycles: u64,
}

/// Owns the frame buffer, the controls, and the worker pool.
pub struct Orchestrator {
    frame: Arc<FrameBuffer>,
    kernel: Kernel,
    controls: Controls,
    pool: PoolManager,
    placeholder: Vec<u32>,
    presented: Cell<bool>,
}

impl Orchestrator {
    /// Allocate the frame buffer.  No workers start until the first
    /// `update`.
    pub fn new(config: PoolConfig, kernel: Kernel) -> Result<Self> {
        config.validate()?;
        let frame = Arc::new(FrameBuffer::new(config.width, config.height, config.max_iters)?);
        debug!(
            "frame buffer {}x{} for {} {} workers",
            config.width, config.height, config.workers, config.kind
        );
        Ok(Orchestrator {
            frame,
            kernel,
            controls: Controls::new(config.kind, config.max_iters),
            pool: PoolManager::new(config.workers, config.poll_interval),
            placeholder: vec![0; config.width * config.height],
            presented: Cell::new(false),
        })
    }

    /// The parameters of the next frame.
    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    /// Change the parameters of the next frame.  Changes take effect
    /// at the next `update` that finds the workers parked.
    pub fn controls_mut(&mut self) -> &mut Controls {
        &mut self.controls
    }

    /// Grid width in pixels.
    pub fn width(&self) -> usize {
        self.frame.width()
    }

    /// Grid height in pixels.
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Call once per tick.  When every worker is parked (or none is
    /// running) this copies the budget and the viewport into the frame
    /// buffer and then makes sure the requested kind of generation is
    /// running.  The inputs are written first so that a generation
    /// started here computes its first cycle with them.
    pub fn update(&mut self) -> Result<Update> {
        let ready = match self.pool.active_synchronizer() {
            Some(sync) => sync.is_parked(),
            None => !self.pool.is_draining(),
        };
        if !ready {
            return Ok(Update::Waiting);
        }

        self.apply_controls()?;
        let reconcile = self
            .pool
            .select_kind(self.controls.kind, &self.frame, &self.kernel)?;
        Ok(Update::Applied(reconcile))
    }

    fn apply_controls(&self) -> Result<()> {
        let requested = self.controls.viewport();
        let viewport = Viewport::new(requested.center, requested.zoom)?;
        let mapper = PlaneMapper::new(self.frame.width(), self.frame.height(), &viewport);
        if self.frame.iteration_budget() != self.controls.max_iters {
            trace!("iteration budget now {}", self.controls.max_iters);
            self.frame.set_iteration_budget(self.controls.max_iters);
        }
        // Every worker is parked or none exists, so nobody reads the
        // coordinates while they change.
        unsafe {
            self.frame
                .write_coords(|re, im| mapper.fill_coords(re, im));
        }
        Ok(())
    }

    /// Borrow the latest frame.
    ///
    /// * If the active generation has finished a cycle, the live grid is
    ///   lent out; dropping the returned guard releases the workers for
    ///   their next cycle, on every exit path.
    /// * Until the first live frame has been handed out, an all-zero
    ///   placeholder grid is returned instead.
    /// * Otherwise the workers are busy and there is nothing to show.
    pub fn get_frame(&self) -> Option<FrameGuard<'_>> {
        if let Some(sync) = self.pool.active_synchronizer() {
            if sync.is_done() && !sync.is_terminated() {
                self.presented.set(true);
                // `done` is up: every worker is parked and stays parked
                // until the guard releases them.
                let grid = unsafe { self.frame.grid() };
                return Some(FrameGuard {
                    grid,
                    release: Some(&**sync),
                });
            }
        }
        if !self.presented.get() {
            return Some(FrameGuard {
                grid: Grid::new(self.frame.width(), self.frame.height(), &self.placeholder),
                release: None,
            });
        }
        None
    }

    /// Terminate the active generation without waiting for it.  The
    /// next `update` starts a fresh one once it has drained.  This is
    /// how a stalled generation is recovered.
    pub fn restart(&mut self) {
        self.pool.terminate_current();
    }

    /// Overlay text: the execution kind and the iteration budget.
    pub fn status_lines(&self) -> Vec<String> {
        vec![
            format!("{} workers", self.controls.kind),
            format!("Iters: {}", self.frame.iteration_budget()),
        ]
    }

    /// A snapshot of the pool.
    pub fn status(&mut self) -> PoolStatus {
        let generation = self.pool.active_status();
        let draining = self.pool.is_draining();
        let sync = self.pool.active_synchronizer();
        PoolStatus {
            kind: self.pool.active_kind(),
            requested: self.controls.kind,
            phase: sync.map(|s| s.phase()),
            live_workers: generation.map(|g| g.live).unwrap_or(0),
            draining,
            stalled: generation.map(|g| g.is_stalled()).unwrap_or(false),
            completed_cycles: sync.map(|s| s.completed_cycles()).unwrap_or(0),
        }
    }

    /// Terminate every worker and wait up to `timeout` for them to
    /// exit; straggling processes are killed, straggling threads are
    /// left to finish their cycle and leave.  The frame buffer is released when
    /// the last worker's handle on it goes away.  Returns whether the
    /// workers all drained on their own.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        debug!("shutting down");
        self.pool.shutdown(timeout)
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("width", &self.frame.width())
            .field("height", &self.frame.height())
            .field("controls", &self.controls)
            .field("active", &self.pool.active_kind())
            .finish()
    }
}

/// A scoped loan of a frame.  Dereferences to a `Grid`.  Dropping a
/// guard over a live frame hands the workers their next cycle.
pub struct FrameGuard<'a> {
    grid: Grid<'a>,
    release: Option<&'a Synchronizer>,
}

impl<'a> FrameGuard<'a> {
    /// True for the all-zero frame shown before the first real one.
    pub fn is_placeholder(&self) -> bool {
        self.release.is_none()
    }
}

impl<'a> Deref for FrameGuard<'a> {
    type Target = Grid<'a>;

    fn deref(&self) -> &Grid<'a> {
        &self.grid
    }
}

impl<'a> Drop for FrameGuard<'a> {
    fn drop(&mut self) {
        if let Some(sync) = self.release.take() {
            sync.release();
        }
    }
}
