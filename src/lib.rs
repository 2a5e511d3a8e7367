#![deny(missing_docs)]
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mandelpool
//!
//! An interactive Mandelbrot explorer needs a new frame every tick,
//! and computing one means evaluating an escape-time kernel at every
//! pixel.  Mandelpool splits the rows of the frame among a pool of
//! workers that repeat the same cycle forever: meet the others at a
//! barrier, compute a band of rows into a shared grid, meet again,
//! then wait for the renderer to take the frame.
//!
//! The workers may be forked processes or threads, and the kind can be
//! changed while frames are being produced.  Either way the frame lives
//! in one shared buffer, and the renderer only reads it between cycles,
//! through the scoped loan returned by `Orchestrator::get_frame`.
//!
//! Only Unix is supported: process workers are created with `fork`.

extern crate crossbeam;
extern crate failure;
extern crate itertools;
extern crate libc;
extern crate num;
extern crate num_cpus;
extern crate tracing;

pub mod config;
pub mod controls;
pub mod error;
pub mod frame;
pub mod kernel;
pub mod orchestrator;
pub mod planes;
pub mod pool;
pub mod ranges;
pub mod shared;
pub mod sync;
pub mod worker;

pub use config::PoolConfig;
pub use controls::Controls;
pub use error::{PoolError, Result};
pub use frame::{FrameBuffer, Grid};
pub use kernel::Kernel;
pub use orchestrator::{FrameGuard, Orchestrator, PoolStatus, Update};
pub use planes::Viewport;
pub use pool::{ExecutionKind, PoolManager, Reconcile};
pub use ranges::divide_into_ranges;
pub use sync::{Phase, Synchronizer};
