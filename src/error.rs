// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The error type shared by every part of the engine.

use std::io;

use failure::Fail;

use crate::pool::ExecutionKind;

/// Everything that can go wrong while building or driving a worker
/// pool.  Note that a stalled generation is *not* an error: it is
/// reported through the pool status, and recovering from it is left
/// to whoever drives the orchestrator.
#[derive(Debug, Fail)]
pub enum PoolError {
    /// A pool was requested with no workers at all.
    #[fail(display = "worker count must be at least one")]
    ZeroWorkers,

    /// The operating system refused to map a shared memory region.
    #[fail(display = "could not map {} bytes of shared memory: {}", bytes, source)]
    SharedMemory {
        /// Size of the region we asked for.
        bytes: usize,
        /// The underlying mmap failure.
        #[cause]
        source: io::Error,
    },

    /// A frame or a shared region is too large to address.
    #[fail(display = "{} of {} x {} does not fit in memory", what, count, size)]
    TooLarge {
        /// What was being sized.
        what: &'static str,
        /// Number of rows or elements.
        count: usize,
        /// Width in pixels, or element size in bytes.
        size: usize,
    },

    /// A worker thread or worker process could not be started.
    #[fail(display = "could not spawn {} worker {}: {}", kind, id, source)]
    Spawn {
        /// The execution kind of the generation being started.
        kind: ExecutionKind,
        /// The index of the worker that failed to start.
        id: usize,
        /// The underlying spawn or fork failure.
        #[cause]
        source: io::Error,
    },

    /// The viewport cannot be mapped onto the complex plane.
    #[fail(display = "invalid viewport: {}", _0)]
    Viewport(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PoolError>;
