// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Generations of forked worker processes.
//!
//! Every worker gets its own process, forked from the orchestrator.
//! The child inherits the shared mappings holding the frame and the
//! synchronizer, runs its worker loop, and leaves with `_exit` so that
//! none of the parent's destructors or buffered output run twice.  The
//! child does nothing but compute, spin on atomics, and sleep.

use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use super::{ExecutionKind, GenerationStatus, WorkerGroup};
use crate::error::{PoolError, Result};
use crate::sync::Synchronizer;
use crate::worker::Worker;

const PANIC_EXIT: libc::c_int = 101;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Child {
    Running(libc::pid_t),
    Exited,
    Failed,
}

/// One forked process per worker.
pub struct ProcessGeneration {
    sync: Arc<Synchronizer>,
    children: Vec<Child>,
}

impl ProcessGeneration {
    /// Process ids of the workers that have not been reaped yet.
    pub fn live_pids(&self) -> Vec<libc::pid_t> {
        self.children
            .iter()
            .filter_map(|c| match *c {
                Child::Running(pid) => Some(pid),
                _ => None,
            })
            .collect()
    }
}

/// Body of a forked worker.  The parent may have had other threads
/// running at the fork, and any lock they held (stderr, the panic hook)
/// stays held forever in the child.  The default panic hook takes both,
/// so the child swaps in a silent hook first: a panicking kernel then
/// unwinds straight to `catch_unwind` and the child exits with a
/// failure status instead of hanging.  The old hook is leaked, not
/// dropped, so nothing is freed here either.
fn run_child(worker: &Worker) -> ! {
    mem::forget(panic::take_hook());
    panic::set_hook(Box::new(|_| {}));
    let code = match panic::catch_unwind(AssertUnwindSafe(|| worker.run())) {
        Ok(_) => 0,
        Err(_) => PANIC_EXIT,
    };
    unsafe { libc::_exit(code) }
}

/// Non-blocking reap.  `None` while the child is still running.
fn try_reap(pid: libc::pid_t) -> Option<Child> {
    let mut status: libc::c_int = 0;
    let rc = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if rc == 0 {
        return None;
    }
    if rc < 0 {
        // Somebody else reaped it; all we know is that it is gone.
        warn!("waitpid({}) failed: {}", pid, io::Error::last_os_error());
        return Some(Child::Failed);
    }
    if libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0 {
        Some(Child::Exited)
    } else {
        Some(Child::Failed)
    }
}

fn kill_and_reap(pid: libc::pid_t) {
    unsafe {
        libc::kill(pid, libc::SIGKILL);
        let mut status: libc::c_int = 0;
        libc::waitpid(pid, &mut status, 0);
    }
}

impl WorkerGroup for ProcessGeneration {
    const KIND: ExecutionKind = ExecutionKind::Process;

    fn synchronizer(group_size: usize, poll_interval: Duration) -> Result<Synchronizer> {
        Synchronizer::shared(group_size, poll_interval)
    }

    fn start(workers: Vec<Worker>, sync: Arc<Synchronizer>) -> Result<Self> {
        let mut children = Vec::with_capacity(workers.len());
        for worker in &workers {
            let pid = unsafe { libc::fork() };
            if pid == 0 {
                run_child(worker);
            }
            if pid < 0 {
                let source = io::Error::last_os_error();
                sync.terminate();
                for child in &children {
                    if let Child::Running(pid) = *child {
                        kill_and_reap(pid);
                    }
                }
                return Err(PoolError::Spawn {
                    kind: Self::KIND,
                    id: worker.id(),
                    source,
                });
            }
            trace!("forked process worker {} as pid {}", worker.id(), pid);
            children.push(Child::Running(pid));
        }
        Ok(ProcessGeneration { sync, children })
    }

    fn sync(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    fn poll(&mut self) -> GenerationStatus {
        for (id, child) in self.children.iter_mut().enumerate() {
            if let Child::Running(pid) = *child {
                if let Some(outcome) = try_reap(pid) {
                    if outcome == Child::Failed {
                        warn!("process worker {} (pid {}) died", id, pid);
                    }
                    *child = outcome;
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
        for child in &self.children {
            match child {
                Child::Running(_) => status.live += 1,
                Child::Exited => status.exited += 1,
                Child::Failed => status.failed += 1,
            }
        }
        status
    }

    fn kill(&mut self) {
        self.sync.terminate();
        for child in &mut self.children {
            if let Child::Running(pid) = *child {
                warn!("killing process worker pid {}", pid);
                kill_and_reap(pid);
                *child = Child::Failed;
            }
        }
    }
}

impl Drop for ProcessGeneration {
    fn drop(&mut self) {
        self.sync.terminate();
        if !self.live_pids().is_empty() {
            self.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuffer;
    use crate::kernel::kernel;
    use std::thread;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(1);

    fn wait_until<F: FnMut() -> bool>(what: &str, mut cond: F) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn processes_write_through_shared_memory() {
        let frame = Arc::new(FrameBuffer::new(3, 2, 5).unwrap());
        let sync = Arc::new(ProcessGeneration::synchronizer(2, POLL).unwrap());
        let k = kernel(|_, _, n| n * 2);
        let members = (0..2)
            .map(|id| Worker::new(id, id..id + 1, frame.clone(), sync.clone(), k.clone()))
            .collect();
        let mut generation = ProcessGeneration::start(members, sync.clone()).unwrap();
        assert_eq!(generation.live_pids().len(), 2);

        wait_until("the first frame", || sync.is_done());
        assert_eq!(unsafe { frame.grid() }.pixels(), &[10, 10, 10, 10, 10, 10]);

        generation.stop();
        wait_until("the processes to exit", || generation.poll().is_drained());
        let status = generation.poll();
        assert_eq!(status.exited, 2);
        assert!(!status.is_stalled());
    }

    #[test]
    fn panicking_kernel_fails_the_process() {
        let frame = Arc::new(FrameBuffer::new(2, 2, 5).unwrap());
        let sync = Arc::new(ProcessGeneration::synchronizer(2, POLL).unwrap());
        let k = kernel(|_, _, _| panic!("kernel failure"));
        let members = (0..2)
            .map(|id| Worker::new(id, id..id + 1, frame.clone(), sync.clone(), k.clone()))
            .collect();
        let mut generation = ProcessGeneration::start(members, sync.clone()).unwrap();

        wait_until("both processes to fail", || generation.poll().failed == 2);
        let status = generation.poll();
        assert_eq!(status.live, 0);
        assert!(status.is_stalled());
        assert!(!sync.is_done());
    }

    #[test]
    fn kill_reaps_stuck_processes() {
        let frame = Arc::new(FrameBuffer::new(1, 2, 5).unwrap());
        let sync = Arc::new(ProcessGeneration::synchronizer(2, POLL).unwrap());
        let k = kernel(|_, _, _| 0);
        // Only one of the two members is started, so it waits at the
        // barrier for good.
        let members = vec![Worker::new(0, 0..1, frame, sync.clone(), k)];
        let mut generation = ProcessGeneration::start(members, sync).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(generation.poll().live, 1);

        generation.kill();
        let status = generation.poll();
        assert_eq!(status.live, 0);
        assert_eq!(status.failed, 1);
    }
}
