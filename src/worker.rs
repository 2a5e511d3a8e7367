//! A worker owns a band of rows and renders it once per cycle.

use std::sync::Arc;

use itertools::iproduct;

use crate::frame::FrameBuffer;
use crate::kernel::Kernel;
use crate::ranges::RowRange;
use crate::sync::Synchronizer;

/// One member of a generation.  It holds only what it needs: the
/// frame, its own rows, the group's synchronizer, and the kernel.
pub struct Worker {
    id: usize,
    rows: RowRange,
    frame: Arc<FrameBuffer>,
    sync: Arc<Synchronizer>,
    kernel: Kernel,
}

impl Worker {
    /// `id` is the worker's index in `0..group_size`, and `rows` the
    /// band the partitioner assigned to it.
    pub fn new(
        id: usize,
        rows: RowRange,
        frame: Arc<FrameBuffer>,
        sync: Arc<Synchronizer>,
        kernel: Kernel,
    ) -> Self {
        Worker {
            id,
            rows,
            frame,
            sync,
            kernel,
        }
    }

    /// Index of this worker in its generation.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Loop until the generation is terminated.  Returns the number of
    /// cycles this worker computed.
    pub fn run(&self) -> u64 {
        let mut cycles = 0;
        while !self.sync.is_terminated() {
            if !self.sync.worker_before_hook() {
                break;
            }
            self.compute();
            cycles += 1;
            if !self.sync.worker_after_hook() {
                break;
            }
        }
        cycles
    }

    /// Render this worker's rows with the current inputs.  Only valid
    /// between `worker_before_hook` and `worker_after_hook`.
    fn compute(&self) {
        let frame = &*self.frame;
        let width = frame.width();
        let max_iters = frame.iteration_budget();
        // Between the two hooks nobody else touches these rows, and the
        // coordinates are frozen until the group parks again.
        let (re, im, cells) = unsafe {
            (
                frame.row_coords(),
                frame.col_coords(),
                frame.rows_mut(self.rows.clone()),
            )
        };
        let first = self.rows.start;
        for (y, x) in iproduct!(self.rows.clone(), 0..width) {
            cells[(y - first) * width + x] = (self.kernel)(re[x], im[y], max_iters);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::kernel;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn worker_writes_only_its_rows() {
        let frame = Arc::new(FrameBuffer::new(3, 4, 7).unwrap());
        let sync = Arc::new(Synchronizer::local(1, Duration::from_millis(1)));
        let worker = Worker::new(
            0,
            1..3,
            frame.clone(),
            sync.clone(),
            kernel(|_, _, n| n + 1),
        );
        let handle = thread::spawn(move || worker.run());

        while !sync.is_done() {
            thread::sleep(Duration::from_millis(1));
        }
        {
            let grid = unsafe { frame.grid() };
            assert_eq!(grid.row(0), &[0, 0, 0]);
            assert_eq!(grid.row(1), &[8, 8, 8]);
            assert_eq!(grid.row(2), &[8, 8, 8]);
            assert_eq!(grid.row(3), &[0, 0, 0]);
        }
        sync.terminate();
        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn kernel_sees_the_coordinates_of_its_pixel() {
        let frame = Arc::new(FrameBuffer::new(2, 2, 1).unwrap());
        unsafe {
            frame.write_coords(|re, im| {
                re.copy_from_slice(&[1.0, 2.0]);
                im.copy_from_slice(&[10.0, 20.0]);
            });
        }
        let sync = Arc::new(Synchronizer::local(1, Duration::from_millis(1)));
        let worker = Worker::new(
            0,
            0..2,
            frame.clone(),
            sync.clone(),
            kernel(|x, y, _| (x + y) as u32),
        );
        let handle = thread::spawn(move || worker.run());
        while !sync.is_done() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(unsafe { frame.grid() }.pixels(), &[11, 12, 21, 22]);
        sync.terminate();
        handle.join().unwrap();
    }

    #[test]
    fn terminated_worker_never_computes() {
        let frame = Arc::new(FrameBuffer::new(2, 2, 1).unwrap());
        let sync = Arc::new(Synchronizer::local(1, Duration::from_millis(1)));
        sync.terminate();
        let worker = Worker::new(0, 0..2, frame, sync, kernel(|_, _, _| 1));
        assert_eq!(worker.run(), 0);
    }
}
