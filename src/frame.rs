// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The frame buffer: input coordinates, the output grid, and the
//! iteration budget, all in memory that worker processes share with
//! the orchestrator.
//!
//! The grid is stored row-major, so the rows a worker owns form one
//! contiguous span.  Nothing in here locks.  Who may touch what, and
//! when, is decided entirely by the synchronizer:
//!
//! * workers write their own rows of the grid, and read the coordinate
//!   arrays and the budget, only between `worker_before_hook` returning
//!   and their matching `worker_after_hook` call;
//! * the orchestrator writes coordinates and budget only while no
//!   worker is inside that window;
//! * the consumer reads the grid only while the group reports `done`.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{PoolError, Result};
use crate::shared::SharedRegion;

#[repr(C)]
struct FrameHeader {
    iteration_budget: AtomicU32,
}

/// Storage shared by every worker of every generation and the
/// orchestrator.  Sized once; only the contents ever change.
pub struct FrameBuffer {
    width: usize,
    height: usize,
    header: SharedRegion<FrameHeader>,
    row_coords: SharedRegion<f64>,
    col_coords: SharedRegion<f64>,
    grid: SharedRegion<u32>,
}

impl FrameBuffer {
    /// Allocate a `width` x `height` frame with a zeroed grid.
    pub fn new(width: usize, height: usize, iteration_budget: u32) -> Result<Self> {
        let area = width.checked_mul(height).ok_or(PoolError::TooLarge {
            what: "frame",
            count: height,
            size: width,
        })?;
        Ok(FrameBuffer {
            width,
            height,
            header: SharedRegion::new(1, |_| FrameHeader {
                iteration_budget: AtomicU32::new(iteration_budget),
            })?,
            row_coords: SharedRegion::new(width, |_| 0.0)?,
            col_coords: SharedRegion::new(height, |_| 0.0)?,
            grid: SharedRegion::new(area, |_| 0)?,
        })
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The budget the next cycle will hand to the kernel.
    pub fn iteration_budget(&self) -> u32 {
        self.header.get(0).iteration_budget.load(Ordering::Relaxed)
    }

    /// Only call between cycles; the synchronizer's flags publish the
    /// store to the workers.
    pub fn set_iteration_budget(&self, budget: u32) {
        self.header
            .get(0)
            .iteration_budget
            .store(budget, Ordering::Relaxed)
    }

    /// Hand both coordinate arrays to `fill`: the real parts, one per
    /// column, and the imaginary parts, one per row.
    ///
    /// # Safety
    ///
    /// No worker may be inside its compute window.
    pub unsafe fn write_coords<F>(&self, fill: F)
    where
        F: FnOnce(&mut [f64], &mut [f64]),
    {
        fill(
            self.row_coords.slice_mut(0, self.width),
            self.col_coords.slice_mut(0, self.height),
        )
    }

    /// Real part for every column.
    ///
    /// # Safety
    ///
    /// The orchestrator must not be writing coordinates.
    pub unsafe fn row_coords(&self) -> &[f64] {
        self.row_coords.as_slice()
    }

    /// Imaginary part for every row.
    ///
    /// # Safety
    ///
    /// The orchestrator must not be writing coordinates.
    pub unsafe fn col_coords(&self) -> &[f64] {
        self.col_coords.as_slice()
    }

    /// The grid cells of `rows`, row-major.
    ///
    /// # Safety
    ///
    /// The caller must own those rows for the current cycle.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn rows_mut(&self, rows: Range<usize>) -> &mut [u32] {
        let start = rows.start.min(self.height) * self.width;
        let end = rows.end.min(self.height) * self.width;
        self.grid.slice_mut(start, end.saturating_sub(start))
    }

    /// A read-only view of the whole grid.
    ///
    /// # Safety
    ///
    /// No worker may be writing the grid while the view lives.
    pub unsafe fn grid(&self) -> Grid<'_> {
        Grid::new(self.width, self.height, self.grid.as_slice())
    }
}

/// A borrowed, read-only `width` x `height` grid of packed `0x00RRGGBB`
/// colors.
#[derive(Clone, Copy, Debug)]
pub struct Grid<'a> {
    width: usize,
    height: usize,
    pixels: &'a [u32],
}

impl<'a> Grid<'a> {
    /// Wrap a row-major slice of `width * height` pixels.
    pub fn new(width: usize, height: usize, pixels: &'a [u32]) -> Self {
        assert_eq!(Some(pixels.len()), width.checked_mul(height));
        Grid {
            width,
            height,
            pixels,
        }
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The pixel in column `x` of row `y`.
    pub fn get(&self, x: usize, y: usize) -> u32 {
        self.pixels[y * self.width + x]
    }

    /// One row of pixels.
    pub fn row(&self, y: usize) -> &'a [u32] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    /// All pixels, row-major.
    pub fn pixels(&self) -> &'a [u32] {
        self.pixels
    }

    /// Expand every pixel into three `u8` channels, for image encoders.
    pub fn to_rgb8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 3);
        for p in self.pixels {
            out.push((p >> 16) as u8);
            out.push((p >> 8) as u8);
            out.push(*p as u8);
        }
        out
    }
}
