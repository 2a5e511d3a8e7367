//! The parameters a controller changes between frames.

use num::{clamp, Complex};

use crate::planes::Viewport;
use crate::pool::ExecutionKind;

/// Fraction of the zoom moved per step.
pub const SPEED: f64 = 0.0075;
/// Scale applied to mouse drags.
pub const PAN_SENSITIVITY: f64 = 2.0;

const CENTER_LIMIT: f64 = 2.0;
const MAX_ZOOM: f64 = 2.0;
const MIN_ZOOM: f64 = 1e-15;
const MIN_ITERS: u32 = 50;
const MAX_ITERS: u32 = 500;
const ITERS_STEP: u32 = 2;

/// Viewport, iteration budget, and execution kind for the next frame.
/// The orchestrator copies these into the frame buffer between
/// cycles.
#[derive(Clone, Debug, PartialEq)]
pub struct Controls {
    /// Real part of the center of the frame.
    pub center_x: f64,
    /// Imaginary part of the center of the frame.
    pub center_y: f64,
    /// Half the height of the visible region.
    pub zoom: f64,
    /// Iteration budget handed to the kernel.
    pub max_iters: u32,
    /// The execution kind the controller wants.
    pub kind: ExecutionKind,
    pan_start: Option<(f64, f64)>,
}

impl Controls {
    /// Centered on the origin, showing the whole set.
    pub fn new(kind: ExecutionKind, max_iters: u32) -> Self {
        Controls {
            center_x: 0.0,
            center_y: 0.0,
            zoom: 2.0,
            max_iters,
            kind,
            pan_start: None,
        }
    }

    /// The viewport these controls describe.
    pub fn viewport(&self) -> Viewport {
        Viewport {
            center: Complex::new(self.center_x, self.center_y),
            zoom: self.zoom,
        }
    }

    fn step(&self) -> f64 {
        self.zoom * SPEED
    }

    /// Move the view left by one step.
    pub fn left(&mut self) {
        self.center_x = clamp(self.center_x - self.step(), -CENTER_LIMIT, CENTER_LIMIT);
    }

    /// Move the view right by one step.
    pub fn right(&mut self) {
        self.center_x = clamp(self.center_x + self.step(), -CENTER_LIMIT, CENTER_LIMIT);
    }

    /// Move the view up by one step.
    pub fn up(&mut self) {
        self.center_y = clamp(self.center_y - self.step(), -CENTER_LIMIT, CENTER_LIMIT);
    }

    /// Move the view down by one step.
    pub fn down(&mut self) {
        self.center_y = clamp(self.center_y + self.step(), -CENTER_LIMIT, CENTER_LIMIT);
    }

    /// Zoom in by `speed` steps.
    pub fn zoom_in(&mut self, speed: f64) {
        self.zoom = clamp(self.zoom - self.step() * speed, MIN_ZOOM, MAX_ZOOM);
    }

    /// Zoom out by `speed` steps.
    pub fn zoom_out(&mut self, speed: f64) {
        self.zoom = clamp(self.zoom + self.step() * speed, MIN_ZOOM, MAX_ZOOM);
    }

    /// Raise the iteration budget.
    pub fn increase_iters(&mut self) {
        self.max_iters = clamp(self.max_iters + ITERS_STEP, MIN_ITERS, MAX_ITERS);
    }

    /// Lower the iteration budget.
    pub fn decrease_iters(&mut self) {
        self.max_iters = clamp(self.max_iters.saturating_sub(ITERS_STEP), MIN_ITERS, MAX_ITERS);
    }

    /// Ask for the other execution kind.
    pub fn switch_kind(&mut self) {
        self.kind = self.kind.toggled();
    }

    /// Begin a drag at screen position `(x, y)`.
    pub fn start_pan(&mut self, x: f64, y: f64) {
        self.pan_start = Some((x, y));
    }

    /// End the current drag.
    pub fn stop_pan(&mut self) {
        self.pan_start = None;
    }

    /// True while a drag is in progress.
    pub fn is_panning(&self) -> bool {
        self.pan_start.is_some()
    }

    /// Follow the pointer to `(x, y)` on a `width` x `height` screen.
    pub fn move_pan(&mut self, x: f64, y: f64, width: usize, height: usize) {
        if let Some((sx, sy)) = self.pan_start {
            self.pan_start = Some((x, y));
            let scale_x = self.zoom / width.max(1) as f64;
            let scale_y = self.zoom / height.max(1) as f64;
            self.center_x -= (x - sx) * scale_x * PAN_SENSITIVITY;
            self.center_y -= (y - sy) * scale_y * PAN_SENSITIVITY;
        }
    }
}
