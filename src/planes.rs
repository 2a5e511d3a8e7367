//! Contains the PlaneMapper struct, which describes a relationship
//! between the integral plane of the frame (columns and rows, with an
//! origin at 0,0) and the rectangle of the complex plane that a
//! viewport, given as a center and a zoom, looks at.
use num::Complex;

use crate::error::{PoolError, Result};

/// Describes the width and height of an integral plane that is assumed to start at
/// 0,0 and all values are assumed to be non-negative integers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IntegralPlane(pub usize, pub usize);

/// Describes the lower-left corner and upper-right corner of the
/// Complex plane, treating the real part of each value as the
/// x-component and the imaginary part of each value as the
/// y-component.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ComplexPlane(pub Complex<f64>, pub Complex<f64>);

/// Where the controller is looking: the point at the middle of the
/// frame, and the distance from that point to the top and bottom
/// edges.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    /// The point at the middle of the frame.
    pub center: Complex<f64>,
    /// Half the height of the visible region of the complex plane.
    pub zoom: f64,
}

impl Viewport {
    /// Checked constructor.  The center must be finite and the zoom a
    /// finite, positive number.
    pub fn new(center: Complex<f64>, zoom: f64) -> Result<Viewport> {
        if !center.re.is_finite() || !center.im.is_finite() {
            return Err(PoolError::Viewport(format!(
                "center {} is not a finite point",
                center
            )));
        }
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(PoolError::Viewport(format!(
                "zoom {} must be finite and positive",
                zoom
            )));
        }
        Ok(Viewport { center, zoom })
    }
}

/// Contains the definitions of two planes: the integral plane of the
/// frame and the region of the complex plane it shows.  The frame is
/// wider than it is tall, so the horizontal half-extent is stretched
/// by the aspect ratio of the frame.
#[derive(Debug)]
pub struct PlaneMapper {
    /// The size of the frame, in pixels.
    pub integral_plane: IntegralPlane,
    /// The left-lower and right-upper corners of the visible region.
    pub complex_plane: ComplexPlane,
}

impl PlaneMapper {
    /// Map a `width` x `height` frame onto the region around `viewport`.
    pub fn new(width: usize, height: usize, viewport: &Viewport) -> PlaneMapper {
        let zoom = viewport.zoom;
        let zoom_x = if width == 0 {
            zoom
        } else {
            zoom + zoom * (height as f64 / width as f64)
        };
        let c = viewport.center;
        PlaneMapper {
            integral_plane: IntegralPlane(width, height),
            complex_plane: ComplexPlane(
                Complex::new(c.re - zoom_x, c.im - zoom),
                Complex::new(c.re + zoom_x, c.im + zoom),
            ),
        }
    }

    /// Fill the per-column real parts and the per-row imaginary parts.
    /// `re` holds one entry per column and `im` one per row.
    pub fn fill_coords(&self, re: &mut [f64], im: &mut [f64]) {
        let IntegralPlane(width, height) = self.integral_plane;
        assert_eq!(re.len(), width, "one real part per column");
        assert_eq!(im.len(), height, "one imaginary part per row");
        let ComplexPlane(ll, ru) = self.complex_plane;
        linspace(ll.re, ru.re, re);
        linspace(ll.im, ru.im, im);
    }
}

/// `out.len()` evenly spaced samples from `start` to `end`, both
/// included.  A single sample sits on `start`.
pub fn linspace(start: f64, end: f64, out: &mut [f64]) {
    let n = out.len();
    for (i, v) in out.iter_mut().enumerate() {
        *v = spaced(start, end, n, i);
    }
}

#[inline]
fn spaced(start: f64, end: f64, n: usize, i: usize) -> f64 {
    if n < 2 {
        return start;
    }
    start + (end - start) * (i as f64) / ((n - 1) as f64)
}
