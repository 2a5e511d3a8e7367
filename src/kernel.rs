//! The per-pixel kernel.
//!
//! The engine treats the kernel as an opaque, pure function from a
//! point and an iteration budget to a packed `0x00RRGGBB` color.  It is
//! called concurrently from every worker, in threads or in forked
//! processes, so it must not rely on shared mutable state.

use std::sync::Arc;

use num::Complex;

/// An injected kernel: `kernel(re, im, max_iters) -> color`.
pub type Kernel = Arc<dyn Fn(f64, f64, u32) -> u32 + Send + Sync>;

const RADIUS_SQUARED: f64 = 100.0;

/// Wrap a plain function or closure as a `Kernel`.
pub fn kernel<F>(f: F) -> Kernel
where
    F: Fn(f64, f64, u32) -> u32 + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The default kernel: the Mandelbrot set with smooth (continuous)
/// escape-time coloring.
pub fn mandelbrot() -> Kernel {
    kernel(mandelbrot_color)
}

/// This is our classic iterator function, which either returns the
/// smoothed iteration count at which the point escaped, or nothing if
/// it stayed bounded for the whole budget.
pub fn escape_time(point: Complex<f64>, max_iters: u32) -> Option<f64> {
    let mut z = Complex::new(0.0_f64, 0.0_f64);
    for i in 0..max_iters {
        z = z * z + point;
        let dist_squared = z.norm_sqr();
        if dist_squared > RADIUS_SQUARED {
            let smooth = f64::from(i)
                - (dist_squared.ln() / RADIUS_SQUARED.ln()).ln() / 2.0_f64.ln();
            return Some(smooth);
        }
    }
    None
}

/// Color a single point.  Interior points are black.
pub fn mandelbrot_color(re: f64, im: f64, max_iters: u32) -> u32 {
    match escape_time(Complex::new(re, im), max_iters) {
        None => 0,
        Some(t) => {
            let m = 30.0 * (t.max(0.0) / f64::from(max_iters)).sqrt();
            let channel = |freq: f64, scale: f64| ((0.5 * (freq * m).sin() + 0.5) * scale) as u32;
            let r = channel(0.3, 200.0);
            let g = channel(0.4, 200.0);
            let b = channel(0.5, 255.0);
            (r << 16) | (g << 8) | b
        }
    }
}
