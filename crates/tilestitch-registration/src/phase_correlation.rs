//! FFT phase correlation between two equally sized patches.
//!
//! Both patches are mean-subtracted, Hann-windowed and zero-padded to the
//! next power of two of twice their size before the forward transform, so the
//! circular correlation does not wrap real content onto itself. The peak of
//! the inverse normalized cross-power spectrum gives the displacement.
//!
//! Only displacements shorter than the patch along each axis carry shared
//! content; the rest of the padded surface is excluded from both the peak
//! search and the sidelobe statistics.

use nalgebra::Vector2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;
use tilestitch_core::{apply_hann_window_axes, PatchF32};

// Chebyshev radius around the peak excluded from the sidelobe statistics.
const PEAK_EXCLUSION_RADIUS: isize = 2;
// Chebyshev radius around the peak the sidelobe statistics are taken from.
const SIDELOBE_RADIUS: isize = 10;
const MIN_SIDELOBE_STD: f64 = 1e-6;

/// Correlation peak and its peak-to-sidelobe ratio.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correlation {
    /// Displacement `d` such that `b(x) ≈ a(x + d)`, sub-pixel.
    pub shift: Vector2<f64>,
    /// Integer location of the peak.
    pub peak: [i64; 2],
    pub peak_value: f64,
    /// `(peak - mean) / std` over the valid displacements around the peak,
    /// its own neighbourhood excluded, `>= 0`.
    pub confidence: f64,
}

/// Phase correlator planned for one patch size.
pub struct PhaseCorrelator {
    width: usize,
    height: usize,
    taper: [bool; 2],
    padded_w: usize,
    padded_h: usize,
    row_fft: Arc<dyn Fft<f32>>,
    col_fft: Arc<dyn Fft<f32>>,
    row_ifft: Arc<dyn Fft<f32>>,
    col_ifft: Arc<dyn Fft<f32>>,
}

impl PhaseCorrelator {
    /// Plan transforms for `width x height` patches.
    pub fn new(width: usize, height: usize) -> Self {
        let padded_w = (2 * width.max(1)).next_power_of_two();
        let padded_h = (2 * height.max(1)).next_power_of_two();
        let mut planner = FftPlanner::new();
        Self {
            width,
            height,
            taper: [true, true],
            padded_w,
            padded_h,
            row_fft: planner.plan_fft_forward(padded_w),
            col_fft: planner.plan_fft_forward(padded_h),
            row_ifft: planner.plan_fft_inverse(padded_w),
            col_ifft: planner.plan_fft_inverse(padded_h),
        }
    }

    /// Window only the selected axes. Patches cut at a tile edge that faces
    /// the other tile keep full weight across that edge.
    pub fn with_taper(mut self, along_x: bool, along_y: bool) -> Self {
        self.taper = [along_x, along_y];
        self
    }

    #[inline]
    pub fn padded_size(&self) -> (usize, usize) {
        (self.padded_w, self.padded_h)
    }

    /// Correlate `a` against `b`, searching only displacements with
    /// `|d| <= max_shift` and `|d|` below the patch size along each axis.
    ///
    /// Returns `None` if the patches do not match the planned size.
    pub fn correlate(&self, a: &PatchF32, b: &PatchF32, max_shift: f64) -> Option<Correlation> {
        self.correlate_around(a, b, Vector2::zeros(), max_shift)
    }

    /// Like [`correlate`](Self::correlate), with the search disk centred on
    /// `expected` instead of zero displacement.
    pub fn correlate_around(
        &self,
        a: &PatchF32,
        b: &PatchF32,
        expected: Vector2<f64>,
        max_shift: f64,
    ) -> Option<Correlation> {
        if (a.width, a.height) != (self.width, self.height)
            || (b.width, b.height) != (self.width, self.height)
        {
            return None;
        }

        let fa = self.forward(&self.prepare(a));
        let fb = self.forward(&self.prepare(b));
        let cross = cross_power_spectrum(&fa, &fb);
        let surface = self.inverse(cross);

        let (px, py, peak_value) = self.find_peak(&surface, expected, max_shift);
        let (sx, sy) = self.subpixel_parabolic(&surface, px, py);
        let confidence = self.peak_to_sidelobe(&surface, px, py, peak_value);

        Some(Correlation {
            shift: Vector2::new(px as f64 + sx, py as f64 + sy),
            peak: [px as i64, py as i64],
            peak_value,
            confidence,
        })
    }

    fn prepare(&self, patch: &PatchF32) -> Vec<Complex<f32>> {
        let mut work = patch.clone();
        work.subtract_mean();
        apply_hann_window_axes(&mut work, self.taper[0], self.taper[1]);

        let mut padded = vec![Complex::new(0.0f32, 0.0); self.padded_w * self.padded_h];
        for y in 0..self.height {
            let src = &work.data[y * self.width..(y + 1) * self.width];
            let dst = &mut padded[y * self.padded_w..y * self.padded_w + self.width];
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = Complex::new(s, 0.0);
            }
        }
        padded
    }

    /// 2D FFT by rows, transpose, rows, transpose back.
    fn forward(&self, data: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let mut work = data.to_vec();
        for row in work.chunks_exact_mut(self.padded_w) {
            self.row_fft.process(row);
        }
        let mut t = transpose(&work, self.padded_w, self.padded_h);
        for col in t.chunks_exact_mut(self.padded_h) {
            self.col_fft.process(col);
        }
        transpose(&t, self.padded_h, self.padded_w)
    }

    /// Inverse 2D FFT, normalized, real part only.
    fn inverse(&self, mut data: Vec<Complex<f32>>) -> Vec<f32> {
        for row in data.chunks_exact_mut(self.padded_w) {
            self.row_ifft.process(row);
        }
        let mut t = transpose(&data, self.padded_w, self.padded_h);
        for col in t.chunks_exact_mut(self.padded_h) {
            self.col_ifft.process(col);
        }
        let back = transpose(&t, self.padded_h, self.padded_w);
        let norm = 1.0 / (self.padded_w * self.padded_h) as f32;
        back.iter().map(|c| c.re * norm).collect()
    }

    #[inline]
    fn at(&self, surface: &[f32], dx: isize, dy: isize) -> f32 {
        let x = dx.rem_euclid(self.padded_w as isize) as usize;
        let y = dy.rem_euclid(self.padded_h as isize) as usize;
        surface[y * self.padded_w + x]
    }

    #[inline]
    fn is_valid_lag(&self, dx: isize, dy: isize) -> bool {
        dx.unsigned_abs() < self.width && dy.unsigned_abs() < self.height
    }

    /// Highest value inside the search disk around `expected`; first in
    /// `(dy, dx)` scan order on ties.
    fn find_peak(
        &self,
        surface: &[f32],
        expected: Vector2<f64>,
        max_shift: f64,
    ) -> (isize, isize, f64) {
        let limit = max_shift.max(0.0);
        let limit_sq = limit * limit;
        let rx = self.width as isize - 1;
        let ry = self.height as isize - 1;
        let x_lo = ((expected.x - limit).ceil() as isize).max(-rx);
        let x_hi = ((expected.x + limit).floor() as isize).min(rx);
        let y_lo = ((expected.y - limit).ceil() as isize).max(-ry);
        let y_hi = ((expected.y + limit).floor() as isize).min(ry);

        let mut best = (0isize, 0isize, f64::NEG_INFINITY);
        for dy in y_lo..=y_hi {
            for dx in x_lo..=x_hi {
                let (ex, ey) = (dx as f64 - expected.x, dy as f64 - expected.y);
                if ex * ex + ey * ey > limit_sq {
                    continue;
                }
                let v = self.at(surface, dx, dy) as f64;
                if v > best.2 {
                    best = (dx, dy, v);
                }
            }
        }
        if best.2 == f64::NEG_INFINITY {
            best.2 = self.at(surface, 0, 0) as f64;
        }
        best
    }

    /// Parabolic sub-pixel offset per axis, clamped to half a pixel.
    fn subpixel_parabolic(&self, surface: &[f32], px: isize, py: isize) -> (f64, f64) {
        let c = self.at(surface, px, py) as f64;
        let l = self.at(surface, px - 1, py) as f64;
        let r = self.at(surface, px + 1, py) as f64;
        let t = self.at(surface, px, py - 1) as f64;
        let b = self.at(surface, px, py + 1) as f64;

        let fit = |lo: f64, hi: f64| -> f64 {
            let denom = 2.0 * (lo + hi - 2.0 * c);
            if denom.abs() > 1e-10 {
                ((lo - hi) / denom).clamp(-0.5, 0.5)
            } else {
                0.0
            }
        };
        (fit(l, r), fit(t, b))
    }

    /// Sidelobes are the valid displacements within [`SIDELOBE_RADIUS`] of
    /// the peak, outside [`PEAK_EXCLUSION_RADIUS`].
    fn peak_to_sidelobe(&self, surface: &[f32], px: isize, py: isize, peak: f64) -> f64 {
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut count = 0usize;
        for dy in py - SIDELOBE_RADIUS..=py + SIDELOBE_RADIUS {
            for dx in px - SIDELOBE_RADIUS..=px + SIDELOBE_RADIUS {
                if !self.is_valid_lag(dx, dy)
                    || ((dx - px).abs() <= PEAK_EXCLUSION_RADIUS
                        && (dy - py).abs() <= PEAK_EXCLUSION_RADIUS)
                {
                    continue;
                }
                let v = self.at(surface, dx, dy) as f64;
                sum += v;
                sum_sq += v * v;
                count += 1;
            }
        }
        if count == 0 {
            return 0.0;
        }
        let mean = sum / count as f64;
        let var = (sum_sq / count as f64 - mean * mean).max(0.0);
        let psr = (peak - mean) / var.sqrt().max(MIN_SIDELOBE_STD);
        if psr.is_finite() {
            psr.max(0.0)
        } else {
            0.0
        }
    }
}

fn cross_power_spectrum(fa: &[Complex<f32>], fb: &[Complex<f32>]) -> Vec<Complex<f32>> {
    fa.iter()
        .zip(fb)
        .map(|(a, b)| {
            let c = a * b.conj();
            let mag = c.norm();
            if mag > 1e-12 {
                c / mag
            } else {
                Complex::new(0.0, 0.0)
            }
        })
        .collect()
}

/// Out-of-place transpose of a row-major `w x h` buffer into `h x w`.
fn transpose(data: &[Complex<f32>], w: usize, h: usize) -> Vec<Complex<f32>> {
    let mut out = vec![Complex::new(0.0f32, 0.0); w * h];
    for y in 0..h {
        for x in 0..w {
            out[x * h + y] = data[y * w + x];
        }
    }
    out
}
