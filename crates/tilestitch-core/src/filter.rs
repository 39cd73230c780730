//! Band-pass filtering of float patches.
//!
//! Registration whitens both patches with a Laplacian of Gaussian before
//! correlating: the Gaussian suppresses sensor noise, the Laplacian removes
//! slowly varying illumination. Borders are clamped to the nearest pixel.

use crate::PatchF32;

/// Normalized 1D Gaussian kernel with radius `ceil(3 sigma)`.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return vec![1.0];
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian blur.
pub fn gaussian_blur(src: &PatchF32, sigma: f32) -> PatchF32 {
    let kernel = gaussian_kernel(sigma);
    if kernel.len() == 1 {
        return src.clone();
    }
    let radius = (kernel.len() / 2) as isize;
    let (w, h) = (src.width, src.height);

    let mut tmp = PatchF32 {
        width: w,
        height: h,
        data: vec![0.0; w * h],
    };
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, &kv) in kernel.iter().enumerate() {
                acc += kv * src.get_clamped(x as isize + k as isize - radius, y as isize);
            }
            tmp.data[y * w + x] = acc;
        }
    }

    let mut out = PatchF32 {
        width: w,
        height: h,
        data: vec![0.0; w * h],
    };
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, &kv) in kernel.iter().enumerate() {
                acc += kv * tmp.get_clamped(x as isize, y as isize + k as isize - radius);
            }
            out.data[y * w + x] = acc;
        }
    }
    out
}

/// 5-point discrete Laplacian.
pub fn laplacian(src: &PatchF32) -> PatchF32 {
    let (w, h) = (src.width, src.height);
    let mut out = PatchF32 {
        width: w,
        height: h,
        data: vec![0.0; w * h],
    };
    for y in 0..h as isize {
        for x in 0..w as isize {
            let c = src.get_clamped(x, y);
            let v = src.get_clamped(x - 1, y)
                + src.get_clamped(x + 1, y)
                + src.get_clamped(x, y - 1)
                + src.get_clamped(x, y + 1)
                - 4.0 * c;
            out.data[y as usize * w + x as usize] = v;
        }
    }
    out
}

/// Laplacian-of-Gaussian band-pass. `sigma <= 0` returns the input unchanged.
pub fn band_pass(src: &PatchF32, sigma: f32) -> PatchF32 {
    if !(sigma.is_finite() && sigma > 0.0) {
        return src.clone();
    }
    laplacian(&gaussian_blur(src, sigma))
}

/// Separable Hann window applied in place.
pub fn apply_hann_window(patch: &mut PatchF32) {
    apply_hann_window_axes(patch, true, true);
}

/// Hann window along the selected axes only; a skipped axis keeps weight 1.
pub fn apply_hann_window_axes(patch: &mut PatchF32, along_x: bool, along_y: bool) {
    let taper = |n: usize, on: bool| if on { hann(n) } else { vec![1.0; n] };
    let wx = taper(patch.width, along_x);
    let wy = taper(patch.height, along_y);
    for (y, &fy) in wy.iter().enumerate() {
        let row = &mut patch.data[y * patch.width..(y + 1) * patch.width];
        for (v, &fx) in row.iter_mut().zip(&wx) {
            *v *= fx * fy;
        }
    }
}

// Periodic-free Hann over n samples, endpoints kept slightly above zero so
// narrow overlap strips do not lose their outermost columns entirely.
fn hann(n: usize) -> Vec<f32> {
    if n <= 2 {
        return vec![1.0; n];
    }
    let denom = (n + 1) as f32;
    (0..n)
        .map(|i| {
            let t = (i + 1) as f32 / denom;
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * t).cos()
        })
        .collect()
}
