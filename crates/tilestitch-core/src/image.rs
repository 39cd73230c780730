/// Borrowed 16-bit grayscale image, row-major.
#[derive(Clone, Copy, Debug)]
pub struct ImageView16<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u16], // len = w*h
}

/// Owned 16-bit grayscale image, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image16 {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u16>,
}

impl Image16 {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    /// Wrap an existing buffer. Returns `None` if the length does not match.
    pub fn from_raw(width: usize, height: usize, data: Vec<u16>) -> Option<Self> {
        (width.checked_mul(height)? == data.len()).then_some(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn view(&self) -> ImageView16<'_> {
        ImageView16 {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u16 {
        self.data[y * self.width + x]
    }
}

impl<'a> ImageView16<'a> {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u16 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn row(&self, y: usize) -> &'a [u16] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    /// Copy the window `[x0, x0 + w) × [y0, y0 + h)` into a float patch.
    ///
    /// Returns `None` if the window leaves the image.
    pub fn crop_f32(&self, x0: usize, y0: usize, w: usize, h: usize) -> Option<PatchF32> {
        if x0.checked_add(w)? > self.width || y0.checked_add(h)? > self.height {
            return None;
        }
        let mut data = Vec::with_capacity(w * h);
        for y in y0..y0 + h {
            data.extend(self.row(y)[x0..x0 + w].iter().map(|&v| v as f32));
        }
        Some(PatchF32 {
            width: w,
            height: h,
            data,
        })
    }

    /// Block-average downsampling by an integer factor (partial blocks at the border are
    /// averaged over the pixels they contain).
    pub fn downsample(&self, factor: usize) -> Image16 {
        let factor = factor.max(1);
        let out_w = self.width.div_ceil(factor);
        let out_h = self.height.div_ceil(factor);
        let mut out = Image16::new(out_w, out_h);
        for oy in 0..out_h {
            let y1 = ((oy + 1) * factor).min(self.height);
            for ox in 0..out_w {
                let x1 = ((ox + 1) * factor).min(self.width);
                let mut sum = 0u64;
                let mut count = 0u64;
                for y in oy * factor..y1 {
                    for &v in &self.row(y)[ox * factor..x1] {
                        sum += v as u64;
                        count += 1;
                    }
                }
                out.data[oy * out_w + ox] = ((sum + count / 2) / count.max(1)) as u16;
            }
        }
        out
    }
}

/// Float working patch used for correlation, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchF32 {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl PatchF32 {
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x]
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.data.iter().map(|&v| v as f64).sum();
        (sum / self.data.len() as f64) as f32
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mean = self.mean() as f64;
        let var: f64 = self
            .data
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.data.len() as f64;
        var.sqrt() as f32
    }

    pub fn subtract_mean(&mut self) {
        let mean = self.mean();
        for v in &mut self.data {
            *v -= mean;
        }
    }
}
