use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Axis-aligned tile footprint in mosaic space (pixels).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub origin: Vector2<f64>,
    pub size: Vector2<f64>,
}

impl Footprint {
    pub fn new(origin: Vector2<f64>, width: usize, height: usize) -> Self {
        Self {
            origin,
            size: Vector2::new(width as f64, height as f64),
        }
    }

    #[inline]
    pub fn max(&self) -> Vector2<f64> {
        self.origin + self.size
    }

    #[inline]
    pub fn center(&self) -> Vector2<f64> {
        self.origin + self.size * 0.5
    }

    /// Grow by `margin` on every side.
    pub fn expanded(&self, margin: Vector2<f64>) -> Self {
        Self {
            origin: self.origin - margin,
            size: self.size + margin * 2.0,
        }
    }

    /// Overlap with positive area, if any.
    pub fn intersection(&self, other: &Footprint) -> Option<Footprint> {
        let lo = self.origin.sup(&other.origin);
        let hi = self.max().inf(&other.max());
        let size = hi - lo;
        (size.x > 0.0 && size.y > 0.0).then_some(Footprint { origin: lo, size })
    }

    pub fn intersects(&self, other: &Footprint) -> bool {
        self.intersection(other).is_some()
    }
}

/// Integer pixel rectangle, used for rounded placements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: usize,
    pub height: usize,
}

impl PixelRect {
    #[inline]
    pub fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    #[inline]
    pub fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    /// Grow by `margin` on every side.
    pub fn expanded(&self, margin: usize) -> PixelRect {
        PixelRect {
            x: self.x - margin as i64,
            y: self.y - margin as i64,
            width: self.width + 2 * margin,
            height: self.height + 2 * margin,
        }
    }

    pub fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        (x1 > x0 && y1 > y0).then(|| PixelRect {
            x: x0,
            y: y0,
            width: (x1 - x0) as usize,
            height: (y1 - y0) as usize,
        })
    }
}

/// Round a mosaic position to the pixel grid (half away from zero).
#[inline]
pub fn round_position(p: &Vector2<f64>) -> [i64; 2] {
    [p.x.round() as i64, p.y.round() as i64]
}
