use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Relative offset measurement between two tiles.
///
/// `a` and `b` are node indices in ascending tile-id order with `a < b`.
/// `shift` is the position of `b` minus the position of `a` in mosaic pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairwiseEdge {
    pub a: usize,
    pub b: usize,
    pub shift: Vector2<f64>,
    /// Peak-to-sidelobe ratio, `>= 0`.
    pub confidence: f64,
}

impl PairwiseEdge {
    /// Build an edge, normalizing endpoint order so that `a < b`.
    pub fn new(a: usize, b: usize, shift: Vector2<f64>, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.max(0.0)
        } else {
            0.0
        };
        if a <= b {
            Self {
                a,
                b,
                shift,
                confidence,
            }
        } else {
            Self {
                a: b,
                b: a,
                shift: -shift,
                confidence,
            }
        }
    }

    /// Shift from `from` to the opposite endpoint.
    pub fn shift_from(&self, from: usize) -> Vector2<f64> {
        if from == self.a {
            self.shift
        } else {
            -self.shift
        }
    }

    pub fn other(&self, node: usize) -> usize {
        if node == self.a {
            self.b
        } else {
            self.a
        }
    }
}
