use serde::{Deserialize, Serialize};

/// Configuration for candidate selection and pairwise registration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    /// Nominal overlap fraction between adjacent tiles, in `(0, 1)`.
    ///
    /// Footprints are expanded by half of it on every side when deciding
    /// which pairs are adjacent.
    pub overlap: f64,
    /// Laplacian-of-Gaussian sigma applied to both patches. `0` disables filtering.
    pub filter_sigma: f32,
    /// Largest accepted correction (Euclidean, pixels) from the nominal offset.
    pub max_shift: f64,
    /// Number of extended candidates per tile (closest non-adjacent pairs).
    pub permutations_multiplier: usize,
    /// Minimal width and height of the nominal overlap patch.
    pub min_overlap_px: usize,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            overlap: 0.2,
            filter_sigma: 10.0,
            max_shift: 500.0,
            permutations_multiplier: 1,
            min_overlap_px: 8,
        }
    }
}
