//! Acceptance threshold calibrated on tile regions that cannot overlap.
//!
//! Phase correlation always finds *some* peak. To tell a real match from the
//! best peak of unrelated content, strips cut from known non-overlapping places
//! (two tiles that are not candidates of each other, or two disjoint strips of
//! one tile) are registered exactly like real pairs. A high quantile of their
//! confidences is the noise floor a real edge has to clear.

use crate::candidates::CandidatePair;
use crate::phase_correlation::PhaseCorrelator;
use crate::registrar::{filtered_patch, PairRegistration, PairwiseRegistrar, TileView};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Share of unrelated strip pairs allowed to score above the threshold.
pub const FALSE_POSITIVE_RATE: f64 = 0.01;

const SAMPLING_SEED: u64 = 0;
const MAX_TRIES: usize = 100;

/// Confidences of non-overlapping strip pairs and the threshold they imply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NoiseFloor {
    /// `[width, height]` of the sampled strips.
    pub strip: Option<[usize; 2]>,
    pub samples: Vec<f64>,
    /// `1 - FALSE_POSITIVE_RATE` quantile of `samples`.
    pub threshold: Option<f64>,
}

impl NoiseFloor {
    /// Confidence an edge needs: the calibrated threshold, never below `min_confidence`.
    pub fn acceptance(&self, min_confidence: f64) -> f64 {
        self.threshold.map_or(min_confidence, |t| t.max(min_confidence))
    }
}

/// Linearly interpolated quantile of unsorted `values`, `q` in `[0, 1]`.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// Strip pairs drawn for `n` tiles when `distant` pairs are not candidates.
fn sample_count(n: usize, distant: usize, multiplier: usize) -> usize {
    if n == 0 {
        return 0;
    }
    // Fewer tiles hold fewer truly distinct strips.
    let base = if distant > 8 { 1000 } else { (distant + 1) * 10 };
    base.saturating_mul(multiplier)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StripPair {
    tiles: [usize; 2],
    rows: [usize; 2],
}

impl PairwiseRegistrar {
    /// Calibrate the acceptance threshold for this job.
    ///
    /// Strips span the narrowest tile and are as tall as the longest short
    /// side among the registered patches. The number of strip pairs scales
    /// with `permutations_multiplier`; `0`, or fewer than two registered
    /// pairs, skips calibration. Sampling is seeded, so the result depends
    /// only on the inputs.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(tiles = tiles.len()))
    )]
    pub fn noise_floor(
        &self,
        tiles: &[TileView<'_>],
        candidates: &[CandidatePair],
        registrations: &[PairRegistration],
    ) -> NoiseFloor {
        let sizes: Vec<[usize; 2]> = registrations.iter().filter_map(|r| r.patch_size).collect();
        if sizes.len() <= 1 {
            log::debug!("noise floor skipped: {} registered pairs", sizes.len());
            return NoiseFloor::default();
        }
        let n = tiles.len();
        let width = tiles.iter().map(|t| t.image.width).min().unwrap_or(0);
        let height = tiles.iter().map(|t| t.image.height).min().unwrap_or(0);
        let strip_h = sizes
            .iter()
            .map(|s| s[0].min(s[1]))
            .max()
            .unwrap_or(0)
            .min(height);
        if width == 0 || strip_h == 0 {
            return NoiseFloor::default();
        }

        let neighbours: HashSet<(usize, usize)> =
            candidates.iter().map(|p| (p.a.min(p.b), p.a.max(p.b))).collect();
        let distant = (n * n.saturating_sub(1) / 2).saturating_sub(neighbours.len());
        let count = sample_count(n, distant, self.params().permutations_multiplier);
        let strips = draw_strips(n, height - strip_h, strip_h, &neighbours, count);
        if strips.len() < count {
            log::warn!(
                "only {} of {count} non-overlapping strip pairs could be drawn",
                strips.len()
            );
        }

        let correlator = PhaseCorrelator::new(width, strip_h);
        let sigma = self.params().filter_sigma;
        let max_shift = self.params().max_shift;
        let samples: Vec<f64> = strips
            .par_iter()
            .filter_map(|s| {
                let patch = |k: usize| {
                    let raw = tiles[s.tiles[k]].image.crop_f32(0, s.rows[k], width, strip_h)?;
                    filtered_patch(s.tiles[k], &raw, sigma).ok()
                };
                let (a, b) = (patch(0)?, patch(1)?);
                correlator.correlate(&a, &b, max_shift).map(|c| c.confidence)
            })
            .collect();

        let threshold = quantile(&samples, 1.0 - FALSE_POSITIVE_RATE);
        if let Some(t) = threshold {
            log::info!(
                "noise floor {t:.2} from {} strip pairs of {width}x{strip_h} px",
                samples.len()
            );
        }
        NoiseFloor {
            strip: Some([width, strip_h]),
            samples,
            threshold,
        }
    }
}

/// Draw `count` strip pairs that cannot share content: different tiles that
/// are not candidates of each other, or disjoint strips of one tile.
fn draw_strips(
    n: usize,
    max_row: usize,
    strip_h: usize,
    neighbours: &HashSet<(usize, usize)>,
    count: usize,
) -> Vec<StripPair> {
    let mut rng = ChaCha8Rng::seed_from_u64(SAMPLING_SEED);
    let mut strips = Vec::with_capacity(count);
    for _ in 0..count {
        for _ in 0..MAX_TRIES {
            let tiles = [rng.random_range(0..n), rng.random_range(0..n)];
            let rows = [rng.random_range(0..=max_row), rng.random_range(0..=max_row)];
            let disjoint = if tiles[0] == tiles[1] {
                rows[0].abs_diff(rows[1]) >= strip_h
            } else {
                !neighbours.contains(&(tiles[0].min(tiles[1]), tiles[0].max(tiles[1])))
            };
            if disjoint {
                strips.push(StripPair { tiles, rows });
                break;
            }
        }
    }
    strips
}
