//! Candidate tile pairs for registration.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tilestitch_core::Footprint;

/// How a pair entered the candidate set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    /// Expanded nominal footprints intersect.
    Adjacent,
    /// One of the closest non-adjacent pairs, added by `permutations_multiplier`.
    Extended,
}

/// Unordered tile pair, stored with `a < b`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub a: usize,
    pub b: usize,
    pub kind: CandidateKind,
}

/// Select candidate pairs from nominal footprints, ordered by `(a, b)`.
///
/// `overlap` expands each footprint by `overlap * size / 2` per side before the
/// adjacency test. The `permutations_multiplier * n` closest remaining pairs by
/// centre distance (ties by `(a, b)`) are appended as [`CandidateKind::Extended`].
pub fn candidate_pairs(
    footprints: &[Footprint],
    overlap: f64,
    permutations_multiplier: usize,
) -> Vec<CandidatePair> {
    let n = footprints.len();
    let expanded: Vec<Footprint> = footprints
        .iter()
        .map(|f| f.expanded(f.size * (overlap * 0.5)))
        .collect();

    let mut pairs = Vec::new();
    let mut others: Vec<(f64, usize, usize)> = Vec::new();
    for a in 0..n {
        for b in a + 1..n {
            if expanded[a].intersects(&expanded[b]) {
                pairs.push(CandidatePair {
                    a,
                    b,
                    kind: CandidateKind::Adjacent,
                });
            } else {
                let d: Vector2<f64> = footprints[b].center() - footprints[a].center();
                others.push((d.norm(), a, b));
            }
        }
    }

    let extra = permutations_multiplier.saturating_mul(n).min(others.len());
    if extra > 0 {
        others.sort_by(|x, y| {
            x.0.partial_cmp(&y.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| (x.1, x.2).cmp(&(y.1, y.2)))
        });
        pairs.extend(others[..extra].iter().map(|&(_, a, b)| CandidatePair {
            a,
            b,
            kind: CandidateKind::Extended,
        }));
    }

    pairs.sort_by_key(|p| (p.a, p.b));
    log::debug!(
        "{} candidate pairs over {} tiles ({} extended)",
        pairs.len(),
        n,
        extra
    );
    pairs
}
