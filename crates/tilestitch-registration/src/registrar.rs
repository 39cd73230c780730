use crate::candidates::{CandidateKind, CandidatePair};
use crate::params::RegistrationParams;
use crate::phase_correlation::PhaseCorrelator;
use nalgebra::Vector2;
use rayon::prelude::*;
use tilestitch_core::{band_pass, round_position, ImageView16, PairwiseEdge, PatchF32, PixelRect};

#[cfg(feature = "tracing")]
use tracing::instrument;

// Patches with a standard deviation below this are treated as constant.
const FLAT_PATCH_STD: f32 = 1e-6;

/// Why a candidate pair could not be scored. Never fatal on its own: the pair
/// is recorded as a zero-confidence edge carrying the nominal shift.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("tiles {a} and {b} overlap by {width}x{height} px, need at least {min} px per side")]
    InsufficientOverlap {
        a: usize,
        b: usize,
        width: usize,
        height: usize,
        min: usize,
    },
    #[error("overlap patch of tile {tile} is constant")]
    FlatPatch { tile: usize },
    #[error("overlap patch falls outside tile {tile}")]
    PatchOutOfBounds { tile: usize },
}

impl RegistrationError {
    /// Tile indices the failure refers to.
    pub fn tiles(&self) -> Vec<usize> {
        match *self {
            RegistrationError::InsufficientOverlap { a, b, .. } => vec![a, b],
            RegistrationError::FlatPatch { tile } | RegistrationError::PatchOutOfBounds { tile } => {
                vec![tile]
            }
        }
    }
}

/// One tile as seen by the registrar: pixels plus nominal mosaic position.
#[derive(Clone, Copy, Debug)]
pub struct TileView<'a> {
    pub image: ImageView16<'a>,
    pub nominal: Vector2<f64>,
}

impl TileView<'_> {
    fn rect(&self) -> PixelRect {
        let [x, y] = round_position(&self.nominal);
        PixelRect {
            x,
            y,
            width: self.image.width,
            height: self.image.height,
        }
    }
}

/// Outcome of registering one candidate pair.
#[derive(Clone, Debug)]
pub struct PairRegistration {
    pub pair: CandidatePair,
    /// Measured edge, or a zero-confidence edge with the nominal shift on failure.
    pub edge: PairwiseEdge,
    pub error: Option<RegistrationError>,
    /// `[width, height]` of the correlated patches, if the pair got that far.
    pub patch_size: Option<[usize; 2]>,
}

/// The two patches of a pair, in mosaic coordinates at rounded nominal positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Windows {
    a: PixelRect,
    b: PixelRect,
    /// Hann taper per axis; off where the patch is cut at the edge facing the other tile.
    taper: [bool; 2],
}

// Crop `rect` to `width x height`, keeping the side nearest `toward`.
fn shrink_toward(rect: PixelRect, toward: &PixelRect, width: usize, height: usize) -> PixelRect {
    let x = if toward.x + toward.right() > rect.x + rect.right() {
        rect.right() - width as i64
    } else {
        rect.x
    };
    let y = if toward.y + toward.bottom() > rect.y + rect.bottom() {
        rect.bottom() - height as i64
    } else {
        rect.y
    };
    PixelRect {
        x,
        y,
        width,
        height,
    }
}

/// Each tile cropped to the other's footprint grown by `margin`, cut to a
/// common size. With `margin == 0` both are the nominal overlap.
fn facing_windows(ra: &PixelRect, rb: &PixelRect, margin: usize) -> Option<Windows> {
    let wa = ra.intersection(&rb.expanded(margin))?;
    let wb = rb.intersection(&ra.expanded(margin))?;
    let (width, height) = (wa.width.min(wb.width), wa.height.min(wb.height));
    let overlap_x = ra.right().min(rb.right()) - ra.x.max(rb.x);
    let overlap_y = ra.bottom().min(rb.bottom()) - ra.y.max(rb.y);
    Some(Windows {
        a: shrink_toward(wa, rb, width, height),
        b: shrink_toward(wb, ra, width, height),
        taper: [overlap_x >= width as i64, overlap_y >= height as i64],
    })
}

/// Estimates relative offsets of overlapping tiles by phase correlation.
#[derive(Clone, Debug, Default)]
pub struct PairwiseRegistrar {
    params: RegistrationParams,
}

impl PairwiseRegistrar {
    pub fn new(params: RegistrationParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &RegistrationParams {
        &self.params
    }

    /// Register tile `b` against tile `a` over their nominal overlap.
    ///
    /// The returned edge's shift is `round(nominal_b) - round(nominal_a)` plus
    /// the measured correction.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, tile_a, tile_b))
    )]
    pub fn register_pair(
        &self,
        a: usize,
        tile_a: &TileView<'_>,
        b: usize,
        tile_b: &TileView<'_>,
    ) -> Result<PairwiseEdge, RegistrationError> {
        self.register_with_margin(a, tile_a, b, tile_b, 0)
            .map(|(edge, _)| edge)
    }

    /// Register two tiles whose nominal overlap is missing or too thin.
    ///
    /// Each tile contributes the part lying within `max_shift` of the other's
    /// nominal footprint, so an overlap created by stage drift of up to
    /// `max_shift` is still inside both patches. The search disk stays centred
    /// on the nominal offset.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, tile_a, tile_b))
    )]
    pub fn register_drifted(
        &self,
        a: usize,
        tile_a: &TileView<'_>,
        b: usize,
        tile_b: &TileView<'_>,
    ) -> Result<PairwiseEdge, RegistrationError> {
        self.register_with_margin(a, tile_a, b, tile_b, self.drift_margin(tile_a, tile_b))
            .map(|(edge, _)| edge)
    }

    // `max_shift` in whole pixels; growing past the tile size adds nothing.
    fn drift_margin(&self, tile_a: &TileView<'_>, tile_b: &TileView<'_>) -> usize {
        let largest = [
            tile_a.image.width,
            tile_a.image.height,
            tile_b.image.width,
            tile_b.image.height,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        self.params.max_shift.max(0.0).ceil().min(largest as f64) as usize
    }

    fn register_with_margin(
        &self,
        a: usize,
        tile_a: &TileView<'_>,
        b: usize,
        tile_b: &TileView<'_>,
        margin: usize,
    ) -> Result<(PairwiseEdge, [usize; 2]), RegistrationError> {
        let (ra, rb) = (tile_a.rect(), tile_b.rect());
        let min = self.params.min_overlap_px.max(1);
        let windows = facing_windows(&ra, &rb, margin)
            .filter(|w| w.a.width >= min && w.a.height >= min)
            .ok_or_else(|| {
                let w = facing_windows(&ra, &rb, margin);
                RegistrationError::InsufficientOverlap {
                    a,
                    b,
                    width: w.map_or(0, |w| w.a.width),
                    height: w.map_or(0, |w| w.a.height),
                    min,
                }
            })?;

        let patch_a = self.patch(a, tile_a, &ra, &windows.a)?;
        let patch_b = self.patch(b, tile_b, &rb, &windows.b)?;

        // Offset of the window origins inside their tiles, `a` minus `b`.
        let origin = Vector2::new(
            ((windows.a.x - ra.x) - (windows.b.x - rb.x)) as f64,
            ((windows.a.y - ra.y) - (windows.b.y - rb.y)) as f64,
        );
        let base = Vector2::new((rb.x - ra.x) as f64, (rb.y - ra.y) as f64);

        let (width, height) = (windows.a.width, windows.a.height);
        let correlator =
            PhaseCorrelator::new(width, height).with_taper(windows.taper[0], windows.taper[1]);
        let correlation = correlator
            .correlate_around(&patch_a, &patch_b, base - origin, self.params.max_shift)
            .ok_or(RegistrationError::PatchOutOfBounds { tile: b })?;

        log::trace!(
            "pair ({a}, {b}): {width}x{height} px patches, correction ({:.2}, {:.2}), confidence {:.2}",
            origin.x + correlation.shift.x - base.x,
            origin.y + correlation.shift.y - base.y,
            correlation.confidence
        );
        let edge = PairwiseEdge::new(a, b, origin + correlation.shift, correlation.confidence);
        Ok((edge, [width, height]))
    }

    fn patch(
        &self,
        tile: usize,
        view: &TileView<'_>,
        rect: &PixelRect,
        region: &PixelRect,
    ) -> Result<PatchF32, RegistrationError> {
        let x0 = usize::try_from(region.x - rect.x)
            .map_err(|_| RegistrationError::PatchOutOfBounds { tile })?;
        let y0 = usize::try_from(region.y - rect.y)
            .map_err(|_| RegistrationError::PatchOutOfBounds { tile })?;
        let raw = view
            .image
            .crop_f32(x0, y0, region.width, region.height)
            .ok_or(RegistrationError::PatchOutOfBounds { tile })?;
        filtered_patch(tile, &raw, self.params.filter_sigma)
    }

    /// Register one candidate. Extended pairs always use drift windows;
    /// adjacent pairs fall back to them when their nominal overlap is too thin
    /// and `permutations_multiplier > 0`.
    fn register_candidate(&self, tiles: &[TileView<'_>], pair: CandidatePair) -> PairRegistration {
        let (ta, tb) = (&tiles[pair.a], &tiles[pair.b]);
        let drifted = self.drift_margin(ta, tb);
        let result = match pair.kind {
            CandidateKind::Extended => self.register_with_margin(pair.a, ta, pair.b, tb, drifted),
            CandidateKind::Adjacent => match self.register_with_margin(pair.a, ta, pair.b, tb, 0) {
                Err(RegistrationError::InsufficientOverlap { .. })
                    if self.params.permutations_multiplier > 0 =>
                {
                    log::debug!(
                        "pair ({}, {}): nominal overlap too thin, widening by {drifted} px",
                        pair.a,
                        pair.b
                    );
                    self.register_with_margin(pair.a, ta, pair.b, tb, drifted)
                }
                other => other,
            },
        };

        match result {
            Ok((edge, size)) => PairRegistration {
                pair,
                edge,
                error: None,
                patch_size: Some(size),
            },
            Err(err) => {
                let [ax, ay] = round_position(&ta.nominal);
                let [bx, by] = round_position(&tb.nominal);
                let nominal = Vector2::new((bx - ax) as f64, (by - ay) as f64);
                PairRegistration {
                    pair,
                    edge: PairwiseEdge::new(pair.a, pair.b, nominal, 0.0),
                    error: Some(err),
                    patch_size: None,
                }
            }
        }
    }

    /// Register every candidate in parallel; results keep candidate order.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(pairs = candidates.len()))
    )]
    pub fn register_all(
        &self,
        tiles: &[TileView<'_>],
        candidates: &[CandidatePair],
    ) -> Vec<PairRegistration> {
        let results: Vec<PairRegistration> = candidates
            .par_iter()
            .map(|&pair| self.register_candidate(tiles, pair))
            .collect();

        let failed = results.iter().filter(|r| r.error.is_some()).count();
        if failed > 0 {
            log::warn!("{failed} of {} candidate pairs could not be registered", results.len());
        }
        results
    }
}

/// Band-pass `raw`, rejecting patches that end up constant.
pub(crate) fn filtered_patch(
    tile: usize,
    raw: &PatchF32,
    filter_sigma: f32,
) -> Result<PatchF32, RegistrationError> {
    let filtered = band_pass(raw, filter_sigma);
    if filtered.std_dev() < FLAT_PATCH_STD {
        return Err(RegistrationError::FlatPatch { tile });
    }
    Ok(filtered)
}
