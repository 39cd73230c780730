//! Pairwise registration of overlapping tiles.
//!
//! [`candidate_pairs`] picks which tiles to compare from their nominal
//! footprints; [`PairwiseRegistrar`] measures each pair's offset by phase
//! correlation over the nominal overlap (or, for pairs the stage may have
//! drifted into overlap, over facing windows grown by `max_shift`) and scores
//! it by the peak-to-sidelobe ratio of the correlation surface. Pairs are
//! registered in parallel on the current rayon pool.
//!
//! [`PairwiseRegistrar::noise_floor`] calibrates how high that score has to be
//! by registering strips that cannot overlap.
//!
//! ```
//! use nalgebra::Vector2;
//! use tilestitch_core::Footprint;
//! use tilestitch_registration::{candidate_pairs, CandidateKind};
//!
//! let footprints: Vec<Footprint> = (0..3)
//!     .map(|i| Footprint::new(Vector2::new(80.0 * i as f64, 0.0), 100, 100))
//!     .collect();
//! let pairs = candidate_pairs(&footprints, 0.2, 0);
//! assert_eq!(pairs.len(), 2);
//! assert!(pairs.iter().all(|p| p.kind == CandidateKind::Adjacent));
//! ```

mod candidates;
mod noise_floor;
mod params;
mod phase_correlation;
mod registrar;

pub use candidates::{candidate_pairs, CandidateKind, CandidatePair};
pub use noise_floor::{quantile, NoiseFloor, FALSE_POSITIVE_RATE};
pub use params::RegistrationParams;
pub use phase_correlation::{Correlation, PhaseCorrelator};
pub use registrar::{PairRegistration, PairwiseRegistrar, RegistrationError, TileView};
