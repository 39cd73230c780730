//! Core types and utilities for tile stitching.
//!
//! This crate is intentionally small: pixel buffers, band-pass filtering,
//! footprint geometry and the pairwise edge record shared by the
//! registration and graph crates. It does not decode files.

mod edge;
mod filter;
mod geometry;
mod image;
mod logger;

pub use edge::PairwiseEdge;
pub use filter::{
    apply_hann_window, apply_hann_window_axes, band_pass, gaussian_blur, gaussian_kernel,
    laplacian,
};
pub use geometry::{round_position, Footprint, PixelRect};
pub use image::{Image16, ImageView16, PatchF32};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_env, LOG_ENV};
