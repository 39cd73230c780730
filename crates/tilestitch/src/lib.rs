//! Tile registration and mosaic assembly.
//!
//! Turns overlapping, independently captured image tiles (for example from a
//! scanning microscope) into one composite image:
//!
//! 1. [`TileCatalog`] validates tile records against a naming pattern and
//!    derives nominal positions.
//! 2. [`registration::PairwiseRegistrar`] measures the offset of every
//!    candidate pair by phase correlation.
//! 3. [`graph::AlignmentGraph`] keeps the most confident edges that connect
//!    all tiles, and [`graph::GlobalPositionSolver`] turns them into absolute
//!    positions.
//! 4. [`MosaicAssembler`] renders one canvas per channel and writes them out.
//!
//! [`stitch`] runs all of it behind one call and reports failures as a
//! [`StructuredError`].
//!
//! ## Quickstart
//!
//! ```no_run
//! use tilestitch::{stitch, StitchOptions};
//!
//! let tiles = vec![
//!     r#"{"_id": "t1", "absolute_path": "/data/img_r001_c001.tif", "width_px": 1392, "height_px": 1040}"#.to_string(),
//!     r#"{"_id": "t2", "absolute_path": "/data/img_r001_c002.tif", "width_px": 1392, "height_px": 1040}"#.to_string(),
//! ];
//! match stitch(&tiles, "img_r{row:03}_c{col:03}.tif", &StitchOptions::default()) {
//!     Ok(result) => println!("{}x{}", result.summary.canvas_width, result.summary.canvas_height),
//!     Err(err) => eprintln!("{err}"),
//! }
//! ```
//!
//! ## Crates
//! - `tilestitch::core`: pixel buffers, band-pass filter, footprints, edges.
//! - `tilestitch::registration`: candidate pairs and phase correlation.
//! - `tilestitch::graph`: spanning tree and global position solving.

pub use tilestitch_core as core;
pub use tilestitch_graph as graph;
pub use tilestitch_registration as registration;

mod assembler;
mod catalog;
mod error;
mod io;
mod job;
mod options;
mod pattern;
mod record;

pub use assembler::{
    write_outputs, write_tiff, AssembleError, Layout, Mosaic, MosaicAssembler, Placement,
    TileSource, WrittenFiles,
};
pub use catalog::{CatalogError, ChannelSet, Tile, TileCatalog};
pub use error::{ErrorKind, StitchError, StructuredError};
pub use io::{StitchIoError, StitchReport, StitchRequest, TileEntry};
pub use job::{
    decode_records, stitch, stitch_records, ChannelOutput, EdgeReport, MosaicResult, StageTimings,
    StitchJob, StitchSummary, TileReport,
};
pub use options::{BlendMode, ChannelSelector, OptionsError, StitchOptions};
pub use pattern::{NamePattern, PatternError, PatternMatch};
pub use record::TileRecord;
