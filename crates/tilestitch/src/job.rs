//! The stitching job: one call from tile records to mosaic.

use crate::assembler::{write_outputs, Layout, Mosaic, MosaicAssembler, Placement};
use crate::catalog::{first_tile_dir, TileCatalog};
use crate::error::{StitchError, StructuredError};
use crate::options::StitchOptions;
use crate::pattern::NamePattern;
use crate::record::TileRecord;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tilestitch_core::{Image16, PixelRect};
use tilestitch_graph::{AlignmentGraph, GlobalPositionSolver, GraphError};
use tilestitch_registration::{
    candidate_pairs, CandidateKind, PairRegistration, PairwiseRegistrar, TileView,
};

/// One output channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelOutput {
    pub index: usize,
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Solved placement of one alignment tile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileReport {
    pub id: String,
    pub row: i64,
    pub col: i64,
    pub nominal: [f64; 2],
    pub position: [f64; 2],
    pub placement: PixelRect,
    pub residual: f64,
}

/// One scored candidate pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeReport {
    pub tile_a: String,
    pub tile_b: String,
    pub kind: CandidateKind,
    pub dx: f64,
    pub dy: f64,
    pub confidence: f64,
    pub accepted: bool,
    pub in_tree: bool,
    #[serde(default)]
    pub error: Option<StructuredError>,
}

/// Wall time of each pipeline stage, milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub load_ms: f64,
    pub register_ms: f64,
    pub solve_ms: f64,
    pub assemble_ms: f64,
    pub write_ms: f64,
    pub total_ms: f64,
}

/// Serializable description of a finished job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StitchSummary {
    pub canvas_width: usize,
    pub canvas_height: usize,
    pub alignment_channel: usize,
    pub channels: Vec<ChannelOutput>,
    #[serde(default)]
    pub thumbnail: Option<PathBuf>,
    pub refined: bool,
    pub tiles: Vec<TileReport>,
    pub low_confidence_tiles: Vec<String>,
    /// Confidence an edge needed to be accepted: `min_confidence` raised to the
    /// calibrated noise floor.
    pub acceptance_threshold: f64,
    /// Noise floor calibrated on non-overlapping strips, if any were sampled.
    #[serde(default)]
    pub noise_floor: Option<f64>,
    pub edges: Vec<EdgeReport>,
    pub timings: StageTimings,
}

/// Result of a successful job: summary plus the in-memory mosaic.
#[derive(Clone, Debug)]
pub struct MosaicResult {
    pub summary: StitchSummary,
    pub mosaic: Mosaic,
}

/// Stitch tiles given as JSON documents, one per tile.
///
/// This is the job boundary: every failure comes back as a [`StructuredError`].
pub fn stitch(
    tiles: &[String],
    pattern: &str,
    options: &StitchOptions,
) -> Result<MosaicResult, StructuredError> {
    let records = decode_records(tiles).map_err(StructuredError::from)?;
    stitch_records(records, pattern, options)
}

/// Stitch already decoded tile records.
pub fn stitch_records(
    records: Vec<TileRecord>,
    pattern: &str,
    options: &StitchOptions,
) -> Result<MosaicResult, StructuredError> {
    StitchJob::new(records, pattern, options.clone())
        .run()
        .map_err(|err| {
            log::error!("stitching failed: {err}");
            StructuredError::from(err)
        })
}

/// Decode transport-encoded records, reporting the first bad one by index.
pub fn decode_records(tiles: &[String]) -> Result<Vec<TileRecord>, StitchError> {
    tiles
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            TileRecord::from_json(raw).map_err(|source| StitchError::Record { index, source })
        })
        .collect()
}

/// A configured stitching job. Owns its records and runs on its own thread pool.
#[derive(Clone, Debug)]
pub struct StitchJob {
    records: Vec<TileRecord>,
    pattern: String,
    options: StitchOptions,
}

struct Stopwatch {
    started: Instant,
    lap: Instant,
}

impl Stopwatch {
    fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            lap: now,
        }
    }

    fn lap(&mut self, stage: &str) -> f64 {
        let now = Instant::now();
        let ms = (now - self.lap).as_secs_f64() * 1e3;
        self.lap = now;
        log::info!("stage {stage} took {ms:.1} ms");
        ms
    }

    fn total(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1e3
    }
}

impl StitchJob {
    pub fn new(records: Vec<TileRecord>, pattern: impl Into<String>, options: StitchOptions) -> Self {
        Self {
            records,
            pattern: pattern.into(),
            options,
        }
    }

    pub fn options(&self) -> &StitchOptions {
        &self.options
    }

    /// Validate, then run the whole pipeline on a dedicated rayon pool.
    pub fn run(self) -> Result<MosaicResult, StitchError> {
        self.options.validate()?;
        let pattern = NamePattern::parse(&self.pattern).map_err(crate::CatalogError::from)?;

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = self.options.num_threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build()?;
        log::debug!("job pool with {} threads", pool.current_num_threads());

        let StitchJob {
            records, options, ..
        } = self;
        pool.install(move || run_pipeline(records, &pattern, &options))
    }
}

#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "info", skip_all, fields(tiles = records.len()))
)]
fn run_pipeline(
    records: Vec<TileRecord>,
    pattern: &NamePattern,
    options: &StitchOptions,
) -> Result<MosaicResult, StitchError> {
    let mut watch = Stopwatch::start();
    let mut timings = StageTimings::default();

    let catalog = TileCatalog::build(
        records,
        pattern,
        &options.channel,
        options.overlap,
        options.pixel_size,
    )?;
    options.validate_for_channels(catalog.channel_count())?;
    let output_dir = if options.write_output {
        options
            .output_dir
            .clone()
            .or_else(|| first_tile_dir(&catalog).map(|p| p.to_path_buf()))
    } else {
        None
    };

    let n = catalog.len();
    let pixels: Vec<Arc<Image16>> = (0..n)
        .into_par_iter()
        .map(|node| catalog.pixels(node))
        .collect::<Result<_, _>>()?;
    timings.load_ms = watch.lap("load");

    let (registrations, noise_floor) = {
        let views: Vec<TileView<'_>> = pixels
            .iter()
            .zip(catalog.nominal_positions())
            .map(|(image, nominal)| TileView {
                image: image.view(),
                nominal: *nominal,
            })
            .collect();
        let candidates = candidate_pairs(
            &catalog.footprints(),
            options.overlap,
            options.permutations_multiplier,
        );
        let registrar = PairwiseRegistrar::new(options.registration_params());
        let registrations = registrar.register_all(&views, &candidates);
        let noise_floor = registrar.noise_floor(&views, &candidates, &registrations);
        (registrations, noise_floor)
    };
    let acceptance_threshold = noise_floor.acceptance(options.min_confidence);
    log::debug!("edges need confidence >= {acceptance_threshold:.2}");
    timings.register_ms = watch.lap("register");

    let graph = AlignmentGraph::new(
        n,
        registrations.iter().map(|r| r.edge).collect(),
        acceptance_threshold,
    )?;
    let node_id = |node: usize| catalog.tile(catalog.alignment_channel(), node).id.clone();
    let tree = graph.spanning_tree().map_err(|err| match err {
        GraphError::Disconnected { groups } => StitchError::Disconnected {
            groups: groups
                .iter()
                .map(|g| g.iter().map(|&node| node_id(node)).collect())
                .collect(),
        },
        other => StitchError::Graph(other),
    })?;
    let solved = GlobalPositionSolver::new(options.solver_params()).solve(&graph, &tree)?;
    let low_confidence = solved.low_confidence(options.max_residual);
    if !low_confidence.is_empty() {
        log::warn!(
            "{} tiles exceed the residual limit of {} px",
            low_confidence.len(),
            options.max_residual
        );
    }
    timings.solve_ms = watch.lap("solve");

    let (tile_w, tile_h) = catalog.tile_size();
    let layout = Layout::from_positions(&solved.positions, tile_w, tile_h);
    let assembler = MosaicAssembler::new(options.blend, options.max_canvas_bytes)
        .with_thumbnail(options.do_make_thumbnail.then_some(options.thumbnail_scale));
    assembler.check_budget(&layout, catalog.channel_count())?;

    let alignment = catalog.alignment_channel();
    let thumbnail = assembler.thumbnail(&layout, &pixels, &catalog.placement_order(alignment))?;
    drop(pixels);
    catalog.release();

    let channels = assembler.assemble(&layout, &catalog)?;
    let placements = catalog
        .placement_order(alignment)
        .into_iter()
        .map(|node| Placement {
            tile_id: node_id(node),
            node,
            rect: layout.rects[node],
        })
        .collect();
    let mosaic = Mosaic {
        width: layout.width,
        height: layout.height,
        channels,
        placements,
        thumbnail,
    };
    timings.assemble_ms = watch.lap("assemble");

    let written = match &output_dir {
        Some(dir) => Some(write_outputs(
            dir,
            &mosaic,
            |index| options.output_name(index),
            options
                .do_make_thumbnail
                .then(|| options.thumbnail_name(alignment)),
        )?),
        None => None,
    };
    timings.write_ms = watch.lap("write");
    timings.total_ms = watch.total();

    let summary = StitchSummary {
        canvas_width: layout.width,
        canvas_height: layout.height,
        alignment_channel: alignment,
        channels: catalog
            .channel_names()
            .into_iter()
            .enumerate()
            .map(|(index, name)| ChannelOutput {
                index,
                name: name.to_string(),
                path: written.as_ref().and_then(|w| w.channels.get(index).cloned()),
            })
            .collect(),
        thumbnail: written.as_ref().and_then(|w| w.thumbnail.clone()),
        refined: solved.refined,
        tiles: (0..n)
            .map(|node| {
                let tile = catalog.tile(alignment, node);
                let nominal = catalog.nominal_positions()[node];
                let position = solved.positions[node];
                TileReport {
                    id: tile.id.clone(),
                    row: tile.row,
                    col: tile.col,
                    nominal: [nominal.x, nominal.y],
                    position: [position.x, position.y],
                    placement: layout.rects[node],
                    residual: solved.residuals[node],
                }
            })
            .collect(),
        low_confidence_tiles: low_confidence.iter().map(|&node| node_id(node)).collect(),
        acceptance_threshold,
        noise_floor: noise_floor.threshold,
        edges: edge_reports(&registrations, &graph, &tree.edges, &node_id),
        timings,
    };
    log::info!(
        "stitched {} tiles into {}x{} px over {} channels in {:.1} ms",
        n,
        summary.canvas_width,
        summary.canvas_height,
        summary.channels.len(),
        summary.timings.total_ms
    );

    Ok(MosaicResult { summary, mosaic })
}

fn edge_reports(
    registrations: &[PairRegistration],
    graph: &AlignmentGraph,
    tree_edges: &[usize],
    node_id: &dyn Fn(usize) -> String,
) -> Vec<EdgeReport> {
    registrations
        .iter()
        .enumerate()
        .map(|(index, r)| {
            let (a, b) = (node_id(r.edge.a), node_id(r.edge.b));
            EdgeReport {
                kind: r.pair.kind,
                dx: r.edge.shift.x,
                dy: r.edge.shift.y,
                confidence: r.edge.confidence,
                accepted: graph.is_accepted(&r.edge),
                in_tree: tree_edges.contains(&index),
                error: r.error.as_ref().map(|err| {
                    StructuredError::registration(
                        err,
                        err.tiles().into_iter().map(node_id).collect(),
                    )
                }),
                tile_a: a,
                tile_b: b,
            }
        })
        .collect()
}
