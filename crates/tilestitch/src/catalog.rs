//! Tile metadata validation and lazy pixel access.

use crate::options::ChannelSelector;
use crate::pattern::{NamePattern, PatternError};
use crate::record::TileRecord;
use nalgebra::Vector2;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tilestitch_core::{Footprint, Image16};

/// Errors raised while building the catalog or reading tile pixels.
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("no tiles were submitted")]
    Empty,
    #[error("duplicate tile ids: {}", ids.join(", "))]
    DuplicateIds { ids: Vec<String> },
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("naming pattern {pattern:?} matches none of the {tiles} tile file names")]
    NoPatternMatch { pattern: String, tiles: usize },
    #[error("channel {selector} not found, available: {}", available.join(", "))]
    UnknownChannel {
        selector: String,
        available: Vec<String>,
    },
    #[error("tile {id} has zero size {width}x{height}")]
    ZeroSize {
        id: String,
        width: usize,
        height: usize,
    },
    #[error("tile {id} is {found:?} px, expected {expected:?} like the rest of the set")]
    MismatchedSize {
        id: String,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("tiles {} share grid cell (row {row}, col {col}) in channel {channel:?}", ids.join(", "))]
    DuplicateCell {
        channel: String,
        row: i64,
        col: i64,
        ids: Vec<String>,
    },
    #[error("channel {channel:?} does not cover the grid of the alignment channel ({missing} cells missing, {extra} extra)")]
    ChannelCoverage {
        channel: String,
        missing: usize,
        extra: usize,
        ids: Vec<String>,
    },
    #[error("tile {id} path {path:?} is not absolute")]
    RelativePath { id: String, path: PathBuf },
    #[error("tile {id} file {path:?} does not exist")]
    MissingFile { id: String, path: PathBuf },
    #[error("failed to read tile {id} from {path:?}: {source}")]
    Read {
        id: String,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("tile {id} decoded as {found:?} px but the record says {expected:?}")]
    Corrupt {
        id: String,
        expected: (usize, usize),
        found: (usize, usize),
    },
}

impl CatalogError {
    /// Tile ids the error is about.
    pub fn tile_ids(&self) -> Vec<String> {
        match self {
            CatalogError::DuplicateIds { ids }
            | CatalogError::DuplicateCell { ids, .. }
            | CatalogError::ChannelCoverage { ids, .. } => ids.clone(),
            CatalogError::ZeroSize { id, .. }
            | CatalogError::MismatchedSize { id, .. }
            | CatalogError::RelativePath { id, .. }
            | CatalogError::MissingFile { id, .. }
            | CatalogError::Read { id, .. }
            | CatalogError::Corrupt { id, .. } => vec![id.clone()],
            _ => Vec::new(),
        }
    }

    /// File system or decode failure, as opposed to bad metadata.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            CatalogError::MissingFile { .. }
                | CatalogError::Read { .. }
                | CatalogError::Corrupt { .. }
        )
    }
}

/// One validated tile.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    pub id: String,
    pub path: PathBuf,
    pub file_name: String,
    pub width: usize,
    pub height: usize,
    /// Grid row, normalised when taken from the file name.
    pub row: i64,
    pub col: i64,
    /// Nominal stage offset in `pixel_size` units.
    pub offset: Vector2<f64>,
    pub channel: String,
}

/// Tiles of one channel, indexed by node.
#[derive(Clone, Debug)]
pub struct ChannelSet {
    pub name: String,
    /// `tiles[node]` indexes [`TileCatalog::tiles`].
    tiles: Vec<usize>,
}

/// Validated tile set with nominal positions and a per-tile pixel cache.
///
/// Nodes are the alignment-channel tiles in ascending id order. Every other
/// channel has exactly one tile per node, matched by grid cell.
pub struct TileCatalog {
    tiles: Vec<Tile>,
    channels: Vec<ChannelSet>,
    alignment: usize,
    nominal: Vec<Vector2<f64>>,
    uses_offsets: bool,
    cache: Vec<Mutex<Option<Arc<Image16>>>>,
}

impl std::fmt::Debug for TileCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCatalog")
            .field("tiles", &self.tiles.len())
            .field("channels", &self.channel_names())
            .field("alignment", &self.alignment)
            .field("uses_offsets", &self.uses_offsets)
            .finish()
    }
}

impl TileCatalog {
    /// Validate `records` against `pattern` and group them by channel.
    ///
    /// Every check runs before any pixel is read. A missing tile file is
    /// reported last so that metadata errors win.
    pub fn build(
        records: Vec<TileRecord>,
        pattern: &NamePattern,
        channel: &ChannelSelector,
        overlap: f64,
        pixel_size: f64,
    ) -> Result<Self, CatalogError> {
        if records.is_empty() {
            return Err(CatalogError::Empty);
        }
        check_unique_ids(&records)?;

        let tiles = resolve_tiles(records, pattern)?;

        let mut channels: Vec<ChannelSet> = Vec::new();
        for (i, tile) in tiles.iter().enumerate() {
            match channels.iter_mut().find(|c| c.name == tile.channel) {
                Some(set) => set.tiles.push(i),
                None => channels.push(ChannelSet {
                    name: tile.channel.clone(),
                    tiles: vec![i],
                }),
            }
        }
        let alignment = select_channel(&channels, channel)?;

        check_sizes(&tiles)?;
        for set in &channels {
            check_cells(&tiles, set)?;
        }

        // Node order: alignment-channel tiles by ascending id.
        let mut nodes = channels[alignment].tiles.clone();
        nodes.sort_by(|&a, &b| tiles[a].id.cmp(&tiles[b].id));
        let cell_of_node: Vec<(i64, i64)> =
            nodes.iter().map(|&t| (tiles[t].row, tiles[t].col)).collect();
        for (index, set) in channels.iter_mut().enumerate() {
            if index == alignment {
                set.tiles = nodes.clone();
            } else {
                set.tiles = match_cells(&tiles, set, &cell_of_node)?;
            }
        }

        for tile in &tiles {
            if !tile.path.is_absolute() {
                return Err(CatalogError::RelativePath {
                    id: tile.id.clone(),
                    path: tile.path.clone(),
                });
            }
        }
        for tile in &tiles {
            if !tile.path.is_file() {
                return Err(CatalogError::MissingFile {
                    id: tile.id.clone(),
                    path: tile.path.clone(),
                });
            }
        }

        let uses_offsets = nodes
            .iter()
            .any(|&t| tiles[t].offset != Vector2::zeros());
        let nominal = nodes
            .iter()
            .map(|&t| {
                let tile = &tiles[t];
                if uses_offsets {
                    tile.offset / pixel_size
                } else {
                    Vector2::new(
                        tile.col as f64 * tile.width as f64 * (1.0 - overlap),
                        tile.row as f64 * tile.height as f64 * (1.0 - overlap),
                    )
                }
            })
            .collect();

        log::info!(
            "catalog: {} tiles, {} channels, alignment channel {:?}, nominal positions from {}",
            nodes.len(),
            channels.len(),
            channels[alignment].name,
            if uses_offsets { "stage offsets" } else { "grid indices" }
        );

        let cache = (0..nodes.len()).map(|_| Mutex::new(None)).collect();
        Ok(Self {
            tiles,
            channels,
            alignment,
            nominal,
            uses_offsets,
            cache,
        })
    }

    /// Number of nodes (tiles per channel).
    #[inline]
    pub fn len(&self) -> usize {
        self.nominal.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nominal.is_empty()
    }

    /// Every tile of every channel, in submission order.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    #[inline]
    pub fn alignment_channel(&self) -> usize {
        self.alignment
    }

    /// Tile of `channel` at `node`.
    pub fn tile(&self, channel: usize, node: usize) -> &Tile {
        &self.tiles[self.channels[channel].tiles[node]]
    }

    /// Width and height shared by every tile.
    pub fn tile_size(&self) -> (usize, usize) {
        let t = self.tile(self.alignment, 0);
        (t.width, t.height)
    }

    pub fn nominal_positions(&self) -> &[Vector2<f64>] {
        &self.nominal
    }

    /// Whether nominal positions come from stage offsets rather than the grid.
    pub fn uses_offsets(&self) -> bool {
        self.uses_offsets
    }

    pub fn footprints(&self) -> Vec<Footprint> {
        let (w, h) = self.tile_size();
        self.nominal
            .iter()
            .map(|p| Footprint::new(*p, w, h))
            .collect()
    }

    /// Node order for placing `channel` tiles: ascending id of that channel's tiles.
    pub fn placement_order(&self, channel: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| self.tile(channel, a).id.cmp(&self.tile(channel, b).id));
        order
    }

    /// Alignment-channel pixels of `node`, decoded on first use and cached.
    pub fn pixels(&self, node: usize) -> Result<Arc<Image16>, CatalogError> {
        let mut slot = lock(&self.cache[node]);
        if let Some(image) = slot.as_ref() {
            return Ok(Arc::clone(image));
        }
        let image = Arc::new(self.read_uncached(self.alignment, node)?);
        *slot = Some(Arc::clone(&image));
        Ok(image)
    }

    /// Decode a tile without touching the cache.
    pub fn read_uncached(&self, channel: usize, node: usize) -> Result<Image16, CatalogError> {
        decode_tile(self.tile(channel, node))
    }

    /// Drop every cached buffer.
    pub fn release(&self) {
        for slot in &self.cache {
            *lock(slot) = None;
        }
    }

    /// Number of cached buffers.
    pub fn cached(&self) -> usize {
        self.cache.iter().filter(|s| lock(s).is_some()).count()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn check_unique_ids(records: &[TileRecord]) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    let mut dups: Vec<String> = records
        .iter()
        .filter(|r| !seen.insert(r.id.as_str()))
        .map(|r| r.id.clone())
        .collect();
    if dups.is_empty() {
        return Ok(());
    }
    dups.sort();
    dups.dedup();
    log::warn!("rejecting tile set with duplicate ids {dups:?}");
    Err(CatalogError::DuplicateIds { ids: dups })
}

fn resolve_tiles(records: Vec<TileRecord>, pattern: &NamePattern) -> Result<Vec<Tile>, CatalogError> {
    let matches: Vec<_> = records
        .iter()
        .map(|r| pattern.match_name(&r.resolved_file_name()))
        .collect();
    let matched = matches.iter().flatten().count();
    if matched == 0 {
        return Err(CatalogError::NoPatternMatch {
            pattern: pattern.template().to_string(),
            tiles: records.len(),
        });
    }
    if matched < records.len() {
        log::warn!(
            "{} of {} tile names do not match {:?}; using their record grid indices",
            records.len() - matched,
            records.len(),
            pattern.template()
        );
    }

    let min_row = matches.iter().flatten().map(|m| m.row).min().unwrap_or(0);
    let min_col = matches.iter().flatten().map(|m| m.col).min().unwrap_or(0);

    Ok(records
        .into_iter()
        .zip(matches)
        .map(|(record, m)| {
            let file_name = record.resolved_file_name();
            let (row, col, channel) = match m {
                Some(m) => (
                    m.row - min_row,
                    m.col - min_col,
                    m.channel.unwrap_or_else(|| record.channel.clone()),
                ),
                None => (record.row_index, record.column_index, record.channel.clone()),
            };
            Tile {
                id: record.id,
                path: record.absolute_path,
                file_name,
                width: record.width_px,
                height: record.height_px,
                row,
                col,
                offset: Vector2::new(record.offset_x, record.offset_y),
                channel,
            }
        })
        .collect())
}

fn select_channel(channels: &[ChannelSet], selector: &ChannelSelector) -> Result<usize, CatalogError> {
    let found = match selector {
        ChannelSelector::Index(i) => (*i < channels.len()).then_some(*i),
        ChannelSelector::Name(name) => channels.iter().position(|c| &c.name == name),
    };
    found.ok_or_else(|| CatalogError::UnknownChannel {
        selector: selector.to_string(),
        available: channels.iter().map(|c| c.name.clone()).collect(),
    })
}

fn check_sizes(tiles: &[Tile]) -> Result<(), CatalogError> {
    let first = &tiles[0];
    let expected = (first.width, first.height);
    for t in tiles {
        if t.width == 0 || t.height == 0 {
            return Err(CatalogError::ZeroSize {
                id: t.id.clone(),
                width: t.width,
                height: t.height,
            });
        }
        if (t.width, t.height) != expected {
            return Err(CatalogError::MismatchedSize {
                id: t.id.clone(),
                expected,
                found: (t.width, t.height),
            });
        }
    }
    Ok(())
}

fn check_cells(tiles: &[Tile], set: &ChannelSet) -> Result<(), CatalogError> {
    let mut cells: BTreeMap<(i64, i64), Vec<String>> = BTreeMap::new();
    for &t in &set.tiles {
        cells
            .entry((tiles[t].row, tiles[t].col))
            .or_default()
            .push(tiles[t].id.clone());
    }
    match cells.into_iter().find(|(_, ids)| ids.len() > 1) {
        Some(((row, col), mut ids)) => {
            ids.sort();
            Err(CatalogError::DuplicateCell {
                channel: set.name.clone(),
                row,
                col,
                ids,
            })
        }
        None => Ok(()),
    }
}

// Order `set` by the alignment nodes' grid cells.
fn match_cells(
    tiles: &[Tile],
    set: &ChannelSet,
    cell_of_node: &[(i64, i64)],
) -> Result<Vec<usize>, CatalogError> {
    let by_cell: HashMap<(i64, i64), usize> = set
        .tiles
        .iter()
        .map(|&t| ((tiles[t].row, tiles[t].col), t))
        .collect();
    let wanted: HashSet<(i64, i64)> = cell_of_node.iter().copied().collect();

    let missing = cell_of_node
        .iter()
        .filter(|c| !by_cell.contains_key(c))
        .count();
    let mut extra: Vec<String> = set
        .tiles
        .iter()
        .filter(|&&t| !wanted.contains(&(tiles[t].row, tiles[t].col)))
        .map(|&t| tiles[t].id.clone())
        .collect();
    if missing > 0 || !extra.is_empty() {
        extra.sort();
        return Err(CatalogError::ChannelCoverage {
            channel: set.name.clone(),
            missing,
            extra: extra.len(),
            ids: extra,
        });
    }
    Ok(cell_of_node.iter().map(|c| by_cell[c]).collect())
}

fn decode_tile(tile: &Tile) -> Result<Image16, CatalogError> {
    let read_err = |source| CatalogError::Read {
        id: tile.id.clone(),
        path: tile.path.clone(),
        source,
    };
    let decoded = image::open(&tile.path).map_err(read_err)?.to_luma16();
    let found = (decoded.width() as usize, decoded.height() as usize);
    let expected = (tile.width, tile.height);
    if found != expected {
        return Err(CatalogError::Corrupt {
            id: tile.id.clone(),
            expected,
            found,
        });
    }
    Image16::from_raw(found.0, found.1, decoded.into_raw()).ok_or(CatalogError::Corrupt {
        id: tile.id.clone(),
        expected,
        found,
    })
}

/// Directory holding the first submitted tile.
pub fn first_tile_dir(catalog: &TileCatalog) -> Option<&Path> {
    catalog.tiles.first().and_then(|t| t.path.parent())
}
