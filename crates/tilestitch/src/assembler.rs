//! Mosaic layout, blending and output.

use crate::catalog::{CatalogError, TileCatalog};
use crate::options::BlendMode;
use image::{ImageBuffer, ImageFormat, Luma};
use nalgebra::Vector2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tilestitch_core::{round_position, Image16, PixelRect};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors raised while laying out, rendering or writing the mosaic.
#[derive(thiserror::Error, Debug)]
pub enum AssembleError {
    #[error("mosaic of {width}x{height} px over {channels} channels needs {required} bytes, budget is {budget}")]
    Budget {
        width: usize,
        height: usize,
        channels: usize,
        required: u64,
        budget: u64,
    },
    #[error("failed to allocate {bytes} bytes for the mosaic canvas")]
    Allocation { bytes: u64 },
    #[error("mosaic of {width}x{height} px exceeds the output format limits")]
    TooLarge { width: usize, height: usize },
    #[error(transparent)]
    Tile(#[from] CatalogError),
    #[error("failed to create output directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Where a tile lands on the canvas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub tile_id: String,
    pub node: usize,
    pub rect: PixelRect,
}

/// Canvas size and per-node placement rectangles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub width: usize,
    pub height: usize,
    /// Indexed by node.
    pub rects: Vec<PixelRect>,
}

impl Layout {
    /// Round positions to the pixel grid and shift the bounding box to the origin.
    pub fn from_positions(positions: &[Vector2<f64>], tile_width: usize, tile_height: usize) -> Self {
        let rounded: Vec<[i64; 2]> = positions.iter().map(round_position).collect();
        let min_x = rounded.iter().map(|p| p[0]).min().unwrap_or(0);
        let min_y = rounded.iter().map(|p| p[1]).min().unwrap_or(0);
        let rects: Vec<PixelRect> = rounded
            .iter()
            .map(|p| PixelRect {
                x: p[0] - min_x,
                y: p[1] - min_y,
                width: tile_width,
                height: tile_height,
            })
            .collect();
        let width = rects.iter().map(|r| r.right()).max().unwrap_or(0) as usize;
        let height = rects.iter().map(|r| r.bottom()).max().unwrap_or(0) as usize;
        Self {
            width,
            height,
            rects,
        }
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Supplies tile pixels per channel to the assembler.
pub trait TileSource: Sync {
    fn channel_count(&self) -> usize;
    /// Nodes of `channel` in placement order.
    fn placement_order(&self, channel: usize) -> Vec<usize>;
    fn read_tile(&self, channel: usize, node: usize) -> Result<Image16, CatalogError>;
}

impl TileSource for TileCatalog {
    fn channel_count(&self) -> usize {
        TileCatalog::channel_count(self)
    }

    fn placement_order(&self, channel: usize) -> Vec<usize> {
        TileCatalog::placement_order(self, channel)
    }

    fn read_tile(&self, channel: usize, node: usize) -> Result<Image16, CatalogError> {
        self.read_uncached(channel, node)
    }
}

/// Rendered composite: one canvas per channel plus the optional thumbnail.
#[derive(Clone, Debug, PartialEq)]
pub struct Mosaic {
    pub width: usize,
    pub height: usize,
    /// Indexed by channel.
    pub channels: Vec<Image16>,
    /// Alignment-channel placements in ascending tile id order.
    pub placements: Vec<Placement>,
    pub thumbnail: Option<Image16>,
}

/// Renders tiles at their solved positions.
#[derive(Clone, Debug)]
pub struct MosaicAssembler {
    blend: BlendMode,
    max_canvas_bytes: u64,
    thumbnail_scale: Option<f64>,
}

/// Block size of a thumbnail rendered at `scale`.
fn thumbnail_factor(scale: f64) -> usize {
    ((1.0 / scale).round() as usize).max(1)
}

impl MosaicAssembler {
    pub fn new(blend: BlendMode, max_canvas_bytes: u64) -> Self {
        Self {
            blend,
            max_canvas_bytes,
            thumbnail_scale: None,
        }
    }

    /// Also render a thumbnail at `scale`, counted against the canvas budget.
    pub fn with_thumbnail(mut self, scale: Option<f64>) -> Self {
        self.thumbnail_scale = scale;
        self
    }

    /// Size of the thumbnail canvas for `layout`, if one is rendered.
    pub fn thumbnail_size(&self, layout: &Layout) -> Option<(usize, usize)> {
        let factor = thumbnail_factor(self.thumbnail_scale?);
        Some((layout.width.div_ceil(factor), layout.height.div_ceil(factor)))
    }

    /// Bytes needed to hold `channels` canvases of `layout`, accumulators and
    /// thumbnail included.
    pub fn required_bytes(&self, layout: &Layout, channels: usize) -> Option<u64> {
        let per_pixel: u64 = match self.blend {
            BlendMode::Overwrite => 2,
            // u16 output, u32 sum, u16 count
            BlendMode::Average => 8,
        };
        let canvases = (layout.width as u64)
            .checked_mul(layout.height as u64)?
            .checked_mul(per_pixel)?
            .checked_mul(channels as u64)?;
        let thumbnail = match self.thumbnail_size(layout) {
            Some((w, h)) => (w as u64).checked_mul(h as u64)?.checked_mul(2)?,
            None => 0,
        };
        canvases.checked_add(thumbnail)
    }

    /// Fail with [`AssembleError::Budget`] if the canvases do not fit the budget.
    pub fn check_budget(&self, layout: &Layout, channels: usize) -> Result<(), AssembleError> {
        let required = self.required_bytes(layout, channels).unwrap_or(u64::MAX);
        if required > self.max_canvas_bytes {
            log::error!(
                "mosaic {}x{} x{} channels needs {} bytes, budget {}",
                layout.width,
                layout.height,
                channels,
                required,
                self.max_canvas_bytes
            );
            return Err(AssembleError::Budget {
                width: layout.width,
                height: layout.height,
                channels,
                required,
                budget: self.max_canvas_bytes,
            });
        }
        Ok(())
    }

    /// Block-averaged preview of already decoded tiles, `None` unless enabled
    /// with [`with_thumbnail`](Self::with_thumbnail).
    pub fn thumbnail(
        &self,
        layout: &Layout,
        tiles: &[Arc<Image16>],
        order: &[usize],
    ) -> Result<Option<Image16>, AssembleError> {
        let (Some(scale), Some((width, height))) =
            (self.thumbnail_scale, self.thumbnail_size(layout))
        else {
            return Ok(None);
        };
        let factor = thumbnail_factor(scale);
        let mut thumb = Image16 {
            width,
            height,
            data: try_zeroed(width * height)?,
        };
        for &node in order {
            let small = tiles[node].view().downsample(factor);
            let rect = layout.rects[node];
            let origin = PixelRect {
                x: rect.x / factor as i64,
                y: rect.y / factor as i64,
                width: small.width,
                height: small.height,
            };
            paint(&mut thumb, &small, &origin, BlendMode::Overwrite, None);
        }
        Ok(Some(thumb))
    }

    /// Render every channel of `source`, in parallel across channels.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(width = layout.width, height = layout.height))
    )]
    pub fn assemble<S: TileSource>(
        &self,
        layout: &Layout,
        source: &S,
    ) -> Result<Vec<Image16>, AssembleError> {
        let channels = source.channel_count();
        self.check_budget(layout, channels)?;
        (0..channels)
            .into_par_iter()
            .map(|channel| self.render_channel(layout, source, channel))
            .collect()
    }

    fn render_channel<S: TileSource>(
        &self,
        layout: &Layout,
        source: &S,
        channel: usize,
    ) -> Result<Image16, AssembleError> {
        let mut canvas = Image16 {
            width: layout.width,
            height: layout.height,
            data: try_zeroed(layout.pixel_count())?,
        };
        let mut acc = match self.blend {
            BlendMode::Overwrite => None,
            BlendMode::Average => Some(Accumulator {
                sum: try_zeroed(layout.pixel_count())?,
                count: try_zeroed(layout.pixel_count())?,
            }),
        };

        for node in source.placement_order(channel) {
            let tile = source.read_tile(channel, node)?;
            paint(&mut canvas, &tile, &layout.rects[node], self.blend, acc.as_mut());
        }

        if let Some(acc) = acc {
            for ((out, &sum), &count) in canvas.data.iter_mut().zip(&acc.sum).zip(&acc.count) {
                if count > 0 {
                    let c = count as u32;
                    *out = ((sum + c / 2) / c) as u16;
                }
            }
        }
        log::debug!("channel {channel} assembled");
        Ok(canvas)
    }
}

struct Accumulator {
    sum: Vec<u32>,
    count: Vec<u16>,
}

fn try_zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>, AssembleError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| AssembleError::Allocation {
        bytes: (len as u64).saturating_mul(std::mem::size_of::<T>() as u64),
    })?;
    v.resize(len, T::default());
    Ok(v)
}

// Paint `tile` at `rect`, clipped to the canvas.
fn paint(
    canvas: &mut Image16,
    tile: &Image16,
    rect: &PixelRect,
    blend: BlendMode,
    mut acc: Option<&mut Accumulator>,
) {
    let bounds = PixelRect {
        x: 0,
        y: 0,
        width: canvas.width,
        height: canvas.height,
    };
    let Some(clip) = bounds.intersection(rect) else {
        return;
    };
    let tx0 = (clip.x - rect.x) as usize;
    let ty0 = (clip.y - rect.y) as usize;
    for row in 0..clip.height {
        let src_start = (ty0 + row) * tile.width + tx0;
        let src = &tile.data[src_start..src_start + clip.width];
        let dst_start = (clip.y as usize + row) * canvas.width + clip.x as usize;
        match (blend, acc.as_deref_mut()) {
            (BlendMode::Average, Some(acc)) => {
                let sums = &mut acc.sum[dst_start..dst_start + clip.width];
                let counts = &mut acc.count[dst_start..dst_start + clip.width];
                for ((s, c), &v) in sums.iter_mut().zip(counts.iter_mut()).zip(src) {
                    *s += v as u32;
                    *c = c.saturating_add(1);
                }
            }
            _ => {
                let dst = &mut canvas.data[dst_start..dst_start + clip.width];
                for (d, &v) in dst.iter_mut().zip(src) {
                    if v != 0 {
                        *d = v;
                    }
                }
            }
        }
    }
}

/// Write a 16-bit grayscale TIFF.
pub fn write_tiff(path: &Path, image: &Image16) -> Result<(), AssembleError> {
    let too_large = || AssembleError::TooLarge {
        width: image.width,
        height: image.height,
    };
    let w = u32::try_from(image.width).map_err(|_| too_large())?;
    let h = u32::try_from(image.height).map_err(|_| too_large())?;
    let buffer: ImageBuffer<Luma<u16>, &[u16]> =
        ImageBuffer::from_raw(w, h, image.data.as_slice()).ok_or_else(too_large)?;
    buffer
        .save_with_format(path, ImageFormat::Tiff)
        .map_err(|source| AssembleError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Files produced by [`write_outputs`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WrittenFiles {
    pub thumbnail: Option<PathBuf>,
    /// Indexed by channel.
    pub channels: Vec<PathBuf>,
}

impl WrittenFiles {
    fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.thumbnail.iter().chain(&self.channels)
    }
}

/// Write the thumbnail first, then one file per channel.
///
/// All or nothing: if any write fails, files already written by this call are
/// removed before the error is returned.
pub fn write_outputs(
    dir: &Path,
    mosaic: &Mosaic,
    channel_name: impl Fn(usize) -> String,
    thumbnail_name: Option<String>,
) -> Result<WrittenFiles, AssembleError> {
    std::fs::create_dir_all(dir).map_err(|source| AssembleError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut written = WrittenFiles::default();
    let result = write_each(dir, mosaic, channel_name, thumbnail_name, &mut written);
    if let Err(err) = &result {
        log::warn!("output failed ({err}), removing files written so far");
        for path in written.paths() {
            if let Err(e) = std::fs::remove_file(path) {
                log::warn!("could not remove {}: {e}", path.display());
            }
        }
    }
    result.map(|()| written)
}

fn write_each(
    dir: &Path,
    mosaic: &Mosaic,
    channel_name: impl Fn(usize) -> String,
    thumbnail_name: Option<String>,
    written: &mut WrittenFiles,
) -> Result<(), AssembleError> {
    if let (Some(thumb), Some(name)) = (&mosaic.thumbnail, thumbnail_name) {
        let path = dir.join(name);
        write_tiff(&path, thumb)?;
        log::info!("wrote thumbnail {}", path.display());
        written.thumbnail = Some(path);
    }
    for (index, canvas) in mosaic.channels.iter().enumerate() {
        let path = dir.join(channel_name(index));
        write_tiff(&path, canvas)?;
        log::info!("wrote {}", path.display());
        written.channels.push(path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemorySource {
        channels: Vec<Vec<Image16>>,
    }

    impl TileSource for MemorySource {
        fn channel_count(&self) -> usize {
            self.channels.len()
        }

        fn placement_order(&self, channel: usize) -> Vec<usize> {
            (0..self.channels[channel].len()).collect()
        }

        fn read_tile(&self, channel: usize, node: usize) -> Result<Image16, CatalogError> {
            Ok(self.channels[channel][node].clone())
        }
    }

    fn filled(w: usize, h: usize, v: u16) -> Image16 {
        Image16::from_raw(w, h, vec![v; w * h]).expect("size")
    }

    fn two_tiles() -> (Layout, MemorySource) {
        let layout = Layout::from_positions(
            &[Vector2::new(10.0, 5.0), Vector2::new(12.4, 5.6)],
            4,
            2,
        );
        let mut second = filled(4, 2, 201);
        second.data[0] = 0;
        let source = MemorySource {
            channels: vec![vec![filled(4, 2, 100), second]],
        };
        (layout, source)
    }

    #[test]
    fn layout_is_shifted_to_origin() {
        let (layout, _) = two_tiles();
        assert_eq!((layout.width, layout.height), (6, 3));
        assert_eq!((layout.rects[0].x, layout.rects[0].y), (0, 0));
        assert_eq!((layout.rects[1].x, layout.rects[1].y), (2, 1));
    }

    #[test]
    fn overwrite_keeps_earlier_pixels_under_zeros() {
        let (layout, source) = two_tiles();
        let out = MosaicAssembler::new(BlendMode::Overwrite, u64::MAX)
            .assemble(&layout, &source)
            .expect("assembled");
        let canvas = &out[0];
        assert_eq!(canvas.get(0, 0), 100);
        // Zero pixel of the second tile leaves the first tile visible.
        assert_eq!(canvas.get(2, 1), 100);
        assert_eq!(canvas.get(3, 1), 201);
        assert_eq!(canvas.get(5, 2), 201);
        // Uncovered corner.
        assert_eq!(canvas.get(5, 0), 0);
    }

    #[test]
    fn average_rounds_to_nearest() {
        let (layout, source) = two_tiles();
        let out = MosaicAssembler::new(BlendMode::Average, u64::MAX)
            .assemble(&layout, &source)
            .expect("assembled");
        let canvas = &out[0];
        assert_eq!(canvas.get(0, 0), 100);
        assert_eq!(canvas.get(3, 1), 151);
        // Zero counts as a covering value.
        assert_eq!(canvas.get(2, 1), 50);
        assert_eq!(canvas.get(4, 2), 201);
    }

    #[test]
    fn budget_is_checked_before_allocation() {
        let (layout, source) = two_tiles();
        let exact = 6 * 3 * 2;
        assert!(MosaicAssembler::new(BlendMode::Overwrite, exact)
            .assemble(&layout, &source)
            .is_ok());
        let err = MosaicAssembler::new(BlendMode::Overwrite, exact - 1)
            .assemble(&layout, &source)
            .unwrap_err();
        assert!(matches!(err, AssembleError::Budget { required: 36, .. }));
        assert!(MosaicAssembler::new(BlendMode::Average, exact)
            .check_budget(&layout, 1)
            .is_err());
    }

    #[test]
    fn thumbnail_block_averages_tiles() {
        let layout = Layout::from_positions(&[Vector2::new(0.0, 0.0), Vector2::new(4.0, 0.0)], 4, 4);
        let tiles = vec![Arc::new(filled(4, 4, 10)), Arc::new(filled(4, 4, 30))];
        let assembler = MosaicAssembler::new(BlendMode::Overwrite, u64::MAX);
        assert_eq!(assembler.thumbnail(&layout, &tiles, &[0, 1]).expect("no thumbnail"), None);

        let thumb = assembler
            .with_thumbnail(Some(0.5))
            .thumbnail(&layout, &tiles, &[0, 1])
            .expect("allocated")
            .expect("thumbnail");
        assert_eq!((thumb.width, thumb.height), (4, 2));
        assert_eq!(thumb.data, vec![10, 10, 30, 30, 10, 10, 30, 30]);
    }

    #[test]
    fn thumbnail_counts_against_the_budget() {
        let (layout, source) = two_tiles();
        let canvas = 6 * 3 * 2;
        let full = MosaicAssembler::new(BlendMode::Overwrite, canvas).with_thumbnail(Some(1.0));
        assert_eq!(full.required_bytes(&layout, 1), Some(2 * canvas));
        let err = full.assemble(&layout, &source).unwrap_err();
        assert!(matches!(err, AssembleError::Budget { required: 72, .. }));

        // 6x3 at scale 0.5 is a 3x2 thumbnail.
        let half = MosaicAssembler::new(BlendMode::Overwrite, canvas + 12).with_thumbnail(Some(0.5));
        assert_eq!(half.thumbnail_size(&layout), Some((3, 2)));
        assert!(half.check_budget(&layout, 1).is_ok());
    }

    #[test]
    fn outputs_round_trip_through_tiff() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mosaic = Mosaic {
            width: 3,
            height: 2,
            channels: vec![Image16::from_raw(3, 2, vec![1, 2, 3, 40000, 5, 65535]).expect("size")],
            placements: Vec::new(),
            thumbnail: Some(filled(1, 1, 7)),
        };
        let written = write_outputs(
            dir.path(),
            &mosaic,
            |i| format!("stitched_{i}.tif"),
            Some("thumbnail_0.tif".to_string()),
        )
        .expect("written");
        assert_eq!(written.channels, vec![dir.path().join("stitched_0.tif")]);
        let back = image::open(&written.channels[0]).expect("readable").to_luma16();
        assert_eq!(back.into_raw(), mosaic.channels[0].data);
        assert!(written.thumbnail.expect("thumbnail").is_file());
    }

    #[test]
    fn failed_write_removes_earlier_outputs() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mosaic = Mosaic {
            width: 2,
            height: 1,
            channels: vec![filled(2, 1, 5), filled(2, 1, 6)],
            placements: Vec::new(),
            thumbnail: Some(filled(1, 1, 5)),
        };
        // The second channel targets a directory that does not exist.
        let err = write_outputs(
            dir.path(),
            &mosaic,
            |i| match i {
                0 => "stitched_0.tif".to_string(),
                _ => "absent/stitched_1.tif".to_string(),
            },
            Some("thumbnail_0.tif".to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, AssembleError::Write { .. }));
        let left: Vec<_> = std::fs::read_dir(dir.path()).expect("listable").collect();
        assert!(left.is_empty(), "{left:?}");
    }
}
