#![allow(dead_code)]

use image::{ImageBuffer, Luma};
use std::path::{Path, PathBuf};
use tilestitch::TileRecord;

/// Deterministic texture in `[1000, 60000)`, never zero.
pub fn noise(x: i64, y: i64) -> u16 {
    let mut h = (x.wrapping_mul(0x2545_F491) ^ y.wrapping_mul(0x9E37_79B9)) as u64;
    h = h.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h ^= h >> 31;
    h = h.wrapping_mul(0x94D0_49BB_1331_11EB);
    h ^= h >> 29;
    1000 + (h % 59_000) as u16
}

pub fn inverted(x: i64, y: i64) -> u16 {
    u16::MAX - noise(x, y)
}

/// Row-major crop of a texture.
pub fn render(x0: i64, y0: i64, w: usize, h: usize, texture: fn(i64, i64) -> u16) -> Vec<u16> {
    let mut data = Vec::with_capacity(w * h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            data.push(texture(x0 + x, y0 + y));
        }
    }
    data
}

pub fn write_tiff(path: &Path, w: usize, h: usize, data: Vec<u16>) {
    let img: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_raw(w as u32, h as u32, data).expect("buffer size");
    img.save(path).expect("write tile");
}

pub fn read_tiff(path: &Path) -> Vec<u16> {
    image::open(path).expect("readable tiff").to_luma16().into_raw()
}

/// Tile placed at a true source origin, named by its grid cell.
#[derive(Clone, Debug)]
pub struct TileSpec {
    pub id: String,
    pub row: i64,
    pub col: i64,
    pub origin: (i64, i64),
}

impl TileSpec {
    pub fn new(id: &str, row: i64, col: i64, origin: (i64, i64)) -> Self {
        Self {
            id: id.to_string(),
            row,
            col,
            origin,
        }
    }
}

pub const PATTERN: &str = "img_r{row:03}_c{col:03}.tif";

pub fn tile_name(row: i64, col: i64) -> String {
    format!("img_r{:03}_c{:03}.tif", row + 1, col + 1)
}

/// Write `specs` as `size x size` tiles into `dir` and return their records.
pub fn write_scene(dir: &Path, size: usize, specs: &[TileSpec]) -> Vec<TileRecord> {
    std::fs::create_dir_all(dir).expect("tile dir");
    specs
        .iter()
        .map(|s| {
            let name = tile_name(s.row, s.col);
            let path = dir.join(&name);
            write_tiff(&path, size, size, render(s.origin.0, s.origin.1, size, size, noise));
            record(&s.id, path, size, s.row, s.col)
        })
        .collect()
}

pub fn record(id: &str, path: PathBuf, size: usize, row: i64, col: i64) -> TileRecord {
    TileRecord {
        id: id.to_string(),
        file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        absolute_path: path,
        width_px: size,
        height_px: size,
        row_index: row,
        column_index: col,
        offset_x: 0.0,
        offset_y: 0.0,
        channel: "not specified".to_string(),
    }
}

/// Three 100 px tiles overlapping by 20 columns, cut from a 260x100 source.
pub fn row_of_three(dir: &Path) -> Vec<TileRecord> {
    write_scene(
        dir,
        100,
        &[
            TileSpec::new("t0", 0, 0, (0, 0)),
            TileSpec::new("t1", 0, 1, (80, 0)),
            TileSpec::new("t2", 0, 2, (160, 0)),
        ],
    )
}

pub fn encode(records: &[TileRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.to_json().expect("serializable"))
        .collect()
}

pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
