use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tilestitch_graph::SolverParams;
use tilestitch_registration::RegistrationParams;

/// Errors produced by option validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OptionsError {
    #[error("overlap must lie in (0, 1), got {0}")]
    Overlap(f64),
    #[error("{name} must be a finite value >= 0, got {value}")]
    Negative { name: &'static str, value: f64 },
    #[error("pixel_size must be a finite value > 0, got {0}")]
    PixelSize(f64),
    #[error("thumbnail_scale must lie in (0, 1], got {0}")]
    ThumbnailScale(f64),
    #[error("min_overlap_px must be at least 1")]
    MinOverlap,
    #[error("num_threads must be at least 1")]
    NumThreads,
    #[error("{name} must not be empty")]
    EmptyFormat { name: &'static str },
    #[error("{name} {format:?} must contain {{channel}} when stitching {channels} channels")]
    FormatWithoutChannel {
        name: &'static str,
        format: String,
        channels: usize,
    },
}

/// Alignment channel, by position in first-appearance order or by name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelSelector {
    Index(usize),
    Name(String),
}

impl Default for ChannelSelector {
    fn default() -> Self {
        ChannelSelector::Index(0)
    }
}

impl fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSelector::Index(i) => write!(f, "#{i}"),
            ChannelSelector::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// How overlapping tiles combine on the canvas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Tiles are placed in ascending id order; non-zero pixels overwrite.
    #[default]
    Overwrite,
    /// Every covering tile contributes equally, rounded to nearest.
    Average,
}

fn default_filter_sigma() -> f64 {
    10.0
}

fn default_max_shift() -> f64 {
    500.0
}

fn default_permutations_multiplier() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_overlap() -> f64 {
    0.2
}

fn default_pixel_size() -> f64 {
    1.0
}

fn default_min_confidence() -> f64 {
    6.0
}

fn default_min_overlap_px() -> usize {
    8
}

fn default_max_residual() -> f64 {
    2.0
}

fn default_filename_format() -> String {
    "stitched_{channel}.tif".to_string()
}

fn default_thumbnail_format() -> String {
    "thumbnail_{channel}.tif".to_string()
}

fn default_thumbnail_scale() -> f64 {
    0.05
}

fn default_max_canvas_bytes() -> u64 {
    8 << 30
}

/// Options of one stitching job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StitchOptions {
    #[serde(default)]
    pub channel: ChannelSelector,
    /// Laplacian-of-Gaussian sigma for registration, `0` disables it.
    #[serde(default = "default_filter_sigma")]
    pub filter_sigma: f64,
    #[serde(default = "default_max_shift")]
    pub max_shift: f64,
    #[serde(default = "default_permutations_multiplier")]
    pub permutations_multiplier: usize,
    #[serde(default = "default_true")]
    pub do_make_thumbnail: bool,
    #[serde(default = "default_overlap")]
    pub overlap: f64,
    /// Offset units per pixel, used when tiles carry stage offsets.
    #[serde(default = "default_pixel_size")]
    pub pixel_size: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_min_overlap_px")]
    pub min_overlap_px: usize,
    #[serde(default = "default_true")]
    pub refine: bool,
    #[serde(default = "default_max_residual")]
    pub max_residual: f64,
    #[serde(default)]
    pub blend: BlendMode,
    /// Output directory; the directory of the first tile when unset.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub write_output: bool,
    #[serde(default = "default_filename_format")]
    pub filename_format: String,
    #[serde(default = "default_thumbnail_format")]
    pub thumbnail_format: String,
    #[serde(default = "default_thumbnail_scale")]
    pub thumbnail_scale: f64,
    #[serde(default = "default_max_canvas_bytes")]
    pub max_canvas_bytes: u64,
    /// Worker threads of the job pool; available parallelism when unset.
    #[serde(default)]
    pub num_threads: Option<usize>,
}

impl Default for StitchOptions {
    fn default() -> Self {
        Self {
            channel: ChannelSelector::default(),
            filter_sigma: default_filter_sigma(),
            max_shift: default_max_shift(),
            permutations_multiplier: default_permutations_multiplier(),
            do_make_thumbnail: true,
            overlap: default_overlap(),
            pixel_size: default_pixel_size(),
            min_confidence: default_min_confidence(),
            min_overlap_px: default_min_overlap_px(),
            refine: true,
            max_residual: default_max_residual(),
            blend: BlendMode::default(),
            output_dir: None,
            write_output: true,
            filename_format: default_filename_format(),
            thumbnail_format: default_thumbnail_format(),
            thumbnail_scale: default_thumbnail_scale(),
            max_canvas_bytes: default_max_canvas_bytes(),
            num_threads: None,
        }
    }
}

impl StitchOptions {
    /// Check value ranges. Runs before any tile is touched.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !(self.overlap.is_finite() && self.overlap > 0.0 && self.overlap < 1.0) {
            return Err(OptionsError::Overlap(self.overlap));
        }
        for (name, value) in [
            ("filter_sigma", self.filter_sigma),
            ("max_shift", self.max_shift),
            ("min_confidence", self.min_confidence),
            ("max_residual", self.max_residual),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(OptionsError::Negative { name, value });
            }
        }
        if !(self.pixel_size.is_finite() && self.pixel_size > 0.0) {
            return Err(OptionsError::PixelSize(self.pixel_size));
        }
        if !(self.thumbnail_scale.is_finite()
            && self.thumbnail_scale > 0.0
            && self.thumbnail_scale <= 1.0)
        {
            return Err(OptionsError::ThumbnailScale(self.thumbnail_scale));
        }
        if self.min_overlap_px == 0 {
            return Err(OptionsError::MinOverlap);
        }
        if self.num_threads == Some(0) {
            return Err(OptionsError::NumThreads);
        }
        if self.filename_format.is_empty() {
            return Err(OptionsError::EmptyFormat {
                name: "filename_format",
            });
        }
        if self.do_make_thumbnail && self.thumbnail_format.is_empty() {
            return Err(OptionsError::EmptyFormat {
                name: "thumbnail_format",
            });
        }
        Ok(())
    }

    /// Checks that depend on the number of channels found in the catalog.
    pub fn validate_for_channels(&self, channels: usize) -> Result<(), OptionsError> {
        if channels > 1 && !self.filename_format.contains("{channel}") {
            return Err(OptionsError::FormatWithoutChannel {
                name: "filename_format",
                format: self.filename_format.clone(),
                channels,
            });
        }
        Ok(())
    }

    pub fn registration_params(&self) -> RegistrationParams {
        RegistrationParams {
            overlap: self.overlap,
            filter_sigma: self.filter_sigma as f32,
            max_shift: self.max_shift,
            permutations_multiplier: self.permutations_multiplier,
            min_overlap_px: self.min_overlap_px,
        }
    }

    pub fn solver_params(&self) -> SolverParams {
        SolverParams {
            refine: self.refine,
            max_residual: self.max_residual,
        }
    }

    /// Output file name for channel `index`.
    pub fn output_name(&self, index: usize) -> String {
        self.filename_format
            .replace("{channel}", &index.to_string())
    }

    pub fn thumbnail_name(&self, index: usize) -> String {
        self.thumbnail_format
            .replace("{channel}", &index.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let opts: StitchOptions = serde_json::from_str("{}").expect("defaults");
        assert_eq!(opts, StitchOptions::default());
        assert_eq!(opts.channel, ChannelSelector::Index(0));
        assert_eq!(opts.filter_sigma, 10.0);
        assert_eq!(opts.max_shift, 500.0);
        assert_eq!(opts.permutations_multiplier, 1);
        assert_eq!(opts.min_confidence, 6.0);
        assert_eq!(opts.max_canvas_bytes, 8 * 1024 * 1024 * 1024);
        assert!(opts.do_make_thumbnail && opts.refine && opts.write_output);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn channel_accepts_index_or_name() {
        let by_name: StitchOptions =
            serde_json::from_str(r#"{"channel": "DAPI", "blend": "average"}"#).expect("valid");
        assert_eq!(by_name.channel, ChannelSelector::Name("DAPI".to_string()));
        assert_eq!(by_name.blend, BlendMode::Average);
        let by_index: StitchOptions = serde_json::from_str(r#"{"channel": 2}"#).expect("valid");
        assert_eq!(by_index.channel, ChannelSelector::Index(2));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<StitchOptions>(r#"{"overlapp": 0.1}"#).is_err());
    }

    #[test]
    fn ranges_are_validated() {
        let bad_overlap = StitchOptions {
            overlap: 1.0,
            ..StitchOptions::default()
        };
        assert_eq!(bad_overlap.validate(), Err(OptionsError::Overlap(1.0)));

        let bad_shift = StitchOptions {
            max_shift: -1.0,
            ..StitchOptions::default()
        };
        assert!(matches!(
            bad_shift.validate(),
            Err(OptionsError::Negative {
                name: "max_shift",
                ..
            })
        ));

        let bad_threads = StitchOptions {
            num_threads: Some(0),
            ..StitchOptions::default()
        };
        assert_eq!(bad_threads.validate(), Err(OptionsError::NumThreads));

        let bad_scale = StitchOptions {
            thumbnail_scale: 0.0,
            ..StitchOptions::default()
        };
        assert_eq!(bad_scale.validate(), Err(OptionsError::ThumbnailScale(0.0)));
    }

    #[test]
    fn multi_channel_output_needs_placeholder() {
        let opts = StitchOptions {
            filename_format: "mosaic.tif".to_string(),
            ..StitchOptions::default()
        };
        assert!(opts.validate_for_channels(1).is_ok());
        assert!(matches!(
            opts.validate_for_channels(2),
            Err(OptionsError::FormatWithoutChannel { channels: 2, .. })
        ));
        assert_eq!(StitchOptions::default().output_name(1), "stitched_1.tif");
        assert_eq!(StitchOptions::default().thumbnail_name(0), "thumbnail_0.tif");
    }
}
