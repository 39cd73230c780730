//! JSON request and report files.

use crate::error::{StitchError, StructuredError};
use crate::job::{MosaicResult, StitchSummary};
use crate::options::StitchOptions;
use crate::record::TileRecord;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum StitchIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A tile in a request file: the transport-encoded string or an inline object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TileEntry {
    Encoded(String),
    Record(TileRecord),
}

/// A stitching job stored as JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StitchRequest {
    pub tiles: Vec<TileEntry>,
    pub pattern: String,
    #[serde(default)]
    pub options: StitchOptions,
}

impl StitchRequest {
    /// Load a JSON request from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, StitchIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this request to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), StitchIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Decode every entry into a record.
    pub fn records(&self) -> Result<Vec<TileRecord>, StitchError> {
        self.tiles
            .iter()
            .enumerate()
            .map(|(index, entry)| match entry {
                TileEntry::Encoded(raw) => TileRecord::from_json(raw)
                    .map_err(|source| StitchError::Record { index, source }),
                TileEntry::Record(record) => Ok(record.clone()),
            })
            .collect()
    }

    /// Run the job described by this request.
    pub fn run(&self) -> Result<MosaicResult, StructuredError> {
        let records = self.records().map_err(StructuredError::from)?;
        crate::stitch_records(records, &self.pattern, &self.options)
    }
}

/// Outcome of a request, for writing next to the mosaic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StitchReport {
    #[serde(default)]
    pub request_path: Option<String>,
    #[serde(default)]
    pub summary: Option<StitchSummary>,
    #[serde(default)]
    pub error: Option<StructuredError>,
}

impl StitchReport {
    pub fn new(request_path: Option<String>) -> Self {
        Self {
            request_path,
            ..Self::default()
        }
    }

    pub fn set_result(&mut self, summary: StitchSummary) {
        self.summary = Some(summary);
        self.error = None;
    }

    pub fn set_error(&mut self, error: StructuredError) {
        self.summary = None;
        self.error = Some(error);
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, StitchIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), StitchIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
