//! Error taxonomy of the job boundary.

use crate::assembler::AssembleError;
use crate::catalog::CatalogError;
use crate::options::OptionsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tilestitch_graph::GraphError;
use tilestitch_registration::RegistrationError;

/// Category of a [`StructuredError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "validation_error")]
    Validation,
    #[serde(rename = "registration_error")]
    Registration,
    #[serde(rename = "connectivity_error")]
    Connectivity,
    #[serde(rename = "io_error")]
    Io,
    #[serde(rename = "resource_error")]
    Resource,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Registration => "registration_error",
            ErrorKind::Connectivity => "connectivity_error",
            ErrorKind::Io => "io_error",
            ErrorKind::Resource => "resource_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable error returned across the job boundary.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StructuredError {
    pub kind: ErrorKind,
    pub message: String,
    /// Offending tile ids, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tile_ids: Vec<String>,
    /// Disconnected tile groups of a connectivity failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Vec<String>>,
}

impl StructuredError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tile_ids: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn with_tile_ids(mut self, ids: Vec<String>) -> Self {
        self.tile_ids = ids;
        self
    }

    /// Per-edge report of a pair that could not be scored.
    pub fn registration(err: &RegistrationError, tile_ids: Vec<String>) -> Self {
        Self::new(ErrorKind::Registration, err.to_string()).with_tile_ids(tile_ids)
    }
}

/// Everything that can stop a stitching job.
#[derive(thiserror::Error, Debug)]
pub enum StitchError {
    #[error("tile record #{index} is not valid JSON: {source}")]
    Record {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("alignment graph is disconnected into {} groups", groups.len())]
    Disconnected { groups: Vec<Vec<String>> },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error("failed to build the job worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl StitchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StitchError::Record { .. } | StitchError::Options(_) => ErrorKind::Validation,
            StitchError::Catalog(e) if e.is_io() => ErrorKind::Io,
            StitchError::Catalog(_) => ErrorKind::Validation,
            StitchError::Disconnected { .. } | StitchError::Graph(_) => ErrorKind::Connectivity,
            StitchError::Assemble(e) => match e {
                AssembleError::Budget { .. }
                | AssembleError::Allocation { .. }
                | AssembleError::TooLarge { .. } => ErrorKind::Resource,
                AssembleError::Tile(inner) if !inner.is_io() => ErrorKind::Validation,
                AssembleError::Tile(_)
                | AssembleError::CreateDir { .. }
                | AssembleError::Write { .. } => ErrorKind::Io,
            },
            StitchError::Pool(_) => ErrorKind::Resource,
        }
    }

    pub fn tile_ids(&self) -> Vec<String> {
        match self {
            StitchError::Catalog(e) | StitchError::Assemble(AssembleError::Tile(e)) => e.tile_ids(),
            StitchError::Disconnected { groups } => groups.iter().flatten().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

impl From<StitchError> for StructuredError {
    fn from(err: StitchError) -> Self {
        let groups = match &err {
            StitchError::Disconnected { groups } => groups.clone(),
            _ => Vec::new(),
        };
        StructuredError {
            kind: err.kind(),
            message: err.to_string(),
            tile_ids: err.tile_ids(),
            groups,
        }
    }
}
