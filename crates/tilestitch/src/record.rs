//! Tile records as delivered by the job submitter.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

fn default_channel() -> String {
    "0".to_string()
}

/// Metadata of one captured tile.
///
/// Mirrors the document shape of the upload service; fields the engine does
/// not use (`user_id`, `content_type`, ...) are ignored on input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub absolute_path: PathBuf,
    /// Name matched against the naming pattern; defaults to the path's file name.
    #[serde(default)]
    pub file_name: Option<String>,
    pub width_px: usize,
    pub height_px: usize,
    #[serde(default)]
    pub row_index: i64,
    #[serde(default)]
    pub column_index: i64,
    #[serde(default)]
    pub offset_x: f64,
    #[serde(default)]
    pub offset_y: f64,
    #[serde(default = "default_channel", deserialize_with = "channel_name")]
    pub channel: String,
}

impl TileRecord {
    /// Decode one record from its JSON transport encoding.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// File name used for pattern matching.
    pub fn resolved_file_name(&self) -> String {
        match &self.file_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => file_name_of(&self.absolute_path),
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// Channels arrive either as names or as bare integers.
fn channel_name<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Channel {
        Name(String),
        Index(i64),
    }
    Ok(match Channel::deserialize(deserializer)? {
        Channel::Name(name) => name,
        Channel::Index(i) => i.to_string(),
    })
}
