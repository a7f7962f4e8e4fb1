//! Canvas document: the shared state generated media elements live in.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const KIND_IMAGE: &str = "image";
pub const KIND_VIDEO: &str = "video";

/// A positioned element on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasElement {
    pub id: String,
    /// Element type ("image", "video", or anything a client drew itself).
    #[serde(rename = "type")]
    pub kind: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    /// Fields written by clients that the backend does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CanvasElement {
    pub fn is_media(&self) -> bool {
        self.kind == KIND_IMAGE || self.kind == KIND_VIDEO
    }
}

/// Metadata for a file referenced by canvas elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub id: String,
    pub mime_type: String,
    pub url: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasDocument {
    /// Elements in insertion order.
    #[serde(default)]
    pub elements: Vec<CanvasElement>,
    #[serde(default)]
    pub files: BTreeMap<String, FileMeta>,
}

impl CanvasDocument {
    /// The most recently inserted image or video element.
    pub fn last_media_element(&self) -> Option<&CanvasElement> {
        self.elements.iter().rev().find(|e| e.is_media())
    }
}
