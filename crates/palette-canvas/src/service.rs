use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use palette_core::canvas::{CanvasDocument, CanvasElement, FileMeta};
use palette_core::config::Config;
use palette_core::error::Result;
use palette_core::store::Store;

use crate::layout::{LayoutPolicy, next_placement};
use crate::locks::CanvasLocks;

/// A generated artifact to place on a canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInsert {
    /// `image` or `video`.
    pub kind: String,
    pub url: String,
    pub mime_type: String,
    pub width: f64,
    pub height: f64,
    /// Extra element fields (prompt, model, ...) carried for the client.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The element and file record an insertion produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedMedia {
    pub element: CanvasElement,
    pub file: FileMeta,
}

pub struct CanvasService {
    store: Arc<dyn Store>,
    locks: CanvasLocks,
    layout: LayoutPolicy,
}

impl CanvasService {
    pub fn new(store: Arc<dyn Store>, layout: LayoutPolicy) -> Self {
        Self {
            store,
            locks: CanvasLocks::new(),
            layout,
        }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &Config) -> Self {
        Self::new(store, LayoutPolicy::from_config(config))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn locks(&self) -> &CanvasLocks {
        &self.locks
    }

    /// Current document of a canvas.
    pub async fn document(&self, canvas_id: &str) -> Result<CanvasDocument> {
        self.store.get_canvas_document(canvas_id).await
    }

    /// Place a media element after the last one and persist the document.
    ///
    /// Read, placement, append and save all happen under the canvas lock, so
    /// concurrent insertions on one canvas never see the same last element.
    pub async fn insert_media(&self, canvas_id: &str, media: MediaInsert) -> Result<PlacedMedia> {
        self.locks
            .with_canvas_lock(canvas_id, || async move {
                let mut document = self.store.get_canvas_document(canvas_id).await?;
                let (x, y) = next_placement(&document, &self.layout);

                let file = FileMeta {
                    id: format!("file_{}", Uuid::new_v4().simple()),
                    mime_type: media.mime_type,
                    url: media.url,
                    created: Utc::now(),
                };
                let element = CanvasElement {
                    id: Uuid::new_v4().to_string(),
                    kind: media.kind,
                    x,
                    y,
                    width: media.width,
                    height: media.height,
                    file_id: Some(file.id.clone()),
                    extra: media.extra,
                };

                document.elements.push(element.clone());
                document.files.insert(file.id.clone(), file.clone());
                self.store.save_canvas_document(canvas_id, &document).await?;

                info!(
                    canvas_id,
                    element_id = %element.id,
                    kind = %element.kind,
                    x,
                    y,
                    "Media placed on canvas"
                );
                Ok(PlacedMedia { element, file })
            })
            .await
    }
}
