//! Delivering a generated artifact: onto the session's canvas when it has
//! one, otherwise back to the model as a link.

use serde_json::json;
use tracing::info;

use palette_canvas::{MediaInsert, PlacedMedia};
use palette_core::protocol::PushEvent;

use crate::generation::{GeneratedArtifact, MediaKind};
use crate::{ToolContext, ToolOutput};

/// Place `artifact` and notify the session.
pub async fn deliver(
    kind: MediaKind,
    artifact: &GeneratedArtifact,
    prompt: &str,
    model: Option<&str>,
    context: &ToolContext,
) -> anyhow::Result<ToolOutput> {
    let label = match kind {
        MediaKind::Image => "Image",
        MediaKind::Video => "Video",
    };

    let Some(canvas_id) = context.canvas_id.as_deref() else {
        info!(
            session_id = %context.session_id,
            call_id = %context.call_id,
            url = %artifact.url,
            "Generated media without a canvas"
        );
        return Ok(ToolOutput::ok(format!(
            "{label} generated ({}x{}): {}",
            artifact.width, artifact.height, artifact.url
        )));
    };

    let mut extra = serde_json::Map::new();
    extra.insert("prompt".into(), json!(prompt));
    if let Some(model) = model {
        extra.insert("model".into(), json!(model));
    }
    extra.insert("tool_call_id".into(), json!(context.call_id));

    let PlacedMedia { element, file } = context
        .canvas
        .insert_media(
            canvas_id,
            MediaInsert {
                kind: kind.element_kind().to_string(),
                url: artifact.url.clone(),
                mime_type: artifact.mime_type.clone(),
                width: f64::from(artifact.width),
                height: f64::from(artifact.height),
                extra,
            },
        )
        .await?;

    let content = format!(
        "{label} generated and added to the canvas at ({}, {}), {}x{}: {}",
        element.x, element.y, artifact.width, artifact.height, artifact.url
    );

    let event = match kind {
        MediaKind::Image => PushEvent::ImageGenerated {
            canvas_id: canvas_id.to_string(),
            element,
            file,
        },
        MediaKind::Video => PushEvent::VideoGenerated {
            canvas_id: canvas_id.to_string(),
            element,
            file,
        },
    };
    context.push.send(&context.session_id, event);

    Ok(ToolOutput::ok(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use palette_canvas::{CanvasService, LayoutPolicy};
    use palette_core::push::{Outbound, PushChannels, PushConnection};
    use palette_core::store::{MemoryStore, Store};

    fn context(canvas_id: Option<&str>) -> ToolContext {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        ToolContext {
            session_id: "s1".into(),
            canvas_id: canvas_id.map(str::to_string),
            call_id: "call_1".into(),
            canvas: Arc::new(CanvasService::new(store, LayoutPolicy::default())),
            push: Arc::new(PushChannels::new()),
        }
    }

    fn artifact() -> GeneratedArtifact {
        GeneratedArtifact {
            mime_type: "image/png".into(),
            width: 1024,
            height: 1024,
            url: "/files/image_call_1.png".into(),
        }
    }

    #[tokio::test]
    async fn test_deliver_to_canvas_pushes_event() {
        let ctx = context(Some("c1"));
        let (conn, mut rx) = PushConnection::new();
        ctx.push.register("s1", conn);

        let out = deliver(MediaKind::Image, &artifact(), "a cat", Some("gpt-image-1"), &ctx)
            .await
            .unwrap();
        assert!(!out.is_error);
        assert!(out.content.contains("added to the canvas"));

        let doc = ctx.canvas.document("c1").await.unwrap();
        assert_eq!(doc.elements.len(), 1);
        assert_eq!(doc.elements[0].kind, "image");
        assert_eq!(doc.elements[0].extra["prompt"], "a cat");

        match rx.recv().await.unwrap() {
            Outbound::Event(PushEvent::ImageGenerated { canvas_id, element, file }) => {
                assert_eq!(canvas_id, "c1");
                assert_eq!(element, doc.elements[0]);
                assert_eq!(file.url, "/files/image_call_1.png");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deliver_without_canvas() {
        let ctx = context(None);
        let out = deliver(MediaKind::Video, &artifact(), "waves", None, &ctx)
            .await
            .unwrap();
        assert_eq!(out.content, "Video generated (1024x1024): /files/image_call_1.png");
    }
}
