//! Storage collaborator: durable chat history and canvas documents.
//!
//! The orchestration core only needs [`Store`]; two implementations ship:
//! [`MemoryStore`] for tests and ephemeral runs, [`FileStore`] for disk.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::canvas::CanvasDocument;
use crate::error::{PaletteError, Result};
use crate::session::sanitize_id;
use crate::types::Message;

#[async_trait]
pub trait Store: Send + Sync {
    /// Append one finalized message to a session's history.
    async fn append_message(&self, session_id: &str, message: &Message) -> Result<()>;

    /// Full history of a session, oldest first. Unknown sessions are empty.
    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Current document of a canvas. Unknown canvases are empty.
    async fn get_canvas_document(&self, canvas_id: &str) -> Result<CanvasDocument>;

    async fn save_canvas_document(&self, canvas_id: &str, document: &CanvasDocument)
    -> Result<()>;
}

/// In-memory store; nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<HashMap<String, Vec<Message>>>,
    canvases: RwLock<HashMap<String, CanvasDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_message(&self, session_id: &str, message: &Message) -> Result<()> {
        self.messages
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_canvas_document(&self, canvas_id: &str) -> Result<CanvasDocument> {
        Ok(self
            .canvases
            .read()
            .await
            .get(canvas_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_canvas_document(
        &self,
        canvas_id: &str,
        document: &CanvasDocument,
    ) -> Result<()> {
        self.canvases
            .write()
            .await
            .insert(canvas_id.to_string(), document.clone());
        Ok(())
    }
}

/// File-based store.
///
/// Layout:
/// - `<base>/sessions/<id>.jsonl`: one message per line, append-only
/// - `<base>/canvases/<id>.json`: whole document, replaced atomically
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base
            .join("sessions")
            .join(format!("{}.jsonl", sanitize_id(session_id)))
    }

    fn canvas_path(&self, canvas_id: &str) -> PathBuf {
        self.base
            .join("canvases")
            .join(format!("{}.json", sanitize_id(canvas_id)))
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.base.join("sessions")).await?;
        tokio::fs::create_dir_all(self.base.join("canvases")).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn append_message(&self, session_id: &str, message: &Message) -> Result<()> {
        self.ensure_dirs().await?;

        let line = serde_json::to_string(message)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.session_path(session_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut messages = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(line)
                .map_err(|e| PaletteError::Storage(format!("corrupt history line: {e}")))?;
            messages.push(message);
        }
        debug!(session_id, messages = messages.len(), "Loaded session history");
        Ok(messages)
    }

    async fn get_canvas_document(&self, canvas_id: &str) -> Result<CanvasDocument> {
        let path = self.canvas_path(canvas_id);
        if !path.exists() {
            return Ok(CanvasDocument::default());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&data)
            .map_err(|e| PaletteError::Storage(format!("corrupt canvas document: {e}")))
    }

    async fn save_canvas_document(
        &self,
        canvas_id: &str,
        document: &CanvasDocument,
    ) -> Result<()> {
        self.ensure_dirs().await?;
        let data = serde_json::to_string_pretty(document)?;
        let path = self.canvas_path(canvas_id);
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(canvas_id, elements = document.elements.len(), "Saved canvas document");
        Ok(())
    }
}
