//! Stream task registry: at most one running turn per session.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("a turn is already running for session {0}")]
    AlreadyRunning(String),
}

struct TaskEntry {
    task_id: u64,
    token: CancellationToken,
}

#[derive(Default)]
pub struct StreamTaskRegistry {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    next_id: AtomicU64,
}

/// Removes the task's entry when the task ends, however it ends.
struct FinishGuard {
    registry: Arc<StreamTaskRegistry>,
    session_id: String,
    task_id: u64,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.registry.finish_task(&self.session_id, self.task_id);
    }
}

impl StreamTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task for `session_id` and spawn `task(token)`.
    pub fn start<F, Fut>(
        self: &Arc<Self>,
        session_id: &str,
        task: F,
    ) -> Result<JoinHandle<()>, TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut tasks = self.lock();
            if tasks.contains_key(session_id) {
                return Err(TaskError::AlreadyRunning(session_id.to_string()));
            }
            tasks.insert(
                session_id.to_string(),
                TaskEntry {
                    task_id,
                    token: token.clone(),
                },
            );
        }
        info!(session_id, task_id, "Stream task started");

        let guard = FinishGuard {
            registry: self.clone(),
            session_id: session_id.to_string(),
            task_id,
        };
        let fut = task(token);
        Ok(tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        }))
    }

    /// Request cancellation of the session's task. `false` if none is running.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.lock().get(session_id) {
            Some(entry) => {
                entry.token.cancel();
                info!(session_id, task_id = entry.task_id, "Stream task cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Drop the session's mapping, whatever state its task is in.
    pub fn finish(&self, session_id: &str) {
        if self.lock().remove(session_id).is_some() {
            debug!(session_id, "Stream task finished");
        }
    }

    fn finish_task(&self, session_id: &str, task_id: u64) {
        let mut tasks = self.lock();
        if tasks.get(session_id).is_some_and(|e| e.task_id == task_id) {
            tasks.remove(session_id);
            debug!(session_id, task_id, "Stream task finished");
        }
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self.lock().keys().cloned().collect();
        sessions.sort();
        sessions
    }

    /// Cancel every running task (used on shutdown).
    pub fn cancel_all(&self) {
        for entry in self.lock().values() {
            entry.token.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
