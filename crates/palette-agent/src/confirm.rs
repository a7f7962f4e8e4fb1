//! Confirmation broker: tool calls that wait for the user's approval.
//!
//! A request is `pending` until it is approved, denied, or expires. Only the
//! first resolution counts; later approvals and denials return `false`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use palette_core::config::Config;

/// State of a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Pending,
    Approved,
    Denied,
    /// Denied by timeout.
    Expired,
}

/// A tool call waiting for approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub tool_call_id: String,
    pub session_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ConfirmationRequest {
    pub fn new(
        tool_call_id: impl Into<String>,
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            session_id: session_id.into(),
            tool_name: tool_name.into(),
            arguments,
            created_at: Utc::now(),
        }
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Approved,
    Denied,
    TimedOut,
    /// The turn was cancelled while waiting.
    Cancelled,
}

struct Entry {
    request: ConfirmationRequest,
    created: Instant,
    state: watch::Sender<Resolution>,
}

pub struct ConfirmationBroker {
    entries: Mutex<HashMap<String, Entry>>,
    timeout: Duration,
}

impl ConfirmationBroker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.confirmation_timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a pending request. Re-registering an id replaces it.
    pub fn request(&self, request: ConfirmationRequest) {
        let (state, _) = watch::channel(Resolution::Pending);
        info!(
            call_id = %request.tool_call_id,
            session_id = %request.session_id,
            tool = %request.tool_name,
            "Confirmation requested"
        );
        self.lock().insert(
            request.tool_call_id.clone(),
            Entry {
                request,
                created: Instant::now(),
                state,
            },
        );
    }

    /// Approve a pending request. `false` if it is unknown or already resolved.
    pub fn approve(&self, call_id: &str) -> bool {
        self.resolve(call_id, Resolution::Approved)
    }

    /// Deny a pending request. `false` if it is unknown or already resolved.
    pub fn deny(&self, call_id: &str) -> bool {
        self.resolve(call_id, Resolution::Denied)
    }

    fn resolve(&self, call_id: &str, resolution: Resolution) -> bool {
        let entries = self.lock();
        let Some(entry) = entries.get(call_id) else {
            debug!(call_id, ?resolution, "Confirmation not found");
            return false;
        };
        let resolved = entry.state.send_if_modified(|state| {
            if *state == Resolution::Pending {
                *state = resolution;
                true
            } else {
                false
            }
        });
        if resolved {
            info!(call_id, ?resolution, "Confirmation resolved");
        }
        resolved
    }

    /// Wait for `call_id` to be resolved, its timeout to pass, or `cancel`.
    ///
    /// The entry is removed once the wait returns. Timeout and cancellation
    /// both leave the request denied.
    pub async fn wait(&self, call_id: &str, cancel: &CancellationToken) -> ConfirmationOutcome {
        let subscribed = self
            .lock()
            .get(call_id)
            .map(|e| (e.state.subscribe(), e.created + self.timeout));
        let Some((mut rx, deadline)) = subscribed else {
            return ConfirmationOutcome::Denied;
        };

        let outcome = loop {
            match *rx.borrow_and_update() {
                Resolution::Approved => break ConfirmationOutcome::Approved,
                Resolution::Denied => break ConfirmationOutcome::Denied,
                Resolution::Expired => break ConfirmationOutcome::TimedOut,
                Resolution::Pending => {}
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Entry replaced or swept without a final state.
                        break ConfirmationOutcome::TimedOut;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if self.resolve(call_id, Resolution::Expired) {
                        info!(call_id, "Confirmation timed out");
                        break ConfirmationOutcome::TimedOut;
                    }
                    // A resolution raced the deadline; read it on the next pass.
                }
                _ = cancel.cancelled() => {
                    self.resolve(call_id, Resolution::Denied);
                    break ConfirmationOutcome::Cancelled;
                }
            }
        };

        self.lock().remove(call_id);
        outcome
    }

    /// Expire and drop requests older than the timeout. Returns how many.
    pub fn sweep(&self) -> usize {
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.created.elapsed() >= self.timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(entry) = entries.remove(id) {
                entry.state.send_if_modified(|state| {
                    if *state == Resolution::Pending {
                        *state = Resolution::Expired;
                        true
                    } else {
                        false
                    }
                });
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired confirmations swept");
        }
        expired.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown`.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!("Confirmation sweeper stopped");
        })
    }

    /// Requests of a session still waiting for an answer, oldest first.
    pub fn pending_for(&self, session_id: &str) -> Vec<ConfirmationRequest> {
        let mut pending: Vec<ConfirmationRequest> = self
            .lock()
            .values()
            .filter(|e| e.request.session_id == session_id)
            .filter(|e| *e.state.borrow() == Resolution::Pending)
            .map(|e| e.request.clone())
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    /// Session that owns a request, if it is still registered.
    pub fn session_of(&self, call_id: &str) -> Option<String> {
        self.lock().get(call_id).map(|e| e.request.session_id.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
