//! Provider failure taxonomy.
//!
//! A [`ProviderFailure`] ends a turn; its [`FailureClass`] decides whether the
//! turn is retried. A [`ProtocolError`] is a malformed stream fragment that is
//! recorded and logged but does not end the turn.

use serde_json::Value;

/// How a failed turn should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Back off and retry the same turn.
    RateLimited,
    /// Surface to the user; no automatic retry.
    Provider,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderFailure {
    pub class: FailureClass,
    pub message: String,
    pub status: Option<u16>,
}

const RATE_LIMIT_CODES: &[&str] = &["rate_limit", "429", "too_many_requests", "resource_exhausted"];
const RATE_LIMIT_PHRASES: &[&str] = &["rate limit", "too many requests"];

impl ProviderFailure {
    pub fn provider(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Provider,
            message: message.into(),
            status: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::RateLimited,
            message: message.into(),
            status: None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.class == FailureClass::RateLimited
    }

    /// A connection-level failure (DNS, TLS, reset mid-stream).
    pub fn transport(err: &reqwest::Error) -> Self {
        Self {
            class: FailureClass::Provider,
            message: format!("Provider connection failed: {err}"),
            status: err.status().map(|s| s.as_u16()),
        }
    }

    /// Classify a non-success HTTP response from opening a stream.
    pub fn from_status(status: u16, body: &str) -> Self {
        let mut failure = serde_json::from_str::<Value>(body.trim())
            .ok()
            .and_then(|v| classify_error_value(&v))
            .unwrap_or_else(|| {
                let body = body.trim();
                let message = if body.is_empty() {
                    format!("Provider returned HTTP {status}")
                } else {
                    format!("Provider returned HTTP {status}: {body}")
                };
                Self::provider(message)
            });
        failure.status = Some(status);
        if status == 429 {
            failure.class = FailureClass::RateLimited;
        }
        failure
    }
}

/// Decode a structured error payload, if `value` is one.
///
/// Accepted shapes: `{"error": {...}}`, `{"error": "..."}`, and a bare
/// `{"message": ..., "code": ...}` object.
pub fn classify_error_value(value: &Value) -> Option<ProviderFailure> {
    let obj = value.as_object()?;

    let (message, codes) = match obj.get("error") {
        Some(Value::Object(err)) => {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(err.clone()).to_string());
            (message, code_fields(err))
        }
        Some(Value::String(msg)) => (msg.clone(), code_fields(obj)),
        Some(_) => return None,
        None if obj.contains_key("message") || obj.contains_key("code") => {
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| obj.get("code").map(value_text))
                .unwrap_or_default();
            (message, code_fields(obj))
        }
        None => return None,
    };

    let status = codes
        .iter()
        .find_map(|c| c.parse::<u16>().ok().filter(|s| (100..600).contains(s)));
    let class = if is_rate_limit(&message, &codes) {
        FailureClass::RateLimited
    } else {
        FailureClass::Provider
    };

    Some(ProviderFailure {
        class,
        message,
        status,
    })
}

fn code_fields(obj: &serde_json::Map<String, Value>) -> Vec<String> {
    ["code", "type", "status"]
        .iter()
        .filter_map(|key| obj.get(*key))
        .filter(|v| !v.is_null())
        .map(value_text)
        .collect()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_rate_limit(message: &str, codes: &[String]) -> bool {
    let message = message.to_lowercase();
    codes.iter().any(|code| {
        let code = code.to_lowercase();
        RATE_LIMIT_CODES.iter().any(|needle| code.contains(needle))
    }) || RATE_LIMIT_PHRASES.iter().any(|p| message.contains(p))
}

/// A malformed fragment of a provider stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("tool call at index {index} started without an id")]
    MissingCallId { index: usize },

    #[error("tool call {call_id} reused occupied index {index}")]
    IndexReused { index: usize, call_id: String },

    #[error("argument continuation for unknown tool call index {index:?}")]
    OrphanContinuation { index: Option<usize>, text: String },

    #[error("tool call {call_id} has malformed arguments: {reason}")]
    MalformedArguments { call_id: String, reason: String },

    #[error("unrecognized stream payload: {0}")]
    UnrecognizedPayload(String),
}
