//! Submit-then-poll generation for providers that run jobs asynchronously.
//!
//! The generator polls exactly the job it submitted, identified by the id the
//! provider returned for this request. There is no lookup by prompt.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::generation::{GeneratedArtifact, GenerationError, GenerationProvider, GenerationRequest};

/// State of a submitted job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Succeeded(GeneratedArtifact),
    Failed(String),
}

/// A provider API with separate submit and status calls.
#[async_trait]
pub trait JobApi: Send + Sync {
    fn id(&self) -> &str;

    /// Start a job and return its provider-assigned id.
    async fn submit(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    async fn poll(
        &self,
        job_id: &str,
        request: &GenerationRequest,
    ) -> Result<JobStatus, GenerationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2_000),
            max_polls: 150,
        }
    }
}

pub struct PollingGenerator<J> {
    api: J,
    policy: PollingPolicy,
}

impl<J: JobApi> PollingGenerator<J> {
    pub fn new(api: J, policy: PollingPolicy) -> Self {
        Self { api, policy }
    }
}

#[async_trait]
impl<J: JobApi> GenerationProvider for PollingGenerator<J> {
    fn id(&self) -> &str {
        self.api.id()
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedArtifact, GenerationError> {
        let job_id = self.api.submit(request).await?;
        info!(
            provider = self.api.id(),
            correlation_id = %request.correlation_id,
            job_id = %job_id,
            "Generation job submitted"
        );

        for attempt in 1..=self.policy.max_polls {
            tokio::time::sleep(self.policy.interval).await;

            match self.api.poll(&job_id, request).await {
                Ok(JobStatus::Pending) => {
                    debug!(job_id = %job_id, attempt, "Generation job still running");
                }
                Ok(JobStatus::Succeeded(artifact)) => {
                    info!(
                        job_id = %job_id,
                        correlation_id = %request.correlation_id,
                        attempt,
                        "Generation job finished"
                    );
                    return Ok(artifact);
                }
                Ok(JobStatus::Failed(reason)) => {
                    return Err(GenerationError::JobFailed { job_id, reason });
                }
                Err(e) if e.is_transient() => {
                    warn!(job_id = %job_id, attempt, %e, "Transient polling error");
                }
                Err(e) => return Err(e),
            }
        }

        Err(GenerationError::PollingExhausted {
            job_id,
            polls: self.policy.max_polls,
        })
    }
}
