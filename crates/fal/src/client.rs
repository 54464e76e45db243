//! Generation client: one validated request in, one normalized result out.
//!
//! The client wraps a [`GenerationTransport`] with credential checks,
//! linear-backoff retry, per-attempt log capture and response
//! normalization.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use fluxstudio_core::generation::GenerationResult;
use fluxstudio_core::models::ModelDescriptor;
use fluxstudio_core::request::GenerationRequest;

use crate::error::GenerationError;
use crate::normalize::normalize_response;
use crate::retry::{delay_for_attempt, RetryConfig};
use crate::transport::GenerationTransport;

/// Progress notifications emitted during [`GenerationClient::generate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Attempt `attempt` of `max_attempts` is about to start.
    AttemptStarted { attempt: u32, max_attempts: u32 },
    /// A provider log line from the current attempt.
    Log(String),
    /// Attempt `attempt` failed with a retryable error; the next one starts
    /// after `delay_ms`.
    RetryScheduled { attempt: u32, delay_ms: u64 },
}

/// Observer for [`ProgressEvent`]s.
pub type ProgressCallback<'a> = dyn Fn(&ProgressEvent) + Send + Sync + 'a;

/// Retrying generation client over a pluggable transport.
#[derive(Clone)]
pub struct GenerationClient {
    transport: Arc<dyn GenerationTransport>,
    retry: RetryConfig,
}

impl GenerationClient {
    pub fn new(transport: Arc<dyn GenerationTransport>) -> Self {
        Self {
            transport,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Run `request` against `descriptor`'s endpoint.
    ///
    /// An empty credential fails with
    /// [`GenerationError::InvalidCredential`] before any network call. Rate
    /// limits and 5xx responses are retried up to
    /// [`RetryConfig::max_attempts`] times in total, waiting
    /// `attempt * base_delay` in between; every other failure is returned
    /// immediately. Logs on the result are those of the successful attempt
    /// only.
    pub async fn generate(
        &self,
        descriptor: &ModelDescriptor,
        request: &GenerationRequest,
        credential: &str,
        progress: Option<&ProgressCallback<'_>>,
    ) -> Result<GenerationResult, GenerationError> {
        if request.model_id != descriptor.id {
            return Err(GenerationError::Unknown {
                message: format!(
                    "request for model '{}' cannot run on '{}'",
                    request.model_id, descriptor.id
                ),
                status: None,
            });
        }

        let credential = credential.trim();
        if credential.is_empty() {
            return Err(GenerationError::InvalidCredential {
                detail: Some("no API key configured".to_string()),
            });
        }

        let emit = |event: ProgressEvent| {
            if let Some(callback) = progress {
                callback(&event);
            }
        };

        let input = request.to_input();
        let max_attempts = self.retry.max_attempts.max(1);
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            emit(ProgressEvent::AttemptStarted {
                attempt,
                max_attempts,
            });
            tracing::debug!(
                model_id = %descriptor.id,
                endpoint = %descriptor.endpoint,
                attempt,
                max_attempts,
                "Submitting generation request",
            );

            let logs = Mutex::new(Vec::<String>::new());
            let on_log = |line: &str| {
                if let Ok(mut logs) = logs.lock() {
                    logs.push(line.to_string());
                }
                emit(ProgressEvent::Log(line.to_string()));
            };

            let outcome = self
                .transport
                .run(&descriptor.endpoint, &input, credential, &on_log)
                .await;

            let error = match outcome {
                Ok(response) => {
                    let mut result = normalize_response(descriptor, response.payload)?;
                    result.request_id = response.request_id;
                    result.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    result.logs = logs.into_inner().unwrap_or_default();

                    tracing::info!(
                        model_id = %descriptor.id,
                        attempt,
                        images = result.images.len(),
                        elapsed_ms = result.elapsed_ms,
                        "Generation completed",
                    );
                    return Ok(result);
                }
                Err(err) => GenerationError::from(err),
            };

            if !error.is_retryable() || attempt >= max_attempts {
                tracing::warn!(
                    model_id = %descriptor.id,
                    attempt,
                    code = error.code(),
                    error = %error,
                    "Generation failed",
                );
                return Err(error);
            }

            let delay = delay_for_attempt(attempt, &self.retry);
            tracing::warn!(
                model_id = %descriptor.id,
                attempt,
                code = error.code(),
                delay_ms = delay.as_millis() as u64,
                "Retryable generation failure, backing off",
            );
            emit(ProgressEvent::RetryScheduled {
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
            tokio::time::sleep(delay).await;
        }
    }
}
