//! Outbound delivery of merged documents.
//!
//! The webhook is the only consumer-facing sink. Failures are classified
//! into three shapes so operators can tell a rejecting consumer from a dead
//! one: the remote answered with a non-success status, no response arrived
//! at all, or the request could not be built locally. Transient shapes are
//! retried with exponential backoff inside the merge pass; nothing here is
//! queued durably.

use crate::config::WebhookConfig;
use crate::model::MergedDocument;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// How much response body to keep in diagnostics
const BODY_SNIPPET_LIMIT: usize = 2048;

/// Initial backoff interval between delivery retries
const RETRY_INITIAL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors that can occur during outbound delivery
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("webhook responded {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("no response from webhook: {0}")]
    NoResponse(#[source] reqwest::Error),

    #[error("failed to build webhook request: {0}")]
    Request(#[source] reqwest::Error),
}

impl DeliveryError {
    /// Diagnostic category, one per failure shape
    pub fn category(&self) -> &'static str {
        match self {
            DeliveryError::Status { .. } => "http-status",
            DeliveryError::NoResponse(_) => "no-response",
            DeliveryError::Request(_) => "request-error",
        }
    }

    /// Whether a retry could plausibly succeed. The remote may recover from
    /// a 5xx or an outage; a rejected document or a malformed request will
    /// fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Status { status, .. } => status.is_server_error(),
            DeliveryError::NoResponse(_) => true,
            DeliveryError::Request(_) => false,
        }
    }
}

/// Outbound sink seam; tests substitute a recording implementation
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, document: &MergedDocument) -> Result<(), DeliveryError>;
}

/// HTTP POST delivery to the configured webhook endpoint
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    retry_max_elapsed: Duration,
}

impl WebhookSink {
    pub fn new(config: &WebhookConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(DeliveryError::Request)?;

        Ok(Self {
            client,
            url: config.url.clone(),
            retry_max_elapsed: Duration::from_secs(config.retry_max_elapsed_secs),
        })
    }

    async fn post_once(&self, document: &MergedDocument) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(document)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    DeliveryError::Request(e)
                } else {
                    DeliveryError::NoResponse(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = truncate_body(response.text().await.unwrap_or_default());
        Err(DeliveryError::Status { status, body })
    }
}

#[async_trait]
impl DeliverySink for WebhookSink {
    async fn deliver(&self, document: &MergedDocument) -> Result<(), DeliveryError> {
        if self.retry_max_elapsed.is_zero() {
            let result = self.post_once(document).await;
            if result.is_ok() {
                info!(readings = document.reading_count(), "Document delivered");
            }
            return result;
        }

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(RETRY_INITIAL_INTERVAL)
            .with_max_elapsed_time(Some(self.retry_max_elapsed))
            .build();

        let result = backoff::future::retry(policy, || async {
            self.post_once(document).await.map_err(|e| {
                if e.is_transient() {
                    warn!(error = %e, category = e.category(), "Transient delivery failure, retrying");
                    metrics::counter!("bridge.delivery.retries").increment(1);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await;

        if result.is_ok() {
            info!(readings = document.reading_count(), "Document delivered");
        }
        result
    }
}

fn truncate_body(body: String) -> String {
    if body.len() <= BODY_SNIPPET_LIMIT {
        return body;
    }
    body.chars().take(BODY_SNIPPET_LIMIT).collect()
}
