//! Station fetch: one logical "latest reading" request with bounded retries.

mod payload;
mod source;

pub use payload::unwrap_single_reading;
pub use source::{build_device_url, redacted, HttpSource, ReadingSource, DEFAULT_API_BASE};

use tokio::time::Instant;

use crate::{
    models::RawPayload,
    retry::{retry, RetryError, RetryPolicy},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Why a single fetch attempt failed. Every variant is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("error executing API request: {0}")]
    Transport(String),
    #[error("received error status code {0}")]
    Status(u16),
    #[error("error reading response body: {0}")]
    Body(String),
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

pub struct ResilientFetcher<S> {
    source: S,
    policy: RetryPolicy,
}

impl<S: ReadingSource> ResilientFetcher<S> {
    pub fn new(source: S) -> Self {
        Self::with_policy(source, RetryPolicy::fetch())
    }

    pub fn with_policy(source: S, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetches the latest reading. On exhaustion the error carries the last
    /// attempt's failure; callers treat it as "no data this cycle".
    pub async fn fetch(&self) -> Result<RawPayload, RetryError<FetchError>> {
        retry(&self.policy, "station fetch", |attempt| async move {
            let started = Instant::now();
            let outcome = self
                .source
                .fetch_body()
                .await
                .and_then(|body| unwrap_single_reading(&body));
            if let Ok(payload) = &outcome {
                log_info!(
                    "Station fetch attempt {attempt} ok: {} bytes in {}ms",
                    payload.as_str().len(),
                    started.elapsed().as_millis()
                );
            }
            outcome
        })
        .await
    }
}
