//! Gated provider — rate gate, per-attempt timeout, and bounded retry.
//!
//! Wraps a raw adapter so that every attempt reserves a slot on the shared
//! [`RateGate`] before any network I/O. A denial short-circuits immediately;
//! transient failures are retried up to `max_retries` times, each retry
//! reserving the gate again.

use async_trait::async_trait;
use chorus_core::error::ProviderError;
use chorus_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::gate::{Admission, RateGate};

/// A provider that consults the shared gate and applies timeout/retry.
pub struct GatedProvider {
    inner: Arc<dyn Provider>,
    gate: Arc<RateGate>,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl GatedProvider {
    /// Wrap `inner` with the default timeout (120s) and two retries.
    pub fn new(inner: Arc<dyn Provider>, gate: Arc<RateGate>) -> Self {
        Self {
            inner,
            gate,
            timeout: Duration::from_secs(120),
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Base delay between attempts; attempt `n` waits `n * backoff`.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError> {
        let sequence = match self.gate.check_and_reserve() {
            Admission::Allowed(seq) => seq,
            Admission::Denied => {
                return Err(ProviderError::GateDenied {
                    cap: self.gate.state().cap,
                });
            }
        };

        debug!(provider = %self.inner.name(), sequence, "Gated call");

        match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "Provider '{}' timed out after {}s",
                self.inner.name(),
                self.timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl Provider for GatedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.attempt(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        provider = %self.inner.name(),
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
