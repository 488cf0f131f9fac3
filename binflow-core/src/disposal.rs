//! Resident fill reports, retried with linearly growing backoff.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{ActorId, ActorRole, Bin, BinId};
use crate::ports::Ports;
use crate::registry::BinRegistry;

/// Applies resident disposal reports to the bin registry.
pub struct DisposalDesk {
    ports: Ports,
    registry: Arc<BinRegistry>,
    attempts: u32,
    backoff: StdDuration,
}

impl DisposalDesk {
    /// Create a desk using the retry settings from `config`.
    #[must_use]
    pub fn new(ports: Ports, registry: Arc<BinRegistry>, config: &EngineConfig) -> Self {
        Self {
            ports,
            registry,
            attempts: config.disposal_retry_attempts.max(1),
            backoff: config.disposal_backoff(),
        }
    }

    /// Record that `resident` filled `bin_id` up to `fill_level`.
    ///
    /// Transient failures are retried; the n-th retry waits n times the base
    /// backoff.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] or [`EngineError::Validation`] at once
    /// for unknown bins or non-resident actors, and
    /// [`EngineError::SubmissionFailed`] when every attempt failed transiently.
    pub async fn submit(
        &self,
        resident: &ActorId,
        bin_id: &BinId,
        fill_level: i32,
    ) -> Result<Bin, EngineError> {
        self.ports
            .actor_with_role(resident, ActorRole::Resident)
            .await?;

        let mut attempt = 1;
        loop {
            match self.registry.set_fill_level(bin_id, fill_level).await {
                Ok(bin) => {
                    info!(bin_id = %bin_id, resident = %resident, fill_level, "disposal recorded");
                    return Ok(bin);
                }
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    let wait = self.backoff * attempt;
                    warn!(
                        bin_id = %bin_id,
                        attempt,
                        wait_ms = wait.as_millis(),
                        error = %err,
                        "disposal submission failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(EngineError::SubmissionFailed {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}
