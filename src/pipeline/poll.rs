//! Translation polling: wait for the backend job to reach a terminal state.
//!
//! The backend exposes job state only through a pull endpoint, so the
//! client checks it at a fixed cadence within a fixed budget:
//! with the defaults (3 s × 120) a job gets roughly six minutes.
//!
//! Each status answer is reported through a tick callback together with a
//! progress value mapped into the translation band (see
//! [`crate::progress::translation_progress`]). The callback can stop the
//! loop, which is how a superseded job stops polling.

use crate::config::PipelineConfig;
use crate::error::{TransferError, TranslationError};
use crate::pipeline::transfer::{PollOutcome, PollStatus, Transfer};
use crate::progress::translation_progress;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// What one polling iteration observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickEvent {
    /// The status endpoint answered.
    Status(PollOutcome),
    /// The status call failed in a way worth retrying.
    TransientError(TransferError),
}

/// One iteration of the polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTick {
    /// 1-indexed iteration number.
    pub attempt: u32,
    pub budget: u32,
    /// Progress to display, non-decreasing across ticks.
    pub progress: u8,
    pub event: TickEvent,
}

/// Fixed-interval, bounded-budget status poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationPoller {
    interval: Duration,
    max_attempts: u32,
    error_tolerance: u32,
}

impl TranslationPoller {
    pub fn new(interval: Duration, max_attempts: u32, error_tolerance: u32) -> Self {
        Self {
            interval,
            max_attempts,
            error_tolerance,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.poll_interval(),
            config.poll_max_attempts,
            config.poll_error_tolerance,
        )
    }

    /// Upper bound on the time spent sleeping between checks.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// Poll `remote_id` until it succeeds, fails, or the budget runs out.
    ///
    /// Returns the number of status checks it took to see `success`.
    pub async fn poll_until_done<F>(
        &self,
        remote_id: &str,
        transfer: &dyn Transfer,
        mut on_tick: F,
    ) -> Result<u32, TranslationError>
    where
        F: FnMut(&PollTick) -> ControlFlow<()>,
    {
        let mut consecutive_errors = 0u32;

        for attempt in 1..=self.max_attempts {
            sleep(self.interval).await;

            let progress = translation_progress(attempt - 1, self.max_attempts);
            match transfer.poll_status(remote_id).await {
                Ok(outcome) => {
                    consecutive_errors = 0;
                    debug!(
                        "Status {}/{} for {}: {:?} {}",
                        attempt,
                        self.max_attempts,
                        remote_id,
                        outcome.status,
                        outcome.progress_hint.as_deref().unwrap_or("")
                    );

                    let tick = PollTick {
                        attempt,
                        budget: self.max_attempts,
                        progress,
                        event: TickEvent::Status(outcome.clone()),
                    };
                    if on_tick(&tick).is_break() {
                        return Err(TranslationError::Abandoned);
                    }

                    match outcome.status {
                        PollStatus::Success => return Ok(attempt),
                        PollStatus::Failed => {
                            return Err(TranslationError::Failed {
                                detail: outcome.progress_hint,
                            })
                        }
                        PollStatus::Pending => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    warn!(
                        "Status check {}/{} for {} failed ({} in a row): {}",
                        attempt, self.max_attempts, remote_id, consecutive_errors, e
                    );

                    let tick = PollTick {
                        attempt,
                        budget: self.max_attempts,
                        progress,
                        event: TickEvent::TransientError(e.clone()),
                    };
                    if on_tick(&tick).is_break() {
                        return Err(TranslationError::Abandoned);
                    }

                    if consecutive_errors > self.error_tolerance {
                        return Err(TranslationError::Unreachable {
                            consecutive: consecutive_errors,
                            last: e,
                        });
                    }
                }
                Err(e) => return Err(TranslationError::Status(e)),
            }
        }

        Err(TranslationError::TimedOut {
            attempts: self.max_attempts,
            waited_secs: self.max_wait().as_secs(),
        })
    }
}
