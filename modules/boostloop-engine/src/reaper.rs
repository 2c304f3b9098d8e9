//! Stale-action recovery sweep, run on a fixed schedule (~10 minutes).
//!
//! Three independent lifecycles:
//! - Pending rows that never reached a worker point to a lost queue message:
//!   nothing was learned, re-enqueue immediately.
//! - InProgress rows stuck past their window point to a crashed worker. The
//!   platform call may or may not have landed, so err on marking failed
//!   rather than blindly re-running a like that already happened.
//! - Failed rows get bounded backoff retries, unless their error message
//!   matches a pattern that retrying can never fix (the like button is not
//!   going to appear on the fourth attempt).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use boostloop_common::Tuning;

use crate::traits::{ActionStore, TaskQueue};

/// Error fragments that mark a failure as permanent. Substring match,
/// case-insensitive.
const PERMANENT_FAILURE_PATTERNS: &[&str] = &[
    "button not found",
    "comment box not found",
    "already liked",
    "not found",
    "could not be completed",
];

/// Whether an error message indicates a failure that is structurally
/// impossible to retry productively.
pub fn is_permanent_failure(error_message: Option<&str>) -> bool {
    let Some(message) = error_message else {
        return false;
    };
    let lower = message.to_lowercase();
    PERMANENT_FAILURE_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// What one sweep did, for the log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub requeued: usize,
    pub failed: usize,
    pub retried: usize,
}

pub struct StaleActionReaper {
    store: Arc<dyn ActionStore>,
    queue: Arc<dyn TaskQueue>,
    tuning: Tuning,
}

impl StaleActionReaper {
    pub fn new(store: Arc<dyn ActionStore>, queue: Arc<dyn TaskQueue>, tuning: Tuning) -> Self {
        Self {
            store,
            queue,
            tuning,
        }
    }

    /// Find and recover stale engagement actions.
    pub async fn cleanup_stale_actions(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        // 1. Re-queue stale Pending actions (never attempted). The queue
        //    message was lost; the row itself is fine.
        let pending_cutoff = now - chrono::Duration::from_std(self.tuning.pending_stale)?;
        for action in self.store.stale_pending(pending_cutoff).await? {
            self.queue
                .enqueue_execution(action.id, Duration::ZERO)
                .await?;
            stats.requeued += 1;
        }

        // 2. Fail stale InProgress actions (attempted but never finished).
        let in_progress_cutoff =
            now - chrono::Duration::from_std(self.tuning.in_progress_stale)?;
        for action in self.store.stale_in_progress(in_progress_cutoff).await? {
            self.store
                .fail_timed_out(
                    action.id,
                    "Timed out: worker may have crashed during execution",
                    now,
                )
                .await?;
            stats.failed += 1;
        }

        // 3. Retry Failed actions with backoff, skipping permanent failures.
        for action in self.store.retryable_failed(self.tuning.max_retries).await? {
            if is_permanent_failure(action.error_message.as_deref()) {
                debug!(
                    action_id = %action.id,
                    error = action.error_message.as_deref().unwrap_or(""),
                    "Skipping retry, permanent failure"
                );
                continue;
            }

            let backoff = self.tuning.retry_delay(action.retry_count + 1);
            if let Some(last_retry) = action.last_retry_at {
                let next_retry = last_retry + chrono::Duration::from_std(backoff)?;
                if now < next_retry {
                    debug!(action_id = %action.id, "Skipping retry, backoff not elapsed");
                    continue;
                }
            }

            self.store.reset_for_retry(action.id).await?;
            self.queue.enqueue_execution(action.id, backoff).await?;
            stats.retried += 1;
        }

        if stats != SweepStats::default() {
            info!(
                requeued = stats.requeued,
                failed = stats.failed,
                retried = stats.retried,
                "Stale action sweep complete"
            );
        }
        Ok(stats)
    }
}
