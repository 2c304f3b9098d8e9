//! Fans a discovered post out to its page's subscribers.
//!
//! For each subscribed user the scheduler decides what to create (auto-like /
//! auto-comment toggles, daily caps by risk profile) and when to run it
//! (index-scaled stagger, weekend dampening, quiet-hours deferral), then
//! writes a Pending row and enqueues a delayed executor invocation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use boostloop_common::{ActionKind, EngagementAction, Subscription, Tuning};

use crate::stagger::{is_weekend, quiet_hours_offset, stagger_delay};
use crate::traits::{ActionStore, OrgDirectory, TaskQueue};

pub struct EngagementScheduler {
    store: Arc<dyn ActionStore>,
    directory: Arc<dyn OrgDirectory>,
    queue: Arc<dyn TaskQueue>,
    tuning: Tuning,
}

impl EngagementScheduler {
    pub fn new(
        store: Arc<dyn ActionStore>,
        directory: Arc<dyn OrgDirectory>,
        queue: Arc<dyn TaskQueue>,
        tuning: Tuning,
    ) -> Self {
        Self {
            store,
            directory,
            queue,
            tuning,
        }
    }

    /// Create engagement actions for all subscribed users and stagger their
    /// execution. A page with no subscribers is a no-op. One subscriber's
    /// failure never aborts the rest of the pass.
    pub async fn schedule_engagements(
        &self,
        post_id: Uuid,
        page_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let subscriptions = self.directory.subscriptions_for_page(page_id).await?;
        let weekend = is_weekend(now);

        for (i, sub) in subscriptions.iter().enumerate() {
            if let Err(e) = self.schedule_for_user(post_id, sub, i, weekend, now).await {
                warn!(
                    user_id = %sub.user_id,
                    post_id = %post_id,
                    error = %e,
                    "Skipping subscriber after scheduling error"
                );
            }
        }

        info!(
            post_id = %post_id,
            subscribers = subscriptions.len(),
            "Scheduled engagement sets"
        );
        Ok(())
    }

    async fn schedule_for_user(
        &self,
        post_id: Uuid,
        sub: &Subscription,
        index: usize,
        weekend: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let settings = self
            .directory
            .automation_settings(sub.user_id)
            .await?
            .unwrap_or_default();
        let risk = settings.risk_profile;
        let quiet_offset = quiet_hours_offset(now, &settings.quiet_hours);
        let caps = risk.caps();

        // Caps count rows created since midnight, any status.
        let day_start = now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();

        if sub.auto_like {
            let today = self
                .store
                .count_created_since(sub.user_id, ActionKind::Like, day_start)
                .await?;
            if today < caps.likes {
                self.create_and_enqueue(post_id, sub.user_id, ActionKind::Like, risk, index, weekend, quiet_offset, now)
                    .await?;
            }
        }

        if sub.auto_comment {
            let today = self
                .store
                .count_created_since(sub.user_id, ActionKind::Comment, day_start)
                .await?;
            if today < caps.comments {
                self.create_and_enqueue(post_id, sub.user_id, ActionKind::Comment, risk, index, weekend, quiet_offset, now)
                    .await?;
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_and_enqueue(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        kind: ActionKind,
        risk: boostloop_common::RiskProfile,
        index: usize,
        weekend: bool,
        quiet_offset: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let action = EngagementAction::new(post_id, user_id, kind, now);
        self.store.insert(&action).await?;

        let delay = {
            let mut rng = rand::rng();
            stagger_delay(&self.tuning, kind, risk, index, weekend, &mut rng) + quiet_offset
        };
        self.queue
            .enqueue_execution(action.id, Duration::from_secs(delay))
            .await?;
        Ok(())
    }
}
