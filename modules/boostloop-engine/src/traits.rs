// Trait abstractions for the engagement core's collaborators.
//
// ActionStore — the persisted state machine rows, including the atomic
//   Pending→InProgress claim the duplicate-delivery guard depends on.
// OrgDirectory — read-only org data (subscriptions, settings, posts).
// TaskQueue — at-least-once delayed delivery of executor invocations.
// EngagementAdapter / CommentGenerator / TokenResolver / AuditSink — the
//   platform-facing collaborators, all black boxes from this crate's view.
//
// These enable deterministic testing with the mocks in `testing`:
// no network, no browser, no database. `cargo test` in seconds.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use boostloop_common::{
    ActionKind, AuditEntry, AutomationSettings, EngagementAction, GeneratedComment, Platform,
    PostRef, Subscription, VoiceProfile,
};

// ---------------------------------------------------------------------------
// ActionStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn insert(&self, action: &EngagementAction) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<EngagementAction>>;

    /// Atomic Pending→InProgress transition, setting `attempted_at`. Returns
    /// false when the row is no longer Pending — the at-least-once queue
    /// redelivered an already-claimed action.
    async fn claim_pending(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Persist generated comment text and model metadata before posting.
    async fn set_comment_content(&self, id: Uuid, text: &str, meta: &Value) -> Result<()>;

    /// InProgress→Completed, setting `completed_at`. Terminal.
    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// InProgress→Failed with an error message. Does not touch `retry_count`;
    /// only the reaper consumes retry budget.
    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<()>;

    /// Rows of one kind created for a user since `since`, any status.
    /// Daily caps gate creation, not completion.
    async fn count_created_since(
        &self,
        user_id: Uuid,
        kind: ActionKind,
        since: DateTime<Utc>,
    ) -> Result<i64>;

    /// Pending rows never attempted, created before `cutoff`.
    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<EngagementAction>>;

    /// InProgress rows attempted before `cutoff`.
    async fn stale_in_progress(&self, cutoff: DateTime<Utc>) -> Result<Vec<EngagementAction>>;

    /// Failed rows with retry budget left.
    async fn retryable_failed(&self, max_retries: i32) -> Result<Vec<EngagementAction>>;

    /// InProgress→Failed for a worker that crashed mid-execution: sets the
    /// synthetic error, increments `retry_count`, sets `last_retry_at`.
    async fn fail_timed_out(
        &self,
        id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Failed→Pending for a backoff retry: clears `attempted_at` and
    /// `error_message`.
    async fn reset_for_retry(&self, id: Uuid) -> Result<()>;
}

// ---------------------------------------------------------------------------
// OrgDirectory — read-only org data
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OrgDirectory: Send + Sync {
    /// All subscriptions for a tracked page, in a stable order (the index
    /// into this list is the stagger index).
    async fn subscriptions_for_page(&self, page_id: Uuid) -> Result<Vec<Subscription>>;

    /// A user's automation settings, or None if they never configured any.
    async fn automation_settings(&self, user_id: Uuid) -> Result<Option<AutomationSettings>>;

    async fn post(&self, post_id: Uuid) -> Result<Option<PostRef>>;

    async fn voice_profile(&self, user_id: Uuid) -> Result<VoiceProfile>;

    /// Active org-level custom avoid phrases.
    async fn avoid_phrases(&self, org_id: Uuid) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// TaskQueue
// ---------------------------------------------------------------------------

/// Delayed task broker. At-least-once delivery, no ordering guarantee; the
/// countdown is a lower bound, not a deadline.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue_execution(&self, action_id: Uuid, countdown: Duration) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Platform adapters
// ---------------------------------------------------------------------------

/// How an adapter call failed. Timeout and Connection are infrastructure
/// conditions the task queue retries on its own; Action failures are
/// recorded on the engagement row and classified by the reaper.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("network timeout: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{0}")]
    Action(String),
}

/// One platform action. Whether it goes through a REST API or a driven
/// browser is the implementation's concern; both look identical from here.
#[async_trait]
pub trait EngagementAdapter: Send + Sync {
    /// Perform the action as `user_id` on the post at `post_url`.
    /// `comment_text` is Some for comment adapters, None for likes.
    /// `access_token` is the resolved OAuth token, when one exists.
    async fn perform(
        &self,
        user_id: Uuid,
        post_url: &str,
        comment_text: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<(), AdapterError>;
}

// ---------------------------------------------------------------------------
// Comment generation
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CommentGenerator: Send + Sync {
    /// Generate a comment in the user's voice and run it through review.
    /// Failures propagate as ordinary errors and fail the action.
    async fn generate_and_review(
        &self,
        post_content: &str,
        voice: &VoiceProfile,
        avoid_phrases: &[String],
    ) -> Result<GeneratedComment>;
}

// ---------------------------------------------------------------------------
// Token resolution
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TokenResolver: Send + Sync {
    /// A usable access token for (user, platform). Implementations refresh
    /// near-expiry tokens and fall back to the last-known token when the
    /// refresh fails. None when the user has no integration for the platform
    /// (browser-automation adapters can still work from session cookies).
    async fn valid_access_token(
        &self,
        user_id: Uuid,
        platform: Platform,
    ) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// Audit sink
// ---------------------------------------------------------------------------

/// Fire-and-forget audit trail. Implementations log and swallow their own
/// errors; auditing never blocks or fails the action.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}
