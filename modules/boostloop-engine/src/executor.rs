//! Executes one engagement action: lock, claim, dispatch, record.
//!
//! The executor is invoked by the delayed task queue, possibly more than once
//! per action (at-least-once delivery) and possibly concurrently with another
//! worker. Safety comes from two independent guards: the per-user lock keeps
//! two workers off the same external account, and the Pending re-check under
//! the lock rejects duplicate deliveries of the same action.
//!
//! Business failures are data, not errors: they are recorded on the row and
//! swallowed so one broken action can never crash a worker. Only transient
//! infrastructure conditions propagate, to trigger the queue's own retry.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use boostloop_common::{
    ActionKind, AuditEntry, EngagementAction, Platform, PostRef, Tuning, DEFAULT_AVOID_PHRASES,
};

use crate::locks::UserLockManager;
use crate::traits::{
    ActionStore, AdapterError, AuditSink, CommentGenerator, EngagementAdapter, OrgDirectory,
    TaskQueue, TokenResolver,
};

// ---------------------------------------------------------------------------
// Adapter registry
// ---------------------------------------------------------------------------

/// Enum-keyed dispatch table, resolved once at startup. Whether a given
/// (platform, kind) pair routes to a REST client or a driven browser is the
/// registrant's decision.
#[derive(Default)]
pub struct AdapterRegistry {
    table: HashMap<(Platform, ActionKind), Arc<dyn EngagementAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        platform: Platform,
        kind: ActionKind,
        adapter: Arc<dyn EngagementAdapter>,
    ) -> Self {
        self.table.insert((platform, kind), adapter);
        self
    }

    fn get(&self, platform: Platform, kind: ActionKind) -> Option<&Arc<dyn EngagementAdapter>> {
        self.table.get(&(platform, kind))
    }
}

// ---------------------------------------------------------------------------
// Outcomes and errors
// ---------------------------------------------------------------------------

/// What happened to the action, as bookkeeping sees it. `Failed` is still a
/// successful execution from the queue's point of view — the failure lives
/// on the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed,
    /// Another worker holds the user's lock; the action was re-enqueued
    /// untouched.
    Busy,
    /// Nothing to do: unknown action, unresolvable post, or a duplicate
    /// delivery of an already-claimed action.
    Skipped,
}

/// The only errors allowed to reach the queue's top-level handler.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Network timeout, connection failure, or the soft time limit: the
    /// queue retries with its own fixed backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    store: Arc<dyn ActionStore>,
    directory: Arc<dyn OrgDirectory>,
    locks: UserLockManager,
    adapters: AdapterRegistry,
    generator: Arc<dyn CommentGenerator>,
    tokens: Arc<dyn TokenResolver>,
    audit: Arc<dyn AuditSink>,
    queue: Arc<dyn TaskQueue>,
    tuning: Tuning,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ActionStore>,
        directory: Arc<dyn OrgDirectory>,
        locks: UserLockManager,
        adapters: AdapterRegistry,
        generator: Arc<dyn CommentGenerator>,
        tokens: Arc<dyn TokenResolver>,
        audit: Arc<dyn AuditSink>,
        queue: Arc<dyn TaskQueue>,
        tuning: Tuning,
    ) -> Self {
        Self {
            store,
            directory,
            locks,
            adapters,
            generator,
            tokens,
            audit,
            queue,
            tuning,
        }
    }

    /// Execute a single engagement action (like or comment).
    pub async fn execute(&self, action_id: Uuid) -> Result<ExecutionOutcome, ExecutionError> {
        // Pre-lock lookup: user and platform determine the lock key.
        let Some(action) = self.store.get(action_id).await? else {
            error!(action_id = %action_id, "Engagement action not found");
            return Ok(ExecutionOutcome::Skipped);
        };
        let Some(post) = self.directory.post(action.post_id).await? else {
            error!(action_id = %action_id, post_id = %action.post_id, "Post not found for action");
            return Ok(ExecutionOutcome::Skipped);
        };

        let category = format!("engagement_{}", post.platform);
        let Some(guard) = self.locks.acquire(action.user_id, &category).await? else {
            info!(
                user_id = %action.user_id,
                category = category.as_str(),
                "User is busy, rescheduling"
            );
            self.queue
                .enqueue_execution(action_id, self.tuning.busy_retry_delay)
                .await?;
            return Ok(ExecutionOutcome::Busy);
        };

        let result = self.execute_locked(&action, &post).await;
        guard.release().await;
        result
    }

    async fn execute_locked(
        &self,
        action: &EngagementAction,
        post: &PostRef,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        // Re-check under the lock: the at-least-once queue may have
        // delivered this action twice.
        if !self.store.claim_pending(action.id, Utc::now()).await? {
            info!(action_id = %action.id, "Action already claimed, skipping duplicate delivery");
            return Ok(ExecutionOutcome::Skipped);
        }

        // Refresh failures fall back to the last-known token inside the
        // resolver; a resolver error here just means no token at all.
        let access_token = match self
            .tokens
            .valid_access_token(action.user_id, post.platform)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                warn!(user_id = %action.user_id, error = %e, "Token resolution failed (continuing)");
                None
            }
        };

        let (outcome, comment_text) = match action.kind {
            ActionKind::Like => {
                let result = self
                    .perform(post.platform, ActionKind::Like, action.user_id, &post.url, None, access_token.as_deref())
                    .await;
                (self.settle(action, result).await?, None)
            }
            ActionKind::Comment => match self.generate_comment(action, post).await {
                Ok(text) => {
                    let result = self
                        .perform(
                            post.platform,
                            ActionKind::Comment,
                            action.user_id,
                            &post.url,
                            Some(&text),
                            access_token.as_deref(),
                        )
                        .await;
                    (self.settle(action, result).await?, Some(text))
                }
                Err(e) => {
                    // Generation and posting failures are treated identically.
                    let result = Err(AdapterError::Action(format!("Comment generation failed: {e}")));
                    (self.settle(action, result).await?, None)
                }
            },
        };

        let status = match outcome {
            ExecutionOutcome::Completed => "completed",
            _ => "failed",
        };
        self.audit
            .record(AuditEntry {
                org_id: post.org_id,
                user_id: Some(action.user_id),
                action: format!("{}_{}", action.kind, status),
                target_type: "post".to_string(),
                target_id: post.id.to_string(),
                metadata: json!({
                    "post_url": post.url,
                    "action_kind": action.kind,
                    "comment_text": comment_text,
                }),
            })
            .await;

        Ok(outcome)
    }

    async fn perform(
        &self,
        platform: Platform,
        kind: ActionKind,
        user_id: Uuid,
        post_url: &str,
        comment_text: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<(), AdapterError> {
        let Some(adapter) = self.adapters.get(platform, kind) else {
            return Err(AdapterError::Action(format!(
                "No adapter registered for {kind} on {platform}"
            )));
        };
        adapter
            .perform(user_id, post_url, comment_text, access_token)
            .await
    }

    /// Classify an adapter result and move the row to its terminal state.
    /// Transient infrastructure errors propagate without touching the row;
    /// the reaper will time it out if every queue-level retry is lost.
    async fn settle(
        &self,
        action: &EngagementAction,
        result: Result<(), AdapterError>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        match result {
            Ok(()) => {
                self.store.mark_completed(action.id, Utc::now()).await?;
                info!(action_id = %action.id, kind = %action.kind, "Engagement completed");
                Ok(ExecutionOutcome::Completed)
            }
            Err(e @ (AdapterError::Timeout(_) | AdapterError::Connection(_))) => {
                warn!(action_id = %action.id, error = %e, "Retriable adapter error");
                Err(ExecutionError::Transient(e.to_string()))
            }
            Err(AdapterError::Action(message)) => {
                error!(action_id = %action.id, error = message.as_str(), "Engagement failed");
                self.store.mark_failed(action.id, &message).await?;
                Ok(ExecutionOutcome::Failed)
            }
        }
    }

    async fn generate_comment(
        &self,
        action: &EngagementAction,
        post: &PostRef,
    ) -> Result<String> {
        let voice = self.directory.voice_profile(action.user_id).await?;
        let mut avoid: Vec<String> = DEFAULT_AVOID_PHRASES.iter().map(|s| s.to_string()).collect();
        avoid.extend(self.directory.avoid_phrases(post.org_id).await?);

        let generated = self
            .generator
            .generate_and_review(&post.content_text, &voice, &avoid)
            .await?;
        self.store
            .set_comment_content(action.id, &generated.text, &generated.model_data)
            .await?;
        Ok(generated.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use boostloop_common::ActionStatus;

    use crate::locks::{LockStore, MemoryLockStore};
    use crate::testing::{
        pending_action, post, MemoryActionStore, MemoryDirectory, RecordingAudit, RecordingQueue,
        ScriptedAdapter, StaticGenerator, StaticTokens,
    };

    struct Fixture {
        store: Arc<MemoryActionStore>,
        queue: Arc<RecordingQueue>,
        audit: Arc<RecordingAudit>,
        adapter: Arc<ScriptedAdapter>,
        lock_store: Arc<MemoryLockStore>,
        executor: Executor,
        post_id: Uuid,
        user_id: Uuid,
    }

    fn fixture(adapter: ScriptedAdapter, generator: StaticGenerator) -> Fixture {
        let org_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let post = post(org_id, Platform::Linkedin);
        let post_id = post.id;

        let store = Arc::new(MemoryActionStore::new());
        let queue = Arc::new(RecordingQueue::new());
        let audit = Arc::new(RecordingAudit::new());
        let adapter = Arc::new(adapter);
        let lock_store = Arc::new(MemoryLockStore::new());

        let registry = AdapterRegistry::new()
            .register(Platform::Linkedin, ActionKind::Like, adapter.clone())
            .register(Platform::Linkedin, ActionKind::Comment, adapter.clone());

        let executor = Executor::new(
            store.clone(),
            Arc::new(MemoryDirectory::new().with_post(post)),
            UserLockManager::new(lock_store.clone(), Duration::from_secs(120)),
            registry,
            Arc::new(generator),
            Arc::new(StaticTokens::with_token("token-123")),
            audit.clone(),
            queue.clone(),
            Tuning::default(),
        );

        Fixture {
            store,
            queue,
            audit,
            adapter,
            lock_store,
            executor,
            post_id,
            user_id,
        }
    }

    fn seed_pending(f: &Fixture, kind: ActionKind) -> Uuid {
        let action = pending_action(f.post_id, f.user_id, kind);
        let id = action.id;
        f.store.seed(action);
        id
    }

    #[tokio::test]
    async fn like_happy_path_completes_and_audits() {
        let f = fixture(ScriptedAdapter::succeeding(), StaticGenerator::with_comment("x"));
        let id = seed_pending(&f, ActionKind::Like);

        let outcome = f.executor.execute(id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Completed);

        let row = f.store.snapshot(id).unwrap();
        assert_eq!(row.status, ActionStatus::Completed);
        assert!(row.attempted_at.is_some());
        assert!(row.completed_at.is_some());

        let calls = f.adapter.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].access_token.as_deref(), Some("token-123"));
        assert!(calls[0].comment_text.is_none());

        let entries = f.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "like_completed");
        assert_eq!(entries[0].target_id, f.post_id.to_string());
    }

    #[tokio::test]
    async fn comment_happy_path_saves_generated_text() {
        let f = fixture(
            ScriptedAdapter::succeeding(),
            StaticGenerator::with_comment("Congrats on the launch"),
        );
        let id = seed_pending(&f, ActionKind::Comment);

        let outcome = f.executor.execute(id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Completed);

        let row = f.store.snapshot(id).unwrap();
        assert_eq!(row.comment_text.as_deref(), Some("Congrats on the launch"));
        assert!(row.generation_meta.is_some());

        let calls = f.adapter.calls();
        assert_eq!(calls[0].comment_text.as_deref(), Some("Congrats on the launch"));
        assert_eq!(f.audit.entries()[0].action, "comment_completed");
    }

    #[tokio::test]
    async fn business_failure_is_recorded_not_raised() {
        let f = fixture(
            ScriptedAdapter::failing_with(AdapterError::Action(
                "Like button not found for post".to_string(),
            )),
            StaticGenerator::with_comment("x"),
        );
        let id = seed_pending(&f, ActionKind::Like);

        let outcome = f.executor.execute(id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Failed);

        let row = f.store.snapshot(id).unwrap();
        assert_eq!(row.status, ActionStatus::Failed);
        assert_eq!(row.error_message.as_deref(), Some("Like button not found for post"));
        assert_eq!(f.audit.entries()[0].action, "like_failed");
    }

    #[tokio::test]
    async fn executor_failure_keeps_retry_budget() {
        // First-attempt business failures do not consume retry budget; only
        // the reaper increments retry_count.
        let f = fixture(
            ScriptedAdapter::failing_with(AdapterError::Action("rejected".to_string())),
            StaticGenerator::with_comment("x"),
        );
        let id = seed_pending(&f, ActionKind::Like);

        f.executor.execute(id).await.unwrap();
        let row = f.store.snapshot(id).unwrap();
        assert_eq!(row.status, ActionStatus::Failed);
        assert_eq!(row.retry_count, 0);
        assert!(row.last_retry_at.is_none());
    }

    #[tokio::test]
    async fn transient_error_propagates_and_leaves_row_in_progress() {
        let f = fixture(
            ScriptedAdapter::failing_with(AdapterError::Timeout("read timed out".to_string())),
            StaticGenerator::with_comment("x"),
        );
        let id = seed_pending(&f, ActionKind::Like);

        let err = f.executor.execute(id).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Transient(_)));

        // No terminal state, no audit entry: the queue retries, and the
        // reaper times the row out if that never lands.
        let row = f.store.snapshot(id).unwrap();
        assert_eq!(row.status, ActionStatus::InProgress);
        assert!(f.audit.entries().is_empty());

        // The lock was still released.
        assert!(!f
            .lock_store
            .exists(&format!("boostloop:user_lock:engagement_linkedin:{}", f.user_id))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn generation_failure_fails_the_comment_action() {
        let f = fixture(ScriptedAdapter::succeeding(), StaticGenerator::failing());
        let id = seed_pending(&f, ActionKind::Comment);

        let outcome = f.executor.execute(id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Failed);

        let row = f.store.snapshot(id).unwrap();
        assert!(row
            .error_message
            .unwrap()
            .starts_with("Comment generation failed"));
        // The posting adapter was never called.
        assert!(f.adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn busy_user_reschedules_without_touching_the_row() {
        let f = fixture(ScriptedAdapter::succeeding(), StaticGenerator::with_comment("x"));
        let id = seed_pending(&f, ActionKind::Like);

        // Another worker holds the lock.
        let manager = UserLockManager::new(f.lock_store.clone(), Duration::from_secs(120));
        let _held = manager
            .acquire(f.user_id, "engagement_linkedin")
            .await
            .unwrap()
            .unwrap();

        let outcome = f.executor.execute(id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Busy);

        let row = f.store.snapshot(id).unwrap();
        assert_eq!(row.status, ActionStatus::Pending);
        assert!(row.attempted_at.is_none());
        assert_eq!(
            f.queue.countdown_for(id),
            Some(Duration::from_secs(30)),
            "rescheduled with the busy retry delay"
        );
        assert!(f.adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn duplicate_delivery_is_a_noop() {
        let f = fixture(ScriptedAdapter::succeeding(), StaticGenerator::with_comment("x"));
        let id = seed_pending(&f, ActionKind::Like);

        assert_eq!(f.executor.execute(id).await.unwrap(), ExecutionOutcome::Completed);
        assert_eq!(f.executor.execute(id).await.unwrap(), ExecutionOutcome::Skipped);

        // Only the first delivery reached the adapter or the audit log.
        assert_eq!(f.adapter.calls().len(), 1);
        assert_eq!(f.audit.entries().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_claims_admit_exactly_one() {
        let store = Arc::new(MemoryActionStore::new());
        let action = pending_action(Uuid::new_v4(), Uuid::new_v4(), ActionKind::Like);
        let id = action.id;
        store.seed(action);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_pending(id, Utc::now()).await.unwrap()
            }));
        }

        let mut claimed = 0;
        for h in handles {
            if h.await.unwrap() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn unknown_action_is_skipped() {
        let f = fixture(ScriptedAdapter::succeeding(), StaticGenerator::with_comment("x"));
        let outcome = f.executor.execute(Uuid::new_v4()).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Skipped);
    }

    #[tokio::test]
    async fn unregistered_platform_kind_fails_the_action() {
        let f = fixture(ScriptedAdapter::succeeding(), StaticGenerator::with_comment("x"));
        // A Meta post with only LinkedIn adapters registered.
        let meta_post = post(Uuid::new_v4(), Platform::Meta);
        let action = pending_action(meta_post.id, f.user_id, ActionKind::Like);
        let id = action.id;
        f.store.seed(action);

        // Swap in a directory that knows the meta post.
        let executor = Executor::new(
            f.store.clone(),
            Arc::new(MemoryDirectory::new().with_post(meta_post)),
            UserLockManager::new(f.lock_store.clone(), Duration::from_secs(120)),
            AdapterRegistry::new(),
            Arc::new(StaticGenerator::with_comment("x")),
            Arc::new(StaticTokens::none()),
            f.audit.clone(),
            f.queue.clone(),
            Tuning::default(),
        );

        let outcome = executor.execute(id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Failed);
        let row = f.store.snapshot(id).unwrap();
        assert!(row.error_message.unwrap().contains("No adapter registered"));
    }
}
