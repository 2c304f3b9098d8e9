// Test mocks for the engagement core.
//
// One mock per trait boundary:
// - MemoryActionStore (ActionStore) — stateful in-memory rows with a real
//   mutex-guarded CAS for the claim transition
// - MemoryDirectory (OrgDirectory) — builder-based fixture data
// - RecordingQueue (TaskQueue) — records (action_id, countdown) pairs
// - ScriptedAdapter (EngagementAdapter) — programmable outcomes
// - StaticGenerator (CommentGenerator) — fixed comment or failure
// - StaticTokens (TokenResolver) — fixed token
// - RecordingAudit (AuditSink) — collects entries

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use boostloop_common::{
    ActionKind, ActionStatus, AuditEntry, AutomationSettings, EngagementAction, GeneratedComment,
    Platform, PostRef, Subscription, VoiceProfile,
};

use crate::traits::{
    ActionStore, AdapterError, AuditSink, CommentGenerator, EngagementAdapter, OrgDirectory,
    TaskQueue, TokenResolver,
};

// ---------------------------------------------------------------------------
// MemoryActionStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryActionStore {
    actions: Mutex<HashMap<Uuid, EngagementAction>>,
}

impl MemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly, bypassing the trait (for staleness fixtures).
    pub fn seed(&self, action: EngagementAction) {
        self.actions.lock().unwrap().insert(action.id, action);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<EngagementAction> {
        self.actions.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<EngagementAction> {
        self.actions.lock().unwrap().values().cloned().collect()
    }

    pub fn by_status(&self, status: ActionStatus) -> Vec<EngagementAction> {
        self.actions
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ActionStore for MemoryActionStore {
    async fn insert(&self, action: &EngagementAction) -> Result<()> {
        self.actions.lock().unwrap().insert(action.id, action.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EngagementAction>> {
        Ok(self.actions.lock().unwrap().get(&id).cloned())
    }

    async fn claim_pending(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut actions = self.actions.lock().unwrap();
        match actions.get_mut(&id) {
            Some(a) if a.status == ActionStatus::Pending => {
                a.status = ActionStatus::InProgress;
                a.attempted_at = Some(now);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => bail!("action {id} not found"),
        }
    }

    async fn set_comment_content(&self, id: Uuid, text: &str, meta: &Value) -> Result<()> {
        let mut actions = self.actions.lock().unwrap();
        let a = actions.get_mut(&id).ok_or_else(|| anyhow::anyhow!("not found"))?;
        a.comment_text = Some(text.to_string());
        a.generation_meta = Some(meta.clone());
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut actions = self.actions.lock().unwrap();
        let a = actions.get_mut(&id).ok_or_else(|| anyhow::anyhow!("not found"))?;
        a.status = ActionStatus::Completed;
        a.completed_at = Some(now);
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<()> {
        let mut actions = self.actions.lock().unwrap();
        let a = actions.get_mut(&id).ok_or_else(|| anyhow::anyhow!("not found"))?;
        a.status = ActionStatus::Failed;
        a.error_message = Some(error_message.to_string());
        Ok(())
    }

    async fn count_created_since(
        &self,
        user_id: Uuid,
        kind: ActionKind,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let actions = self.actions.lock().unwrap();
        Ok(actions
            .values()
            .filter(|a| a.user_id == user_id && a.kind == kind && a.created_at >= since)
            .count() as i64)
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<EngagementAction>> {
        let actions = self.actions.lock().unwrap();
        Ok(actions
            .values()
            .filter(|a| {
                a.status == ActionStatus::Pending
                    && a.attempted_at.is_none()
                    && a.created_at < cutoff
            })
            .cloned()
            .collect())
    }

    async fn stale_in_progress(&self, cutoff: DateTime<Utc>) -> Result<Vec<EngagementAction>> {
        let actions = self.actions.lock().unwrap();
        Ok(actions
            .values()
            .filter(|a| {
                a.status == ActionStatus::InProgress
                    && a.attempted_at.is_some_and(|t| t < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn retryable_failed(&self, max_retries: i32) -> Result<Vec<EngagementAction>> {
        let actions = self.actions.lock().unwrap();
        Ok(actions
            .values()
            .filter(|a| a.status == ActionStatus::Failed && a.retry_count < max_retries)
            .cloned()
            .collect())
    }

    async fn fail_timed_out(
        &self,
        id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut actions = self.actions.lock().unwrap();
        let a = actions.get_mut(&id).ok_or_else(|| anyhow::anyhow!("not found"))?;
        a.status = ActionStatus::Failed;
        a.error_message = Some(error_message.to_string());
        a.retry_count += 1;
        a.last_retry_at = Some(now);
        Ok(())
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<()> {
        let mut actions = self.actions.lock().unwrap();
        let a = actions.get_mut(&id).ok_or_else(|| anyhow::anyhow!("not found"))?;
        a.status = ActionStatus::Pending;
        a.attempted_at = None;
        a.error_message = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

/// Builder-based org data fixture. `failing_settings_for` makes the settings
/// lookup error for one user, for the per-user isolation tests.
#[derive(Default)]
pub struct MemoryDirectory {
    subscriptions: HashMap<Uuid, Vec<Subscription>>,
    settings: HashMap<Uuid, AutomationSettings>,
    failing_settings: HashSet<Uuid>,
    posts: HashMap<Uuid, PostRef>,
    voices: HashMap<Uuid, VoiceProfile>,
    phrases: HashMap<Uuid, Vec<String>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscription(mut self, sub: Subscription) -> Self {
        self.subscriptions.entry(sub.page_id).or_default().push(sub);
        self
    }

    pub fn with_settings(mut self, user_id: Uuid, settings: AutomationSettings) -> Self {
        self.settings.insert(user_id, settings);
        self
    }

    pub fn failing_settings_for(mut self, user_id: Uuid) -> Self {
        self.failing_settings.insert(user_id);
        self
    }

    pub fn with_post(mut self, post: PostRef) -> Self {
        self.posts.insert(post.id, post);
        self
    }

    pub fn with_voice(mut self, user_id: Uuid, voice: VoiceProfile) -> Self {
        self.voices.insert(user_id, voice);
        self
    }

    pub fn with_avoid_phrases(mut self, org_id: Uuid, phrases: Vec<String>) -> Self {
        self.phrases.insert(org_id, phrases);
        self
    }
}

#[async_trait]
impl OrgDirectory for MemoryDirectory {
    async fn subscriptions_for_page(&self, page_id: Uuid) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.get(&page_id).cloned().unwrap_or_default())
    }

    async fn automation_settings(&self, user_id: Uuid) -> Result<Option<AutomationSettings>> {
        if self.failing_settings.contains(&user_id) {
            bail!("settings lookup failed for {user_id}");
        }
        Ok(self.settings.get(&user_id).cloned())
    }

    async fn post(&self, post_id: Uuid) -> Result<Option<PostRef>> {
        Ok(self.posts.get(&post_id).cloned())
    }

    async fn voice_profile(&self, user_id: Uuid) -> Result<VoiceProfile> {
        Ok(self.voices.get(&user_id).cloned().unwrap_or_default())
    }

    async fn avoid_phrases(&self, org_id: Uuid) -> Result<Vec<String>> {
        Ok(self.phrases.get(&org_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// RecordingQueue
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingQueue {
    enqueued: Mutex<Vec<(Uuid, Duration)>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> Vec<(Uuid, Duration)> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn countdown_for(&self, action_id: Uuid) -> Option<Duration> {
        self.enqueued
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| *id == action_id)
            .map(|(_, d)| *d)
    }

    pub fn clear(&self) {
        self.enqueued.lock().unwrap().clear();
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue_execution(&self, action_id: Uuid, countdown: Duration) -> Result<()> {
        self.enqueued.lock().unwrap().push((action_id, countdown));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedAdapter
// ---------------------------------------------------------------------------

/// Records every call; outcome is programmable per call (defaults to
/// success after the script runs out).
#[derive(Default)]
pub struct ScriptedAdapter {
    script: Mutex<Vec<Result<(), AdapterError>>>,
    calls: Mutex<Vec<AdapterCall>>,
}

#[derive(Debug, Clone)]
pub struct AdapterCall {
    pub user_id: Uuid,
    pub post_url: String,
    pub comment_text: Option<String>,
    pub access_token: Option<String>,
}

impl ScriptedAdapter {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing_with(err: AdapterError) -> Self {
        let adapter = Self::default();
        adapter.push_outcome(Err(err));
        adapter
    }

    /// Queue the outcome for the next call (FIFO).
    pub fn push_outcome(&self, outcome: Result<(), AdapterError>) {
        self.script.lock().unwrap().push(outcome);
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngagementAdapter for ScriptedAdapter {
    async fn perform(
        &self,
        user_id: Uuid,
        post_url: &str,
        comment_text: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<(), AdapterError> {
        self.calls.lock().unwrap().push(AdapterCall {
            user_id,
            post_url: post_url.to_string(),
            comment_text: comment_text.map(str::to_string),
            access_token: access_token.map(str::to_string),
        });
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(())
        } else {
            script.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// StaticGenerator
// ---------------------------------------------------------------------------

pub struct StaticGenerator {
    comment: String,
    fail: bool,
}

impl StaticGenerator {
    pub fn with_comment(comment: &str) -> Self {
        Self {
            comment: comment.to_string(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            comment: String::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl CommentGenerator for StaticGenerator {
    async fn generate_and_review(
        &self,
        _post_content: &str,
        _voice: &VoiceProfile,
        avoid_phrases: &[String],
    ) -> Result<GeneratedComment> {
        if self.fail {
            bail!("generation failed");
        }
        Ok(GeneratedComment {
            text: self.comment.clone(),
            review_passed: true,
            model_data: json!({ "model": "static", "avoid_phrases": avoid_phrases.len() }),
        })
    }
}

// ---------------------------------------------------------------------------
// StaticTokens
// ---------------------------------------------------------------------------

pub struct StaticTokens {
    token: Option<String>,
}

impl StaticTokens {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
        }
    }

    pub fn none() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenResolver for StaticTokens {
    async fn valid_access_token(
        &self,
        _user_id: Uuid,
        _platform: Platform,
    ) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}

// ---------------------------------------------------------------------------
// RecordingAudit
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(&self, entry: AuditEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

// ---------------------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------------------

pub fn subscription(page_id: Uuid, user_id: Uuid) -> Subscription {
    Subscription {
        page_id,
        user_id,
        auto_like: true,
        auto_comment: true,
        created_at: Utc::now(),
    }
}

pub fn post(org_id: Uuid, platform: Platform) -> PostRef {
    PostRef {
        id: Uuid::new_v4(),
        org_id,
        platform,
        url: "https://www.linkedin.com/feed/update/urn:li:activity:123/".to_string(),
        content_text: "We shipped a thing.".to_string(),
    }
}

pub fn pending_action(post_id: Uuid, user_id: Uuid, kind: ActionKind) -> EngagementAction {
    EngagementAction::new(post_id, user_id, kind, Utc::now())
}
