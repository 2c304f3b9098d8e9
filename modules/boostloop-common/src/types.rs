use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// External platform a tracked post lives on. Meta covers both Facebook and
/// Instagram posts — the adapter layer tells them apart by URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "platform", rename_all = "snake_case")]
pub enum Platform {
    Linkedin,
    Meta,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Linkedin => write!(f, "linkedin"),
            Platform::Meta => write!(f, "meta"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "action_kind", rename_all = "snake_case")]
pub enum ActionKind {
    Like,
    Comment,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Like => write!(f, "like"),
            ActionKind::Comment => write!(f, "comment"),
        }
    }
}

/// Engagement state machine: `Pending → InProgress → {Completed, Failed}`,
/// plus the reaper-driven `Failed → Pending` retry transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "action_status", rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::InProgress => write!(f, "in_progress"),
            ActionStatus::Completed => write!(f, "completed"),
            ActionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-user velocity/caution trade-off. Drives daily caps and stagger width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
    #[default]
    Safe,
    Aggro,
}

impl RiskProfile {
    pub fn caps(&self) -> DailyCaps {
        match self {
            RiskProfile::Safe => DailyCaps { likes: 50, comments: 20 },
            RiskProfile::Aggro => DailyCaps { likes: 150, comments: 60 },
        }
    }
}

impl From<&str> for RiskProfile {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "aggro" => RiskProfile::Aggro,
            _ => RiskProfile::Safe,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyCaps {
    pub likes: i64,
    pub comments: i64,
}

// ---------------------------------------------------------------------------
// Settings & subscriptions (read-only org data)
// ---------------------------------------------------------------------------

/// Daily window during which no automated action may fire. The window may
/// wrap midnight (start 22:00, end 07:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: true,
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationSettings {
    #[serde(default)]
    pub risk_profile: RiskProfile,
    #[serde(default)]
    pub quiet_hours: QuietHours,
}

/// One (page, user) subscription row. Enumeration order over a page's
/// subscriptions is the stagger index `i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub page_id: Uuid,
    pub user_id: Uuid,
    pub auto_like: bool,
    pub auto_comment: bool,
    pub created_at: DateTime<Utc>,
}

/// The post fields this core needs. Everything else about posts belongs to
/// the discovery/web layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRef {
    pub id: Uuid,
    pub org_id: Uuid,
    pub platform: Platform,
    pub url: String,
    pub content_text: String,
}

/// How a user sounds: markdown voice profile plus free-form tone settings,
/// both fed verbatim to the comment generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub markdown: String,
    pub tone_settings: Option<Value>,
}

// ---------------------------------------------------------------------------
// Engagement actions
// ---------------------------------------------------------------------------

/// One intended like or comment by one user on one post. The single source of
/// truth for what has been attempted, completed, or failed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EngagementAction {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub kind: ActionKind,
    pub status: ActionStatus,
    pub comment_text: Option<String>,
    pub generation_meta: Option<Value>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EngagementAction {
    pub fn new(post_id: Uuid, user_id: Uuid, kind: ActionKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            post_id,
            user_id,
            kind,
            status: ActionStatus::Pending,
            comment_text: None,
            generation_meta: None,
            attempted_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
            last_retry_at: None,
            created_at: now,
        }
    }
}

/// Generator output: the comment to post plus the structured model response
/// persisted alongside the action for review/debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedComment {
    pub text: String,
    pub review_passed: bool,
    pub model_data: Value,
}

/// One audit trail entry. Best-effort; never blocks the action itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub metadata: Value,
}

/// Stock phrases the comment generator must never produce. Org-level custom
/// phrases are appended to these.
pub const DEFAULT_AVOID_PHRASES: &[&str] = &[
    "thanks for sharing",
    "great insights",
    "this is very insightful",
    "couldn't agree more",
    "spot on",
    "well said",
    "great post",
    "love this",
    "so true",
    "this resonates",
];
