//! Postgres-backed implementations of [`ActionStore`], [`LockStore`] and
//! [`AuditSink`]. All queries are runtime-checked; `migrate` brings an empty
//! database up to the expected schema and is safe to re-run.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use boostloop_common::{ActionKind, AuditEntry, EngagementAction};

use crate::locks::LockStore;
use crate::traits::{ActionStore, AuditSink};

/// Create the enum types, tables and indexes this crate needs. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    // CREATE TYPE has no IF NOT EXISTS; swallow duplicate_object instead.
    for ddl in [
        "CREATE TYPE platform AS ENUM ('linkedin', 'meta')",
        "CREATE TYPE action_kind AS ENUM ('like', 'comment')",
        "CREATE TYPE action_status AS ENUM ('pending', 'in_progress', 'completed', 'failed')",
    ] {
        let guarded = format!(
            "DO $$ BEGIN {ddl}; EXCEPTION WHEN duplicate_object THEN NULL; END $$"
        );
        sqlx::query(&guarded)
            .execute(pool)
            .await
            .context("creating enum type")?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS engagement_actions (
            id              UUID PRIMARY KEY,
            post_id         UUID NOT NULL,
            user_id         UUID NOT NULL,
            kind            action_kind NOT NULL,
            status          action_status NOT NULL DEFAULT 'pending',
            comment_text    TEXT,
            generation_meta JSONB,
            attempted_at    TIMESTAMPTZ,
            completed_at    TIMESTAMPTZ,
            error_message   TEXT,
            retry_count     INT NOT NULL DEFAULT 0,
            last_retry_at   TIMESTAMPTZ,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating engagement_actions")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_engagement_actions_status \
         ON engagement_actions (status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_engagement_actions_user_created \
         ON engagement_actions (user_id, kind, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_locks (
            key        TEXT PRIMARY KEY,
            token      TEXT NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating user_locks")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id          BIGSERIAL PRIMARY KEY,
            org_id      UUID NOT NULL,
            user_id     UUID,
            action      TEXT NOT NULL,
            target_type TEXT NOT NULL,
            target_id   TEXT NOT NULL,
            metadata    JSONB NOT NULL DEFAULT '{}',
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating audit_log")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// PgActionStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgActionStore {
    pool: PgPool,
}

impl PgActionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ACTION_COLUMNS: &str = "id, post_id, user_id, kind, status, comment_text, \
     generation_meta, attempted_at, completed_at, error_message, retry_count, \
     last_retry_at, created_at";

#[async_trait]
impl ActionStore for PgActionStore {
    async fn insert(&self, action: &EngagementAction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO engagement_actions
                (id, post_id, user_id, kind, status, comment_text, generation_meta,
                 attempted_at, completed_at, error_message, retry_count,
                 last_retry_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(action.id)
        .bind(action.post_id)
        .bind(action.user_id)
        .bind(action.kind)
        .bind(action.status)
        .bind(&action.comment_text)
        .bind(&action.generation_meta)
        .bind(action.attempted_at)
        .bind(action.completed_at)
        .bind(&action.error_message)
        .bind(action.retry_count)
        .bind(action.last_retry_at)
        .bind(action.created_at)
        .execute(&self.pool)
        .await
        .context("inserting engagement action")?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EngagementAction>> {
        let row = sqlx::query_as::<_, EngagementAction>(&format!(
            "SELECT {ACTION_COLUMNS} FROM engagement_actions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching engagement action")?;
        Ok(row)
    }

    async fn claim_pending(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        // The WHERE status guard makes this the one atomic claim point; a
        // redelivered queue message matches zero rows.
        let result = sqlx::query(
            "UPDATE engagement_actions \
             SET status = 'in_progress', attempted_at = $2 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("claiming engagement action")?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_comment_content(&self, id: Uuid, text: &str, meta: &Value) -> Result<()> {
        sqlx::query(
            "UPDATE engagement_actions \
             SET comment_text = $2, generation_meta = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(text)
        .bind(meta)
        .execute(&self.pool)
        .await
        .context("saving generated comment")?;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE engagement_actions \
             SET status = 'completed', completed_at = $2, error_message = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("completing engagement action")?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE engagement_actions \
             SET status = 'failed', error_message = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .context("failing engagement action")?;
        Ok(())
    }

    async fn count_created_since(
        &self,
        user_id: Uuid,
        kind: ActionKind,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM engagement_actions \
             WHERE user_id = $1 AND kind = $2 AND created_at >= $3",
        )
        .bind(user_id)
        .bind(kind)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("counting engagement actions")?;
        Ok(count)
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<EngagementAction>> {
        let rows = sqlx::query_as::<_, EngagementAction>(&format!(
            "SELECT {ACTION_COLUMNS} FROM engagement_actions \
             WHERE status = 'pending' AND attempted_at IS NULL AND created_at < $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("listing stale pending actions")?;
        Ok(rows)
    }

    async fn stale_in_progress(&self, cutoff: DateTime<Utc>) -> Result<Vec<EngagementAction>> {
        let rows = sqlx::query_as::<_, EngagementAction>(&format!(
            "SELECT {ACTION_COLUMNS} FROM engagement_actions \
             WHERE status = 'in_progress' AND attempted_at < $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("listing stale in-progress actions")?;
        Ok(rows)
    }

    async fn retryable_failed(&self, max_retries: i32) -> Result<Vec<EngagementAction>> {
        let rows = sqlx::query_as::<_, EngagementAction>(&format!(
            "SELECT {ACTION_COLUMNS} FROM engagement_actions \
             WHERE status = 'failed' AND retry_count < $1"
        ))
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await
        .context("listing retryable failed actions")?;
        Ok(rows)
    }

    async fn fail_timed_out(
        &self,
        id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE engagement_actions \
             SET status = 'failed', error_message = $2, \
                 retry_count = retry_count + 1, last_retry_at = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error_message)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("failing timed-out action")?;
        Ok(())
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE engagement_actions \
             SET status = 'pending', attempted_at = NULL, error_message = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("resetting action for retry")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PgLockStore
// ---------------------------------------------------------------------------

/// Lock table with lazy expiry: acquiring over an expired row is one upsert,
/// so no background cleanup is needed for correctness.
#[derive(Clone)]
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO user_locks (key, token, expires_at) \
             VALUES ($1, $2, now() + make_interval(secs => $3)) \
             ON CONFLICT (key) DO UPDATE \
             SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at \
             WHERE user_locks.expires_at <= now()",
        )
        .bind(key)
        .bind(token)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("acquiring user lock")?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_locks WHERE key = $1 AND token = $2")
            .bind(key)
            .bind(token)
            .execute(&self.pool)
            .await
            .context("releasing user lock")?;
        Ok(result.rows_affected() == 1)
    }

    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE user_locks \
             SET expires_at = now() + make_interval(secs => $3) \
             WHERE key = $1 AND token = $2 AND expires_at > now()",
        )
        .bind(key)
        .bind(token)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("extending user lock")?;
        Ok(result.rows_affected() == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let live: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM user_locks WHERE key = $1 AND expires_at > now())",
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .context("checking user lock")?;
        Ok(live)
    }
}

// ---------------------------------------------------------------------------
// PgAuditSink
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, entry: AuditEntry) {
        let result = sqlx::query(
            "INSERT INTO audit_log (org_id, user_id, action, target_type, target_id, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.org_id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.target_type)
        .bind(&entry.target_id)
        .bind(&entry.metadata)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(action = %entry.action, error = %e, "Audit write failed, continuing");
        }
    }
}

// Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are
// skipped.
#[cfg(test)]
mod pg_tests {
    use super::*;
    use boostloop_common::ActionStatus;
    use chrono::Duration as ChronoDuration;

    async fn test_pool() -> Option<PgPool> {
        let url = match std::env::var("DATABASE_TEST_URL") {
            Ok(url) => url,
            Err(_) => return None,
        };
        let pool = PgPool::connect(&url).await.expect("connecting to test db");
        migrate(&pool).await.expect("migrating test db");
        Some(pool)
    }

    fn action(kind: ActionKind) -> EngagementAction {
        EngagementAction::new(Uuid::new_v4(), Uuid::new_v4(), kind, Utc::now())
    }

    #[tokio::test]
    async fn action_round_trips_through_postgres() {
        let Some(pool) = test_pool().await else { return };
        let store = PgActionStore::new(pool);

        let a = action(ActionKind::Comment);
        store.insert(&a).await.unwrap();

        let loaded = store.get(a.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, a.id);
        assert_eq!(loaded.kind, ActionKind::Comment);
        assert_eq!(loaded.status, ActionStatus::Pending);
        assert_eq!(loaded.retry_count, 0);
    }

    #[tokio::test]
    async fn claim_is_one_shot() {
        let Some(pool) = test_pool().await else { return };
        let store = PgActionStore::new(pool);

        let a = action(ActionKind::Like);
        store.insert(&a).await.unwrap();

        let now = Utc::now();
        assert!(store.claim_pending(a.id, now).await.unwrap());
        assert!(!store.claim_pending(a.id, now).await.unwrap());

        let loaded = store.get(a.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ActionStatus::InProgress);
        assert!(loaded.attempted_at.is_some());
    }

    #[tokio::test]
    async fn failure_and_retry_cycle_round_trips() {
        let Some(pool) = test_pool().await else { return };
        let store = PgActionStore::new(pool);

        let a = action(ActionKind::Like);
        store.insert(&a).await.unwrap();
        let now = Utc::now();
        store.claim_pending(a.id, now).await.unwrap();
        store.fail_timed_out(a.id, "Timed out", now).await.unwrap();

        let failed = store.get(a.id).await.unwrap().unwrap();
        assert_eq!(failed.status, ActionStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        // Postgres stores microseconds; compare loosely.
        let drift = (failed.last_retry_at.unwrap() - now).num_milliseconds().abs();
        assert!(drift < 10);

        let retryable = store.retryable_failed(3).await.unwrap();
        assert!(retryable.iter().any(|r| r.id == a.id));

        store.reset_for_retry(a.id).await.unwrap();
        let reset = store.get(a.id).await.unwrap().unwrap();
        assert_eq!(reset.status, ActionStatus::Pending);
        assert!(reset.attempted_at.is_none());
        assert!(reset.error_message.is_none());
        assert_eq!(reset.retry_count, 1);
    }

    #[tokio::test]
    async fn cap_count_ignores_status_but_honors_kind_and_window() {
        let Some(pool) = test_pool().await else { return };
        let store = PgActionStore::new(pool);

        let user_id = Uuid::new_v4();
        let now = Utc::now();
        for _ in 0..3 {
            let mut a = EngagementAction::new(Uuid::new_v4(), user_id, ActionKind::Like, now);
            a.status = ActionStatus::Failed;
            store.insert(&a).await.unwrap();
        }
        let old = EngagementAction::new(
            Uuid::new_v4(),
            user_id,
            ActionKind::Like,
            now - ChronoDuration::days(2),
        );
        store.insert(&old).await.unwrap();

        let since = now - ChronoDuration::hours(1);
        assert_eq!(
            store
                .count_created_since(user_id, ActionKind::Like, since)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            store
                .count_created_since(user_id, ActionKind::Comment, since)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn lock_contention_and_expiry() {
        let Some(pool) = test_pool().await else { return };
        let store = PgLockStore::new(pool);

        let key = format!("boostloop:user_lock:test:{}", Uuid::new_v4());
        assert!(store
            .try_acquire(&key, "owner-a", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!store
            .try_acquire(&key, "owner-b", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(store.exists(&key).await.unwrap());

        // Wrong token cannot release or extend.
        assert!(!store.release(&key, "owner-b").await.unwrap());
        assert!(!store
            .extend(&key, "owner-b", Duration::from_secs(60))
            .await
            .unwrap());

        assert!(store.release(&key, "owner-a").await.unwrap());
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_is_acquirable() {
        let Some(pool) = test_pool().await else { return };
        let store = PgLockStore::new(pool);

        let key = format!("boostloop:user_lock:test:{}", Uuid::new_v4());
        assert!(store
            .try_acquire(&key, "owner-a", Duration::from_millis(50))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!store.exists(&key).await.unwrap());
        assert!(store
            .try_acquire(&key, "owner-b", Duration::from_secs(60))
            .await
            .unwrap());

        store.release(&key, "owner-b").await.unwrap();
    }

    #[tokio::test]
    async fn audit_rows_are_written() {
        let Some(pool) = test_pool().await else { return };
        let sink = PgAuditSink::new(pool.clone());

        let org_id = Uuid::new_v4();
        sink.record(AuditEntry {
            org_id,
            user_id: Some(Uuid::new_v4()),
            action: "like_completed".to_string(),
            target_type: "post".to_string(),
            target_id: Uuid::new_v4().to_string(),
            metadata: serde_json::json!({"post_url": "https://example.test/p/1"}),
        })
        .await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
