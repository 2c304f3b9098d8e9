use std::env;
use std::time::Duration;

/// Worker-process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

/// Timing and retry knobs for the engagement core. Not env-configurable —
/// change in code, like the stagger constants they replace.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Bounds for the per-like random stagger draw (seconds, safe profile).
    pub like_stagger_min: u32,
    pub like_stagger_max: u32,
    /// Bounds for the per-comment random stagger draw (seconds, safe profile).
    pub comment_stagger_min: u32,
    pub comment_stagger_max: u32,
    /// Additional seconds of comment delay per subscriber index.
    pub comment_inter_user_delay: u32,

    /// User lock TTL. Bounds lock-orphan exposure if a worker crashes.
    pub lock_ttl: Duration,
    /// Re-enqueue delay when another worker holds the user's lock.
    pub busy_retry_delay: Duration,

    /// Pending-and-never-attempted actions older than this are re-queued.
    pub pending_stale: Duration,
    /// In-progress actions older than this (by attempted_at) are failed.
    pub in_progress_stale: Duration,
    /// Retry budget for failed actions.
    pub max_retries: i32,
    /// Backoff before retry 1, 2, 3. Retry counts beyond the table reuse the
    /// last entry.
    pub retry_delays: [Duration; 3],
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            like_stagger_min: 1,
            like_stagger_max: 5,
            comment_stagger_min: 60,
            comment_stagger_max: 300,
            comment_inter_user_delay: 60,
            lock_ttl: Duration::from_secs(120),
            busy_retry_delay: Duration::from_secs(30),
            pending_stale: Duration::from_secs(30 * 60),
            in_progress_stale: Duration::from_secs(10 * 60),
            max_retries: 3,
            retry_delays: [
                Duration::from_secs(5 * 60),
                Duration::from_secs(10 * 60),
                Duration::from_secs(15 * 60),
            ],
        }
    }
}

impl Tuning {
    /// Backoff delay before the given retry attempt (1-based). Attempts past
    /// the table get the longest delay.
    pub fn retry_delay(&self, attempt: i32) -> Duration {
        match attempt {
            1 => self.retry_delays[0],
            2 => self.retry_delays[1],
            _ => self.retry_delays[2],
        }
    }
}
