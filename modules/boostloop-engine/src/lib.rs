//! Engagement scheduling and execution core.
//!
//! Turns "a post was discovered" into N completed or permanently-failed
//! engagement records: the scheduler fans a post out to its page's
//! subscribers with humane staggered delays, the executor performs one
//! action under a per-user lock, and the reaper recovers work lost to
//! crashed workers or dropped queue messages.
//!
//! Everything platform-specific (REST calls, browser automation, LLM comment
//! generation, token refresh) sits behind the traits in [`traits`]; this
//! crate owns only the state machine and its timing policy.

pub mod executor;
pub mod locks;
pub mod reaper;
pub mod scheduler;
pub mod stagger;
pub mod store;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use executor::{AdapterRegistry, ExecutionError, ExecutionOutcome, Executor};
pub use locks::{LockStore, MemoryLockStore, UserLockGuard, UserLockManager};
pub use reaper::{is_permanent_failure, StaleActionReaper, SweepStats};
pub use scheduler::EngagementScheduler;
pub use store::{migrate, PgActionStore, PgAuditSink, PgLockStore};
