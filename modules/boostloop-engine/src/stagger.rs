//! Stagger and quiet-hours timing policy.
//!
//! Delays are linear in the subscriber index with a random draw on top, so a
//! page with many subscribers never produces a recognizable burst of
//! near-simultaneous actions. Safe-profile delays double on weekends; quiet
//! hours push everything past the end of the configured window.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use rand::Rng;

use boostloop_common::{ActionKind, QuietHours, RiskProfile, Tuning};

/// Saturday/Sunday in the scheduler's reference timezone.
pub fn is_weekend(now: DateTime<Utc>) -> bool {
    matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Seconds to wait before executing the action for the subscriber at
/// zero-based `index` in the page's enumeration.
pub fn stagger_delay<R: Rng + ?Sized>(
    tuning: &Tuning,
    kind: ActionKind,
    risk: RiskProfile,
    index: usize,
    weekend: bool,
    rng: &mut R,
) -> u64 {
    let idx = index as u64;
    match (kind, risk) {
        (ActionKind::Like, RiskProfile::Aggro) => rng.random_range(1..=2u64) * (idx + 1),
        (ActionKind::Like, RiskProfile::Safe) => {
            let draw =
                rng.random_range(tuning.like_stagger_min..=tuning.like_stagger_max) as u64;
            let mut delay = draw * (idx + 1);
            if weekend {
                delay *= 2;
            }
            delay
        }
        (ActionKind::Comment, RiskProfile::Aggro) => {
            rng.random_range(15..=60u64) + idx * 15
        }
        (ActionKind::Comment, RiskProfile::Safe) => {
            let draw =
                rng.random_range(tuning.comment_stagger_min..=tuning.comment_stagger_max) as u64;
            let mut delay = draw + idx * tuning.comment_inter_user_delay as u64;
            if weekend {
                delay *= 2;
            }
            delay
        }
    }
}

/// Seconds until the quiet-hours window ends, or 0 when `now` falls outside
/// it (or quiet hours are disabled). The window may wrap midnight.
pub fn quiet_hours_offset(now: DateTime<Utc>, window: &QuietHours) -> u64 {
    if !window.enabled {
        return 0;
    }

    let current = (now.hour() * 60 + now.minute()) as i64;
    let start = (window.start.hour() * 60 + window.start.minute()) as i64;
    let end = (window.end.hour() * 60 + window.end.minute()) as i64;

    let in_quiet = if start > end {
        // Wraps midnight (e.g. 22:00 - 07:00)
        current >= start || current < end
    } else {
        start <= current && current < end
    };

    if !in_quiet {
        return 0;
    }

    if current < end {
        ((end - current) * 60) as u64
    } else {
        // Past midnight wrap: minutes until midnight + minutes into the new day
        (((24 * 60 - current) + end) * 60) as u64
    }
}
