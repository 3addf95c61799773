//! Half-life regression forgetting curve.
//!
//! recall(t) = 2^(−elapsed_days / half_life). A correct answer doubles the
//! half-life, an incorrect one halves it, always clamped to the configured
//! bounds. The first attempt starts from the cold-start half-life before the
//! multiplier is applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::adaptive::config::SpacedRepetitionConfig;
use crate::constants::MILLIS_PER_DAY;

/// Per (learner, item) forgetting-curve state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HalfLifeState {
    pub half_life_days: f64,
    pub last_practiced: DateTime<Utc>,
    pub n_correct: u32,
    pub n_attempts: u32,
}

pub fn elapsed_days(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - since).num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// 0.0 for a pair never practiced, 1.0 when no time has passed.
pub fn recall_probability(state: Option<&HalfLifeState>, now: DateTime<Utc>) -> f64 {
    let Some(state) = state else {
        return 0.0;
    };
    let elapsed = elapsed_days(state.last_practiced, now);
    if elapsed <= 0.0 {
        return 1.0;
    }
    (-elapsed / state.half_life_days).exp2()
}

pub fn clamp_half_life(half_life: f64, config: &SpacedRepetitionConfig) -> f64 {
    half_life.clamp(config.min_half_life_days, config.max_half_life_days)
}

/// Next state after one attempt at `now`.
pub fn update_half_life(
    previous: Option<&HalfLifeState>,
    is_correct: bool,
    now: DateTime<Utc>,
    config: &SpacedRepetitionConfig,
) -> HalfLifeState {
    let (half_life, n_correct, n_attempts) = match previous {
        Some(state) => (state.half_life_days, state.n_correct, state.n_attempts),
        None => (config.cold_start_half_life_days, 0, 0),
    };
    let multiplier = if is_correct {
        config.correct_multiplier
    } else {
        config.incorrect_multiplier
    };

    HalfLifeState {
        half_life_days: clamp_half_life(half_life * multiplier, config),
        last_practiced: now,
        n_correct: n_correct + u32::from(is_correct),
        n_attempts: n_attempts + 1,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCandidate {
    pub item_id: String,
    pub recall: f64,
    pub half_life_days: f64,
    pub elapsed_days: f64,
}

/// Tracked items whose recall dropped below `threshold`, most forgotten
/// first. Pairs practiced "in the future" (clock skew) are skipped.
pub fn review_candidates<'a, I>(states: I, now: DateTime<Utc>, threshold: f64) -> Vec<ReviewCandidate>
where
    I: IntoIterator<Item = (&'a str, &'a HalfLifeState)>,
{
    let mut due: Vec<ReviewCandidate> = states
        .into_iter()
        .filter_map(|(item_id, state)| {
            let elapsed = elapsed_days(state.last_practiced, now);
            if elapsed <= 0.0 {
                return None;
            }
            let recall = recall_probability(Some(state), now);
            (recall < threshold).then(|| ReviewCandidate {
                item_id: item_id.to_string(),
                recall,
                half_life_days: state.half_life_days,
                elapsed_days: elapsed,
            })
        })
        .collect();

    due.sort_by(|a, b| {
        a.recall
            .partial_cmp(&b.recall)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    due
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStatsEntry {
    pub item_id: String,
    pub half_life_days: f64,
    pub last_practiced: DateTime<Utc>,
    pub recall: f64,
    pub n_correct: u32,
    pub n_attempts: u32,
}

pub fn review_report<'a, I>(states: I, now: DateTime<Utc>) -> Vec<ReviewStatsEntry>
where
    I: IntoIterator<Item = (&'a str, &'a HalfLifeState)>,
{
    states
        .into_iter()
        .map(|(item_id, state)| ReviewStatsEntry {
            item_id: item_id.to_string(),
            half_life_days: state.half_life_days,
            last_practiced: state.last_practiced,
            recall: recall_probability(Some(state), now),
            n_correct: state.n_correct,
            n_attempts: state.n_attempts,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn state(half_life_days: f64, last_practiced: DateTime<Utc>) -> HalfLifeState {
        HalfLifeState {
            half_life_days,
            last_practiced,
            n_correct: 0,
            n_attempts: 1,
        }
    }

    #[test]
    fn never_practiced_recalls_nothing() {
        assert_eq!(recall_probability(None, Utc::now()), 0.0);
    }

    #[test]
    fn just_practiced_recalls_everything() {
        let now = Utc::now();
        assert_eq!(recall_probability(Some(&state(1.0, now)), now), 1.0);
        let future = now + Duration::hours(3);
        assert_eq!(recall_probability(Some(&state(1.0, future)), now), 1.0);
    }

    #[test]
    fn recall_at_half_life_is_one_half() {
        let now = Utc::now();
        let s = state(2.0, now - Duration::days(2));
        assert_eq!(recall_probability(Some(&s), now), 0.5);
    }

    #[test]
    fn first_attempt_starts_from_cold_start() {
        let config = SpacedRepetitionConfig::default();
        let now = Utc::now();

        let correct = update_half_life(None, true, now, &config);
        assert_eq!(correct.half_life_days, 2.0);
        assert_eq!((correct.n_correct, correct.n_attempts), (1, 1));

        let wrong = update_half_life(None, false, now, &config);
        assert_eq!(wrong.half_life_days, 0.5);
        assert_eq!((wrong.n_correct, wrong.n_attempts), (0, 1));
        assert_eq!(wrong.last_practiced, now);
    }

    #[test]
    fn repeated_updates_stay_within_bounds() {
        let config = SpacedRepetitionConfig::default();
        let now = Utc::now();

        let mut up = update_half_life(None, true, now, &config);
        let mut down = update_half_life(None, false, now, &config);
        for _ in 0..10 {
            up = update_half_life(Some(&up), true, now, &config);
            down = update_half_life(Some(&down), false, now, &config);
        }
        assert_eq!(up.half_life_days, 90.0);
        assert_eq!(down.half_life_days, 0.25);
        assert_eq!(up.n_attempts, 11);
    }

    #[test]
    fn candidates_sorted_most_forgotten_first() {
        let now = Utc::now();
        let fresh = state(10.0, now - Duration::days(1));
        let stale = state(1.0, now - Duration::days(4));
        let older = state(1.0, now - Duration::days(2));
        let skewed = state(0.25, now + Duration::days(1));

        let due = review_candidates(
            [
                ("fresh", &fresh),
                ("stale", &stale),
                ("older", &older),
                ("skewed", &skewed),
            ],
            now,
            0.5,
        );
        let ids: Vec<&str> = due.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, vec!["stale", "older"]);
        assert_eq!(due[0].recall, 0.0625);
        assert_eq!(due[0].elapsed_days, 4.0);
    }

    #[test]
    fn report_includes_every_tracked_item() {
        let now = Utc::now();
        let s = state(1.0, now - Duration::days(1));
        let report = review_report([("q1", &s)], now);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].recall, 0.5);
    }
}
