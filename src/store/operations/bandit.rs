use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::adaptive::bandit::BetaStats;
use crate::constants::MAX_CAS_RETRIES;
use crate::store::keys;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditReportEntry {
    pub item_id: String,
    pub alpha: f64,
    pub beta: f64,
    pub expected_value: f64,
    pub uncertainty: f64,
}

impl Store {
    /// 获取题目的 Beta 统计，不存在时返回 (1, 1) 先验
    pub fn get_bandit_stats(&self, item_id: &str) -> Result<BetaStats, StoreError> {
        let key = keys::bandit_key(item_id)?;
        match self.bandit_stats.get(key.as_bytes())? {
            Some(raw) => Ok(Self::deserialize(&raw)?),
            None => Ok(BetaStats::default()),
        }
    }

    /// Only items with a stored row appear in the result.
    pub fn get_bandit_stats_by_ids(
        &self,
        item_ids: &[String],
    ) -> Result<HashMap<String, BetaStats>, StoreError> {
        let mut result = HashMap::with_capacity(item_ids.len());
        for item_id in item_ids {
            if result.contains_key(item_id) {
                continue;
            }
            let key = keys::bandit_key(item_id)?;
            if let Some(raw) = self.bandit_stats.get(key.as_bytes())? {
                result.insert(item_id.clone(), Self::deserialize(&raw)?);
            }
        }
        Ok(result)
    }

    /// Increments α or β for one item, creating the prior row on first touch.
    pub fn record_bandit_outcome(&self, item_id: &str, is_correct: bool) -> Result<BetaStats, StoreError> {
        let key = keys::bandit_key(item_id)?;

        for _ in 0..MAX_CAS_RETRIES {
            let current = self.bandit_stats.get(key.as_bytes())?;
            let mut stats: BetaStats = match &current {
                Some(raw) => Self::deserialize(raw)?,
                None => BetaStats::default(),
            };
            stats.record(is_correct);

            let swapped = self
                .bandit_stats
                .compare_and_swap(key.as_bytes(), current, Some(Self::serialize(&stats)?))?;
            if swapped.is_ok() {
                return Ok(stats);
            }
        }

        Err(StoreError::CasRetryExhausted {
            entity: "bandit_stats".to_string(),
            key,
            attempts: MAX_CAS_RETRIES,
        })
    }

    /// Every tracked item, ordered by item id.
    pub fn bandit_report(&self) -> Result<Vec<BanditReportEntry>, StoreError> {
        let mut report = Vec::new();
        for entry in self.bandit_stats.iter() {
            let (key, value) = entry?;
            let item_id = String::from_utf8_lossy(&key).into_owned();
            let stats: BetaStats = Self::deserialize(&value)?;
            report.push(BanditReportEntry {
                item_id,
                alpha: stats.alpha,
                beta: stats.beta,
                expected_value: stats.expected_value(),
                uncertainty: stats.uncertainty(),
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_touch_creates_prior_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(store.get_bandit_stats("q1").unwrap(), BetaStats::default());
        assert!(store.get_bandit_stats_by_ids(&["q1".to_string()]).unwrap().is_empty());

        let stats = store.record_bandit_outcome("q1", false).unwrap();
        assert_eq!(stats, BetaStats { alpha: 1.0, beta: 2.0 });
    }

    #[test]
    fn outcomes_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        store.record_bandit_outcome("q1", true).unwrap();
        store.record_bandit_outcome("q1", true).unwrap();
        store.record_bandit_outcome("q1", false).unwrap();

        let report = store.bandit_report().unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].item_id, "q1");
        assert_eq!((report[0].alpha, report[0].beta), (3.0, 2.0));
        assert_eq!(report[0].expected_value, 0.6);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(Store::open(dir.path().to_str().unwrap()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        store.record_bandit_outcome("q1", true).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get_bandit_stats("q1").unwrap().alpha, 21.0);
    }
}
