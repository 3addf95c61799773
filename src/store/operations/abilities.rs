use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::{Store, StoreError};

/// Current ability estimate of one learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerAbility {
    pub theta: f64,
    pub attempts: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for LearnerAbility {
    fn default() -> Self {
        Self {
            theta: 0.0,
            attempts: 0,
            updated_at: Utc::now(),
        }
    }
}

impl Store {
    /// 获取学习者能力值，不存在时返回 θ = 0 的冷启动值
    pub fn get_ability(&self, learner_id: &str) -> Result<LearnerAbility, StoreError> {
        let key = keys::ability_key(learner_id)?;
        match self.abilities.get(key.as_bytes())? {
            Some(raw) => Ok(Self::deserialize(&raw)?),
            None => Ok(LearnerAbility::default()),
        }
    }

    pub fn set_ability(&self, learner_id: &str, ability: &LearnerAbility) -> Result<(), StoreError> {
        if !ability.theta.is_finite() {
            return Err(StoreError::Validation(format!(
                "theta must be finite for learner {learner_id}"
            )));
        }
        let key = keys::ability_key(learner_id)?;
        self.abilities
            .insert(key.as_bytes(), Self::serialize(ability)?)?;
        Ok(())
    }
}
