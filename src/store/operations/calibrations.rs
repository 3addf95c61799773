use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::store::keys;
use crate::store::{Store, StoreError};

/// Result of the latest fit of an item's 3PL parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCalibration {
    pub item_id: String,
    pub discrimination: f64,
    /// Difficulty on the θ scale.
    pub difficulty: f64,
    pub guessing: f64,
    pub converged: bool,
    pub responses: usize,
    pub calibrated_at: DateTime<Utc>,
}

impl Store {
    pub fn get_calibration(&self, item_id: &str) -> Result<Option<ItemCalibration>, StoreError> {
        let key = keys::calibration_key(item_id)?;
        match self.item_calibrations.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// 批量读取标定结果，缺失的条目不出现在结果中
    pub fn get_calibrations_by_ids(
        &self,
        item_ids: &[String],
    ) -> Result<HashMap<String, ItemCalibration>, StoreError> {
        let mut result = HashMap::with_capacity(item_ids.len());
        for item_id in item_ids {
            if result.contains_key(item_id) {
                continue;
            }
            if let Some(calibration) = self.get_calibration(item_id)? {
                result.insert(item_id.clone(), calibration);
            }
        }
        Ok(result)
    }

    pub fn set_calibration(&self, calibration: &ItemCalibration) -> Result<(), StoreError> {
        let params = [
            calibration.discrimination,
            calibration.difficulty,
            calibration.guessing,
        ];
        if params.iter().any(|p| !p.is_finite()) {
            return Err(StoreError::Validation(format!(
                "calibration for item {} has non-finite parameters",
                calibration.item_id
            )));
        }
        let key = keys::calibration_key(&calibration.item_id)?;
        self.item_calibrations
            .insert(key.as_bytes(), Self::serialize(calibration)?)?;
        Ok(())
    }
}
