use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::keys;
use crate::store::{Store, StoreError};

impl Store {
    /// Loads the weights persisted under `model`, if any.
    pub fn get_model_weights<T: DeserializeOwned>(&self, model: &str) -> Result<Option<T>, StoreError> {
        let key = keys::model_weights_key(model)?;
        match self.model_weights.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_model_weights<T: Serialize>(&self, model: &str, weights: &T) -> Result<(), StoreError> {
        let key = keys::model_weights_key(model)?;
        self.model_weights
            .insert(key.as_bytes(), Self::serialize(weights)?)?;
        Ok(())
    }

    pub fn remove_model_weights(&self, model: &str) -> Result<bool, StoreError> {
        let key = keys::model_weights_key(model)?;
        Ok(self.model_weights.remove(key.as_bytes())?.is_some())
    }
}
