use crate::adaptive::skills::SkillVocabulary;
use crate::store::keys;
use crate::store::{Store, StoreError};

impl Store {
    pub fn get_vocabulary(&self) -> Result<Option<SkillVocabulary>, StoreError> {
        match self
            .skill_vocabulary
            .get(keys::VOCABULARY_KEY.as_bytes())?
        {
            Some(raw) => Ok(Some(SkillVocabulary::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_vocabulary(&self, vocabulary: &SkillVocabulary) -> Result<(), StoreError> {
        self.skill_vocabulary
            .insert(keys::VOCABULARY_KEY.as_bytes(), vocabulary.to_bytes()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        let vocabulary = SkillVocabulary::build(["inference", "assumption"]);
        {
            let store = Store::open(&path).unwrap();
            assert!(store.get_vocabulary().unwrap().is_none());
            store.set_vocabulary(&vocabulary).unwrap();
            store.flush().unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_vocabulary().unwrap(), Some(vocabulary));
    }
}
