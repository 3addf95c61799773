//! Skill vocabulary: a stable, alphabetical bijection between skill names
//! and dense ids, plus the 2K-wide interaction encoding used by the
//! sequence model.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::store::operations::items::Item;

/// Persisted form. Only the ordered names are stored; ids are positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VocabularyRecord {
    skills: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "VocabularyRecord", into = "VocabularyRecord")]
pub struct SkillVocabulary {
    skills: Vec<String>,
    index: HashMap<String, usize>,
}

impl TryFrom<VocabularyRecord> for SkillVocabulary {
    type Error = String;

    fn try_from(record: VocabularyRecord) -> Result<Self, Self::Error> {
        if record.skills.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err("skill vocabulary must be strictly sorted".to_string());
        }
        Ok(Self::from_sorted(record.skills))
    }
}

impl From<SkillVocabulary> for VocabularyRecord {
    fn from(vocabulary: SkillVocabulary) -> Self {
        Self {
            skills: vocabulary.skills,
        }
    }
}

impl SkillVocabulary {
    /// Builds a vocabulary from raw tags. Names are trimmed, blanks dropped,
    /// duplicates merged; order of the input does not matter.
    pub fn build<'a, I>(tags: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unique: BTreeSet<String> = tags
            .into_iter()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();
        Self::from_sorted(unique.into_iter().collect())
    }

    pub fn from_items(items: &[Item]) -> Self {
        Self::build(items.iter().flat_map(|item| item.skills.iter().map(String::as_str)))
    }

    fn from_sorted(skills: Vec<String>) -> Self {
        let index = skills
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id))
            .collect();
        Self { skills, index }
    }

    /// K
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn skills(&self) -> &[String] {
        &self.skills
    }

    pub fn id_of(&self, skill: &str) -> Option<usize> {
        self.index.get(skill.trim()).copied()
    }

    pub fn skill_at(&self, id: usize) -> Option<&str> {
        self.skills.get(id).map(String::as_str)
    }

    /// 2K vector: slot `id` marks a correct answer touching the skill,
    /// slot `K + id` an incorrect one. Unknown skills contribute nothing.
    pub fn encode<S: AsRef<str>>(&self, skills: &[S], is_correct: bool) -> Vec<f32> {
        let k = self.len();
        let mut vector = vec![0.0_f32; 2 * k];
        for skill in skills {
            if let Some(id) = self.id_of(skill.as_ref()) {
                let slot = if is_correct { id } else { k + id };
                vector[slot] = 1.0;
            }
        }
        vector
    }

    /// Target vector of width K with 1.0 at every skill the interaction touches.
    pub fn skill_mask<S: AsRef<str>>(&self, skills: &[S]) -> Vec<f32> {
        let mut mask = vec![0.0_f32; self.len()];
        for skill in skills {
            if let Some(id) = self.id_of(skill.as_ref()) {
                mask[id] = 1.0;
            }
        }
        mask
    }

    /// Reads a K-wide model output as `{skill: probability}`. Extra slots are ignored.
    pub fn decode(&self, output: &[f32]) -> HashMap<String, f64> {
        output
            .iter()
            .zip(self.skills.iter())
            .map(|(p, skill)| (skill.clone(), f64::from(*p)))
            .collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
