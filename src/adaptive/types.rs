use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::adaptive::bandit::BetaStats;
use crate::adaptive::irt::{self, ItemParameters};
use crate::adaptive::memory::HalfLifeState;
use crate::store::operations::items::Item;

pub use crate::store::operations::abilities::LearnerAbility;
pub use crate::store::operations::interactions::Interaction;

/// How the recommender arrived at its choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    ReviewInjection,
    Bandit,
    Score,
}

impl SelectionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReviewInjection => "review_injection",
            Self::Bandit => "bandit",
            Self::Score => "score",
        }
    }
}

/// Immutable per-attempt copy of the chosen item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSnapshot {
    pub attempt_id: String,
    pub item_id: String,
    pub question_type: String,
    pub difficulty_label: String,
    pub stimulus: String,
    pub question: String,
    pub choices: Vec<String>,
    pub correct_choice: String,
    pub explanation: String,
    pub detailed_explanation: Option<String>,
    pub skills: Vec<String>,
    pub skills_rationale: Option<String>,
    pub diagnoses: BTreeMap<String, String>,
    pub elo_difficulty: f64,
    pub difficulty_theta: f64,
    pub discrimination: f64,
    pub guessing: f64,
    pub source: SelectionSource,
    pub score: f64,
    /// Attempts on this snapshot so far; always 0 when issued.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl ItemSnapshot {
    pub fn new(item: &Item, parameters: ItemParameters, source: SelectionSource, score: f64) -> Self {
        Self {
            attempt_id: uuid::Uuid::new_v4().to_string(),
            item_id: item.id.clone(),
            question_type: item.question_type.clone(),
            difficulty_label: item.difficulty_label.clone(),
            stimulus: item.stimulus.clone(),
            question: item.question.clone(),
            choices: item.choices.clone(),
            correct_choice: item.correct_choice.clone(),
            explanation: item.explanation.clone(),
            detailed_explanation: item.detailed_explanation.clone(),
            skills: item.skills.clone(),
            skills_rationale: item.skills_rationale.clone(),
            diagnoses: item.diagnoses.clone(),
            elo_difficulty: irt::theta_to_elo(parameters.b),
            difficulty_theta: parameters.b,
            discrimination: parameters.a,
            guessing: parameters.c,
            source,
            score,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NextItem {
    Ready(ItemSnapshot),
    NoItemAvailable,
}

impl NextItem {
    pub fn snapshot(&self) -> Option<&ItemSnapshot> {
        match self {
            Self::Ready(snapshot) => Some(snapshot),
            Self::NoItemAvailable => None,
        }
    }
}

/// What `record_outcome` changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeReceipt {
    pub interaction_id: String,
    pub previous_theta: f64,
    pub theta: f64,
    pub score: i32,
    pub bandit: BetaStats,
    pub review: HalfLifeState,
}

/// 3PL parameters of an item as authored.
pub fn item_parameters(item: &Item) -> ItemParameters {
    ItemParameters {
        a: item.discrimination,
        b: irt::elo_to_theta(item.elo_difficulty),
        c: item.guessing,
    }
}
