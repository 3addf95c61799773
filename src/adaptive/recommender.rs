//! Next-item selection.
//!
//! Order of operations:
//! 1. candidate pool around θ (narrow radius, widened when short), minus the
//!    current and recently attempted items unless that leaves nothing
//! 2. skill signal: sequence-model mastery when that backend is selected,
//!    otherwise the learner's weakest skills by error rate
//! 3. score = 1 − |b − θ| + skill bonus
//! 4. seeded coin flip injecting the most-forgotten due review item in the pool
//! 5. bandit over the scored pool, or highest score (first wins ties)
//! 6. immutable snapshot of the chosen item
//!
//! Only an empty pool is terminal. Every optional signal degrades with a warning.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};

use crate::adaptive::bandit::{self, Arm};
use crate::adaptive::config::EngineConfig;
use crate::adaptive::error::EngineError;
use crate::adaptive::irt::{self, ItemParameters};
use crate::adaptive::knowledge::{TracerKind, TracerSet};
use crate::adaptive::memory::hlr;
use crate::adaptive::source::{ContentStore, SelectionStats};
use crate::adaptive::types::{item_parameters, ItemSnapshot, NextItem, SelectionSource};
use crate::adaptive::weak_skills;
use crate::store::operations::interactions::Interaction;
use crate::store::operations::items::Item;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy)]
pub struct RecommendRequest<'a> {
    pub learner_id: &'a str,
    pub theta: f64,
    pub exclude_id: Option<&'a str>,
    /// The learner's log, oldest first.
    pub history: &'a [Interaction],
    /// Interactions across all learners; drives tracer selection.
    pub total_interactions: u64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub item: Item,
    pub parameters: ItemParameters,
    pub score: f64,
}

/// Per-skill signal feeding the score bonus.
#[derive(Debug, Clone, PartialEq)]
pub enum SkillSignal {
    Mastery(HashMap<String, f64>),
    WeakSkills(HashSet<String>),
}

pub struct Recommender<'a> {
    config: &'a EngineConfig,
    tracers: &'a TracerSet,
}

impl<'a> Recommender<'a> {
    pub fn new(config: &'a EngineConfig, tracers: &'a TracerSet) -> Self {
        Self { config, tracers }
    }

    pub fn recommend<S, R>(
        &self,
        source: &S,
        request: &RecommendRequest<'_>,
        rng: &mut R,
    ) -> Result<NextItem, EngineError>
    where
        S: ContentStore + SelectionStats + ?Sized,
        R: Rng + ?Sized,
    {
        let exclude = self.exclusions(request);
        let pool = self.candidate_pool(source, request.theta, &exclude)?;
        if pool.is_empty() {
            tracing::info!(
                learner_id = request.learner_id,
                theta = request.theta,
                "No candidate items near ability"
            );
            return Ok(NextItem::NoItemAvailable);
        }

        let mut candidates = self.with_calibrations(source, pool);
        let signal = self.skill_signal(request);
        self.score(&mut candidates, request.theta, &signal);

        let (index, selected_by) = match self.review_injection(source, request, &candidates, rng) {
            Some(index) => (index, SelectionSource::ReviewInjection),
            None => self.final_choice(source, request.theta, &candidates, rng),
        };

        // `index` always comes from `candidates`, which is non-empty here.
        let Some(chosen) = candidates.get(index) else {
            return Ok(NextItem::NoItemAvailable);
        };
        tracing::debug!(
            learner_id = request.learner_id,
            item_id = %chosen.item.id,
            source = selected_by.as_str(),
            score = chosen.score,
            pool = candidates.len(),
            "Selected next item"
        );
        Ok(NextItem::Ready(ItemSnapshot::new(
            &chosen.item,
            chosen.parameters,
            selected_by,
            chosen.score,
        )))
    }

    fn exclusions(&self, request: &RecommendRequest<'_>) -> HashSet<String> {
        let mut exclude: HashSet<String> = request
            .history
            .iter()
            .rev()
            .take(self.config.recommender.recent_exclusion)
            .map(|interaction| interaction.item_id.clone())
            .collect();
        if let Some(id) = request.exclude_id {
            exclude.insert(id.to_string());
        }
        exclude
    }

    /// Items near θ, nearest first. Widens once when the narrow radius
    /// yields fewer than the pool size; drops the exclusion set as a last resort.
    pub fn candidate_pool<S: ContentStore + ?Sized>(
        &self,
        content: &S,
        theta: f64,
        exclude: &HashSet<String>,
    ) -> Result<Vec<Item>, StoreError> {
        let cfg = &self.config.recommender;
        let target = irt::theta_to_elo(theta);

        let mut pool = content.candidates_near(target, cfg.narrow_radius, exclude, cfg.pool_size)?;
        if pool.len() < cfg.pool_size {
            pool = content.candidates_near(target, cfg.wide_radius, exclude, cfg.pool_size)?;
        }
        if pool.is_empty() && !exclude.is_empty() {
            tracing::debug!(excluded = exclude.len(), "Exclusion emptied the pool, ignoring it");
            pool = content.candidates_near(target, cfg.wide_radius, &HashSet::new(), cfg.pool_size)?;
        }
        Ok(pool)
    }

    /// Converged calibrations replace the authored parameters.
    fn with_calibrations<S: ContentStore + ?Sized>(&self, content: &S, pool: Vec<Item>) -> Vec<Candidate> {
        let ids: Vec<String> = pool.iter().map(|item| item.id.clone()).collect();
        let calibrations = content.calibrations(&ids).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load item calibrations, using authored parameters");
            HashMap::new()
        });

        pool.into_iter()
            .map(|item| {
                let parameters = match calibrations.get(&item.id) {
                    Some(cal) if cal.converged => ItemParameters {
                        a: cal.discrimination,
                        b: cal.difficulty,
                        c: cal.guessing,
                    },
                    _ => item_parameters(&item),
                };
                Candidate {
                    item,
                    parameters,
                    score: 0.0,
                }
            })
            .collect()
    }

    pub fn skill_signal(&self, request: &RecommendRequest<'_>) -> SkillSignal {
        if self.config.recommender.use_knowledge_tracing {
            let tracer = self.tracers.select(
                request.total_interactions,
                self.config.knowledge_tracing.sequence_threshold,
            );
            if tracer.kind() == TracerKind::Sequence {
                match tracer.predict_mastery(request.history) {
                    Ok(mastery) => return SkillSignal::Mastery(mastery),
                    Err(e) => tracing::warn!(
                        learner_id = request.learner_id,
                        error = %e,
                        "Sequence model failed, falling back to weak skills"
                    ),
                }
            }
        }
        SkillSignal::WeakSkills(
            weak_skills::weak_skills(request.history, self.config.recommender.weak_skill_count)
                .into_iter()
                .collect(),
        )
    }

    pub fn score(&self, candidates: &mut [Candidate], theta: f64, signal: &SkillSignal) {
        let cfg = &self.config.recommender;
        for candidate in candidates.iter_mut() {
            let base = 1.0 - (candidate.parameters.b - theta).abs();
            let bonus = match signal {
                SkillSignal::Mastery(mastery) => candidate
                    .item
                    .skills
                    .iter()
                    .map(|skill| (1.0 - mastery.get(skill).copied().unwrap_or(0.5)) * cfg.mastery_bonus)
                    .sum::<f64>(),
                SkillSignal::WeakSkills(weak) => {
                    if candidate.item.skills.iter().any(|skill| weak.contains(skill)) {
                        cfg.weak_skill_bonus
                    } else {
                        0.0
                    }
                }
            };
            candidate.score = base + bonus;
        }
    }

    /// Position of the review item to inject, if the coin flip fires.
    fn review_injection<S, R>(
        &self,
        stats: &S,
        request: &RecommendRequest<'_>,
        candidates: &[Candidate],
        rng: &mut R,
    ) -> Option<usize>
    where
        S: SelectionStats + ?Sized,
        R: Rng + ?Sized,
    {
        let cfg = &self.config.spaced_repetition;
        if !cfg.enabled {
            return None;
        }
        let states = match stats.review_states(request.learner_id) {
            Ok(states) => states,
            Err(e) => {
                tracing::warn!(
                    learner_id = request.learner_id,
                    error = %e,
                    "Failed to load review states, skipping injection"
                );
                return None;
            }
        };

        let due = hlr::review_candidates(
            states.iter().map(|(id, state)| (id.as_str(), state)),
            request.now,
            cfg.review_threshold,
        );
        let positions: HashMap<&str, usize> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (c.item.id.as_str(), i))
            .collect();
        let index = due
            .iter()
            .find_map(|review| positions.get(review.item_id.as_str()).copied())?;

        (rng.gen::<f64>() < cfg.injection_probability).then_some(index)
    }

    fn final_choice<S, R>(
        &self,
        stats: &S,
        theta: f64,
        candidates: &[Candidate],
        rng: &mut R,
    ) -> (usize, SelectionSource)
    where
        S: SelectionStats + ?Sized,
        R: Rng + ?Sized,
    {
        let cfg = &self.config.bandit;
        if cfg.enabled && candidates.len() > 1 {
            let ids: Vec<String> = candidates.iter().map(|c| c.item.id.clone()).collect();
            let beta_stats = stats.bandit_stats(&ids).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load bandit statistics, using priors");
                HashMap::new()
            });
            let arms: Vec<Arm<'_>> = candidates
                .iter()
                .map(|c| Arm {
                    item_id: &c.item.id,
                    parameters: c.parameters,
                })
                .collect();
            if let Some(choice) = bandit::select(theta, &arms, &beta_stats, cfg.explore_weight, rng) {
                return (choice.index, SelectionSource::Bandit);
            }
        }
        (highest_score(candidates), SelectionSource::Score)
    }
}

/// Index of the best-scoring candidate; earlier candidates win ties.
pub fn highest_score(candidates: &[Candidate]) -> usize {
    let mut best = 0;
    for (i, candidate) in candidates.iter().enumerate().skip(1) {
        if candidate.score > candidates[best].score {
            best = i;
        }
    }
    best
}
