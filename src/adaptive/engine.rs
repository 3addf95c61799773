use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{Mutex, RwLock};

use crate::adaptive::config::EngineConfig;
use crate::adaptive::context::EngineContext;
use crate::adaptive::error::EngineError;
use crate::adaptive::irt::{self, ItemParameters};
use crate::adaptive::knowledge::{self, MasteryEstimate, SkillAgreement};
use crate::adaptive::memory::{hlr, ReviewCandidate, ReviewStatsEntry};
use crate::adaptive::offline::{self, CalibrationRunSummary, KnowledgeTrainingReport, TrainedModels};
use crate::adaptive::recommender::{RecommendRequest, Recommender};
use crate::adaptive::source::{ContentStore, InteractionLog};
use crate::adaptive::types::{Interaction, LearnerAbility, NextItem, OutcomeReceipt};
use crate::store::operations::bandit::BanditReportEntry;
use crate::store::operations::calibrations::ItemCalibration;
use crate::store::Store;

/// Entry point of the adaptive-assessment engine.
///
/// Reads are lock-free apart from short config/context snapshots. Outcomes
/// are serialised per learner; different learners never wait on each other.
pub struct AdaptiveEngine {
    store: Arc<Store>,
    config: Arc<RwLock<EngineConfig>>,
    context: Arc<RwLock<Arc<EngineContext>>>,
    rng: parking_lot::Mutex<ChaCha8Rng>,
    learner_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

impl AdaptiveEngine {
    /// Validates `config` and loads the persisted vocabulary and models.
    pub fn open(store: Arc<Store>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::Config)?;
        let context = EngineContext::load(&store, &config)?;
        Ok(Self::with_context(store, config, context))
    }

    pub fn with_context(store: Arc<Store>, config: EngineConfig, context: EngineContext) -> Self {
        Self {
            rng: parking_lot::Mutex::new(seeded_rng(config.random_seed)),
            store,
            config: Arc::new(RwLock::new(config)),
            context: Arc::new(RwLock::new(Arc::new(context))),
            learner_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub async fn reload_config(&self, new_config: EngineConfig) -> Result<(), EngineError> {
        new_config.validate().map_err(EngineError::Config)?;
        if !new_config.knowledge_tracing.neural_enabled {
            let mut slot = self.context.write().await;
            *slot = Arc::new(slot.with_sequence(None));
        }
        if let Some(seed) = new_config.random_seed {
            self.reseed(seed);
        }
        let mut cfg = self.config.write().await;
        *cfg = new_config;
        tracing::info!("Engine config reloaded");
        Ok(())
    }

    pub async fn get_config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    pub async fn context(&self) -> Arc<EngineContext> {
        self.context.read().await.clone()
    }

    /// Restarts the selection RNG from `seed`.
    pub fn reseed(&self, seed: u64) {
        *self.rng.lock() = ChaCha8Rng::seed_from_u64(seed);
    }

    async fn acquire_learner_lock(&self, learner_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.learner_locks.lock().await;

        // Only the map holds idle locks, so they can be dropped.
        if locks.len() > 1000 {
            locks.retain(|_, v| Arc::strong_count(v) > 1);
        }

        locks
            .entry(learner_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn total_interactions(&self) -> u64 {
        InteractionLog::count_interactions(self.store.as_ref()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to count interactions, assuming cold start");
            0
        })
    }

    // ---- exposed API ----

    /// Next item for a stored learner, using their persisted ability and log.
    pub async fn next_item(&self, learner_id: &str, exclude_id: Option<&str>) -> Result<NextItem, EngineError> {
        let ability = self.store.get_ability(learner_id)?;
        let history = self.store.interactions_for(learner_id)?;
        self.next_item_for(learner_id, ability.theta, exclude_id, &history)
            .await
    }

    /// Next item for an explicit ability and log.
    pub async fn next_item_for(
        &self,
        learner_id: &str,
        theta: f64,
        exclude_id: Option<&str>,
        history: &[Interaction],
    ) -> Result<NextItem, EngineError> {
        if !theta.is_finite() {
            return Err(EngineError::InvalidInput(format!("theta must be finite, got {theta}")));
        }
        let config = self.get_config().await;
        let context = self.context().await;
        let theta = theta.clamp(config.scoring.theta_min, config.scoring.theta_max);

        let request = RecommendRequest {
            learner_id,
            theta,
            exclude_id,
            history,
            total_interactions: self.total_interactions(),
            now: Utc::now(),
        };
        let recommender = Recommender::new(&config, context.tracers());
        let mut rng = self.rng.lock();
        recommender.recommend(self.store.as_ref(), &request, &mut *rng)
    }

    /// One online ability step against an item with parameters `item`.
    pub async fn update_ability(&self, theta: f64, item: ItemParameters, is_correct: bool) -> f64 {
        let config = self.config.read().await;
        irt::update_theta(theta, item.b, item.a, item.c, is_correct, &config.scoring)
    }

    pub async fn score_for(&self, theta: f64) -> i32 {
        let config = self.config.read().await;
        irt::score_for(theta, &config.scoring)
    }

    /// Mastery per skill from the auto-selected tracer.
    pub async fn predict_mastery(&self, history: &[Interaction]) -> MasteryEstimate {
        let threshold = self.config.read().await.knowledge_tracing.sequence_threshold;
        let context = self.context().await;
        context
            .tracers()
            .predict(history, self.total_interactions(), threshold)
    }

    /// Records an answer: updates the learner's ability, appends the
    /// interaction and updates the bandit and half-life rows atomically.
    pub async fn record_outcome(
        &self,
        learner_id: &str,
        item_id: &str,
        is_correct: bool,
    ) -> Result<OutcomeReceipt, EngineError> {
        let learner_lock = self.acquire_learner_lock(learner_id).await;
        let _guard = learner_lock.lock().await;

        let config = self.get_config().await;
        let item = self.store.item(item_id)?.ok_or_else(|| EngineError::NotFound {
            entity: "item",
            id: item_id.to_string(),
        })?;
        let parameters = offline::effective_parameters(&self.store, &item);
        let previous = self.store.get_ability(learner_id)?;
        let theta = irt::update_theta(
            previous.theta,
            parameters.b,
            parameters.a,
            parameters.c,
            is_correct,
            &config.scoring,
        );

        let now = Utc::now();
        let interaction = Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            item_id: item.id.clone(),
            skills: item.skills.clone(),
            is_correct,
            theta_at_time: previous.theta,
            created_at: now,
        };
        let ability = LearnerAbility {
            theta,
            attempts: previous.attempts + 1,
            updated_at: now,
        };
        let recorded = self
            .store
            .record_outcome_atomic(&interaction, &ability, &config.spaced_repetition)?;

        tracing::info!(
            learner_id,
            item_id,
            is_correct,
            previous_theta = previous.theta,
            theta,
            "Outcome recorded"
        );

        Ok(OutcomeReceipt {
            interaction_id: interaction.id,
            previous_theta: previous.theta,
            theta,
            score: irt::score_for(theta, &config.scoring),
            bandit: recorded.bandit,
            review: recorded.review,
        })
    }

    // ---- diagnostics ----

    pub fn ability(&self, learner_id: &str) -> Result<LearnerAbility, EngineError> {
        Ok(self.store.get_ability(learner_id)?)
    }

    pub async fn review_candidates(&self, learner_id: &str) -> Result<Vec<ReviewCandidate>, EngineError> {
        let threshold = self.config.read().await.spaced_repetition.review_threshold;
        let states = self.store.review_states_for_learner(learner_id)?;
        Ok(hlr::review_candidates(
            states.iter().map(|(id, state)| (id.as_str(), state)),
            Utc::now(),
            threshold,
        ))
    }

    pub fn review_report(&self, learner_id: &str) -> Result<Vec<ReviewStatsEntry>, EngineError> {
        let states = self.store.review_states_for_learner(learner_id)?;
        Ok(hlr::review_report(
            states.iter().map(|(id, state)| (id.as_str(), state)),
            Utc::now(),
        ))
    }

    pub fn bandit_report(&self) -> Result<Vec<BanditReportEntry>, EngineError> {
        Ok(self.store.bandit_report()?)
    }

    /// Error-rate mastery against the auto-selected tracer, per skill seen in `history`.
    pub async fn compare_with_rule_based(&self, history: &[Interaction]) -> BTreeMap<String, SkillAgreement> {
        let tolerance = self.config.read().await.knowledge_tracing.agreement_tolerance;
        let estimate = self.predict_mastery(history).await;
        knowledge::compare_with_error_rates(history, &estimate.mastery, tolerance)
    }

    // ---- lifecycle and offline jobs ----

    /// Rebuilds the vocabulary from the item corpus. Returns whether it changed.
    pub async fn refresh_vocabulary(&self) -> Result<bool, EngineError> {
        let config = self.get_config().await;
        let mut slot = self.context.write().await;
        match slot.rebuild(&self.store, &config)? {
            Some(rebuilt) => {
                *slot = Arc::new(rebuilt);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn calibrate_item(&self, item_id: &str) -> Result<ItemCalibration, EngineError> {
        let config = self.get_config().await;
        let store = self.store.clone();
        let item_id = item_id.to_string();
        tokio::task::spawn_blocking(move || offline::calibrate_item(&store, &item_id, &config))
            .await
            .map_err(|e| EngineError::Model(format!("calibration task failed: {e}")))?
    }

    pub async fn calibrate_all_items(&self) -> Result<CalibrationRunSummary, EngineError> {
        let config = self.get_config().await;
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || offline::calibrate_all(&store, &config))
            .await
            .map_err(|e| EngineError::Model(format!("calibration task failed: {e}")))?
    }

    /// Retrains the tracers on a blocking thread, persists their weights and
    /// swaps them into the context. Results are discarded if the vocabulary
    /// changed while training ran.
    pub async fn train_knowledge_models(&self) -> Result<KnowledgeTrainingReport, EngineError> {
        let config = self.get_config().await;
        let context = self.context().await;
        let store = self.store.clone();
        let trained_on = context.clone();

        let trained = tokio::task::spawn_blocking(move || offline::train_models(&store, &trained_on, &config))
            .await
            .map_err(|e| EngineError::Model(format!("training task failed: {e}")))??;

        self.install_trained(&context, trained).await
    }

    /// Persists and swaps in `trained` under the context write lock, unless
    /// the vocabulary is no longer the one it was trained on.
    async fn install_trained(
        &self,
        trained_on: &EngineContext,
        trained: TrainedModels,
    ) -> Result<KnowledgeTrainingReport, EngineError> {
        let mut slot = self.context.write().await;
        if slot.vocabulary() != trained_on.vocabulary() {
            tracing::warn!("Vocabulary changed during training, discarding trained models");
            return Ok(trained.report);
        }

        offline::persist_models(&self.store, &trained)?;
        let next = slot.with_windowed(trained.windowed);
        #[cfg(feature = "neural")]
        let next = match trained.sequence {
            Some(sequence) => next.with_sequence(Some(Arc::new(sequence))),
            None => next,
        };
        *slot = Arc::new(next);
        Ok(trained.report)
    }
}
