//! Offline batch jobs: knowledge-tracing training and item calibration.
//! Everything here is synchronous and CPU bound; callers run it on a
//! blocking thread.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::adaptive::config::EngineConfig;
use crate::adaptive::context::EngineContext;
use crate::adaptive::error::EngineError;
use crate::adaptive::irt::{self, CalibrationResponse, ItemParameters};
use crate::adaptive::knowledge::windowed::WindowedTrainingSummary;
use crate::adaptive::knowledge::WindowedModel;
use crate::adaptive::types::item_parameters;
use crate::constants::WINDOWED_MODEL_NAME;
use crate::store::operations::calibrations::ItemCalibration;
use crate::store::operations::interactions::Interaction;
use crate::store::operations::items::Item;
use crate::store::Store;

#[cfg(feature = "neural")]
use crate::adaptive::knowledge::sequence::{SequenceModel, SequenceTrainingReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeTrainingReport {
    pub learners: usize,
    pub interactions: usize,
    pub windowed: WindowedTrainingSummary,
    #[cfg(feature = "neural")]
    pub sequence: Option<SequenceTrainingReport>,
}

pub struct TrainedModels {
    pub windowed: WindowedModel,
    #[cfg(feature = "neural")]
    pub sequence: Option<SequenceModel>,
    pub report: KnowledgeTrainingReport,
}

/// Trains both tracers on every learner's log (learners in id order). Nothing
/// is written; see [`persist_models`]. A failed sequence run is logged and
/// skipped; the windowed result is kept.
pub fn train_models(
    store: &Store,
    context: &EngineContext,
    config: &EngineConfig,
) -> Result<TrainedModels, EngineError> {
    let sequences: Vec<Vec<Interaction>> = store.interaction_sequences()?.into_values().collect();
    let interactions = sequences.iter().map(Vec::len).sum();
    let kt = &config.knowledge_tracing;

    let mut windowed = context.tracers().windowed().as_ref().clone();
    let summary = windowed.train(&sequences, kt.windowed_epochs);
    tracing::info!(
        learners = sequences.len(),
        updates = summary.num_updates,
        avg_loss = summary.avg_loss,
        "Windowed knowledge model trained"
    );

    #[cfg(feature = "neural")]
    let (sequence, sequence_report) = match train_sequence(context, config, &sequences) {
        Ok(Some((model, report))) => (Some(model), Some(report)),
        Ok(None) => (None, None),
        Err(e) => {
            tracing::warn!(error = %e, "Sequence model training failed");
            (None, None)
        }
    };

    Ok(TrainedModels {
        windowed,
        #[cfg(feature = "neural")]
        sequence,
        report: KnowledgeTrainingReport {
            learners: sequences.len(),
            interactions,
            windowed: summary,
            #[cfg(feature = "neural")]
            sequence: sequence_report,
        },
    })
}

/// Writes the weights of freshly trained models. Callers must hold the
/// context write lock and have checked the vocabulary they were trained on
/// is still current.
pub fn persist_models(store: &Store, trained: &TrainedModels) -> Result<(), EngineError> {
    store.set_model_weights(WINDOWED_MODEL_NAME, &trained.windowed.export_weights())?;
    #[cfg(feature = "neural")]
    if let Some(sequence) = &trained.sequence {
        store.set_model_weights(
            crate::constants::SEQUENCE_MODEL_NAME,
            &sequence.export_weights()?,
        )?;
    }
    Ok(())
}

#[cfg(feature = "neural")]
fn train_sequence(
    context: &EngineContext,
    config: &EngineConfig,
    sequences: &[Vec<Interaction>],
) -> Result<Option<(SequenceModel, SequenceTrainingReport)>, EngineError> {
    let kt = &config.knowledge_tracing;
    if !kt.neural_enabled || context.vocabulary().is_empty() || sequences.is_empty() {
        return Ok(None);
    }

    let mut model = SequenceModel::new(context.vocabulary().clone(), kt.hidden_size)?;
    let report = model.train(sequences, kt)?;
    tracing::info!(
        epochs = report.epochs_run,
        best_epoch = report.best_epoch,
        val_accuracy = ?report.val_accuracy,
        "Sequence knowledge model trained"
    );
    Ok(Some((model, report)))
}

/// Parameters used for `item`: the latest converged calibration, else as authored.
pub fn effective_parameters(store: &Store, item: &Item) -> ItemParameters {
    match store.get_calibration(&item.id) {
        Ok(Some(cal)) if cal.converged => ItemParameters {
            a: cal.discrimination,
            b: cal.difficulty,
            c: cal.guessing,
        },
        Ok(_) => item_parameters(item),
        Err(e) => {
            tracing::warn!(item_id = %item.id, error = %e, "Failed to load calibration");
            item_parameters(item)
        }
    }
}

/// Fits one item from every recorded response and persists the result.
pub fn calibrate_item(store: &Store, item_id: &str, config: &EngineConfig) -> Result<ItemCalibration, EngineError> {
    let item = store.get_item(item_id)?.ok_or_else(|| EngineError::NotFound {
        entity: "item",
        id: item_id.to_string(),
    })?;
    let responses: Vec<CalibrationResponse> = store
        .interactions_for_item(item_id)?
        .iter()
        .map(|interaction| CalibrationResponse {
            theta: interaction.theta_at_time,
            is_correct: interaction.is_correct,
        })
        .collect();

    let initial = effective_parameters(store, &item);
    let result = irt::calibrate(&responses, initial, &config.calibration);
    let calibration = ItemCalibration {
        item_id: item.id.clone(),
        discrimination: result.parameters.a,
        difficulty: result.parameters.b,
        guessing: result.parameters.c,
        converged: result.converged,
        responses: result.responses,
        calibrated_at: Utc::now(),
    };
    store.set_calibration(&calibration)?;
    tracing::debug!(
        item_id,
        responses = result.responses,
        converged = result.converged,
        iterations = result.iterations,
        "Item calibrated"
    );
    Ok(calibration)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationRunSummary {
    pub items: usize,
    pub converged: usize,
    pub insufficient: usize,
    pub failed: usize,
}

/// Calibrates every item with enough responses. Items below the minimum are
/// counted but not touched; a failing item does not stop the run.
pub fn calibrate_all(store: &Store, config: &EngineConfig) -> Result<CalibrationRunSummary, EngineError> {
    let mut summary = CalibrationRunSummary::default();
    for item in store.list_items()? {
        summary.items += 1;
        let responses = store.interactions_for_item(&item.id)?.len();
        if responses < config.calibration.min_responses {
            summary.insufficient += 1;
            continue;
        }
        match calibrate_item(store, &item.id, config) {
            Ok(calibration) if calibration.converged => summary.converged += 1,
            Ok(_) => {}
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(item_id = %item.id, error = %e, "Item calibration failed");
            }
        }
    }
    Ok(summary)
}
