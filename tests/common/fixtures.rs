use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use assessment_engine::adaptive::{AdaptiveEngine, EngineConfig};
use assessment_engine::store::operations::items::Item;
use assessment_engine::store::Store;

pub struct TestEngine {
    pub engine: AdaptiveEngine,
    pub store: Arc<Store>,
    _temp_dir: TempDir,
}

pub fn item(id: &str, elo: f64, skills: &[&str]) -> Item {
    Item {
        id: id.to_string(),
        question_type: "critical_reasoning".to_string(),
        difficulty_label: "medium".to_string(),
        stimulus: format!("stimulus for {id}"),
        question: format!("question {id}"),
        choices: ["A", "B", "C", "D", "E"].iter().map(|c| c.to_string()).collect(),
        correct_choice: "B".to_string(),
        explanation: "because".to_string(),
        detailed_explanation: None,
        skills: skills.iter().map(|s| s.to_string()).collect(),
        skills_rationale: None,
        label_source: Some("seed".to_string()),
        diagnoses: BTreeMap::new(),
        elo_difficulty: elo,
        discrimination: 1.0,
        guessing: 0.2,
        is_verified: true,
        created_at: Utc::now(),
    }
}

/// Five verified items at elo 1300..=1700, alternating skill tags.
pub fn seed_five_items(store: &Store) -> Vec<Item> {
    let skills: [&[&str]; 5] = [
        &["assumption"],
        &["inference"],
        &["assumption", "flaw"],
        &["weaken"],
        &["inference", "weaken"],
    ];
    [1300.0, 1400.0, 1500.0, 1600.0, 1700.0]
        .into_iter()
        .zip(skills)
        .enumerate()
        .map(|(i, (elo, tags))| {
            let item = item(&format!("q{i}"), elo, tags);
            store.create_item(&item).expect("seed item");
            item
        })
        .collect()
}

/// Opens a fresh store, lets `seed` populate it, then opens the engine.
pub fn spawn_engine(config: EngineConfig, seed: impl FnOnce(&Store)) -> TestEngine {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let sled_path = temp_dir.path().join("assessment-test.sled");
    let store = Arc::new(Store::open(&sled_path.to_string_lossy()).expect("open store"));
    store.run_migrations().expect("migrations");
    seed(&store);
    let engine = AdaptiveEngine::open(store.clone(), config).expect("open engine");
    TestEngine {
        engine,
        store,
        _temp_dir: temp_dir,
    }
}

pub fn seeded(seed: u64) -> EngineConfig {
    EngineConfig {
        random_seed: Some(seed),
        ..EngineConfig::default()
    }
}
