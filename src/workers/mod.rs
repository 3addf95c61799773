pub mod item_calibration;
pub mod knowledge_training;
pub mod vocabulary_refresh;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::adaptive::AdaptiveEngine;
use crate::config::WorkerConfig;

/// Timeout for individual worker invocations (30 minutes; training is slow).
const WORKER_TIMEOUT: Duration = Duration::from_secs(1800);

/// Drain period before scheduler shutdown to let in-flight tasks complete.
#[cfg(test)]
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);
#[cfg(not(test))]
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 所有 worker 的枚举，编译期保证完整性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerName {
    VocabularyRefresh,
    ItemCalibration,
    KnowledgeTraining,
}

impl WorkerName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VocabularyRefresh => "vocabulary_refresh",
            Self::ItemCalibration => "item_calibration",
            Self::KnowledgeTraining => "knowledge_training",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: WorkerName,
    pub cron: &'static str,
    pub enabled: bool,
}

pub struct WorkerManager {
    engine: Arc<AdaptiveEngine>,
    shutdown_rx: broadcast::Receiver<()>,
    config: WorkerConfig,
}

impl WorkerManager {
    pub fn new(
        engine: Arc<AdaptiveEngine>,
        shutdown_rx: broadcast::Receiver<()>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            engine,
            shutdown_rx,
            config: config.clone(),
        }
    }

    /// Single source of truth for all planned jobs and their cron schedules.
    pub fn planned_jobs(&self) -> Vec<JobSpec> {
        if !self.config.is_leader {
            return Vec::new();
        }

        vec![
            // 词表刷新先于训练，训练总是基于最新词表
            JobSpec {
                name: WorkerName::VocabularyRefresh,
                cron: "0 0 * * * *",
                enabled: true,
            },
            JobSpec {
                name: WorkerName::ItemCalibration,
                cron: "0 0 2 * * *",
                enabled: self.config.enable_item_calibration,
            },
            JobSpec {
                name: WorkerName::KnowledgeTraining,
                cron: "0 30 3 * * *",
                enabled: self.config.enable_knowledge_training,
            },
        ]
    }

    /// Start the worker scheduler. Returns an error if the scheduler cannot be created or started.
    pub async fn start(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.config.is_leader {
            tracing::info!("Worker leader disabled; skipping worker startup");
            return Ok(());
        }

        let mut scheduler = JobScheduler::new().await?;

        self.register_jobs(&scheduler).await;

        scheduler.start().await?;

        tracing::info!("Worker manager started");
        let _ = self.shutdown_rx.recv().await;

        tracing::info!(
            "Worker manager shutting down, draining for {}s",
            DRAIN_TIMEOUT.as_secs()
        );
        tokio::time::sleep(DRAIN_TIMEOUT).await;
        let _ = scheduler.shutdown().await;
        Ok(())
    }

    async fn register_jobs(&self, scheduler: &JobScheduler) {
        for spec in &self.planned_jobs() {
            if !spec.enabled {
                tracing::info!(name = spec.name.as_str(), "Skipping disabled worker");
                continue;
            }

            let engine = self.engine.clone();
            let name_str = spec.name.as_str();

            match spec.name {
                WorkerName::VocabularyRefresh => {
                    add_job(scheduler, spec.cron, name_str, move || {
                        let engine = engine.clone();
                        async move {
                            vocabulary_refresh::run(&engine).await;
                        }
                    })
                    .await;
                }
                WorkerName::ItemCalibration => {
                    add_job(scheduler, spec.cron, name_str, move || {
                        let engine = engine.clone();
                        async move {
                            item_calibration::run(&engine).await;
                        }
                    })
                    .await;
                }
                WorkerName::KnowledgeTraining => {
                    add_job(scheduler, spec.cron, name_str, move || {
                        let engine = engine.clone();
                        async move {
                            knowledge_training::run(&engine).await;
                        }
                    })
                    .await;
                }
            }
            tracing::info!(name = name_str, cron = spec.cron, "Registered worker");
        }
    }
}

/// Add a job to the scheduler with an overlap guard and timeout wrapper.
async fn add_job<Fut, F>(scheduler: &JobScheduler, cron: &str, name: &'static str, mut run: F)
where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(false));

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let guard = running.clone();

        if guard
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(
                worker = name,
                "Skipping worker invocation: previous run still in progress"
            );
            return Box::pin(async {});
        }

        let fut = run();
        Box::pin(async move {
            if tokio::time::timeout(WORKER_TIMEOUT, fut).await.is_err() {
                tracing::error!(
                    worker = name,
                    timeout_secs = WORKER_TIMEOUT.as_secs(),
                    "Worker timed out"
                );
            }
            guard.store(false, Ordering::SeqCst);
        })
    });

    match job {
        Ok(job) => {
            if let Err(err) = scheduler.add(job).await {
                tracing::error!(error=%err, cron, worker = name, "Failed to add worker job");
            }
        }
        Err(err) => tracing::error!(error=%err, cron, worker = name, "Failed to create worker job"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast;

    use crate::adaptive::{AdaptiveEngine, EngineConfig};
    use crate::store::Store;

    use super::*;

    fn worker_config(is_leader: bool) -> WorkerConfig {
        WorkerConfig {
            is_leader,
            enable_knowledge_training: true,
            enable_item_calibration: true,
        }
    }

    fn engine(tmp: &tempfile::TempDir) -> Arc<AdaptiveEngine> {
        let store = Arc::new(Store::open(tmp.path().join("worker_test.sled").to_str().unwrap()).unwrap());
        Arc::new(AdaptiveEngine::open(store, EngineConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn leader_switch_controls_job_registration() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (tx, _) = broadcast::channel(2);

        let manager = WorkerManager::new(engine(&tmp), tx.subscribe(), &worker_config(false));
        assert!(manager.planned_jobs().is_empty());
    }

    #[tokio::test]
    async fn shutdown_path_is_non_panicking() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (tx, _) = broadcast::channel(2);

        let manager = WorkerManager::new(engine(&tmp), tx.subscribe(), &worker_config(false));
        manager
            .start()
            .await
            .expect("non-leader start should succeed");
    }

    #[tokio::test]
    async fn toggles_disable_offline_jobs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (tx, _) = broadcast::channel(2);

        let mut cfg = worker_config(true);
        cfg.enable_knowledge_training = false;
        cfg.enable_item_calibration = false;

        let manager = WorkerManager::new(engine(&tmp), tx.subscribe(), &cfg);
        let jobs = manager.planned_jobs();
        assert_eq!(jobs.len(), 3);
        for job in &jobs {
            let expected = job.name == WorkerName::VocabularyRefresh;
            assert_eq!(job.enabled, expected, "{:?}", job.name);
        }
    }

    #[tokio::test]
    async fn planned_cron_expressions_parse() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (tx, _) = broadcast::channel(2);

        let manager = WorkerManager::new(engine(&tmp), tx.subscribe(), &worker_config(true));
        for spec in manager.planned_jobs() {
            assert!(!spec.name.as_str().is_empty());
            assert!(
                Job::new_async(spec.cron, |_, _| Box::pin(async {})).is_ok(),
                "{} has an invalid cron",
                spec.name.as_str()
            );
        }
    }
}
