//! Background mining runs ("start learning") over the stored candidate pool.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::api::metrics;
use crate::config::MiningConfig;
use crate::db::Database;
use crate::error::MiningError;
use crate::mining::{CancelFlag, MiningOutcome, MiningProgress, MiningReport, OutlierMiner};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LearningEvent {
    Started {
        run_id: String,
        target: usize,
    },
    Progress {
        run_id: String,
        #[serde(flatten)]
        progress: MiningProgress,
    },
    Finished {
        run_id: String,
        outcome: MiningOutcome,
        selected: usize,
        iterations: usize,
    },
    Failed {
        run_id: String,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("mining run {0} is already in progress")]
    AlreadyRunning(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct RunHandle {
    pub run_id: String,
    pub task: JoinHandle<Result<MiningReport, MiningError>>,
}

struct ActiveRun {
    id: String,
    cancel: CancelFlag,
}

struct Inner {
    db: Database,
    config: MiningConfig,
    active: Mutex<Option<ActiveRun>>,
    events: broadcast::Sender<LearningEvent>,
}

/// Runs at most one outlier mining job at a time.
#[derive(Clone)]
pub struct LearningService {
    inner: Arc<Inner>,
}

impl LearningService {
    pub fn new(db: Database, config: MiningConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                db,
                config,
                active: Mutex::new(None),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LearningEvent> {
        self.inner.events.subscribe()
    }

    pub fn active_run(&self) -> Option<String> {
        self.lock_active().as_ref().map(|run| run.id.clone())
    }

    /// Requests cancellation of the active run; returns its id.
    pub fn cancel(&self) -> Option<String> {
        self.lock_active().as_ref().map(|run| {
            info!("Cancelling mining run {}", run.id);
            run.cancel.cancel();
            run.id.clone()
        })
    }

    /// Spawns a mining run for `target` picks (configured target by default).
    pub async fn start(&self, target: Option<usize>) -> Result<RunHandle, StartError> {
        let target = target.unwrap_or(self.inner.config.target);
        let run_id = Uuid::new_v4().to_string();
        let cancel = CancelFlag::new();

        {
            let mut active = self.lock_active();
            if let Some(run) = active.as_ref() {
                return Err(StartError::AlreadyRunning(run.id.clone()));
            }
            *active = Some(ActiveRun {
                id: run_id.clone(),
                cancel: cancel.clone(),
            });
        }

        let reservation = Reservation {
            service: self,
            run_id: &run_id,
            armed: true,
        };
        self.inner.db.create_mining_run(&run_id, target).await?;

        info!("Starting mining run {} (target {})", run_id, target);
        let _ = self.inner.events.send(LearningEvent::Started {
            run_id: run_id.clone(),
            target,
        });

        let service = self.clone();
        let id = run_id.clone();
        let task = tokio::spawn(async move { service.run(id, target, cancel).await });
        reservation.disarm();

        Ok(RunHandle { run_id, task })
    }

    async fn run(
        self,
        run_id: String,
        target: usize,
        cancel: CancelFlag,
    ) -> Result<MiningReport, MiningError> {
        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel::<MiningProgress>();

        let events = self.inner.events.clone();
        let progress_id = run_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                metrics::record_mining_iteration(progress.newly_selected as u64);
                let _ = events.send(LearningEvent::Progress {
                    run_id: progress_id.clone(),
                    progress,
                });
            }
        });

        let miner = OutlierMiner::new(self.inner.config.clone())
            .with_cancel_flag(cancel)
            .with_progress(tx);
        let result = miner.mine_store(&self.inner.db, target).await;
        drop(miner);
        let _ = forwarder.await;

        metrics::record_mining_duration(started.elapsed().as_secs_f64());

        let result = match result {
            Ok(report) => {
                metrics::record_mining_run(report.outcome.as_str());
                if let Err(e) = self.inner.db.complete_mining_run(&run_id, &report).await {
                    error!("Failed to record mining run {}: {}", run_id, e);
                }
                let _ = self.inner.events.send(LearningEvent::Finished {
                    run_id: run_id.clone(),
                    outcome: report.outcome,
                    selected: report.selected.len(),
                    iterations: report.iterations,
                });
                Ok(report)
            }
            Err(e) => {
                let message = e.to_string();
                error!("Mining run {} failed: {}", run_id, message);
                metrics::record_mining_run("failed");
                if let Err(db_err) = self.inner.db.fail_mining_run(&run_id, &message).await {
                    error!("Failed to record mining run {}: {}", run_id, db_err);
                }
                let _ = self.inner.events.send(LearningEvent::Failed {
                    run_id: run_id.clone(),
                    message,
                });
                Err(e)
            }
        };

        self.clear_active(&run_id);
        result
    }

    fn clear_active(&self, run_id: &str) {
        let mut active = self.lock_active();
        if active.as_ref().map_or(false, |run| run.id == run_id) {
            *active = None;
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Holds the active-run slot for a run that has not been spawned yet and
/// releases it if `start` returns early or is dropped.
struct Reservation<'a> {
    service: &'a LearningService,
    run_id: &'a str,
    armed: bool,
}

impl Reservation<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.service.clear_active(self.run_id);
        }
    }
}
