//! Active-learning sample selection.
//!
//! The miner repeatedly clusters a random batch of the candidate pool and keeps
//! the noise points that lie farther than `diversity_radius` from everything
//! already chosen. Each iteration's new picks are moved from `model` to
//! `active` in a single store write.

pub mod dbscan;
pub mod pool;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::MiningConfig;
use crate::embedding::{clears_radius, nearest_distance};
use crate::error::{ClusteringError, MiningError};
use crate::models::DetectionKind;
use crate::store::CategoryStore;
use dbscan::{dbscan, DbscanParams};
use pool::EmbeddingPool;

/// Shared stop request, honoured between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialReason {
    IterationLimit,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MiningOutcome {
    Complete,
    Partial { reason: PartialReason },
}

impl MiningOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MiningOutcome::Complete => "complete",
            MiningOutcome::Partial {
                reason: PartialReason::IterationLimit,
            } => "iteration_limit",
            MiningOutcome::Partial {
                reason: PartialReason::Cancelled,
            } => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningReport {
    /// Review set in selection order.
    pub selected: Vec<String>,
    pub iterations: usize,
    /// Rows the store actually changed; lower than `selected.len()` when
    /// some candidates were edited elsewhere during the run.
    pub transitioned: u64,
    pub outcome: MiningOutcome,
}

impl MiningReport {
    fn empty() -> Self {
        Self {
            selected: Vec::new(),
            iterations: 0,
            transitioned: 0,
            outcome: MiningOutcome::Complete,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningProgress {
    pub iteration: usize,
    pub noise_points: usize,
    pub newly_selected: usize,
    pub selected: usize,
    pub target: usize,
}

pub struct OutlierMiner {
    config: MiningConfig,
    cancel: CancelFlag,
    progress: Option<mpsc::UnboundedSender<MiningProgress>>,
}

impl OutlierMiner {
    pub fn new(config: MiningConfig) -> Self {
        Self {
            config,
            cancel: CancelFlag::new(),
            progress: None,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<MiningProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Reads the unreviewed pool from `store` and mines it.
    pub async fn mine_store<S: CategoryStore>(
        &self,
        store: &S,
        target: usize,
    ) -> Result<MiningReport, MiningError> {
        if target == 0 {
            return Ok(MiningReport::empty());
        }

        let candidates = store
            .unreviewed_candidates()
            .await
            .map_err(MiningError::StoreRead)?;
        info!("Loaded {} unreviewed candidates", candidates.len());

        let pool = EmbeddingPool::from_candidates(candidates)?;
        self.select_samples(Arc::new(pool), target, store).await
    }

    /// Grows a review set of at least `target` candidates from `pool`.
    pub async fn select_samples<S: CategoryStore>(
        &self,
        pool: Arc<EmbeddingPool>,
        target: usize,
        store: &S,
    ) -> Result<MiningReport, MiningError> {
        if target == 0 {
            return Ok(MiningReport::empty());
        }

        self.config
            .validate()
            .map_err(|e| ClusteringError::InvalidParameter(e.to_string()))?;

        let batch_size = self.config.batch_size;
        if pool.len() < batch_size {
            return Err(MiningError::InsufficientPoolSize {
                available: pool.len(),
                required: batch_size,
            });
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let params = DbscanParams {
            eps: self.config.eps,
            min_samples: self.config.min_samples,
        };
        let radius = self.config.diversity_radius;

        let mut selected: Vec<usize> = Vec::new();
        let mut selected_set: HashSet<usize> = HashSet::new();
        let mut iterations = 0;
        let mut transitioned = 0u64;
        let mut outcome = MiningOutcome::Complete;

        info!(
            "Mining {} review candidates from a pool of {}",
            target,
            pool.len()
        );

        while selected.len() < target {
            if self.cancel.is_cancelled() {
                warn!("Mining cancelled after {} iterations", iterations);
                outcome = MiningOutcome::Partial {
                    reason: PartialReason::Cancelled,
                };
                break;
            }
            if iterations >= self.config.max_iterations {
                warn!(
                    "Mining stopped at iteration limit with {}/{} selected",
                    selected.len(),
                    target
                );
                outcome = MiningOutcome::Partial {
                    reason: PartialReason::IterationLimit,
                };
                break;
            }
            iterations += 1;

            let sample = rand::seq::index::sample(&mut rng, pool.len(), batch_size).into_vec();
            let batch_pool = Arc::clone(&pool);
            let previous = selected.clone();
            let (noise_points, accepted) = tokio::task::spawn_blocking(move || {
                select_batch(&batch_pool, &sample, &previous, params, radius)
            })
            .await??;

            let newly: Vec<usize> = accepted
                .into_iter()
                .filter(|i| !selected_set.contains(i))
                .collect();

            if !newly.is_empty() {
                let ids: Vec<String> = newly.iter().map(|&i| pool.id(i).to_string()).collect();
                let changed = store
                    .transition_kind(&ids, DetectionKind::Model, DetectionKind::Active)
                    .await
                    .map_err(MiningError::StoreWrite)?;
                transitioned += changed;
            }

            selected_set.extend(newly.iter().copied());
            selected.extend(newly.iter().copied());

            debug!(
                "Iteration {}: {} noise points, {} new, {}/{} selected",
                iterations,
                noise_points,
                newly.len(),
                selected.len(),
                target
            );

            if let Some(tx) = &self.progress {
                let _ = tx.send(MiningProgress {
                    iteration: iterations,
                    noise_points,
                    newly_selected: newly.len(),
                    selected: selected.len(),
                    target,
                });
            }
        }

        info!(
            "Mining finished ({}) after {} iterations: {} selected, {} transitioned",
            outcome.as_str(),
            iterations,
            selected.len(),
            transitioned
        );

        Ok(MiningReport {
            selected: selected.iter().map(|&i| pool.id(i).to_string()).collect(),
            iterations,
            transitioned,
            outcome,
        })
    }
}

/// Clusters one sampled batch and returns its noise count and the pool
/// indices of the noise points that clear the diversity radius.
fn select_batch(
    pool: &EmbeddingPool,
    sample: &[usize],
    previous: &[usize],
    params: DbscanParams,
    radius: f32,
) -> Result<(usize, Vec<usize>), ClusteringError> {
    let batch = pool.gather(sample);
    let clusters = dbscan(batch.view(), params)?;

    let mut accepted: Vec<usize> = Vec::new();
    for &local in &clusters.noise {
        let index = sample[local];
        let point = pool.row(index);

        let to_batch = nearest_distance(point, accepted.iter().map(|&a| pool.row(a)));
        if !clears_radius(to_batch, radius) {
            continue;
        }
        let to_selected = nearest_distance(point, previous.iter().map(|&s| pool.row(s)));
        if clears_radius(to_selected, radius) {
            accepted.push(index);
        }
    }

    Ok((clusters.noise.len(), accepted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::euclidean;
    use crate::models::Candidate;
    use crate::store::memory::MemoryStore;

    const POOL_SIZE: usize = 1000;

    fn id(i: usize) -> String {
        format!("det-{:04}", i)
    }

    /// Dense clusters padded around the given isolated points, `POOL_SIZE` rows.
    fn pool_with_outliers(outliers: &[[f32; 2]]) -> Vec<Vec<f32>> {
        let mut rows: Vec<Vec<f32>> = outliers.iter().map(|p| p.to_vec()).collect();
        let mut j = 0;
        while rows.len() < POOL_SIZE {
            let center = (j % 10) as f32 * 10.0;
            let dx = ((j / 10) % 10) as f32 * 0.01;
            let dy = ((j / 100) % 10) as f32 * 0.01;
            rows.push(vec![center + dx, -50.0 + dy]);
            j += 1;
        }
        rows
    }

    fn spaced_outliers(count: usize) -> Vec<[f32; 2]> {
        (0..count).map(|k| [k as f32 * 100.0, 100.0]).collect()
    }

    fn build(rows: Vec<Vec<f32>>) -> (Arc<EmbeddingPool>, MemoryStore) {
        let ids: Vec<String> = (0..rows.len()).map(id).collect();
        let store = MemoryStore::with_ids(ids.clone());
        let pool = EmbeddingPool::from_rows(ids, rows).unwrap();
        (Arc::new(pool), store)
    }

    fn config() -> MiningConfig {
        MiningConfig {
            seed: Some(42),
            ..MiningConfig::default()
        }
    }

    #[tokio::test]
    async fn zero_target_returns_empty_without_store_access() {
        let (pool, store) = build(pool_with_outliers(&spaced_outliers(3)));
        let miner = OutlierMiner::new(config());

        let report = miner.select_samples(pool, 0, &store).await.unwrap();
        assert!(report.selected.is_empty());
        assert_eq!(report.iterations, 0);
        assert!(store.writes().is_empty());

        let report = miner.mine_store(&store, 0).await.unwrap();
        assert!(report.selected.is_empty());
        assert_eq!(store.reads(), 0);
    }

    #[tokio::test]
    async fn pool_smaller_than_batch_is_rejected() {
        let mut rows = pool_with_outliers(&spaced_outliers(3));
        rows.truncate(999);
        let (pool, store) = build(rows);

        let err = OutlierMiner::new(config())
            .select_samples(pool, 10, &store)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MiningError::InsufficientPoolSize {
                available: 999,
                required: 1000
            }
        ));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn reaches_target_and_transitions_each_pick_once() {
        let (pool, store) = build(pool_with_outliers(&spaced_outliers(10)));

        let report = OutlierMiner::new(config())
            .select_samples(pool, 5, &store)
            .await
            .unwrap();

        // The whole batch is evaluated, so the run overshoots to all ten.
        assert_eq!(report.outcome, MiningOutcome::Complete);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.selected.len(), 10);
        assert_eq!(report.transitioned, 10);

        let expected: HashSet<String> = (0..10).map(id).collect();
        let selected: HashSet<String> = report.selected.iter().cloned().collect();
        assert_eq!(selected, expected);

        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 10);
        assert_eq!(store.kind_of(&id(0)), Some(DetectionKind::Active));
        assert_eq!(store.kind_of(&id(500)), Some(DetectionKind::Model));
    }

    #[tokio::test]
    async fn selected_points_respect_diversity_radius() {
        // Pairs 0.5 apart: both members are noise, only one may be kept.
        let mut outliers = Vec::new();
        for k in 0..6 {
            outliers.push([k as f32 * 100.0, 100.0]);
            outliers.push([k as f32 * 100.0 + 0.5, 100.0]);
        }
        let rows = pool_with_outliers(&outliers);
        let (pool, store) = build(rows);

        let report = OutlierMiner::new(config())
            .select_samples(Arc::clone(&pool), 6, &store)
            .await
            .unwrap();
        assert_eq!(report.selected.len(), 6);

        let index_of = |s: &str| s.trim_start_matches("det-").parse::<usize>().unwrap();
        for (a, first) in report.selected.iter().enumerate() {
            for second in &report.selected[a + 1..] {
                let d = euclidean(
                    pool.row(index_of(first.as_str())),
                    pool.row(index_of(second.as_str())),
                );
                assert!(d > 0.7, "{} and {} are {} apart", first, second, d);
            }
        }
    }

    #[tokio::test]
    async fn exhausted_diversity_stops_at_iteration_limit() {
        let (pool, store) = build(pool_with_outliers(&spaced_outliers(3)));
        let miner = OutlierMiner::new(MiningConfig {
            max_iterations: 4,
            ..config()
        });

        let report = miner.select_samples(pool, 10, &store).await.unwrap();
        assert_eq!(
            report.outcome,
            MiningOutcome::Partial {
                reason: PartialReason::IterationLimit
            }
        );
        assert_eq!(report.iterations, 4);
        assert_eq!(report.selected.len(), 3);
        // Later iterations only rediscover selected points and write nothing.
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn store_failure_aborts_without_growing_selection() {
        let (pool, store) = build(pool_with_outliers(&spaced_outliers(4)));
        store.fail_writes();

        let err = OutlierMiner::new(config())
            .select_samples(pool, 2, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, MiningError::StoreWrite(_)));
        assert_eq!(store.kind_of(&id(0)), Some(DetectionKind::Model));
    }

    #[tokio::test]
    async fn later_store_failure_keeps_earlier_transitions() {
        let mut rows = pool_with_outliers(&spaced_outliers(40));
        let padding: Vec<Vec<f32>> = rows[40..80].to_vec();
        rows.extend(padding);
        let (pool, store) = build(rows);
        store.fail_writes_after(1);

        let err = OutlierMiner::new(MiningConfig {
            batch_size: 500,
            ..config()
        })
        .select_samples(pool, 40, &store)
        .await
        .unwrap_err();
        assert!(matches!(err, MiningError::StoreWrite(_)));

        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert!(!writes[0].is_empty());
        assert!(writes[0].len() < 40);
        for i in 0..40 {
            let expected = if writes[0].contains(&id(i)) {
                DetectionKind::Active
            } else {
                DetectionKind::Model
            };
            assert_eq!(store.kind_of(&id(i)), Some(expected));
        }
    }

    #[tokio::test]
    async fn cancelled_run_returns_partial_selection() {
        let (pool, store) = build(pool_with_outliers(&spaced_outliers(4)));
        let miner = OutlierMiner::new(config());
        miner.cancel_flag().cancel();

        let report = miner.select_samples(pool, 2, &store).await.unwrap();
        assert_eq!(
            report.outcome,
            MiningOutcome::Partial {
                reason: PartialReason::Cancelled
            }
        );
        assert_eq!(report.iterations, 0);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn fixed_seed_reproduces_selection() {
        let rows = pool_with_outliers(&spaced_outliers(40));
        let mining = MiningConfig {
            batch_size: 500,
            ..config()
        };

        let (pool_a, store_a) = build(rows.clone());
        let (pool_b, store_b) = build(rows);
        let first = OutlierMiner::new(mining.clone())
            .select_samples(pool_a, 5, &store_a)
            .await
            .unwrap();
        let second = OutlierMiner::new(mining)
            .select_samples(pool_b, 5, &store_b)
            .await
            .unwrap();

        assert_eq!(first.selected, second.selected);
        assert_eq!(store_a.writes(), store_b.writes());
    }

    #[tokio::test]
    async fn progress_is_reported_per_iteration() {
        let (pool, store) = build(pool_with_outliers(&spaced_outliers(2)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let miner = OutlierMiner::new(MiningConfig {
            max_iterations: 2,
            ..config()
        })
        .with_progress(tx);

        miner.select_samples(pool, 5, &store).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.iteration, 1);
        assert_eq!(first.noise_points, 2);
        assert_eq!(first.newly_selected, 2);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.iteration, 2);
        assert_eq!(second.newly_selected, 0);
        assert_eq!(second.selected, 2);
    }

    #[tokio::test]
    async fn mine_store_reads_pool_and_rejects_ragged_embeddings() {
        let candidates = vec![
            Candidate {
                id: "a".into(),
                image_path: "a.jpg".into(),
                embedding: vec![0.0, 1.0],
            },
            Candidate {
                id: "b".into(),
                image_path: "b.jpg".into(),
                embedding: vec![0.0],
            },
        ];
        let store = MemoryStore::new(candidates);

        let err = OutlierMiner::new(config())
            .mine_store(&store, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MiningError::Clustering(ClusteringError::DimensionMismatch { .. })
        ));
        assert_eq!(store.reads(), 1);
        assert!(store.writes().is_empty());
    }
}
