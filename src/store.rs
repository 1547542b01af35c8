//! Persistence seam between the outlier miner and the detection database.

use anyhow::Result;
use std::future::Future;

use crate::models::{Candidate, DetectionKind};

pub trait CategoryStore: Send + Sync {
    /// All `model` detections that carry an embedding.
    fn unreviewed_candidates(&self) -> impl Future<Output = Result<Vec<Candidate>>> + Send;

    /// Moves `ids` from `from` to `to` in one write. Rows whose kind is no
    /// longer `from` are left alone. Returns the number of rows changed.
    fn transition_kind(
        &self,
        ids: &[String],
        from: DetectionKind,
        to: DetectionKind,
    ) -> impl Future<Output = Result<u64>> + Send;
}
