//! Density-based clustering (DBSCAN) over rows of an embedding matrix.
//!
//! Clustering itself is done by `petal-clustering`; this module validates the
//! batch and reshapes the crate's cluster map into per-row labels. A point is
//! core when at least `min_samples` points, itself included, lie within `eps`.

use ndarray::ArrayView2;
use petal_clustering::{Dbscan, Fit};

use crate::error::ClusteringError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DbscanParams {
    pub eps: f32,
    pub min_samples: usize,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self {
            eps: 1.0,
            min_samples: 5,
        }
    }
}

/// Result of clustering: per-row labels, plus noise indices in row order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResult {
    /// Cluster id per row, `None` for noise.
    pub labels: Vec<Option<usize>>,
    pub cluster_count: usize,
    pub noise: Vec<usize>,
}

pub fn dbscan(points: ArrayView2<f32>, params: DbscanParams) -> Result<ClusterResult, ClusteringError> {
    if !params.eps.is_finite() || params.eps <= 0.0 {
        return Err(ClusteringError::InvalidParameter(format!(
            "eps must be positive and finite, got {}",
            params.eps
        )));
    }
    if params.min_samples == 0 {
        return Err(ClusteringError::InvalidParameter(
            "min_samples must be >= 1".to_string(),
        ));
    }
    if points.nrows() == 0 {
        return Ok(ClusterResult {
            labels: Vec::new(),
            cluster_count: 0,
            noise: Vec::new(),
        });
    }
    if points.ncols() == 0 {
        return Err(ClusteringError::EmptyEmbedding);
    }
    if let Some(index) = points
        .rows()
        .into_iter()
        .position(|row| row.iter().any(|v| !v.is_finite()))
    {
        return Err(ClusteringError::NonFinite { index });
    }

    let data = points.mapv(f64::from);
    let mut model: Dbscan<f64, _> = Dbscan::default();
    model.eps = f64::from(params.eps);
    model.min_samples = params.min_samples;
    let (clusters, _outliers) = model.fit(&data);

    // Cluster ids come from a hash map; renumber by first member row.
    let mut members: Vec<Vec<usize>> = clusters.into_values().collect();
    for rows in &mut members {
        rows.sort_unstable();
    }
    members.sort_by_key(|rows| rows.first().copied());

    let mut labels: Vec<Option<usize>> = vec![None; points.nrows()];
    for (cluster, rows) in members.iter().enumerate() {
        for &row in rows {
            labels[row] = Some(cluster);
        }
    }

    let noise = labels
        .iter()
        .enumerate()
        .filter_map(|(i, label)| label.is_none().then_some(i))
        .collect();

    Ok(ClusterResult {
        labels,
        cluster_count: members.len(),
        noise,
    })
}
