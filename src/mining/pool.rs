use ndarray::{Array2, ArrayView1, Axis};

use crate::error::ClusteringError;
use crate::models::Candidate;

/// Embeddings of one mining run, row `i` belonging to `ids[i]`.
#[derive(Debug, Clone)]
pub struct EmbeddingPool {
    ids: Vec<String>,
    embeddings: Array2<f32>,
}

impl EmbeddingPool {
    pub fn new(ids: Vec<String>, embeddings: Array2<f32>) -> Result<Self, ClusteringError> {
        if ids.len() != embeddings.nrows() {
            return Err(ClusteringError::LengthMismatch {
                ids: ids.len(),
                embeddings: embeddings.nrows(),
            });
        }
        if embeddings.nrows() > 0 && embeddings.ncols() == 0 {
            return Err(ClusteringError::EmptyEmbedding);
        }
        Ok(Self { ids, embeddings })
    }

    /// Builds the pool from ragged rows, rejecting rows whose dimension differs
    /// from the first one.
    pub fn from_rows(ids: Vec<String>, rows: Vec<Vec<f32>>) -> Result<Self, ClusteringError> {
        if ids.len() != rows.len() {
            return Err(ClusteringError::LengthMismatch {
                ids: ids.len(),
                embeddings: rows.len(),
            });
        }

        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        if !rows.is_empty() && dim == 0 {
            return Err(ClusteringError::EmptyEmbedding);
        }
        if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(ClusteringError::DimensionMismatch {
                index,
                expected: dim,
                found: row.len(),
            });
        }

        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let embeddings = Array2::from_shape_vec((ids.len(), dim), flat).map_err(|e| {
            ClusteringError::InvalidParameter(format!("cannot shape embedding matrix: {}", e))
        })?;
        Self::new(ids, embeddings)
    }

    pub fn from_candidates(candidates: Vec<Candidate>) -> Result<Self, ClusteringError> {
        let (ids, rows): (Vec<String>, Vec<Vec<f32>>) =
            candidates.into_iter().map(|c| (c.id, c.embedding)).unzip();
        Self::from_rows(ids, rows)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.embeddings.ncols()
    }

    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.embeddings.row(index)
    }

    /// Copies the given rows into a new matrix, in the given order.
    pub fn gather(&self, indices: &[usize]) -> Array2<f32> {
        self.embeddings.select(Axis(0), indices)
    }
}
