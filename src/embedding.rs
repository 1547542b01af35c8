use anyhow::{bail, Result};
use base64::Engine;
use ndarray::ArrayView1;

/// Encodes an embedding as base64 of its little-endian `f32` bytes.
pub fn encode(data: &[f32]) -> String {
    let bytes: Vec<u8> = data.iter().flat_map(|f| f.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode(encoded: &str) -> Result<Vec<f32>> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    if bytes.len() % 4 != 0 {
        bail!("embedding payload of {} bytes is not a whole number of f32 values", bytes.len());
    }
    let floats: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok(floats)
}

pub fn euclidean(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Smallest distance from `point` to any of `others`; `None` when `others` is empty.
pub fn nearest_distance<'a, I>(point: ArrayView1<f32>, others: I) -> Option<f32>
where
    I: IntoIterator<Item = ArrayView1<'a, f32>>,
{
    others
        .into_iter()
        .map(|other| euclidean(point, other))
        .fold(None, |best, d| match best {
            Some(b) if b <= d => Some(b),
            _ => Some(d),
        })
}

/// True when `distance` clears `radius`; an absent distance always does.
pub fn clears_radius(distance: Option<f32>, radius: f32) -> bool {
    distance.map_or(true, |d| d > radius)
}
