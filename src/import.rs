//! Loads detector output (detections plus embeddings) into the database.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::db::Database;
use crate::models::NewDetection;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DetectionFile {
    List(Vec<NewDetection>),
    Wrapped { detections: Vec<NewDetection> },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportStats {
    pub files_read: usize,
    pub detections_imported: usize,
    pub errors: usize,
}

pub async fn import_file(db: &Database, path: &Path) -> Result<usize> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let detections = match serde_json::from_str::<DetectionFile>(&contents)
        .with_context(|| format!("{} is not a detection file", path.display()))?
    {
        DetectionFile::List(list) => list,
        DetectionFile::Wrapped { detections } => detections,
    };

    for detection in &detections {
        db.insert_detection(detection).await?;
    }

    info!("Imported {} detections from {}", detections.len(), path.display());
    Ok(detections.len())
}

/// Imports `path`, or every `.json` file below it when it is a directory.
/// Unreadable files are counted and skipped.
pub async fn import_path(db: &Database, path: &Path) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    let files: Vec<_> = if path.is_dir() {
        WalkDir::new(path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .map_or(false, |ext| ext.eq_ignore_ascii_case("json"))
            })
            .map(|e| e.into_path())
            .collect()
    } else {
        vec![path.to_path_buf()]
    };

    for file in files {
        match import_file(db, &file).await {
            Ok(count) => {
                stats.files_read += 1;
                stats.detections_imported += count;
            }
            Err(e) => {
                warn!("Skipping {}: {:#}", file.display(), e);
                stats.errors += 1;
            }
        }
    }

    Ok(stats)
}
