use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, warn};

use crate::db::Database;
use crate::embedding;
use crate::models::{Candidate, Detection, DetectionKind, LabelAssignment, NewDetection};
use crate::store::CategoryStore;

/// Identifiers bound per UPDATE, kept under SQLite's host parameter limit.
const MAX_IDS_PER_STATEMENT: usize = 500;

impl Database {
    /// Inserts or refreshes a detection. An existing row keeps its kind and label.
    pub async fn insert_detection(&self, detection: &NewDetection) -> Result<()> {
        let category_id = match &detection.category {
            Some(name) => Some(self.add_category(name).await?.id),
            None => None,
        };
        let embedding = detection.embedding.as_deref().map(embedding::encode);
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO detections (
                id, image_path, category_id, kind,
                bbox_x, bbox_y, bbox_w, bbox_h, confidence,
                embedding, created_at, updated_at
            ) VALUES (?1, ?2, ?3, 'model', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            ON CONFLICT(id) DO UPDATE SET
                image_path = excluded.image_path,
                category_id = COALESCE(detections.category_id, excluded.category_id),
                bbox_x = excluded.bbox_x,
                bbox_y = excluded.bbox_y,
                bbox_w = excluded.bbox_w,
                bbox_h = excluded.bbox_h,
                confidence = excluded.confidence,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&detection.id)
        .bind(&detection.image_path)
        .bind(category_id)
        .bind(detection.bbox.map(|b| b.x))
        .bind(detection.bbox.map(|b| b.y))
        .bind(detection.bbox.map(|b| b.w))
        .bind(detection.bbox.map(|b| b.h))
        .bind(detection.confidence)
        .bind(embedding)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_detection(&self, id: &str) -> Result<Option<Detection>> {
        let detection = sqlx::query_as::<_, Detection>("SELECT * FROM detections WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(detection)
    }

    pub async fn list_detections(
        &self,
        kind: DetectionKind,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Detection>> {
        let detections = sqlx::query_as::<_, Detection>(
            r#"
            SELECT * FROM detections
            WHERE kind = ?1
            ORDER BY updated_at DESC, id
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(kind.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(detections)
    }

    /// Stores reviewer labels; every listed detection becomes `user`.
    pub async fn confirm_labels(&self, labels: &[LabelAssignment]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut confirmed = 0;

        for label in labels {
            let result = sqlx::query(
                r#"
                UPDATE detections
                SET category_id = ?1, kind = 'user', updated_at = ?2
                WHERE id = ?3
                "#,
            )
            .bind(label.category_id)
            .bind(now)
            .bind(&label.detection_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to label detection {}", label.detection_id))?;

            if result.rows_affected() == 0 {
                warn!("Unknown detection {} in confirmation", label.detection_id);
            }
            confirmed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(confirmed)
    }
}

impl CategoryStore for Database {
    async fn unreviewed_candidates(&self) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, image_path, embedding FROM detections
            WHERE kind = 'model' AND embedding IS NOT NULL
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<Candidate> {
                let id: String = row.get("id");
                let encoded: String = row.get("embedding");
                let embedding = embedding::decode(&encoded)
                    .with_context(|| format!("corrupt embedding for detection {}", id))?;
                Ok(Candidate {
                    image_path: row.get("image_path"),
                    id,
                    embedding,
                })
            })
            .collect()
    }

    async fn transition_kind(
        &self,
        ids: &[String],
        from: DetectionKind,
        to: DetectionKind,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;

        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let mut query = QueryBuilder::<Sqlite>::new("UPDATE detections SET kind = ");
            query
                .push_bind(to.as_str())
                .push(", updated_at = ")
                .push_bind(now)
                .push(" WHERE kind = ")
                .push_bind(from.as_str())
                .push(" AND id IN (");
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");

            changed += query.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(
            "Moved {}/{} detections from {} to {}",
            changed,
            ids.len(),
            from.as_str(),
            to.as_str()
        );
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;

    fn detection(id: &str, embedding: Option<Vec<f32>>) -> NewDetection {
        NewDetection {
            id: id.to_string(),
            image_path: format!("crops/{}.jpg", id),
            bbox: Some(BoundingBox {
                x: 0.1,
                y: 0.2,
                w: 0.3,
                h: 0.4,
            }),
            confidence: Some(0.8),
            category: None,
            embedding,
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn candidates_are_model_detections_with_embeddings() {
        let db = Database::in_memory().await.unwrap();
        db.insert_detection(&detection("a", Some(vec![1.0, 2.0]))).await.unwrap();
        db.insert_detection(&detection("b", None)).await.unwrap();
        db.insert_detection(&detection("c", Some(vec![3.0, 4.0]))).await.unwrap();
        db.transition_kind(&ids(&["c"]), DetectionKind::Model, DetectionKind::Active)
            .await
            .unwrap();

        let candidates = db.unreviewed_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "a");
        assert_eq!(candidates[0].embedding, vec![1.0, 2.0]);
        assert_eq!(candidates[0].image_path, "crops/a.jpg");
    }

    #[tokio::test]
    async fn repeated_transition_is_a_no_op() {
        let db = Database::in_memory().await.unwrap();
        for id in ["a", "b", "c"] {
            db.insert_detection(&detection(id, Some(vec![0.0]))).await.unwrap();
        }
        let batch = ids(&["a", "b"]);

        let first = db
            .transition_kind(&batch, DetectionKind::Model, DetectionKind::Active)
            .await
            .unwrap();
        let second = db
            .transition_kind(&batch, DetectionKind::Model, DetectionKind::Active)
            .await
            .unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 0);
        let c = db.get_detection("c").await.unwrap().unwrap();
        assert_eq!(c.kind, "model");
    }

    #[tokio::test]
    async fn transition_skips_rows_edited_elsewhere() {
        let db = Database::in_memory().await.unwrap();
        for id in ["a", "b"] {
            db.insert_detection(&detection(id, Some(vec![0.0]))).await.unwrap();
        }
        let zebra = db.add_category("zebra").await.unwrap();
        db.confirm_labels(&[LabelAssignment {
            detection_id: "a".into(),
            category_id: zebra.id,
        }])
        .await
        .unwrap();

        let changed = db
            .transition_kind(&ids(&["a", "b"]), DetectionKind::Model, DetectionKind::Active)
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(db.get_detection("a").await.unwrap().unwrap().kind, "user");
        assert_eq!(db.get_detection("b").await.unwrap().unwrap().kind, "active");
    }

    #[tokio::test]
    async fn transition_handles_more_ids_than_one_statement() {
        let db = Database::in_memory().await.unwrap();
        let all: Vec<String> = (0..1200).map(|i| format!("d{}", i)).collect();
        for id in &all {
            db.insert_detection(&detection(id, Some(vec![0.0]))).await.unwrap();
        }

        let changed = db
            .transition_kind(&all, DetectionKind::Model, DetectionKind::Active)
            .await
            .unwrap();
        assert_eq!(changed, 1200);
        assert!(db.unreviewed_candidates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reimport_keeps_review_state() {
        let db = Database::in_memory().await.unwrap();
        db.insert_detection(&detection("a", Some(vec![0.0]))).await.unwrap();
        db.transition_kind(&ids(&["a"]), DetectionKind::Model, DetectionKind::Active)
            .await
            .unwrap();

        db.insert_detection(&detection("a", Some(vec![5.0]))).await.unwrap();
        let a = db.get_detection("a").await.unwrap().unwrap();
        assert_eq!(a.kind, "active");
        assert_eq!(embedding::decode(a.embedding.as_deref().unwrap()).unwrap(), vec![5.0]);
    }

    #[tokio::test]
    async fn list_detections_pages_by_kind() {
        let db = Database::in_memory().await.unwrap();
        for i in 0..5 {
            db.insert_detection(&detection(&format!("d{}", i), None)).await.unwrap();
        }
        db.transition_kind(&ids(&["d0"]), DetectionKind::Model, DetectionKind::Active)
            .await
            .unwrap();

        let model = db.list_detections(DetectionKind::Model, 3, 0).await.unwrap();
        assert_eq!(model.len(), 3);
        let rest = db.list_detections(DetectionKind::Model, 3, 3).await.unwrap();
        assert_eq!(rest.len(), 1);
        let active = db.list_detections(DetectionKind::Active, 10, 0).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "d0");
        assert_eq!(active[0].bbox_w, Some(0.3));
    }

    #[tokio::test]
    async fn confirm_labels_sets_category_and_kind() {
        let db = Database::in_memory().await.unwrap();
        db.insert_detection(&detection("a", None)).await.unwrap();
        let gazelle = db.add_category("gazelle").await.unwrap();

        let confirmed = db
            .confirm_labels(&[
                LabelAssignment {
                    detection_id: "a".into(),
                    category_id: gazelle.id,
                },
                LabelAssignment {
                    detection_id: "missing".into(),
                    category_id: gazelle.id,
                },
            ])
            .await
            .unwrap();

        assert_eq!(confirmed, 1);
        let a = db.get_detection("a").await.unwrap().unwrap();
        assert_eq!(a.kind, "user");
        assert_eq!(a.category_id, Some(gazelle.id));
    }
}
