use anyhow::Result;
use chrono::Utc;

use crate::db::Database;
use crate::mining::MiningReport;
use crate::models::MiningRun;

impl Database {
    pub async fn create_mining_run(&self, id: &str, target: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mining_runs (id, target, status, started_at)
            VALUES (?1, ?2, 'running', ?3)
            "#,
        )
        .bind(id)
        .bind(target as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn complete_mining_run(&self, id: &str, report: &MiningReport) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE mining_runs
            SET status = ?2,
                iterations = ?3,
                selected_count = ?4,
                transitioned_count = ?5,
                completed_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(report.outcome.as_str())
        .bind(report.iterations as i64)
        .bind(report.selected.len() as i64)
        .bind(report.transitioned as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fail_mining_run(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE mining_runs
            SET status = 'failed', error = ?2, completed_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Marks runs left `running` by a previous process as interrupted.
    pub async fn interrupt_stale_runs(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE mining_runs
            SET status = 'interrupted', completed_at = ?1
            WHERE status = 'running'
            "#,
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn get_mining_run(&self, id: &str) -> Result<Option<MiningRun>> {
        let run = sqlx::query_as::<_, MiningRun>("SELECT * FROM mining_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(run)
    }

    pub async fn list_mining_runs(&self, limit: i64) -> Result<Vec<MiningRun>> {
        let runs = sqlx::query_as::<_, MiningRun>(
            r#"
            SELECT * FROM mining_runs
            ORDER BY started_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::{MiningOutcome, PartialReason};

    #[tokio::test]
    async fn run_lifecycle_is_recorded() {
        let db = Database::in_memory().await.unwrap();
        db.create_mining_run("run-1", 300).await.unwrap();

        let running = db.get_mining_run("run-1").await.unwrap().unwrap();
        assert_eq!(running.status, "running");
        assert!(running.completed_at.is_none());

        let report = MiningReport {
            selected: vec!["a".into(), "b".into()],
            iterations: 7,
            transitioned: 2,
            outcome: MiningOutcome::Partial {
                reason: PartialReason::IterationLimit,
            },
        };
        db.complete_mining_run("run-1", &report).await.unwrap();

        let done = db.get_mining_run("run-1").await.unwrap().unwrap();
        assert_eq!(done.status, "iteration_limit");
        assert_eq!(done.iterations, 7);
        assert_eq!(done.selected_count, 2);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn stale_runs_are_interrupted() {
        let db = Database::in_memory().await.unwrap();
        db.create_mining_run("run-1", 10).await.unwrap();
        db.create_mining_run("run-2", 10).await.unwrap();
        db.fail_mining_run("run-2", "boom").await.unwrap();

        assert_eq!(db.interrupt_stale_runs().await.unwrap(), 1);
        let runs = db.list_mining_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        let failed = runs.iter().find(|r| r.id == "run-2").unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));
        let interrupted = runs.iter().find(|r| r.id == "run-1").unwrap();
        assert_eq!(interrupted.status, "interrupted");
    }
}
