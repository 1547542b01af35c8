mod categories;
mod detections;
mod runs;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{migrate::MigrateDatabase, Pool, Row, Sqlite, SqlitePool};
use tracing::info;

use crate::models::DetectionStats;

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        if !Sqlite::database_exists(database_url).await? {
            info!("Creating database: {}", database_url);
            Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePool::connect(database_url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Private database living as long as the returned handle.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn get_stats(&self) -> Result<DetectionStats> {
        let rows = sqlx::query("SELECT kind, COUNT(*) as count FROM detections GROUP BY kind")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = DetectionStats {
            model: 0,
            active: 0,
            user: 0,
            categories: 0,
        };
        for row in rows {
            let kind: String = row.get("kind");
            let count: i64 = row.get("count");
            match kind.as_str() {
                "model" => stats.model = count,
                "active" => stats.active = count,
                "user" => stats.user = count,
                _ => {}
            }
        }

        stats.categories = sqlx::query_scalar("SELECT COUNT(*) FROM categories")
            .fetch_one(&self.pool)
            .await?;

        Ok(stats)
    }
}
