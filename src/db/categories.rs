use anyhow::{bail, Result};
use tracing::info;

use crate::db::Database;
use crate::models::Category;

impl Database {
    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Ok(categories)
    }

    pub async fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let category = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(category)
    }

    /// Returns the category called `name`, creating it first if needed.
    pub async fn add_category(&self, name: &str) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            bail!("category name must not be empty");
        }

        sqlx::query("INSERT INTO categories (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;

        let category = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        Ok(category)
    }

    pub async fn rename_category(&self, id: i64, name: &str) -> Result<Option<Category>> {
        let name = name.trim();
        if name.is_empty() {
            bail!("category name must not be empty");
        }

        let result = sqlx::query("UPDATE categories SET name = ?1 WHERE id = ?2")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_category(id).await
    }

    /// Makes sure every configured category exists; returns how many were added.
    pub async fn sync_categories(&self, names: &[String]) -> Result<usize> {
        let before = self.list_categories().await?.len();
        for name in names.iter().filter(|n| !n.trim().is_empty()) {
            self.add_category(name).await?;
        }
        let added = self.list_categories().await?.len() - before;

        if added > 0 {
            info!("Added {} configured categories", added);
        }
        Ok(added)
    }
}
