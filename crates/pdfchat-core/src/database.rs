use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    pub async fn connect(url: &str, max_size: u32, timeout_seconds: u64) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_size)
            .acquire_timeout(Duration::from_secs(timeout_seconds))
            .connect(url)
            .await?;

        // Test connection
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
