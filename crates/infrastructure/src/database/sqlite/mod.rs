pub mod sqlite_config_instance_repository;
pub mod sqlite_task_batch_repository;

pub use sqlite_config_instance_repository::SqliteConfigInstanceRepository;
pub use sqlite_task_batch_repository::SqliteTaskBatchRepository;

use anyhow::Result;
use orchestrator_core::config::DatabaseConfig;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS task_batches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        biz_id INTEGER NOT NULL,
        tenant_id TEXT NOT NULL DEFAULT '',
        task_object TEXT NOT NULL,
        task_action TEXT NOT NULL,
        task_data TEXT NOT NULL,
        status TEXT NOT NULL,
        total_count INTEGER NOT NULL DEFAULT 0,
        completed_count INTEGER NOT NULL DEFAULT 0,
        success_count INTEGER NOT NULL DEFAULT 0,
        failed_count INTEGER NOT NULL DEFAULT 0,
        start_at TIMESTAMP,
        end_at TIMESTAMP,
        creator TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_task_batches_biz_action_status ON task_batches (biz_id, task_action, status)",
    r#"
    CREATE TABLE IF NOT EXISTS config_instances (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        biz_id INTEGER NOT NULL,
        config_template_id INTEGER NOT NULL,
        config_version_id INTEGER NOT NULL,
        cc_process_id INTEGER NOT NULL,
        module_inst_seq INTEGER NOT NULL,
        generate_task_id TEXT NOT NULL DEFAULT '',
        md5 TEXT NOT NULL,
        content TEXT NOT NULL,
        tenant_id TEXT NOT NULL DEFAULT '',
        creator TEXT NOT NULL DEFAULT '',
        reviser TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        UNIQUE (cc_process_id, config_template_id, module_inst_seq)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_config_instances_biz_template ON config_instances (biz_id, config_template_id)",
];

/// 建表，可重复执行
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800)) // 30分钟默认生命周期
            .connect(&config.url)
            .await?;

        info!("数据库连接池已创建: {}", config.url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        run_migrations(&self.pool).await?;
        info!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manager_migrate_is_idempotent() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        manager.migrate().await.unwrap();
        manager.health_check().await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM task_batches")
            .fetch_one(manager.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
        manager.close().await;
    }
}
