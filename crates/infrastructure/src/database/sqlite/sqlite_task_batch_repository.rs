use async_trait::async_trait;
use chrono::Utc;
use orchestrator_domain::{
    TaskAction, TaskBatch, TaskBatchFilter, TaskBatchRepository, TaskBatchStatus,
    TaskExecutionData,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument, warn};

const SELECT_COLUMNS: &str = "SELECT id, biz_id, tenant_id, task_object, task_action, task_data, status, \
     total_count, completed_count, success_count, failed_count, start_at, end_at, \
     creator, created_at, updated_at FROM task_batches";

pub struct SqliteTaskBatchRepository {
    pool: SqlitePool,
}

impl SqliteTaskBatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task_batch(row: &sqlx::sqlite::SqliteRow) -> OrchestratorResult<TaskBatch> {
        let task_object: String = row.try_get("task_object")?;
        let task_action: String = row.try_get("task_action")?;

        Ok(TaskBatch {
            id: row.try_get("id")?,
            biz_id: row.try_get("biz_id")?,
            tenant_id: row.try_get("tenant_id")?,
            task_object: task_object.parse()?,
            task_action: task_action.parse()?,
            task_data: row.try_get("task_data")?,
            status: row.try_get("status")?,
            total_count: row.try_get("total_count")?,
            completed_count: row.try_get("completed_count")?,
            success_count: row.try_get("success_count")?,
            failed_count: row.try_get("failed_count")?,
            start_at: row.try_get("start_at")?,
            end_at: row.try_get("end_at")?,
            creator: row.try_get("creator")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// 在同一个事务内累加计数并在全部上报后结算状态
    async fn apply_counts(
        &self,
        id: i64,
        completed: u32,
        success: u32,
        failed: u32,
    ) -> OrchestratorResult<TaskBatch> {
        let mut tx = self.pool.begin().await.map_err(OrchestratorError::Database)?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE task_batches
            SET completed_count = completed_count + $1,
                success_count = success_count + $2,
                failed_count = failed_count + $3,
                updated_at = $4
            WHERE id = $5 AND status IN ('pending', 'running')
            "#,
        )
        .bind(completed)
        .bind(success)
        .bind(failed)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(OrchestratorError::Database)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(OrchestratorError::Database)?;
            return Err(self.missing_or_finalized(id).await);
        }

        sqlx::query(
            r#"
            UPDATE task_batches
            SET status = CASE
                    WHEN failed_count = 0 THEN 'success'
                    WHEN success_count = 0 THEN 'failed'
                    ELSE 'partial_success'
                END,
                end_at = $1
            WHERE id = $2 AND total_count > 0 AND completed_count >= total_count
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(OrchestratorError::Database)?;

        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(OrchestratorError::Database)?;
        let batch = Self::row_to_task_batch(&row)?;

        tx.commit().await.map_err(OrchestratorError::Database)?;

        debug!(
            "更新任务批次计数成功: ID {}, {}/{}, 状态 {}",
            id, batch.completed_count, batch.total_count, batch.status
        );
        Ok(batch)
    }

    async fn missing_or_finalized(&self, id: i64) -> OrchestratorError {
        match sqlx::query("SELECT status FROM task_batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(_)) => {
                warn!("任务批次 {} 已结束，忽略计数更新", id);
                OrchestratorError::TaskBatchFinalized { id }
            }
            Ok(None) => OrchestratorError::TaskBatchNotFound { id },
            Err(e) => OrchestratorError::Database(e),
        }
    }
}

#[async_trait]
impl TaskBatchRepository for SqliteTaskBatchRepository {
    #[instrument(skip(self, batch), fields(
        biz_id = %batch.biz_id,
        task_action = %batch.task_action,
        total_count = %batch.total_count,
    ))]
    async fn create(&self, batch: &TaskBatch) -> OrchestratorResult<TaskBatch> {
        batch.validate_create()?;

        let row = sqlx::query(
            r#"
            INSERT INTO task_batches (biz_id, tenant_id, task_object, task_action, task_data, status,
                                      total_count, completed_count, success_count, failed_count,
                                      start_at, end_at, creator, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 0, 0, $8, NULL, $9, $10, $11)
            RETURNING id, biz_id, tenant_id, task_object, task_action, task_data, status,
                      total_count, completed_count, success_count, failed_count, start_at, end_at,
                      creator, created_at, updated_at
            "#,
        )
        .bind(batch.biz_id)
        .bind(&batch.tenant_id)
        .bind(batch.task_object.as_str())
        .bind(batch.task_action.as_str())
        .bind(&batch.task_data)
        .bind(batch.status)
        .bind(batch.total_count)
        .bind(batch.start_at)
        .bind(&batch.creator)
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;

        let created = Self::row_to_task_batch(&row)?;
        debug!("创建任务批次成功: {}", created.entity_description());
        Ok(created)
    }

    #[instrument(skip(self), fields(batch_id = %id))]
    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<TaskBatch>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task_batch(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &TaskBatchFilter) -> OrchestratorResult<Vec<TaskBatch>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
        builder.push(" WHERE 1 = 1");
        if let Some(biz_id) = filter.biz_id {
            builder.push(" AND biz_id = ").push_bind(biz_id);
        }
        if let Some(action) = filter.task_action {
            builder.push(" AND task_action = ").push_bind(action.as_str());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        builder.push(" ORDER BY id DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;

        rows.iter().map(Self::row_to_task_batch).collect()
    }

    #[instrument(skip(self), fields(batch_id = %id, status = %status))]
    async fn update_status(&self, id: i64, status: TaskBatchStatus) -> OrchestratorResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE task_batches
            SET status = $1,
                start_at = CASE WHEN $1 = 'running' AND start_at IS NULL THEN $2 ELSE start_at END,
                end_at = CASE WHEN $1 IN ('success', 'failed', 'partial_success') THEN $2 ELSE end_at END,
                updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::TaskBatchNotFound { id });
        }

        debug!("更新任务批次状态成功: ID {}, 状态 {}", id, status);
        Ok(())
    }

    #[instrument(skip(self), fields(batch_id = %id, success = %success))]
    async fn increment_completed_count(
        &self,
        id: i64,
        success: bool,
    ) -> OrchestratorResult<TaskBatch> {
        if success {
            self.apply_counts(id, 1, 1, 0).await
        } else {
            self.apply_counts(id, 1, 0, 1).await
        }
    }

    #[instrument(skip(self), fields(batch_id = %id, count = %count))]
    async fn add_failed_count(&self, id: i64, count: u32) -> OrchestratorResult<TaskBatch> {
        self.apply_counts(id, count, 0, count).await
    }

    async fn reset_counts_for_retry(&self, id: i64, retry_count: u32) -> OrchestratorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE task_batches
            SET completed_count = MAX(completed_count - $1, 0),
                failed_count = MAX(failed_count - $1, 0),
                status = 'running',
                end_at = NULL,
                updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(retry_count)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::TaskBatchNotFound { id });
        }

        debug!("重置任务批次计数成功: ID {}, 回退 {}", id, retry_count);
        Ok(())
    }

    async fn has_running_config_push_tasks(
        &self,
        biz_id: u32,
        config_template_ids: &[u32],
    ) -> OrchestratorResult<bool> {
        let rows = sqlx::query(
            r#"
            SELECT task_data FROM task_batches
            WHERE biz_id = $1 AND task_action = $2 AND status IN ('pending', 'running')
            "#,
        )
        .bind(biz_id)
        .bind(TaskAction::ConfigPublish.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;

        for row in rows {
            let task_data: String = row.try_get("task_data")?;
            let data = match TaskExecutionData::from_json(&task_data) {
                Ok(data) => data,
                Err(e) => {
                    warn!("解析任务批次数据失败: {}", e);
                    continue;
                }
            };
            if config_template_ids.is_empty()
                || data
                    .config_template_ids
                    .iter()
                    .any(|id| config_template_ids.contains(id))
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::run_migrations;
    use orchestrator_domain::TaskObject;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    async fn setup() -> SqliteTaskBatchRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteTaskBatchRepository::new(pool)
    }

    fn batch(action: TaskAction, total: u32, template_ids: Vec<u32>) -> TaskBatch {
        let data = TaskExecutionData {
            config_template_ids: template_ids,
            ..Default::default()
        };
        TaskBatch::new(2, TaskObject::ConfigFile, action, &data, total, "admin").unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = setup().await;
        let created = repo
            .create(&batch(TaskAction::ConfigCheck, 3, vec![]))
            .await
            .unwrap();
        assert!(created.id > 0);
        assert_eq!(created.status, TaskBatchStatus::Pending);

        let found = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.task_action, TaskAction::ConfigCheck);
        assert_eq!(found.task_object, TaskObject::ConfigFile);
        assert_eq!(found.total_count, 3);
        assert!(repo.get_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_batch() {
        let repo = setup().await;
        let mut invalid = batch(TaskAction::ConfigCheck, 1, vec![]);
        invalid.biz_id = 0;
        assert!(matches!(
            repo.create(&invalid).await,
            Err(OrchestratorError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_counters_settle_partial_success() {
        let repo = setup().await;
        let created = repo
            .create(&batch(TaskAction::ConfigCheck, 3, vec![]))
            .await
            .unwrap();
        repo.update_status(created.id, TaskBatchStatus::Running)
            .await
            .unwrap();

        let b = repo.increment_completed_count(created.id, true).await.unwrap();
        assert_eq!(b.status, TaskBatchStatus::Running);
        assert!(b.start_at.is_some());
        repo.increment_completed_count(created.id, true).await.unwrap();
        let b = repo.increment_completed_count(created.id, false).await.unwrap();

        assert_eq!(b.completed_count, 3);
        assert_eq!(b.success_count, 2);
        assert_eq!(b.failed_count, 1);
        assert_eq!(b.status, TaskBatchStatus::PartialSuccess);
        assert!(b.end_at.is_some());

        assert!(matches!(
            repo.increment_completed_count(created.id, true).await,
            Err(OrchestratorError::TaskBatchFinalized { .. })
        ));
        assert!(matches!(
            repo.increment_completed_count(404, true).await,
            Err(OrchestratorError::TaskBatchNotFound { id: 404 })
        ));
    }

    #[tokio::test]
    async fn test_all_success_and_all_failed() {
        let repo = setup().await;
        let ok = repo
            .create(&batch(TaskAction::ConfigCheck, 1, vec![]))
            .await
            .unwrap();
        let b = repo.increment_completed_count(ok.id, true).await.unwrap();
        assert_eq!(b.status, TaskBatchStatus::Success);

        let bad = repo
            .create(&batch(TaskAction::ConfigCheck, 2, vec![]))
            .await
            .unwrap();
        let b = repo.add_failed_count(bad.id, 2).await.unwrap();
        assert_eq!(b.status, TaskBatchStatus::Failed);
        assert_eq!(b.completed_count, 2);
    }

    #[tokio::test]
    async fn test_zero_total_never_settles() {
        let repo = setup().await;
        let created = repo
            .create(&batch(TaskAction::ConfigCheck, 0, vec![]))
            .await
            .unwrap();
        let b = repo.increment_completed_count(created.id, true).await.unwrap();
        assert_eq!(b.status, TaskBatchStatus::Pending);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_atomic() {
        let repo = Arc::new(setup().await);
        let created = repo
            .create(&batch(TaskAction::ConfigCheck, 20, vec![]))
            .await
            .unwrap();

        let id = created.id;
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.increment_completed_count(id, i % 4 != 0).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let b = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(b.completed_count, 20);
        assert_eq!(b.success_count, 15);
        assert_eq!(b.failed_count, 5);
        assert_eq!(b.status, TaskBatchStatus::PartialSuccess);
    }

    #[tokio::test]
    async fn test_reset_counts_for_retry() {
        let repo = setup().await;
        let created = repo
            .create(&batch(TaskAction::ConfigPublish, 2, vec![7]))
            .await
            .unwrap();
        repo.increment_completed_count(created.id, true).await.unwrap();
        repo.increment_completed_count(created.id, false).await.unwrap();

        repo.reset_counts_for_retry(created.id, 1).await.unwrap();
        let b = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(b.status, TaskBatchStatus::Running);
        assert_eq!(b.completed_count, 1);
        assert_eq!(b.failed_count, 0);
        assert!(b.end_at.is_none());

        let b = repo.increment_completed_count(created.id, true).await.unwrap();
        assert_eq!(b.status, TaskBatchStatus::Success);
    }

    #[tokio::test]
    async fn test_running_push_detection_and_list() {
        let repo = setup().await;
        let push = repo
            .create(&batch(TaskAction::ConfigPublish, 1, vec![7, 8]))
            .await
            .unwrap();
        repo.create(&batch(TaskAction::ConfigCheck, 1, vec![9]))
            .await
            .unwrap();

        assert!(repo.has_running_config_push_tasks(2, &[8]).await.unwrap());
        assert!(!repo.has_running_config_push_tasks(2, &[9]).await.unwrap());
        assert!(!repo.has_running_config_push_tasks(3, &[7]).await.unwrap());

        repo.increment_completed_count(push.id, true).await.unwrap();
        assert!(!repo.has_running_config_push_tasks(2, &[7]).await.unwrap());

        let all = repo.list(&TaskBatchFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].id > all[1].id);

        let pushes = repo
            .list(&TaskBatchFilter {
                task_action: Some(TaskAction::ConfigPublish),
                status: Some(TaskBatchStatus::Success),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(pushes.len(), 1);
    }
}
