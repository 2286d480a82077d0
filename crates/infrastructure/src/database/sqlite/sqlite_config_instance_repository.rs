use async_trait::async_trait;
use orchestrator_domain::{ConfigInstance, ConfigInstanceKey, ConfigInstanceRepository};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteConfigInstanceRepository {
    pool: SqlitePool,
}

impl SqliteConfigInstanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_config_instance(row: &sqlx::sqlite::SqliteRow) -> OrchestratorResult<ConfigInstance> {
        Ok(ConfigInstance {
            id: row.try_get("id")?,
            biz_id: row.try_get("biz_id")?,
            config_template_id: row.try_get("config_template_id")?,
            config_version_id: row.try_get("config_version_id")?,
            cc_process_id: row.try_get("cc_process_id")?,
            module_inst_seq: row.try_get("module_inst_seq")?,
            generate_task_id: row.try_get("generate_task_id")?,
            md5: row.try_get("md5")?,
            content: row.try_get("content")?,
            tenant_id: row.try_get("tenant_id")?,
            creator: row.try_get("creator")?,
            reviser: row.try_get("reviser")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ConfigInstanceRepository for SqliteConfigInstanceRepository {
    #[instrument(skip(self), fields(biz_id = %biz_id, key = %key))]
    async fn get(
        &self,
        biz_id: u32,
        key: &ConfigInstanceKey,
    ) -> OrchestratorResult<Option<ConfigInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, biz_id, config_template_id, config_version_id, cc_process_id, module_inst_seq,
                   generate_task_id, md5, content, tenant_id, creator, reviser, created_at, updated_at
            FROM config_instances
            WHERE biz_id = $1 AND config_template_id = $2 AND cc_process_id = $3 AND module_inst_seq = $4
            "#,
        )
        .bind(biz_id)
        .bind(key.config_template_id)
        .bind(key.cc_process_id)
        .bind(key.module_inst_seq)
        .fetch_optional(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_config_instance(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, instance), fields(key = %instance.key(), md5 = %instance.md5))]
    async fn upsert(&self, instance: &ConfigInstance) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO config_instances (biz_id, config_template_id, config_version_id, cc_process_id,
                                          module_inst_seq, generate_task_id, md5, content, tenant_id,
                                          creator, reviser, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (cc_process_id, config_template_id, module_inst_seq) DO UPDATE SET
                biz_id = excluded.biz_id,
                config_version_id = excluded.config_version_id,
                generate_task_id = excluded.generate_task_id,
                md5 = excluded.md5,
                content = excluded.content,
                reviser = excluded.reviser,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(instance.biz_id)
        .bind(instance.config_template_id)
        .bind(instance.config_version_id)
        .bind(instance.cc_process_id)
        .bind(instance.module_inst_seq)
        .bind(&instance.generate_task_id)
        .bind(&instance.md5)
        .bind(&instance.content)
        .bind(&instance.tenant_id)
        .bind(&instance.creator)
        .bind(&instance.reviser)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;

        debug!("保存配置实例成功: {}", instance.key());
        Ok(())
    }

    async fn list_by_template(
        &self,
        biz_id: u32,
        config_template_id: u32,
    ) -> OrchestratorResult<Vec<ConfigInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, biz_id, config_template_id, config_version_id, cc_process_id, module_inst_seq,
                   generate_task_id, md5, content, tenant_id, creator, reviser, created_at, updated_at
            FROM config_instances
            WHERE biz_id = $1 AND config_template_id = $2
            ORDER BY cc_process_id, module_inst_seq
            "#,
        )
        .bind(biz_id)
        .bind(config_template_id)
        .fetch_all(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;

        rows.iter().map(Self::row_to_config_instance).collect()
    }
}
