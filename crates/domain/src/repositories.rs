//! 领域仓储抽象

use async_trait::async_trait;
use orchestrator_errors::OrchestratorResult;

use crate::entities::{
    ConfigInstance, ConfigInstanceKey, TaskBatch, TaskBatchFilter, TaskBatchStatus,
};

/// 任务批次仓储
///
/// 计数相关的更新必须在存储层原子完成，多个任务的回调会并发调用。
#[async_trait]
pub trait TaskBatchRepository: Send + Sync {
    async fn create(&self, batch: &TaskBatch) -> OrchestratorResult<TaskBatch>;
    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<TaskBatch>>;
    async fn list(&self, filter: &TaskBatchFilter) -> OrchestratorResult<Vec<TaskBatch>>;
    async fn update_status(&self, id: i64, status: TaskBatchStatus) -> OrchestratorResult<()>;
    /// 完成数 +1，并根据 success 累加成功或失败数；全部上报后结算批次状态
    async fn increment_completed_count(&self, id: i64, success: bool)
        -> OrchestratorResult<TaskBatch>;
    /// 任务创建失败时直接计入完成数和失败数
    async fn add_failed_count(&self, id: i64, count: u32) -> OrchestratorResult<TaskBatch>;
    /// 重试前回退失败计数并把批次恢复为运行中
    async fn reset_counts_for_retry(&self, id: i64, retry_count: u32) -> OrchestratorResult<()>;
    async fn has_running_config_push_tasks(
        &self,
        biz_id: u32,
        config_template_ids: &[u32],
    ) -> OrchestratorResult<bool>;
}

/// 配置实例仓储
#[async_trait]
pub trait ConfigInstanceRepository: Send + Sync {
    async fn get(
        &self,
        biz_id: u32,
        key: &ConfigInstanceKey,
    ) -> OrchestratorResult<Option<ConfigInstance>>;
    /// 按 (cc_process_id, config_template_id, module_inst_seq) 覆盖写入
    async fn upsert(&self, instance: &ConfigInstance) -> OrchestratorResult<()>;
    async fn list_by_template(
        &self,
        biz_id: u32,
        config_template_id: u32,
    ) -> OrchestratorResult<Vec<ConfigInstance>>;
}
