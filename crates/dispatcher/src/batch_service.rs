//! 配置批次服务：创建批次、构建任务并交给运行时执行

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use orchestrator_core::WorkerConfig;
use orchestrator_domain::{
    OperateRange, TaskAction, TaskBatch, TaskBatchRepository, TaskBatchStatus,
    TaskExecutionData, TaskObject, UpstreamTaskOutput, TASK_TYPE_CONFIG_GENERATE,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use orchestrator_worker::{TaskReport, TaskRuntime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::builders::{
    build_task, ConfigCheckTaskBuilder, ConfigGenerateTaskBuilder, ConfigPushTaskBuilder,
    ConfigTarget, ConfigTaskOptions, PushDelivery, TaskBuilder,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigTaskMode {
    Check,
    Generate,
}

impl ConfigTaskMode {
    pub fn action(&self) -> TaskAction {
        match self {
            ConfigTaskMode::Check => TaskAction::ConfigCheck,
            ConfigTaskMode::Generate => TaskAction::ConfigGenerate,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigTaskRequest {
    pub biz_id: u32,
    pub operator: String,
    pub environment: String,
    pub targets: Vec<ConfigTarget>,
}

/// 已提交批次的句柄，`join` 在全部任务结束后返回各任务的执行报告
pub struct BatchHandle {
    pub batch_id: i64,
    pub join: JoinHandle<Vec<TaskReport>>,
}

impl BatchHandle {
    pub async fn wait(self) -> OrchestratorResult<Vec<TaskReport>> {
        self.join
            .await
            .map_err(|e| OrchestratorError::Internal(format!("批次 {} 执行异常: {e}", self.batch_id)))
    }
}

pub struct ConfigBatchService {
    task_batches: Arc<dyn TaskBatchRepository>,
    runtime: Arc<TaskRuntime>,
    worker_config: WorkerConfig,
    delivery: PushDelivery,
    shutdown: CancellationToken,
}

impl ConfigBatchService {
    pub fn new(
        task_batches: Arc<dyn TaskBatchRepository>,
        runtime: Arc<TaskRuntime>,
        worker_config: WorkerConfig,
    ) -> Self {
        Self {
            task_batches,
            runtime,
            worker_config,
            delivery: PushDelivery::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_delivery(mut self, delivery: PushDelivery) -> Self {
        self.delivery = delivery;
        self
    }

    /// 取消后所有批次中尚未结束的任务都会停止
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn get_batch(&self, batch_id: i64) -> OrchestratorResult<TaskBatch> {
        self.task_batches
            .get_by_id(batch_id)
            .await?
            .ok_or(OrchestratorError::TaskBatchNotFound { id: batch_id })
    }

    /// 对一组目标发起配置检查或配置生成
    #[instrument(skip(self, request), fields(biz_id = %request.biz_id, targets = request.targets.len()))]
    pub async fn submit_config_tasks(
        &self,
        mode: ConfigTaskMode,
        request: ConfigTaskRequest,
    ) -> OrchestratorResult<BatchHandle> {
        if request.targets.is_empty() {
            return Err(OrchestratorError::validation_error("没有需要操作的配置目标"));
        }

        let action = mode.action();
        let data = TaskExecutionData {
            environment: request.environment.clone(),
            operate_range: operate_range(&request.targets),
            config_template_ids: unique(request.targets.iter().map(|t| t.template.id)),
        };
        let batch = self
            .create_running_batch(
                request.biz_id,
                action,
                &data,
                request.targets.len(),
                &request.operator,
            )
            .await?;

        let options = self.options(request.biz_id, batch.id, action, &request.operator);
        let builders: Vec<Box<dyn TaskBuilder>> = request
            .targets
            .into_iter()
            .map(|target| -> Box<dyn TaskBuilder> {
                match mode {
                    ConfigTaskMode::Check => {
                        Box::new(ConfigCheckTaskBuilder::new(options.clone(), target))
                    }
                    ConfigTaskMode::Generate => {
                        Box::new(ConfigGenerateTaskBuilder::new(options.clone(), target))
                    }
                }
            })
            .collect();

        self.dispatch(batch.id, builders).await
    }

    /// 把一个生成批次中成功的结果下发到目标主机
    #[instrument(skip(self, operator))]
    pub async fn push_config(
        &self,
        source_batch_id: i64,
        operator: &str,
    ) -> OrchestratorResult<BatchHandle> {
        let source = self.get_batch(source_batch_id).await?;
        if source.task_action != TaskAction::ConfigGenerate {
            return Err(OrchestratorError::validation_error(format!(
                "批次 {} 不是配置生成批次: {}",
                source_batch_id, source.task_action
            )));
        }

        let outputs = self
            .runtime
            .history()
            .successful_outputs(&source_batch_id.to_string(), TASK_TYPE_CONFIG_GENERATE)
            .await;
        if outputs.is_empty() {
            return Err(OrchestratorError::validation_error(format!(
                "批次 {source_batch_id} 没有可下发的生成结果"
            )));
        }

        let template_ids = unique(
            outputs
                .iter()
                .filter_map(|o| o.payload.config_payload.as_ref())
                .map(|c| c.config_template_id),
        );
        if self
            .task_batches
            .has_running_config_push_tasks(source.biz_id, &template_ids)
            .await?
        {
            return Err(OrchestratorError::validation_error(format!(
                "配置模板 {template_ids:?} 存在运行中的下发任务"
            )));
        }

        let source_data = source.execution_data()?;
        let data = TaskExecutionData {
            environment: source_data.environment,
            operate_range: source_data.operate_range,
            config_template_ids: template_ids,
        };
        let batch = self
            .create_running_batch(
                source.biz_id,
                TaskAction::ConfigPublish,
                &data,
                outputs.len(),
                operator,
            )
            .await?;

        let options = self.options(source.biz_id, batch.id, TaskAction::ConfigPublish, operator);
        let builders: Vec<Box<dyn TaskBuilder>> = outputs
            .into_iter()
            .map(|upstream: UpstreamTaskOutput| -> Box<dyn TaskBuilder> {
                Box::new(ConfigPushTaskBuilder::new(
                    options.clone(),
                    upstream,
                    self.delivery,
                ))
            })
            .collect();

        self.dispatch(batch.id, builders).await
    }

    async fn create_running_batch(
        &self,
        biz_id: u32,
        action: TaskAction,
        data: &TaskExecutionData,
        total: usize,
        operator: &str,
    ) -> OrchestratorResult<TaskBatch> {
        let total = u32::try_from(total)
            .map_err(|_| OrchestratorError::validation_error(format!("目标数量过多: {total}")))?;
        let mut batch = TaskBatch::new(biz_id, TaskObject::ConfigFile, action, data, total, operator)?;
        batch.status = TaskBatchStatus::Running;
        batch.start_at = Some(Utc::now());

        let created = self.task_batches.create(&batch).await?;
        info!("创建任务批次: {}", created.entity_description());
        Ok(created)
    }

    fn options(
        &self,
        biz_id: u32,
        batch_id: i64,
        action: TaskAction,
        operator: &str,
    ) -> ConfigTaskOptions {
        ConfigTaskOptions::new(biz_id, batch_id, action, operator)
            .with_worker_config(&self.worker_config)
    }

    /// 构建失败的目标直接计入失败数，其余任务在后台执行
    async fn dispatch(
        &self,
        batch_id: i64,
        builders: Vec<Box<dyn TaskBuilder>>,
    ) -> OrchestratorResult<BatchHandle> {
        let mut tasks = Vec::with_capacity(builders.len());
        let mut failed = 0u32;
        for builder in &builders {
            match build_task(builder.as_ref()) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    warn!(
                        "构建任务失败: batch_id={}, task={}, error={}",
                        batch_id,
                        builder.task_info().task_name,
                        e
                    );
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            self.task_batches.add_failed_count(batch_id, failed).await?;
        }

        info!(
            "批次 {} 开始执行: 任务 {} 个, 构建失败 {} 个",
            batch_id,
            tasks.len(),
            failed
        );

        let runtime = self.runtime.clone();
        let cancel = self.shutdown.child_token();
        let join = tokio::spawn(async move { runtime.run_all(tasks, cancel).await });

        Ok(BatchHandle { batch_id, join })
    }
}

fn unique<T: Ord>(values: impl Iterator<Item = T>) -> Vec<T> {
    values.collect::<BTreeSet<_>>().into_iter().collect()
}

fn operate_range(targets: &[ConfigTarget]) -> OperateRange {
    OperateRange {
        set_names: unique(targets.iter().map(|t| t.process.set_name.clone())),
        module_names: unique(targets.iter().map(|t| t.process.module_name.clone())),
        service_names: unique(targets.iter().map(|t| t.process.service_name.clone())),
        process_alias: unique(targets.iter().map(|t| t.process.alias.clone())),
        cc_process_ids: unique(targets.iter().map(|t| t.process.cc_process_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_testing_utils::{
        config_template, process_instance, ProcessBuilder, TemplateRevisionBuilder,
    };

    #[test]
    fn test_operate_range_dedups() {
        let target = |cc: u32, alias: &str| ConfigTarget {
            template: config_template(7, "nginx.conf"),
            revision: TemplateRevisionBuilder::new().build(),
            process: ProcessBuilder::new()
                .with_cc_process_id(cc)
                .with_alias(alias)
                .build(),
            instance: process_instance(1, 1),
        };
        let range = operate_range(&[target(3002, "b"), target(3001, "a"), target(3001, "a")]);
        assert_eq!(range.cc_process_ids, vec![3001, 3002]);
        assert_eq!(range.process_alias, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(range.set_names, vec!["set-a".to_string()]);
    }

    #[test]
    fn test_mode_actions() {
        assert_eq!(ConfigTaskMode::Check.action(), TaskAction::ConfigCheck);
        assert_eq!(ConfigTaskMode::Generate.action(), TaskAction::ConfigGenerate);
    }
}
