use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use orchestrator_domain::{AgentTarget, CompareStatus, StepOutcome};
use orchestrator_errors::OrchestratorResult;
use tracing::{debug, info, instrument};

use super::common::{join_target_path, render_file_name_and_path, ConfigExecutorDeps};
use super::scripts;
use crate::traits::{CallbackContext, StepContext, StepExecutor, TaskCallback, TaskCompletion};

/// 目标主机上的文件与最近一次下发内容不一致时的上报信息
pub const CONTENT_INCONSISTENT: &str = "config content inconsistent";

/// 读取目标主机上配置文件的 md5，与配置实例比对
pub struct CheckConfigMd5Executor {
    deps: Arc<ConfigExecutorDeps>,
}

impl CheckConfigMd5Executor {
    pub fn new(deps: Arc<ConfigExecutorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl StepExecutor for CheckConfigMd5Executor {
    #[instrument(skip_all, fields(task_id = %ctx.task_id()))]
    async fn execute(&self, ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
        let payload = ctx.payload().as_check()?.clone();
        let mut common = ctx.get_common_payload()?;
        let process = common.process()?.clone();
        let key = common.instance_key()?;
        let owner = common.config()?.config_file_owner.clone();

        let (file_name, file_path) =
            render_file_name_and_path(self.deps.renderer.as_ref(), &common).await?;
        let target_path = join_target_path(&file_path, &file_name)?;
        let script = scripts::md5_script(&target_path)?;

        let result = self
            .deps
            .run_script(
                AgentTarget::new(&process.agent_id, owner),
                scripts::md5_script_name(Utc::now().timestamp()),
                script,
                ctx.cancellation(),
            )
            .await?;
        let actual_md5 = result.output.trim().to_string();

        let stored = self.deps.config_instances.get(payload.biz_id, &key).await?;
        let status = match stored {
            None => CompareStatus::NeverPublished,
            Some(instance) if instance.md5.eq_ignore_ascii_case(&actual_md5) => {
                CompareStatus::Same
            }
            Some(_) => CompareStatus::Different,
        };
        debug!(
            "配置实例 {} 比对结果: {}, 目标文件 {}",
            key, status, target_path
        );

        let config = common.config_mut()?;
        config.compare_status = status;
        config.config_content_signature = actual_md5;
        ctx.set_common_payload(common);

        Ok(StepOutcome::Completed)
    }
}

/// 内容不一致时读取目标主机上的文件内容，并上报失败
pub struct FetchConfigContentExecutor {
    deps: Arc<ConfigExecutorDeps>,
}

impl FetchConfigContentExecutor {
    pub fn new(deps: Arc<ConfigExecutorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl StepExecutor for FetchConfigContentExecutor {
    #[instrument(skip_all, fields(task_id = %ctx.task_id()))]
    async fn execute(&self, ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
        let mut common = ctx.get_common_payload()?;
        let config = common.config()?;
        if config.compare_status != CompareStatus::Different {
            debug!("比对结果为 {}，跳过读取", config.compare_status);
            return Ok(StepOutcome::Completed);
        }

        let process = common.process()?.clone();
        let owner = config.config_file_owner.clone();
        let (file_name, file_path) =
            render_file_name_and_path(self.deps.renderer.as_ref(), &common).await?;
        let target_path = join_target_path(&file_path, &file_name)?;

        let result = self
            .deps
            .run_script(
                AgentTarget::new(&process.agent_id, owner),
                scripts::cat_script_name(Utc::now().timestamp()),
                scripts::cat_script(&target_path)?,
                ctx.cancellation(),
            )
            .await?;

        common.config_mut()?.config_content = result.output;
        ctx.set_common_payload(common);

        Ok(StepOutcome::Reported(CONTENT_INCONSISTENT.to_string()))
    }
}

/// 检查任务完成回调：累加批次计数
pub struct CheckConfigCallback {
    deps: Arc<ConfigExecutorDeps>,
}

impl CheckConfigCallback {
    pub fn new(deps: Arc<ConfigExecutorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl TaskCallback for CheckConfigCallback {
    async fn on_complete(
        &self,
        ctx: &CallbackContext,
        completion: &TaskCompletion,
    ) -> OrchestratorResult<()> {
        let payload = ctx.payload()?;
        payload.as_check()?;
        let success = completion.is_success();
        info!(
            "配置检查任务 {} 完成: success={}, batch_id={}",
            ctx.task_id,
            success,
            payload.batch_id()
        );
        self.deps.record_batch_result(payload, success).await?;
        Ok(())
    }
}
