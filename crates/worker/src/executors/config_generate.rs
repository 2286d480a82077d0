use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_domain::{
    build_process_context, needs_help, ContentScope, ProcessContextParams, StepOutcome,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tracing::{debug, info, instrument};

use super::common::{sha256_hex, ConfigExecutorDeps};
use crate::traits::{CallbackContext, StepContext, StepExecutor, TaskCallback, TaskCompletion};

/// 下载模板正文并按目标进程实例渲染
pub struct GenerateConfigExecutor {
    deps: Arc<ConfigExecutorDeps>,
}

impl GenerateConfigExecutor {
    pub fn new(deps: Arc<ConfigExecutorDeps>) -> Self {
        Self { deps }
    }

    async fn download_template(
        &self,
        biz_id: u32,
        template_space_id: u32,
        signature: &str,
    ) -> OrchestratorResult<String> {
        if signature.is_empty() {
            return Ok(String::new());
        }
        let scope = ContentScope {
            biz_id,
            template_space_id,
        };
        let bytes = self.deps.content.download(&scope, signature).await?;
        String::from_utf8(bytes).map_err(|e| {
            OrchestratorError::ContentDownload(format!(
                "template {signature} is not valid UTF-8: {e}"
            ))
        })
    }
}

#[async_trait]
impl StepExecutor for GenerateConfigExecutor {
    #[instrument(skip_all, fields(task_id = %ctx.task_id()))]
    async fn execute(&self, ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
        let payload = ctx.payload().as_generate()?.clone();
        let mut common = ctx.get_common_payload()?;
        let key = common.instance_key()?;

        let template = self
            .download_template(
                payload.biz_id,
                payload.template_space_id,
                &payload.content_signature,
            )
            .await?;

        let rendered = if template.is_empty() {
            String::new()
        } else {
            let params = ProcessContextParams::from_payload(common.process()?, needs_help(&template));
            let context = build_process_context(&params);
            self.deps.renderer.render(&template, &context).await?
        };
        debug!("配置实例 {} 渲染完成, {} 字节", key, rendered.len());

        let config = common.config_mut()?;
        config.config_instance_key = key.to_string();
        config.config_content_signature = sha256_hex(rendered.as_bytes());
        config.config_content = rendered;
        ctx.set_common_payload(common);

        Ok(StepOutcome::Completed)
    }
}

/// 生成任务完成回调：累加批次计数
pub struct GenerateConfigCallback {
    deps: Arc<ConfigExecutorDeps>,
}

impl GenerateConfigCallback {
    pub fn new(deps: Arc<ConfigExecutorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl TaskCallback for GenerateConfigCallback {
    async fn on_complete(
        &self,
        ctx: &CallbackContext,
        completion: &TaskCompletion,
    ) -> OrchestratorResult<()> {
        let payload = ctx.payload()?;
        payload.as_generate()?;
        let success = completion.is_success();
        info!(
            "配置生成任务 {} 完成: success={}, batch_id={}",
            ctx.task_id,
            success,
            payload.batch_id()
        );
        self.deps.record_batch_result(payload, success).await?;
        Ok(())
    }
}
