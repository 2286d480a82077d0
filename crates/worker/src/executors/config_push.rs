use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use orchestrator_core::metrics::REMOTE_JOBS_TOTAL;
use orchestrator_domain::{
    AgentTarget, ConfigInstance, FileTransferEndpoint, StepOutcome, TransferFileRequest,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tracing::{debug, info, instrument, warn};

use super::common::{
    join_target_path, md5_hex, render_file_name_and_path, sha256_hex, ConfigExecutorDeps,
    TransferCompletion,
};
use super::scripts;
use crate::traits::{CallbackContext, StepContext, StepExecutor, TaskCallback, TaskCompletion};
use crate::wait::wait_transfer_finish;

/// 下发前校验上游生成任务留下的负载
pub struct ValidatePushConfigExecutor;

#[async_trait]
impl StepExecutor for ValidatePushConfigExecutor {
    async fn execute(&self, ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
        ctx.payload().as_push()?;
        let common = ctx.get_common_payload()?;
        let process = common.process()?;
        let config = common.config()?;

        if process.agent_id.is_empty() {
            return Err(OrchestratorError::payload("target agent id is empty"));
        }
        if config.config_instance_key.is_empty() {
            return Err(OrchestratorError::payload("config instance key is empty"));
        }
        if config.config_content_signature.is_empty() {
            return Err(OrchestratorError::payload("config content signature is empty"));
        }
        if sha256_hex(config.config_content.as_bytes()) != config.config_content_signature {
            return Err(OrchestratorError::payload(format!(
                "config content does not match signature {}",
                config.config_content_signature
            )));
        }
        Ok(StepOutcome::Completed)
    }
}

/// 把渲染结果暂存到服务端本地，作为文件传输的源文件
pub struct DownloadConfigExecutor {
    deps: Arc<ConfigExecutorDeps>,
}

impl DownloadConfigExecutor {
    pub fn new(deps: Arc<ConfigExecutorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl StepExecutor for DownloadConfigExecutor {
    async fn execute(&self, ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
        let biz_id = ctx.payload().as_push()?.biz_id;
        let common = ctx.get_common_payload()?;
        let config = common.config()?;

        let staged = self
            .deps
            .staging
            .stage(
                biz_id,
                &config.config_content_signature,
                config.config_content.as_bytes(),
            )
            .await?;
        debug!(
            "配置内容已暂存: {} (written={})",
            staged.path.display(),
            staged.written
        );
        Ok(StepOutcome::Completed)
    }
}

/// 通过文件传输把暂存文件下发到目标主机
pub struct PushConfigExecutor {
    deps: Arc<ConfigExecutorDeps>,
}

impl PushConfigExecutor {
    pub fn new(deps: Arc<ConfigExecutorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl StepExecutor for PushConfigExecutor {
    #[instrument(skip_all, fields(task_id = %ctx.task_id()))]
    async fn execute(&self, ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
        let biz_id = ctx.payload().as_push()?.biz_id;
        let mut common = ctx.get_common_payload()?;
        let process = common.process()?.clone();
        let config = common.config()?.clone();

        let (file_name, file_path) =
            render_file_name_and_path(self.deps.renderer.as_ref(), &common).await?;
        let target_path = join_target_path(&file_path, &file_name)?;

        let server = self.deps.identity.resolve().await?;
        let settings = &self.deps.settings;
        let request = TransferFileRequest {
            source: FileTransferEndpoint {
                agents: vec![AgentTarget {
                    agent_id: server.agent_id,
                    container_id: server.container_id,
                    user: settings.agent_user.clone(),
                }],
                store_dir: self.deps.staging.dir_for(biz_id).display().to_string(),
                file_name: config.config_content_signature.clone(),
            },
            target: FileTransferEndpoint {
                agents: vec![AgentTarget::new(
                    &process.agent_id,
                    &config.config_file_owner,
                )],
                store_dir: file_path.clone(),
                file_name: file_name.clone(),
            },
            timeout_seconds: settings.transfer_timeout_seconds,
            auto_mkdir: true,
        };

        let job_id = self.deps.remote.submit_file_transfer(&request).await?;
        if job_id.is_empty() {
            return Err(OrchestratorError::remote_job(
                "submit file transfer returned empty job id",
            ));
        }
        counter!(REMOTE_JOBS_TOTAL, "kind" => "transfer").increment(1);
        info!(
            "文件传输已提交: job_id={}, target={}",
            job_id, target_path
        );

        if settings.transfer_completion == TransferCompletion::Await {
            let results = wait_transfer_finish(
                self.deps.remote.as_ref(),
                &job_id,
                std::slice::from_ref(&process.agent_id),
                &settings.poll,
                ctx.cancellation(),
            )
            .await?;
            if let Some(failed) = results.into_iter().find(|r| r.error_code != 0) {
                return Err(OrchestratorError::FileTransfer {
                    agent_id: failed.agent_id,
                    code: failed.error_code,
                    message: failed.error_message,
                });
            }
        }

        common.config_mut()?.transfer_job_id = Some(job_id);
        ctx.set_common_payload(common);
        Ok(StepOutcome::Completed)
    }
}

/// 不经过文件传输，直接用脚本在目标主机写入配置文件
pub struct ReleaseConfigExecutor {
    deps: Arc<ConfigExecutorDeps>,
}

impl ReleaseConfigExecutor {
    pub fn new(deps: Arc<ConfigExecutorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl StepExecutor for ReleaseConfigExecutor {
    #[instrument(skip_all, fields(task_id = %ctx.task_id()))]
    async fn execute(&self, ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
        ctx.payload().as_push()?;
        let common = ctx.get_common_payload()?;
        let process = common.process()?;
        let config = common.config()?;

        let (file_name, file_path) =
            render_file_name_and_path(self.deps.renderer.as_ref(), &common).await?;
        let target_path = join_target_path(&file_path, &file_name)?;
        let script = scripts::release_script(
            &target_path,
            config.config_content.as_bytes(),
            &config.config_file_owner,
            &config.config_file_group,
            &config.config_file_permission,
        )?;

        self.deps
            .run_script(
                AgentTarget::new(&process.agent_id, &config.config_file_owner),
                scripts::release_script_name(Utc::now().timestamp()),
                script,
                ctx.cancellation(),
            )
            .await?;
        info!("配置文件已写入: {}", target_path);
        Ok(StepOutcome::Completed)
    }
}

/// 下发任务完成回调：成功时记录配置实例，并累加批次计数
pub struct PushConfigCallback {
    deps: Arc<ConfigExecutorDeps>,
}

impl PushConfigCallback {
    pub fn new(deps: Arc<ConfigExecutorDeps>) -> Self {
        Self { deps }
    }

    async fn save_instance(&self, ctx: &CallbackContext) -> OrchestratorResult<()> {
        let push = ctx.payload()?.as_push()?;
        let common = ctx.common_payload()?;
        let key = common.instance_key()?;
        let config = common.config()?;

        let now = Utc::now();
        let instance = ConfigInstance {
            id: 0,
            biz_id: push.biz_id,
            config_template_id: key.config_template_id,
            config_version_id: config.config_template_version_id,
            cc_process_id: key.cc_process_id,
            module_inst_seq: key.module_inst_seq,
            generate_task_id: push.generate_task_id.clone(),
            md5: md5_hex(config.config_content.as_bytes()),
            content: config.config_content.clone(),
            tenant_id: String::new(),
            creator: push.operator_user.clone(),
            reviser: push.operator_user.clone(),
            created_at: now,
            updated_at: now,
        };
        self.deps.config_instances.upsert(&instance).await?;
        debug!("配置实例 {} 已更新", key);
        Ok(())
    }
}

#[async_trait]
impl TaskCallback for PushConfigCallback {
    async fn on_complete(
        &self,
        ctx: &CallbackContext,
        completion: &TaskCompletion,
    ) -> OrchestratorResult<()> {
        let payload = ctx.payload()?;
        let mut success = completion.is_success();

        if success {
            if let Err(e) = self.save_instance(ctx).await {
                warn!("任务 {} 保存配置实例失败: {}", ctx.task_id, e);
                success = false;
            }
        }

        info!(
            "配置下发任务 {} 完成: success={}, batch_id={}",
            ctx.task_id,
            success,
            payload.batch_id()
        );
        self.deps.record_batch_result(payload, success).await?;
        Ok(())
    }
}
