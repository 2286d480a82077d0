use std::sync::Arc;

use md5::Md5;
use metrics::counter;
use orchestrator_core::metrics::{BATCH_COUNTER_UPDATES_TOTAL, REMOTE_JOBS_TOTAL};
use orchestrator_core::RemoteExecutionConfig;
use orchestrator_domain::{
    build_process_context, AgentJobResult, AgentTarget, CommonPayload, ConfigInstanceRepository,
    ContentRepository, ExecuteScriptRequest, ProcessContextParams, RemoteExecutor,
    ServerIdentity, StepPayload, TaskBatch, TaskBatchRepository, TemplateRenderer,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::staging::StagingArea;
use crate::wait::{wait_script_finish, PollPolicy};

/// 文件传输提交后是否等待作业结束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferCompletion {
    Await,
    SubmitOnly,
}

/// 远程执行相关的运行参数
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub script_store_dir: String,
    pub script_timeout_seconds: u64,
    pub transfer_timeout_seconds: u64,
    pub agent_user: String,
    pub poll: PollPolicy,
    pub transfer_completion: TransferCompletion,
}

impl RemoteSettings {
    pub fn from_config(config: &RemoteExecutionConfig) -> Self {
        Self {
            script_store_dir: config.script_store_dir.clone(),
            script_timeout_seconds: config.script_timeout_seconds,
            transfer_timeout_seconds: config.transfer_timeout_seconds,
            agent_user: config.agent_user.clone(),
            poll: PollPolicy::from(config),
            transfer_completion: if config.await_transfer {
                TransferCompletion::Await
            } else {
                TransferCompletion::SubmitOnly
            },
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self::from_config(&RemoteExecutionConfig::default())
    }
}

/// 配置类步骤执行器共享的依赖
pub struct ConfigExecutorDeps {
    pub task_batches: Arc<dyn TaskBatchRepository>,
    pub config_instances: Arc<dyn ConfigInstanceRepository>,
    pub remote: Arc<dyn RemoteExecutor>,
    pub content: Arc<dyn ContentRepository>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub identity: Arc<dyn ServerIdentity>,
    pub staging: Arc<StagingArea>,
    pub settings: RemoteSettings,
}

impl ConfigExecutorDeps {
    /// 向单个 agent 下发脚本并等待其执行结束，非零退出码视为失败
    pub async fn run_script(
        &self,
        agent: AgentTarget,
        script_name: String,
        script_content: String,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<AgentJobResult> {
        let agent_id = agent.agent_id.clone();
        let request = ExecuteScriptRequest {
            agents: vec![agent],
            script_name,
            script_store_dir: self.settings.script_store_dir.clone(),
            script_content,
            timeout_seconds: self.settings.script_timeout_seconds,
        };

        let job_id = self.remote.submit_script(&request).await?;
        if job_id.is_empty() {
            return Err(OrchestratorError::remote_job(format!(
                "submit script {} returned empty job id",
                request.script_name
            )));
        }
        counter!(REMOTE_JOBS_TOTAL, "kind" => "script").increment(1);
        debug!("脚本作业已提交: job_id={}, agent={}", job_id, agent_id);

        let result = wait_script_finish(
            self.remote.as_ref(),
            &job_id,
            &agent_id,
            &self.settings.poll,
            cancel,
        )
        .await?;

        if result.error_code != 0 {
            return Err(OrchestratorError::ScriptExecution {
                agent_id: result.agent_id,
                container_id: result.container_id,
                code: result.error_code,
                message: result.error_message,
            });
        }
        Ok(result)
    }

    /// 回调中更新批次计数，批次已结束时原样返回错误
    pub async fn record_batch_result(
        &self,
        payload: &StepPayload,
        success: bool,
    ) -> OrchestratorResult<TaskBatch> {
        let batch = self
            .task_batches
            .increment_completed_count(payload.batch_id(), success)
            .await?;
        counter!(
            BATCH_COUNTER_UPDATES_TOTAL,
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
        info!(
            "批次 {} 进度 {}/{} (成功 {}, 失败 {}), 状态 {}",
            batch.id,
            batch.completed_count,
            batch.total_count,
            batch.success_count,
            batch.failed_count,
            batch.status
        );
        Ok(batch)
    }
}

/// 渲染配置文件名与路径，只处理含有 `${` 的字段
pub async fn render_file_name_and_path(
    renderer: &dyn TemplateRenderer,
    common: &CommonPayload,
) -> OrchestratorResult<(String, String)> {
    let process = common.process()?;
    let config = common.config()?;

    let needs_render = |s: &str| s.contains("${");
    if !needs_render(&config.config_file_name) && !needs_render(&config.config_file_path) {
        return Ok((
            config.config_file_name.clone(),
            config.config_file_path.clone(),
        ));
    }

    let context = build_process_context(&ProcessContextParams::from_payload(process, false));
    let file_name = if needs_render(&config.config_file_name) {
        renderer.render(&config.config_file_name, &context).await?
    } else {
        config.config_file_name.clone()
    };
    let file_path = if needs_render(&config.config_file_path) {
        renderer.render(&config.config_file_path, &context).await?
    } else {
        config.config_file_path.clone()
    };
    Ok((file_name, file_path))
}

/// 目标目录必须是绝对路径
fn ensure_absolute_dir(file_path: &str) -> OrchestratorResult<()> {
    if !file_path.starts_with('/') {
        return Err(OrchestratorError::payload(format!(
            "config file path must be absolute: {file_path:?}"
        )));
    }
    Ok(())
}

/// 拼接目标文件的绝对路径，目录为空或是相对路径时返回错误
pub fn join_target_path(file_path: &str, file_name: &str) -> OrchestratorResult<String> {
    ensure_absolute_dir(file_path)?;
    Ok(format!("{}/{}", file_path.trim_end_matches('/'), file_name))
}

pub fn sha256_hex(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

pub fn md5_hex(content: &[u8]) -> String {
    format!("{:x}", Md5::digest(content))
}
