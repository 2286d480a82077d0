use std::future::Future;
use std::time::Duration;

use orchestrator_core::RemoteExecutionConfig;
use orchestrator_domain::{AgentJobResult, RemoteExecutor};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 远程作业的轮询策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl From<&RemoteExecutionConfig> for PollPolicy {
    fn from(config: &RemoteExecutionConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_wait: Duration::from_secs(config.max_wait_seconds),
        }
    }
}

/// 按策略反复调用 `probe`，直到它返回 `Some`
///
/// 第一次探测立即发生，之后每隔 `interval` 一次；超过 `max_wait`
/// 返回超时错误，`cancel` 触发时立即返回取消错误。`probe` 的错误
/// 原样向上传播，是否容忍由调用方在 `probe` 内部决定。
pub async fn poll_until<T, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut probe: F,
) -> OrchestratorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OrchestratorResult<Option<T>>>,
{
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let polling = async {
        loop {
            ticker.tick().await;
            if let Some(value) = probe().await? {
                return Ok::<T, OrchestratorError>(value);
            }
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OrchestratorError::Cancelled(what.to_string())),
        result = tokio::time::timeout(policy.max_wait, polling) => match result {
            Ok(inner) => inner,
            Err(_) => Err(OrchestratorError::timeout(format!(
                "{what} 在 {:?} 内未完成",
                policy.max_wait
            ))),
        },
    }
}

/// 等待脚本作业在单个 agent 上执行结束，查询失败直接返回错误
pub async fn wait_script_finish(
    remote: &dyn RemoteExecutor,
    job_id: &str,
    agent_id: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> OrchestratorResult<AgentJobResult> {
    let agent_ids = vec![agent_id.to_string()];
    let agent_ids = agent_ids.as_slice();
    let what = format!("script job {job_id}");

    poll_until(policy, cancel, &what, || async move {
        let state = remote.poll_job_state(job_id, agent_ids).await?;
        if !state.is_done() {
            debug!("脚本作业 {} 仍在执行: {:?}", job_id, state.status);
            return Ok(None);
        }
        let result = state.result_for(agent_id).cloned().ok_or_else(|| {
            OrchestratorError::remote_job(format!(
                "script job {job_id} finished without result for agent {agent_id}"
            ))
        })?;
        Ok(Some(result))
    })
    .await
}

/// 等待文件传输作业结束，查询失败只记录日志并继续轮询
pub async fn wait_transfer_finish(
    remote: &dyn RemoteExecutor,
    job_id: &str,
    agent_ids: &[String],
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> OrchestratorResult<Vec<AgentJobResult>> {
    let what = format!("transfer job {job_id}");

    poll_until(policy, cancel, &what, || async move {
        match remote.poll_job_state(job_id, agent_ids).await {
            Ok(state) if state.is_done() => {
                if state.results.is_empty() {
                    return Err(OrchestratorError::remote_job(format!(
                        "transfer job {job_id} finished without results"
                    )));
                }
                Ok(Some(state.results))
            }
            Ok(state) => {
                debug!("传输作业 {} 仍在执行: {:?}", job_id, state.status);
                Ok(None)
            }
            Err(e) => {
                warn!("查询传输作业 {} 状态失败，继续等待: {}", job_id, e);
                Ok(None)
            }
        }
    })
    .await
}
