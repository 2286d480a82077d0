//! 在本机执行脚本和文件传输的远程执行通道
//!
//! 所有 agent 都映射到本机，作业异步执行，状态保存在内存中。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_domain::{
    AgentJobResult, AgentTarget, ExecuteScriptRequest, JobState, JobStatus, RemoteExecutor,
    TransferFileRequest,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

type JobTable = Arc<RwLock<HashMap<String, JobState>>>;

pub struct LocalScriptExecutor {
    jobs: JobTable,
}

impl LocalScriptExecutor {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn register_job(&self) -> String {
        let job_id = Uuid::new_v4().to_string();
        self.jobs
            .write()
            .await
            .insert(job_id.clone(), JobState::running(JobStatus::Pending));
        job_id
    }
}

impl Default for LocalScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

async fn set_state(jobs: &JobTable, job_id: &str, state: JobState) {
    jobs.write().await.insert(job_id.to_string(), state);
}

fn agent_result(agent: &AgentTarget, code: i32, message: String) -> AgentJobResult {
    AgentJobResult {
        agent_id: agent.agent_id.clone(),
        container_id: agent.container_id.clone().unwrap_or_default(),
        error_code: code,
        error_message: message,
        output: String::new(),
    }
}

async fn run_script(path: &Path, agent: &AgentTarget, timeout: Duration) -> AgentJobResult {
    let mut cmd = Command::new("bash");
    cmd.arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return agent_result(agent, -1, format!("启动脚本失败: {e}")),
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return agent_result(agent, -1, format!("等待脚本结束失败: {e}")),
        Err(_) => return agent_result(agent, -1, format!("脚本执行超时: {timeout:?}")),
    };

    let error_code = output.status.code().unwrap_or(-1);
    AgentJobResult {
        agent_id: agent.agent_id.clone(),
        container_id: agent.container_id.clone().unwrap_or_default(),
        error_code,
        error_message: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        output: String::from_utf8_lossy(&output.stdout).into_owned(),
    }
}

async fn copy_file(source: &Path, target_dir: &Path, target: &Path, auto_mkdir: bool) -> std::io::Result<()> {
    if auto_mkdir {
        tokio::fs::create_dir_all(target_dir).await?;
    }
    tokio::fs::copy(source, target).await?;
    Ok(())
}

#[async_trait]
impl RemoteExecutor for LocalScriptExecutor {
    async fn submit_script(&self, request: &ExecuteScriptRequest) -> OrchestratorResult<String> {
        if request.agents.is_empty() {
            return Err(OrchestratorError::validation_error("脚本作业没有目标 agent"));
        }

        // 同一秒内提交的同名脚本按作业隔离存放
        let job_id = self.register_job().await;
        let script_dir = Path::new(&request.script_store_dir).join(&job_id);
        let script_path = script_dir.join(&request.script_name);
        let written = async {
            tokio::fs::create_dir_all(&script_dir).await?;
            tokio::fs::write(&script_path, &request.script_content).await
        }
        .await;
        if let Err(e) = written {
            self.jobs.write().await.remove(&job_id);
            return Err(e.into());
        }

        info!(
            "提交脚本作业: job_id={}, script={}, agents={}",
            job_id,
            script_path.display(),
            request.agents.len()
        );

        let jobs = self.jobs.clone();
        let agents = request.agents.clone();
        let timeout = Duration::from_secs(request.timeout_seconds.max(1));
        let id = job_id.clone();
        tokio::spawn(async move {
            set_state(&jobs, &id, JobState::running(JobStatus::Executing)).await;
            let mut results = Vec::with_capacity(agents.len());
            for agent in &agents {
                debug!("执行脚本: agent={}, user={}", agent.agent_id, agent.user);
                results.push(run_script(&script_path, agent, timeout).await);
            }
            set_state(&jobs, &id, JobState::done(results)).await;
        });

        Ok(job_id)
    }

    async fn poll_job_state(
        &self,
        job_id: &str,
        agent_ids: &[String],
    ) -> OrchestratorResult<JobState> {
        let jobs = self.jobs.read().await;
        let state = jobs
            .get(job_id)
            .ok_or_else(|| OrchestratorError::remote_job(format!("作业不存在: {job_id}")))?;

        if agent_ids.is_empty() {
            return Ok(state.clone());
        }
        Ok(JobState {
            status: state.status,
            results: state
                .results
                .iter()
                .filter(|r| agent_ids.contains(&r.agent_id))
                .cloned()
                .collect(),
        })
    }

    async fn submit_file_transfer(
        &self,
        request: &TransferFileRequest,
    ) -> OrchestratorResult<String> {
        if request.target.agents.is_empty() {
            return Err(OrchestratorError::validation_error("文件传输没有目标 agent"));
        }

        let source = Path::new(&request.source.store_dir).join(&request.source.file_name);
        let target_dir = PathBuf::from(&request.target.store_dir);
        let target = target_dir.join(&request.target.file_name);

        let job_id = self.register_job().await;
        info!(
            "提交文件传输作业: job_id={}, {} -> {}",
            job_id,
            source.display(),
            target.display()
        );

        let jobs = self.jobs.clone();
        let agents = request.target.agents.clone();
        let auto_mkdir = request.auto_mkdir;
        let id = job_id.clone();
        tokio::spawn(async move {
            set_state(&jobs, &id, JobState::running(JobStatus::Executing)).await;
            let mut results = Vec::with_capacity(agents.len());
            for agent in &agents {
                let result = match copy_file(&source, &target_dir, &target, auto_mkdir).await {
                    Ok(()) => agent_result(agent, 0, String::new()),
                    Err(e) => {
                        warn!("文件传输失败: agent={}, error={}", agent.agent_id, e);
                        agent_result(agent, 1, e.to_string())
                    }
                };
                results.push(result);
            }
            set_state(&jobs, &id, JobState::done(results)).await;
        });

        Ok(job_id)
    }
}
