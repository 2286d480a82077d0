use async_trait::async_trait;
use orchestrator_errors::OrchestratorResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTarget {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub user: String,
}

impl AgentTarget {
    pub fn new(agent_id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            container_id: None,
            user: user.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteScriptRequest {
    pub agents: Vec<AgentTarget>,
    pub script_name: String,
    pub script_store_dir: String,
    pub script_content: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferEndpoint {
    pub agents: Vec<AgentTarget>,
    pub store_dir: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFileRequest {
    pub source: FileTransferEndpoint,
    pub target: FileTransferEndpoint,
    pub timeout_seconds: u64,
    pub auto_mkdir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Executing,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentJobResult {
    pub agent_id: String,
    #[serde(default)]
    pub container_id: String,
    pub error_code: i32,
    #[serde(default)]
    pub error_message: String,
    /// 脚本的标准输出
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    pub results: Vec<AgentJobResult>,
}

impl JobState {
    pub fn running(status: JobStatus) -> Self {
        Self {
            status,
            results: Vec::new(),
        }
    }

    pub fn done(results: Vec<AgentJobResult>) -> Self {
        Self {
            status: JobStatus::Done,
            results,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == JobStatus::Done
    }

    pub fn result_for(&self, agent_id: &str) -> Option<&AgentJobResult> {
        self.results.iter().find(|r| r.agent_id == agent_id)
    }
}

/// 远程执行通道：异步提交脚本/文件传输作业并轮询作业状态
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn submit_script(&self, request: &ExecuteScriptRequest) -> OrchestratorResult<String>;
    async fn poll_job_state(&self, job_id: &str, agent_ids: &[String])
        -> OrchestratorResult<JobState>;
    async fn submit_file_transfer(&self, request: &TransferFileRequest)
        -> OrchestratorResult<String>;
}
