use async_trait::async_trait;
use orchestrator_errors::OrchestratorResult;

/// 服务进程自身所在的 agent，文件传输的源端
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAgent {
    pub agent_id: String,
    pub container_id: Option<String>,
}

#[async_trait]
pub trait ServerIdentity: Send + Sync {
    async fn resolve(&self) -> OrchestratorResult<ServerAgent>;
}
