use async_trait::async_trait;
use orchestrator_domain::{ServerAgent, ServerIdentity};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tracing::debug;

/// 使用配置的节点 agent id，未配置时退回到主机名
pub struct StaticServerIdentity {
    node_agent_id: Option<String>,
}

impl StaticServerIdentity {
    pub fn new(node_agent_id: Option<String>) -> Self {
        Self {
            node_agent_id: node_agent_id.filter(|id| !id.trim().is_empty()),
        }
    }
}

#[async_trait]
impl ServerIdentity for StaticServerIdentity {
    async fn resolve(&self) -> OrchestratorResult<ServerAgent> {
        let agent_id = match &self.node_agent_id {
            Some(id) => id.clone(),
            None => {
                let name = hostname::get().map_err(|e| {
                    OrchestratorError::config_error(format!("获取主机名失败: {e}"))
                })?;
                name.to_string_lossy().into_owned()
            }
        };

        debug!("服务端 agent: {}", agent_id);
        Ok(ServerAgent {
            agent_id,
            container_id: None,
        })
    }
}
