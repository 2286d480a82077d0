use async_trait::async_trait;
use orchestrator_errors::OrchestratorResult;
use serde::{Deserialize, Serialize};

/// 内容仓库的寻址范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentScope {
    pub biz_id: u32,
    pub template_space_id: u32,
}

/// 按签名获取不可变内容
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn download(&self, scope: &ContentScope, signature: &str) -> OrchestratorResult<Vec<u8>>;
}
