use async_trait::async_trait;
use orchestrator_errors::OrchestratorResult;
use std::collections::BTreeMap;

pub type RenderContext = BTreeMap<String, serde_json::Value>;

/// 模板渲染函数
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(&self, template: &str, context: &RenderContext) -> OrchestratorResult<String>;
}
