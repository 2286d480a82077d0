//! `${name}` 变量替换渲染器

use async_trait::async_trait;
use orchestrator_domain::{interpolate, RenderContext, TemplateRenderer};
use orchestrator_errors::OrchestratorResult;

#[derive(Debug, Clone, Copy, Default)]
pub struct VariableRenderer;

impl VariableRenderer {
    pub fn new() -> Self {
        Self
    }

    /// 同步渲染，变量缺失或 `${` 未闭合时返回渲染错误
    pub fn render_str(&self, template: &str, context: &RenderContext) -> OrchestratorResult<String> {
        interpolate(template, context)
    }
}

#[async_trait]
impl TemplateRenderer for VariableRenderer {
    async fn render(&self, template: &str, context: &RenderContext) -> OrchestratorResult<String> {
        self.render_str(template, context)
    }
}
