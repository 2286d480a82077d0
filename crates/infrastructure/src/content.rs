//! 本地目录实现的内容仓库，按 `{root}/{biz_id}/{template_space_id}/{signature}` 存放

use async_trait::async_trait;
use orchestrator_domain::{ContentRepository, ContentScope};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

pub struct FsContentRepository {
    root: PathBuf,
}

impl FsContentRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, scope: &ContentScope, signature: &str) -> OrchestratorResult<PathBuf> {
        if signature.is_empty() || !signature.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(OrchestratorError::ContentDownload(format!(
                "非法的内容签名: {signature}"
            )));
        }
        Ok(self
            .root
            .join(scope.biz_id.to_string())
            .join(scope.template_space_id.to_string())
            .join(signature.to_ascii_lowercase()))
    }

    /// 写入内容并返回其 sha256 签名
    pub async fn upload(&self, scope: &ContentScope, content: &[u8]) -> OrchestratorResult<String> {
        let signature = format!("{:x}", Sha256::digest(content));
        let path = self.path_for(scope, &signature)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        debug!("上传内容成功: {}", path.display());
        Ok(signature)
    }
}

#[async_trait]
impl ContentRepository for FsContentRepository {
    #[instrument(skip(self), fields(biz_id = %scope.biz_id, space = %scope.template_space_id))]
    async fn download(&self, scope: &ContentScope, signature: &str) -> OrchestratorResult<Vec<u8>> {
        let path = self.path_for(scope, signature)?;
        let content = tokio::fs::read(&path).await.map_err(|e| {
            OrchestratorError::ContentDownload(format!("读取 {} 失败: {e}", path.display()))
        })?;

        let actual = format!("{:x}", Sha256::digest(&content));
        if !actual.eq_ignore_ascii_case(signature) {
            return Err(OrchestratorError::ContentDownload(format!(
                "内容签名不一致, expected {signature}, actual {actual}"
            )));
        }
        Ok(content)
    }
}
