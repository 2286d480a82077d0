use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tracing::debug;
use uuid::Uuid;

/// 已暂存的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    /// 本次调用是否实际写入了文件
    pub written: bool,
}

/// 服务端本地暂存区，按 `{root}/{biz_id}/{signature}` 存放渲染结果，作为文件传输的源
pub struct StagingArea {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, biz_id: u32) -> PathBuf {
        self.root.join(biz_id.to_string())
    }

    pub fn path_for(&self, biz_id: u32, signature: &str) -> OrchestratorResult<PathBuf> {
        if signature.is_empty()
            || signature.contains('/')
            || signature.contains('\\')
            || signature.starts_with('.')
        {
            return Err(OrchestratorError::Staging(format!(
                "非法的内容签名: {signature:?}"
            )));
        }
        Ok(self.dir_for(biz_id).join(signature))
    }

    /// 暂存内容，同一路径的并发写入串行化，已存在的文件不会重写
    pub async fn stage(
        &self,
        biz_id: u32,
        signature: &str,
        content: &[u8],
    ) -> OrchestratorResult<StagedFile> {
        let path = self.path_for(biz_id, signature)?;
        let lock = self.lock_for(&path)?;
        let guard = lock.lock().await;
        let result = self.write_once(biz_id, signature, path.clone(), content).await;
        drop(guard);
        self.release_lock(&path, lock);
        result
    }

    async fn write_once(
        &self,
        biz_id: u32,
        signature: &str,
        path: PathBuf,
        content: &[u8],
    ) -> OrchestratorResult<StagedFile> {
        if tokio::fs::try_exists(&path).await? {
            debug!("暂存文件已存在，跳过写入: {}", path.display());
            return Ok(StagedFile {
                path,
                written: false,
            });
        }

        let dir = self.dir_for(biz_id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            OrchestratorError::Staging(format!("创建暂存目录 {} 失败: {e}", dir.display()))
        })?;

        // 先写临时文件再改名，避免读到写了一半的内容
        let tmp = dir.join(format!(".{signature}.{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, content).await.map_err(|e| {
            OrchestratorError::Staging(format!("写入暂存文件 {} 失败: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            OrchestratorError::Staging(format!("重命名暂存文件 {} 失败: {e}", path.display()))
        })?;

        debug!("已暂存文件: {}", path.display());
        Ok(StagedFile {
            path,
            written: true,
        })
    }

    fn lock_for(&self, path: &Path) -> OrchestratorResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| OrchestratorError::Internal("暂存锁表已损坏".to_string()))?;
        Ok(locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// 没有其他调用方持有该路径的锁时，从锁表中移除
    fn release_lock(&self, path: &Path, lock: Arc<tokio::sync::Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // 锁表与当前调用各持有一份
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
    }

    #[cfg(test)]
    fn pending_locks(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}
