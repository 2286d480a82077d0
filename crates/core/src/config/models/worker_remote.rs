use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_concurrent_tasks: usize,
    /// 检查与下发步骤的最大执行时间
    pub step_timeout_seconds: u64,
    /// 配置生成步骤的最大执行时间
    pub generate_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 16,
            step_timeout_seconds: 10,
            generate_timeout_seconds: 120,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.step_timeout_seconds == 0 || self.generate_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("步骤超时时间必须大于0"));
        }

        Ok(())
    }
}

/// 远程执行通道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteExecutionConfig {
    pub script_store_dir: String,
    pub script_timeout_seconds: u64,
    pub transfer_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub max_wait_seconds: u64,
    /// 文件传输源端使用的账户
    pub agent_user: String,
    /// 主机部署时服务所在节点的 agent id
    pub node_agent_id: Option<String>,
    /// 下发步骤是否等待文件传输完成
    pub await_transfer: bool,
}

impl Default for RemoteExecutionConfig {
    fn default() -> Self {
        Self {
            script_store_dir: "/tmp/bk_ges_scripts".to_string(),
            script_timeout_seconds: 3600,
            transfer_timeout_seconds: 3600,
            poll_interval_ms: 2000,
            max_wait_seconds: 10,
            agent_user: "root".to_string(),
            node_agent_id: None,
            await_transfer: true,
        }
    }
}

impl RemoteExecutionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.script_store_dir.starts_with('/') {
            return Err(anyhow::anyhow!(
                "脚本存放目录必须是绝对路径: {}",
                self.script_store_dir
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.max_wait_seconds == 0 {
            return Err(anyhow::anyhow!("最大等待时间必须大于0"));
        }

        if self.poll_interval_ms > self.max_wait_seconds * 1000 {
            return Err(anyhow::anyhow!("轮询间隔不能大于最大等待时间"));
        }

        if self.agent_user.is_empty() {
            return Err(anyhow::anyhow!("传输账户不能为空"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    pub cache_dir: String,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            cache_dir: "/tmp/orchestrator/staging".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub root_dir: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            root_dir: "/tmp/orchestrator/content".to_string(),
        }
    }
}
