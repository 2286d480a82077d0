use thiserror::Error;


#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务批次未找到: {id}")]
    TaskBatchNotFound { id: i64 },
    #[error("任务批次已结束: {id}")]
    TaskBatchFinalized { id: i64 },
    #[error("任务负载错误: {0}")]
    Payload(String),
    #[error("script execution failed, agent={agent_id}, container={container_id}, code={code}, msg={message}")]
    ScriptExecution {
        agent_id: String,
        container_id: String,
        code: i32,
        message: String,
    },
    #[error("transfer failed, agent: {agent_id}, code: {code}, msg: {message}")]
    FileTransfer {
        agent_id: String,
        code: i32,
        message: String,
    },
    #[error("远程作业错误: {0}")]
    RemoteJob(String),
    #[error("内容下载失败: {0}")]
    ContentDownload(String),
    #[error("模板渲染失败: {0}")]
    Render(String),
    #[error("本地暂存失败: {0}")]
    Staging(String),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("任务已取消: {0}")]
    Cancelled(String),
    #[error("未注册的步骤执行器: {0}")]
    UnknownStep(String),
    #[error("未注册的回调: {0}")]
    UnknownCallback(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn batch_not_found(id: i64) -> Self {
        Self::TaskBatchNotFound { id }
    }
    pub fn payload<S: Into<String>>(msg: S) -> Self {
        Self::Payload(msg.into())
    }
    pub fn remote_job<S: Into<String>>(msg: S) -> Self {
        Self::RemoteJob(msg.into())
    }
    pub fn render<S: Into<String>>(msg: S) -> Self {
        Self::Render(msg.into())
    }
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Internal(_)
                | OrchestratorError::Configuration(_)
                | OrchestratorError::UnknownStep(_)
                | OrchestratorError::UnknownCallback(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::DatabaseOperation(_)
                | OrchestratorError::RemoteJob(_)
                | OrchestratorError::ContentDownload(_)
                | OrchestratorError::Timeout(_)
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            OrchestratorError::TaskBatchNotFound { .. } => "请求的任务批次不存在",
            OrchestratorError::TaskBatchFinalized { .. } => "任务批次已经结束",
            OrchestratorError::Payload(_) => "任务负载不完整",
            OrchestratorError::ScriptExecution { .. } => "目标主机脚本执行失败",
            OrchestratorError::FileTransfer { .. } => "配置文件传输失败",
            OrchestratorError::Render(_) => "配置模板渲染失败",
            OrchestratorError::ValidationError(_) => "输入数据验证失败",
            OrchestratorError::Timeout(_) => "操作超时，请稍后重试",
            OrchestratorError::Cancelled(_) => "任务已被取消",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
