use async_trait::async_trait;
use orchestrator_domain::{CommonPayload, StepOutcome, StepPayload, TaskInfo};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tokio_util::sync::CancellationToken;

/// 单个步骤执行时可见的上下文
///
/// 公共负载是任务检查点的一份副本，步骤必须显式 `set_common_payload`，
/// 运行时只在步骤成功后把它提交回任务。
pub struct StepContext {
    task_id: String,
    step_name: String,
    payload: StepPayload,
    common_payload: Option<CommonPayload>,
    cancel: CancellationToken,
}

impl StepContext {
    pub fn new(
        task_id: impl Into<String>,
        step_name: impl Into<String>,
        payload: StepPayload,
        common_payload: Option<CommonPayload>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            step_name: step_name.into(),
            payload,
            common_payload,
            cancel,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn payload(&self) -> &StepPayload {
        &self.payload
    }

    pub fn get_common_payload(&self) -> OrchestratorResult<CommonPayload> {
        self.common_payload.clone().ok_or_else(|| {
            OrchestratorError::payload(format!("task {} has no common payload", self.task_id))
        })
    }

    pub fn set_common_payload(&mut self, payload: CommonPayload) {
        self.common_payload = Some(payload);
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn into_common_payload(self) -> Option<CommonPayload> {
        self.common_payload
    }
}

/// 回调执行时可见的任务快照
#[derive(Debug, Clone)]
pub struct CallbackContext {
    pub task_id: String,
    pub info: TaskInfo,
    pub payload: Option<StepPayload>,
    pub common_payload: Option<CommonPayload>,
}

impl CallbackContext {
    pub fn payload(&self) -> OrchestratorResult<&StepPayload> {
        self.payload.as_ref().ok_or_else(|| {
            OrchestratorError::payload(format!("task {} has no step payload", self.task_id))
        })
    }

    pub fn common_payload(&self) -> OrchestratorResult<&CommonPayload> {
        self.common_payload.as_ref().ok_or_else(|| {
            OrchestratorError::payload(format!("task {} has no common payload", self.task_id))
        })
    }
}

/// 任务结束时交给回调的结果
#[derive(Debug)]
pub struct TaskCompletion {
    pub error: Option<OrchestratorError>,
    pub reports: Vec<String>,
}

impl TaskCompletion {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.reports.is_empty()
    }
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, ctx: &mut StepContext) -> OrchestratorResult<StepOutcome>;
}

#[async_trait]
pub trait TaskCallback: Send + Sync {
    async fn on_complete(
        &self,
        ctx: &CallbackContext,
        completion: &TaskCompletion,
    ) -> OrchestratorResult<()>;
}
