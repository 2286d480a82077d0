use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::payload::CommonPayload;
use crate::steps::StepPayload;

/// 任务索引类型，任务通过 `TaskIndex == batch_id` 归属到批次
pub const TASK_INDEX_TYPE: &str = "task_batch";

pub const TASK_TYPE_CONFIG_CHECK: &str = "config_check";
pub const TASK_TYPE_CONFIG_GENERATE: &str = "config_generate";
pub const TASK_TYPE_CONFIG_PUSH: &str = "config_push";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_name: String,
    pub task_type: String,
    pub task_index_type: String,
    pub task_index: String,
    pub creator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub alias: String,
    pub payload: StepPayload,
    #[serde(with = "duration_secs")]
    pub max_execution: Duration,
    /// 0 表示不自动重试
    pub max_tries: u32,
}

impl Step {
    pub fn new(name: impl Into<String>, payload: StepPayload) -> Self {
        let name = name.into();
        Self {
            alias: name.clone(),
            name,
            payload,
            max_execution: Duration::from_secs(10),
            max_tries: 0,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_max_execution(mut self, max_execution: Duration) -> Self {
        self.max_execution = max_execution;
        self
    }

    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// 实际执行次数，至少一次
    pub fn attempts(&self) -> u32 {
        self.max_tries.max(1)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// 一个目标上的一次作业：有序步骤 + 共享负载 + 完成回调
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: String,
    info: TaskInfo,
    steps: Vec<Step>,
    common_payload: Option<CommonPayload>,
    callback: Option<String>,
}

impl Task {
    pub fn new(info: TaskInfo, steps: Vec<Step>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            info,
            steps,
            common_payload: None,
            callback: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn info(&self) -> &TaskInfo {
        &self.info
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get_common_payload(&self) -> OrchestratorResult<CommonPayload> {
        self.common_payload
            .clone()
            .ok_or_else(|| OrchestratorError::payload(format!("task {} has no common payload", self.id)))
    }

    pub fn set_common_payload(&mut self, payload: CommonPayload) {
        self.common_payload = Some(payload);
    }

    pub fn has_common_payload(&self) -> bool {
        self.common_payload.is_some()
    }

    pub fn callback(&self) -> Option<&str> {
        self.callback.as_deref()
    }

    pub fn set_callback(&mut self, name: impl Into<String>) {
        self.callback = Some(name.into());
    }
}

/// 步骤成功结束的两种形态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// 步骤本身成功，但需要把目标标记为失败（例如检测到配置漂移）
    Reported(String),
}

/// 一个已完成生成任务的输出，供下发任务构建时引用
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamTaskOutput {
    pub task_id: String,
    pub payload: Arc<CommonPayload>,
}

impl UpstreamTaskOutput {
    pub fn new(task_id: impl Into<String>, payload: CommonPayload) -> Self {
        Self {
            task_id: task_id.into(),
            payload: Arc::new(payload),
        }
    }
}
