use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};

use crate::entities::TaskAction;

pub const CHECK_CONFIG_MD5: &str = "CheckConfigMD5";
pub const FETCH_CONFIG_CONTENT: &str = "FetchConfigContent";
pub const GENERATE_CONFIG: &str = "GenerateConfig";
pub const VALIDATE_PUSH_CONFIG: &str = "ValidatePushConfig";
pub const DOWNLOAD_CONFIG: &str = "DownloadConfig";
pub const PUSH_CONFIG: &str = "PushConfig";
pub const RELEASE_CONFIG: &str = "ReleaseConfig";

pub const CHECK_CONFIG_CALLBACK: &str = "CheckConfigCallback";
pub const GENERATE_CONFIG_CALLBACK: &str = "GenerateConfigCallback";
pub const PUSH_CONFIG_CALLBACK: &str = "PushConfigCallback";

/// 检查步骤的本地负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfigPayload {
    pub biz_id: u32,
    pub batch_id: i64,
    pub operate_type: TaskAction,
    pub operator_user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateConfigPayload {
    pub biz_id: u32,
    pub batch_id: i64,
    pub operate_type: TaskAction,
    pub operator_user: String,
    pub template_space_id: u32,
    /// 模板正文签名，为空时表示模板没有内容
    pub content_signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConfigPayload {
    pub biz_id: u32,
    pub batch_id: i64,
    pub operate_type: TaskAction,
    pub operator_user: String,
    /// 产出本次下发内容的生成任务
    pub generate_task_id: String,
}

/// 每个步骤携带的类型化本地负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StepPayload {
    CheckConfig(CheckConfigPayload),
    GenerateConfig(GenerateConfigPayload),
    PushConfig(PushConfigPayload),
}

impl StepPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            StepPayload::CheckConfig(_) => "check_config",
            StepPayload::GenerateConfig(_) => "generate_config",
            StepPayload::PushConfig(_) => "push_config",
        }
    }

    pub fn biz_id(&self) -> u32 {
        match self {
            StepPayload::CheckConfig(p) => p.biz_id,
            StepPayload::GenerateConfig(p) => p.biz_id,
            StepPayload::PushConfig(p) => p.biz_id,
        }
    }

    pub fn batch_id(&self) -> i64 {
        match self {
            StepPayload::CheckConfig(p) => p.batch_id,
            StepPayload::GenerateConfig(p) => p.batch_id,
            StepPayload::PushConfig(p) => p.batch_id,
        }
    }

    pub fn operator_user(&self) -> &str {
        match self {
            StepPayload::CheckConfig(p) => &p.operator_user,
            StepPayload::GenerateConfig(p) => &p.operator_user,
            StepPayload::PushConfig(p) => &p.operator_user,
        }
    }

    pub fn as_check(&self) -> OrchestratorResult<&CheckConfigPayload> {
        match self {
            StepPayload::CheckConfig(p) => Ok(p),
            other => Err(mismatch("check_config", other)),
        }
    }

    pub fn as_generate(&self) -> OrchestratorResult<&GenerateConfigPayload> {
        match self {
            StepPayload::GenerateConfig(p) => Ok(p),
            other => Err(mismatch("generate_config", other)),
        }
    }

    pub fn as_push(&self) -> OrchestratorResult<&PushConfigPayload> {
        match self {
            StepPayload::PushConfig(p) => Ok(p),
            other => Err(mismatch("push_config", other)),
        }
    }
}

fn mismatch(expected: &str, actual: &StepPayload) -> OrchestratorError {
    OrchestratorError::payload(format!(
        "step payload kind mismatch, expected {expected}, got {}",
        actual.kind()
    ))
}
