use chrono::{DateTime, Utc};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 任务批次操作对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskObject {
    Process,
    ConfigFile,
}

impl TaskObject {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskObject::Process => "process",
            TaskObject::ConfigFile => "config_file",
        }
    }
}

impl FromStr for TaskObject {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" => Ok(TaskObject::Process),
            "config_file" => Ok(TaskObject::ConfigFile),
            _ => Err(OrchestratorError::validation_error(format!(
                "未知的任务对象: {s}"
            ))),
        }
    }
}

/// 任务批次动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Register,
    Unregister,
    Start,
    Stop,
    Restart,
    Reload,
    Kill,
    ConfigCheck,
    ConfigGenerate,
    ConfigPublish,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Register => "register",
            TaskAction::Unregister => "unregister",
            TaskAction::Start => "start",
            TaskAction::Stop => "stop",
            TaskAction::Restart => "restart",
            TaskAction::Reload => "reload",
            TaskAction::Kill => "kill",
            TaskAction::ConfigCheck => "config_check",
            TaskAction::ConfigGenerate => "config_generate",
            TaskAction::ConfigPublish => "config_publish",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskAction {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(TaskAction::Register),
            "unregister" => Ok(TaskAction::Unregister),
            "start" => Ok(TaskAction::Start),
            "stop" => Ok(TaskAction::Stop),
            "restart" => Ok(TaskAction::Restart),
            "reload" => Ok(TaskAction::Reload),
            "kill" => Ok(TaskAction::Kill),
            "config_check" => Ok(TaskAction::ConfigCheck),
            "config_generate" => Ok(TaskAction::ConfigGenerate),
            "config_publish" => Ok(TaskAction::ConfigPublish),
            _ => Err(OrchestratorError::validation_error(format!(
                "未知的任务动作: {s}"
            ))),
        }
    }
}

/// 任务批次状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskBatchStatus {
    Pending,
    Running,
    Success,
    Failed,
    PartialSuccess,
}

impl TaskBatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskBatchStatus::Pending => "pending",
            TaskBatchStatus::Running => "running",
            TaskBatchStatus::Success => "success",
            TaskBatchStatus::Failed => "failed",
            TaskBatchStatus::PartialSuccess => "partial_success",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskBatchStatus::Success | TaskBatchStatus::Failed | TaskBatchStatus::PartialSuccess
        )
    }

    /// 根据计数推导批次终态，所有任务上报之前返回 None
    pub fn settle(total: u32, completed: u32, success: u32, failed: u32) -> Option<Self> {
        if total == 0 || completed < total {
            return None;
        }
        if failed == 0 {
            Some(TaskBatchStatus::Success)
        } else if success == 0 {
            Some(TaskBatchStatus::Failed)
        } else {
            Some(TaskBatchStatus::PartialSuccess)
        }
    }
}

impl fmt::Display for TaskBatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskBatchStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskBatchStatus::Pending),
            "running" => Ok(TaskBatchStatus::Running),
            "success" => Ok(TaskBatchStatus::Success),
            "failed" => Ok(TaskBatchStatus::Failed),
            "partial_success" => Ok(TaskBatchStatus::PartialSuccess),
            _ => Err(OrchestratorError::validation_error(format!(
                "未知的任务批次状态: {s}"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskBatchStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskBatchStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<TaskBatchStatus>()
            .map_err(|e| format!("Invalid task batch status: {e}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskBatchStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 批次覆盖的操作范围
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperateRange {
    #[serde(default)]
    pub set_names: Vec<String>,
    #[serde(default)]
    pub module_names: Vec<String>,
    #[serde(default)]
    pub service_names: Vec<String>,
    #[serde(default)]
    pub process_alias: Vec<String>,
    #[serde(default)]
    pub cc_process_ids: Vec<u32>,
}

/// 任务批次的 task_data 内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionData {
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub operate_range: OperateRange,
    /// 批次涉及的配置模板，用于判断模板是否存在运行中的下发任务
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_template_ids: Vec<u32>,
}

impl TaskExecutionData {
    pub fn to_json(&self) -> OrchestratorResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> OrchestratorResult<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBatch {
    pub id: i64,
    pub biz_id: u32,
    pub tenant_id: String,
    pub task_object: TaskObject,
    pub task_action: TaskAction,
    pub task_data: String,
    pub status: TaskBatchStatus,
    pub total_count: u32,
    pub completed_count: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskBatch {
    pub fn new(
        biz_id: u32,
        task_object: TaskObject,
        task_action: TaskAction,
        task_data: &TaskExecutionData,
        total_count: u32,
        creator: impl Into<String>,
    ) -> OrchestratorResult<Self> {
        let now = Utc::now();
        Ok(Self {
            id: 0,
            biz_id,
            tenant_id: String::new(),
            task_object,
            task_action,
            task_data: task_data.to_json()?,
            status: TaskBatchStatus::Pending,
            total_count,
            completed_count: 0,
            success_count: 0,
            failed_count: 0,
            start_at: None,
            end_at: None,
            creator: creator.into(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn validate_create(&self) -> OrchestratorResult<()> {
        if self.id > 0 {
            return Err(OrchestratorError::validation_error("id should not be set"));
        }
        if self.biz_id == 0 {
            return Err(OrchestratorError::validation_error("biz_id not set"));
        }
        if self.task_data.is_empty() {
            return Err(OrchestratorError::validation_error("task_data not set"));
        }
        if self.status.is_terminal() {
            return Err(OrchestratorError::validation_error(format!(
                "cannot create batch in terminal status {}",
                self.status
            )));
        }
        if self.completed_count > 0 || self.success_count > 0 || self.failed_count > 0 {
            return Err(OrchestratorError::validation_error(
                "counters must start at zero",
            ));
        }
        Ok(())
    }

    pub fn execution_data(&self) -> OrchestratorResult<TaskExecutionData> {
        TaskExecutionData::from_json(&self.task_data)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn entity_description(&self) -> String {
        format!(
            "任务批次 {} ({}:{}, {}/{})",
            self.id,
            self.task_object.as_str(),
            self.task_action,
            self.completed_count,
            self.total_count
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskBatchFilter {
    pub biz_id: Option<u32>,
    pub task_action: Option<TaskAction>,
    pub status: Option<TaskBatchStatus>,
    pub limit: Option<i64>,
}

/// 配置实例唯一键: 模板ID-进程ID-模块内实例序号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigInstanceKey {
    pub config_template_id: u32,
    pub cc_process_id: u32,
    pub module_inst_seq: u32,
}

impl ConfigInstanceKey {
    pub fn new(config_template_id: u32, cc_process_id: u32, module_inst_seq: u32) -> Self {
        Self {
            config_template_id,
            cc_process_id,
            module_inst_seq,
        }
    }
}

impl fmt::Display for ConfigInstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.config_template_id, self.cc_process_id, self.module_inst_seq
        )
    }
}

impl FromStr for ConfigInstanceKey {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 {
            return Err(OrchestratorError::validation_error(format!(
                "invalid config instance key: {s}"
            )));
        }
        let parse = |v: &str| {
            v.parse::<u32>().map_err(|e| {
                OrchestratorError::validation_error(format!("invalid config instance key {s}: {e}"))
            })
        };
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

/// 配置模板在某个进程实例上最近一次下发的内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigInstance {
    pub id: i64,
    pub biz_id: u32,
    pub config_template_id: u32,
    pub config_version_id: u32,
    pub cc_process_id: u32,
    pub module_inst_seq: u32,
    pub generate_task_id: String,
    pub md5: String,
    pub content: String,
    pub tenant_id: String,
    pub creator: String,
    pub reviser: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigInstance {
    pub fn key(&self) -> ConfigInstanceKey {
        ConfigInstanceKey::new(
            self.config_template_id,
            self.cc_process_id,
            self.module_inst_seq,
        )
    }
}

/// 进程元数据快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: u32,
    pub biz_id: u32,
    pub cc_process_id: u32,
    pub set_name: String,
    pub module_name: String,
    pub service_name: String,
    pub environment: String,
    pub alias: String,
    pub func_name: String,
    pub inner_ip: String,
    pub agent_id: String,
    pub cloud_id: i64,
    /// 进程原始配置 (JSON)，包含 work_path / pid_file 等字段
    pub source_data: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub host_inst_seq: u32,
    pub module_inst_seq: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigTemplate {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePermission {
    pub user: String,
    pub user_group: String,
    pub privilege: String,
}

/// 模板的一个不可变版本
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateRevision {
    pub id: u32,
    pub template_space_id: u32,
    pub file_name: String,
    pub file_path: String,
    pub permission: FilePermission,
    /// 内容仓库中模板正文的 sha256 签名
    pub content_signature: String,
}
