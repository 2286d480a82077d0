//! 任务构建器：描述一个目标上要执行的步骤、初始负载和完成回调
//!
//! 构建器不做任何 I/O，构建失败的目标由批次服务直接计入失败数。

pub mod config_check;
pub mod config_generate;
pub mod config_push;

pub use config_check::ConfigCheckTaskBuilder;
pub use config_generate::ConfigGenerateTaskBuilder;
pub use config_push::{ConfigPushTaskBuilder, PushDelivery};

use std::time::Duration;

use orchestrator_core::WorkerConfig;
use orchestrator_domain::{
    ConfigTemplate, Process, ProcessInstance, Step, Task, TaskAction, TaskInfo, TemplateRevision,
    TASK_INDEX_TYPE,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};

pub trait TaskBuilder: Send + Sync {
    fn task_info(&self) -> TaskInfo;
    fn steps(&self) -> OrchestratorResult<Vec<Step>>;
    /// 设置共享负载与回调
    fn finalize_task(&self, task: &mut Task) -> OrchestratorResult<()>;
}

/// 按 steps -> new -> finalize 的顺序组装任务
pub fn build_task(builder: &dyn TaskBuilder) -> OrchestratorResult<Task> {
    let steps = builder.steps()?;
    let info = builder.task_info();
    if steps.is_empty() {
        return Err(OrchestratorError::validation_error(format!(
            "任务 {} 没有任何步骤",
            info.task_name
        )));
    }

    let mut task = Task::new(info, steps);
    builder.finalize_task(&mut task)?;

    if !task.has_common_payload() {
        return Err(OrchestratorError::payload(format!(
            "任务 {} 未设置共享负载",
            task.info().task_name
        )));
    }
    if task.callback().is_none() {
        return Err(OrchestratorError::config_error(format!(
            "任务 {} 未设置回调",
            task.info().task_name
        )));
    }
    Ok(task)
}

/// 配置类任务共享的构建参数
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTaskOptions {
    pub biz_id: u32,
    pub batch_id: i64,
    pub operate_type: TaskAction,
    pub operator_user: String,
    pub step_timeout: Duration,
    pub generate_timeout: Duration,
    pub max_tries: u32,
}

impl ConfigTaskOptions {
    pub fn new(
        biz_id: u32,
        batch_id: i64,
        operate_type: TaskAction,
        operator_user: impl Into<String>,
    ) -> Self {
        let defaults = WorkerConfig::default();
        Self {
            biz_id,
            batch_id,
            operate_type,
            operator_user: operator_user.into(),
            step_timeout: Duration::from_secs(defaults.step_timeout_seconds),
            generate_timeout: Duration::from_secs(defaults.generate_timeout_seconds),
            max_tries: 0,
        }
    }

    pub fn with_worker_config(mut self, config: &WorkerConfig) -> Self {
        self.step_timeout = Duration::from_secs(config.step_timeout_seconds);
        self.generate_timeout = Duration::from_secs(config.generate_timeout_seconds);
        self
    }

    pub(crate) fn task_info(&self, task_name: String, task_type: &str) -> TaskInfo {
        TaskInfo {
            task_name,
            task_type: task_type.to_string(),
            task_index_type: TASK_INDEX_TYPE.to_string(),
            task_index: self.batch_id.to_string(),
            creator: self.operator_user.clone(),
        }
    }
}

/// 一个配置模板在一个进程实例上的作业目标
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTarget {
    pub template: ConfigTemplate,
    pub revision: TemplateRevision,
    pub process: Process,
    pub instance: ProcessInstance,
}

impl ConfigTarget {
    /// `{action}_{templateName}_{processAlias}_{moduleInstSeq}`
    pub(crate) fn task_name(&self, action: TaskAction) -> String {
        format!(
            "{}_{}_{}_{}",
            action, self.template.name, self.process.alias, self.instance.module_inst_seq
        )
    }

    pub(crate) fn validate(&self) -> OrchestratorResult<()> {
        if self.template.id == 0 {
            return Err(OrchestratorError::validation_error("config template id not set"));
        }
        if self.process.cc_process_id == 0 {
            return Err(OrchestratorError::validation_error(format!(
                "process {} has no cc process id",
                self.process.alias
            )));
        }
        if self.process.agent_id.is_empty() {
            return Err(OrchestratorError::validation_error(format!(
                "process {} has no agent id",
                self.process.alias
            )));
        }
        Ok(())
    }
}
