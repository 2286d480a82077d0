//! 任务负载模型
//!
//! `CommonPayload` 在一个任务的各个步骤之间传递，也会整体转交给依赖它的下发任务。

use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entities::{
    ConfigInstanceKey, ConfigTemplate, Process, ProcessInstance, TemplateRevision,
};

/// 配置比对结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareStatus {
    #[default]
    Unknown,
    NeverPublished,
    Same,
    Different,
}

impl fmt::Display for CompareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareStatus::Unknown => "UNKNOWN",
            CompareStatus::NeverPublished => "NEVER_PUBLISHED",
            CompareStatus::Same => "SAME",
            CompareStatus::Different => "DIFFERENT",
        };
        f.write_str(s)
    }
}

/// 目标进程实例在任务构建时的快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessPayload {
    pub set_name: String,
    pub module_name: String,
    pub service_name: String,
    pub environment: String,
    pub alias: String,
    pub func_name: String,
    pub inner_ip: String,
    pub agent_id: String,
    pub cloud_id: i64,
    pub cc_process_id: u32,
    pub host_inst_seq: u32,
    pub module_inst_seq: u32,
    pub config_data: String,
}

impl ProcessPayload {
    pub fn from_process(process: &Process, instance: &ProcessInstance) -> Self {
        Self {
            set_name: process.set_name.clone(),
            module_name: process.module_name.clone(),
            service_name: process.service_name.clone(),
            environment: process.environment.clone(),
            alias: process.alias.clone(),
            func_name: process.func_name.clone(),
            inner_ip: process.inner_ip.clone(),
            agent_id: process.agent_id.clone(),
            cloud_id: process.cloud_id,
            cc_process_id: process.cc_process_id,
            host_inst_seq: instance.host_inst_seq,
            module_inst_seq: instance.module_inst_seq,
            config_data: process.source_data.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPayload {
    pub config_template_id: u32,
    pub config_template_version_id: u32,
    pub config_template_name: String,
    pub config_file_name: String,
    pub config_file_path: String,
    pub config_file_owner: String,
    pub config_file_group: String,
    pub config_file_permission: String,
    pub config_instance_key: String,
    pub config_content: String,
    pub config_content_signature: String,
    pub compare_status: CompareStatus,
    /// 最近一次文件传输作业ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_job_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonPayload {
    pub process_payload: Option<ProcessPayload>,
    pub config_payload: Option<ConfigPayload>,
}

impl CommonPayload {
    /// 根据模板与进程实例构建配置任务的初始负载
    pub fn for_config_task(
        template: &ConfigTemplate,
        revision: &TemplateRevision,
        process: &Process,
        instance: &ProcessInstance,
    ) -> Self {
        let key = ConfigInstanceKey::new(
            template.id,
            process.cc_process_id,
            instance.module_inst_seq,
        );

        Self {
            process_payload: Some(ProcessPayload::from_process(process, instance)),
            config_payload: Some(ConfigPayload {
                config_template_id: template.id,
                config_template_version_id: revision.id,
                config_template_name: template.name.clone(),
                config_file_name: revision.file_name.clone(),
                config_file_path: revision.file_path.clone(),
                config_file_owner: revision.permission.user.clone(),
                config_file_group: revision.permission.user_group.clone(),
                config_file_permission: revision.permission.privilege.clone(),
                config_instance_key: key.to_string(),
                ..Default::default()
            }),
        }
    }

    pub fn process(&self) -> OrchestratorResult<&ProcessPayload> {
        self.process_payload
            .as_ref()
            .ok_or_else(|| OrchestratorError::payload("process payload is missing"))
    }

    pub fn config(&self) -> OrchestratorResult<&ConfigPayload> {
        self.config_payload
            .as_ref()
            .ok_or_else(|| OrchestratorError::payload("config payload is missing"))
    }

    pub fn config_mut(&mut self) -> OrchestratorResult<&mut ConfigPayload> {
        self.config_payload
            .as_mut()
            .ok_or_else(|| OrchestratorError::payload("config payload is missing"))
    }

    pub fn instance_key(&self) -> OrchestratorResult<ConfigInstanceKey> {
        let process = self.process()?;
        let config = self.config()?;
        Ok(ConfigInstanceKey::new(
            config.config_template_id,
            process.cc_process_id,
            process.module_inst_seq,
        ))
    }
}
