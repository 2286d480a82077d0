//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::Utc;
use md5::{Digest, Md5};
use orchestrator_domain::{
    ConfigInstance, ConfigTemplate, FilePermission, Process, ProcessInstance, TaskAction,
    TaskBatch, TaskExecutionData, TaskObject, TemplateRevision,
};
use sha2::Sha256;

/// Builder for creating test Process entities
pub struct ProcessBuilder {
    process: Process,
}

impl ProcessBuilder {
    pub fn new() -> Self {
        Self {
            process: Process {
                id: 1,
                biz_id: 2,
                cc_process_id: 3001,
                set_name: "set-a".to_string(),
                module_name: "web-module".to_string(),
                service_name: "svc-1".to_string(),
                environment: "production".to_string(),
                alias: "nginx".to_string(),
                func_name: "nginx".to_string(),
                inner_ip: "10.0.0.1".to_string(),
                agent_id: "agent-1".to_string(),
                cloud_id: 0,
                source_data: r#"{"work_path":"/data/nginx","pid_file":"/var/run/nginx.pid"}"#
                    .to_string(),
            },
        }
    }

    pub fn with_cc_process_id(mut self, cc_process_id: u32) -> Self {
        self.process.cc_process_id = cc_process_id;
        self
    }

    pub fn with_agent_id(mut self, agent_id: &str) -> Self {
        self.process.agent_id = agent_id.to_string();
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.process.alias = alias.to_string();
        self
    }

    pub fn with_inner_ip(mut self, inner_ip: &str) -> Self {
        self.process.inner_ip = inner_ip.to_string();
        self
    }

    pub fn build(self) -> Process {
        self.process
    }
}

impl Default for ProcessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test TemplateRevision entities
pub struct TemplateRevisionBuilder {
    revision: TemplateRevision,
}

impl TemplateRevisionBuilder {
    pub fn new() -> Self {
        Self {
            revision: TemplateRevision {
                id: 11,
                template_space_id: 5,
                file_name: "app.conf".to_string(),
                file_path: "/etc/app".to_string(),
                permission: FilePermission {
                    user: "root".to_string(),
                    user_group: "root".to_string(),
                    privilege: "0644".to_string(),
                },
                content_signature: String::new(),
            },
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.revision.id = id;
        self
    }

    pub fn with_file_name(mut self, file_name: &str) -> Self {
        self.revision.file_name = file_name.to_string();
        self
    }

    pub fn with_file_path(mut self, file_path: &str) -> Self {
        self.revision.file_path = file_path.to_string();
        self
    }

    /// Sets the signature to the sha256 of the given template body
    pub fn with_content(mut self, content: &str) -> Self {
        self.revision.content_signature = sha256_hex(content.as_bytes());
        self
    }

    pub fn build(self) -> TemplateRevision {
        self.revision
    }
}

impl Default for TemplateRevisionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test TaskBatch entities
pub struct TaskBatchBuilder {
    biz_id: u32,
    action: TaskAction,
    data: TaskExecutionData,
    total: u32,
    creator: String,
}

impl TaskBatchBuilder {
    pub fn new() -> Self {
        Self {
            biz_id: 2,
            action: TaskAction::ConfigCheck,
            data: TaskExecutionData::default(),
            total: 1,
            creator: "admin".to_string(),
        }
    }

    pub fn with_biz_id(mut self, biz_id: u32) -> Self {
        self.biz_id = biz_id;
        self
    }

    pub fn with_action(mut self, action: TaskAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_total(mut self, total: u32) -> Self {
        self.total = total;
        self
    }

    pub fn with_template_ids(mut self, ids: Vec<u32>) -> Self {
        self.data.config_template_ids = ids;
        self
    }

    pub fn build(self) -> TaskBatch {
        TaskBatch::new(
            self.biz_id,
            TaskObject::ConfigFile,
            self.action,
            &self.data,
            self.total,
            self.creator,
        )
        .expect("execution data serializes")
    }
}

impl Default for TaskBatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn config_template(id: u32, name: &str) -> ConfigTemplate {
    ConfigTemplate {
        id,
        name: name.to_string(),
    }
}

pub fn process_instance(host_inst_seq: u32, module_inst_seq: u32) -> ProcessInstance {
    ProcessInstance {
        host_inst_seq,
        module_inst_seq,
    }
}

/// A stored config instance whose md5 matches `content`
pub fn config_instance(
    biz_id: u32,
    config_template_id: u32,
    cc_process_id: u32,
    module_inst_seq: u32,
    content: &str,
) -> ConfigInstance {
    let now = Utc::now();
    ConfigInstance {
        id: 0,
        biz_id,
        config_template_id,
        config_version_id: 11,
        cc_process_id,
        module_inst_seq,
        generate_task_id: "seed".to_string(),
        md5: md5_hex(content.as_bytes()),
        content: content.to_string(),
        tenant_id: String::new(),
        creator: "admin".to_string(),
        reviser: "admin".to_string(),
        created_at: now,
        updated_at: now,
    }
}

pub fn md5_hex(content: &[u8]) -> String {
    format!("{:x}", Md5::digest(content))
}

pub fn sha256_hex(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}
