//! 操作计划文件
//!
//! 计划文件描述一个业务下的配置模板与目标进程，模板与进程两两组合成配置目标。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use orchestrator_dispatcher::ConfigTarget;
use orchestrator_domain::{
    ConfigTemplate, ContentScope, FilePermission, Process, ProcessInstance, TemplateRevision,
};
use orchestrator_infrastructure::FsContentRepository;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct PlanFile {
    pub biz_id: u32,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default)]
    pub environment: String,
    pub templates: Vec<PlanTemplate>,
    pub processes: Vec<PlanProcess>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanTemplate {
    pub id: u32,
    pub name: String,
    #[serde(default = "default_one")]
    pub template_space_id: u32,
    #[serde(default = "default_one")]
    pub revision_id: u32,
    /// 目标文件名，可以包含 `${...}` 变量
    pub file_name: String,
    pub file_path: String,
    /// 模板正文所在文件，相对路径以计划文件所在目录为基准
    pub source: PathBuf,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_user")]
    pub user_group: String,
    #[serde(default = "default_privilege")]
    pub privilege: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanProcess {
    pub cc_process_id: u32,
    pub agent_id: String,
    pub alias: String,
    #[serde(default)]
    pub set_name: String,
    #[serde(default)]
    pub module_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub func_name: String,
    #[serde(default)]
    pub inner_ip: String,
    #[serde(default)]
    pub cloud_id: i64,
    /// 进程原始配置 (JSON)
    #[serde(default = "default_source_data")]
    pub source_data: String,
    #[serde(default = "default_one")]
    pub host_inst_seq: u32,
    #[serde(default = "default_one")]
    pub module_inst_seq: u32,
}

fn default_operator() -> String {
    "admin".to_string()
}

fn default_one() -> u32 {
    1
}

fn default_user() -> String {
    "root".to_string()
}

fn default_privilege() -> String {
    "0644".to_string()
}

fn default_source_data() -> String {
    "{}".to_string()
}

impl PlanFile {
    /// 读取计划文件，返回计划与其所在目录
    pub fn load(path: &Path) -> Result<(Self, PathBuf)> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取计划文件失败: {}", path.display()))?;
        let plan = Self::from_toml(&text)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok((plan, base_dir))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let plan: PlanFile = toml::from_str(text).context("解析计划文件失败")?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<()> {
        if self.biz_id == 0 {
            return Err(anyhow::anyhow!("业务ID不能为0"));
        }
        if self.templates.is_empty() {
            return Err(anyhow::anyhow!("计划中没有配置模板"));
        }
        if self.processes.is_empty() {
            return Err(anyhow::anyhow!("计划中没有目标进程"));
        }
        Ok(())
    }

    /// 上传模板正文并展开为配置目标
    pub async fn prepare_targets(
        &self,
        base_dir: &Path,
        content: &FsContentRepository,
    ) -> Result<Vec<ConfigTarget>> {
        let mut revisions = Vec::with_capacity(self.templates.len());
        for template in &self.templates {
            let source = if template.source.is_absolute() {
                template.source.clone()
            } else {
                base_dir.join(&template.source)
            };
            let body = tokio::fs::read(&source)
                .await
                .with_context(|| format!("读取模板正文失败: {}", source.display()))?;

            let scope = ContentScope {
                biz_id: self.biz_id,
                template_space_id: template.template_space_id,
            };
            let signature = content.upload(&scope, &body).await?;
            debug!("模板 {} 已上传, signature={}", template.name, signature);

            revisions.push((
                ConfigTemplate {
                    id: template.id,
                    name: template.name.clone(),
                },
                TemplateRevision {
                    id: template.revision_id,
                    template_space_id: template.template_space_id,
                    file_name: template.file_name.clone(),
                    file_path: template.file_path.clone(),
                    permission: FilePermission {
                        user: template.user.clone(),
                        user_group: template.user_group.clone(),
                        privilege: template.privilege.clone(),
                    },
                    content_signature: signature,
                },
            ));
        }

        let mut targets = Vec::with_capacity(revisions.len() * self.processes.len());
        for (template, revision) in &revisions {
            for process in &self.processes {
                targets.push(ConfigTarget {
                    template: template.clone(),
                    revision: revision.clone(),
                    process: process.to_process(self.biz_id, &self.environment),
                    instance: ProcessInstance {
                        host_inst_seq: process.host_inst_seq,
                        module_inst_seq: process.module_inst_seq,
                    },
                });
            }
        }
        Ok(targets)
    }
}

impl PlanProcess {
    fn to_process(&self, biz_id: u32, environment: &str) -> Process {
        Process {
            id: self.cc_process_id,
            biz_id,
            cc_process_id: self.cc_process_id,
            set_name: self.set_name.clone(),
            module_name: self.module_name.clone(),
            service_name: self.service_name.clone(),
            environment: environment.to_string(),
            alias: self.alias.clone(),
            func_name: self.func_name.clone(),
            inner_ip: self.inner_ip.clone(),
            agent_id: self.agent_id.clone(),
            cloud_id: self.cloud_id,
            source_data: self.source_data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_domain::ContentRepository;

    const PLAN: &str = r#"
        biz_id = 2
        environment = "production"

        [[templates]]
        id = 7
        name = "nginx.conf"
        template_space_id = 5
        file_name = "nginx_${inst_id}.conf"
        file_path = "/etc/nginx"
        source = "nginx.conf.tpl"

        [[processes]]
        cc_process_id = 3001
        agent_id = "agent-1"
        alias = "nginx"
        module_inst_seq = 1

        [[processes]]
        cc_process_id = 3002
        agent_id = "agent-2"
        alias = "nginx"
        module_inst_seq = 2
    "#;

    #[test]
    fn test_parse_with_defaults() {
        let plan = PlanFile::from_toml(PLAN).unwrap();
        assert_eq!(plan.operator, "admin");
        assert_eq!(plan.templates[0].revision_id, 1);
        assert_eq!(plan.templates[0].privilege, "0644");
        assert_eq!(plan.processes[0].host_inst_seq, 1);
        assert_eq!(plan.processes[1].source_data, "{}");
    }

    #[test]
    fn test_empty_sections_rejected() {
        assert!(PlanFile::from_toml("biz_id = 2\ntemplates = []\nprocesses = []\n").is_err());
    }

    #[tokio::test]
    async fn test_prepare_targets_uploads_templates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nginx.conf.tpl"), "listen ${inst_id};\n").unwrap();
        let content = FsContentRepository::new(dir.path().join("content"));

        let plan = PlanFile::from_toml(PLAN).unwrap();
        let targets = plan.prepare_targets(dir.path(), &content).await.unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].instance.module_inst_seq, 2);
        assert_eq!(targets[0].process.environment, "production");

        let scope = ContentScope {
            biz_id: 2,
            template_space_id: 5,
        };
        let body = content
            .download(&scope, &targets[0].revision.content_signature)
            .await
            .unwrap();
        assert_eq!(body, b"listen ${inst_id};\n");
    }
}
