use orchestrator_domain::{
    PushConfigPayload, Step, StepPayload, Task, TaskInfo, UpstreamTaskOutput, DOWNLOAD_CONFIG,
    PUSH_CONFIG, PUSH_CONFIG_CALLBACK, RELEASE_CONFIG, TASK_TYPE_CONFIG_PUSH,
    VALIDATE_PUSH_CONFIG,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};

use super::{ConfigTaskOptions, TaskBuilder};

/// 配置文件送达目标主机的方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushDelivery {
    /// 暂存到服务端后通过文件传输下发
    #[default]
    FileTransfer,
    /// 内容内嵌到脚本中直接写入
    Script,
}

/// 下发一个生成任务的产物，负载整体继承自生成任务
pub struct ConfigPushTaskBuilder {
    options: ConfigTaskOptions,
    upstream: UpstreamTaskOutput,
    delivery: PushDelivery,
}

impl ConfigPushTaskBuilder {
    pub fn new(
        options: ConfigTaskOptions,
        upstream: UpstreamTaskOutput,
        delivery: PushDelivery,
    ) -> Self {
        Self {
            options,
            upstream,
            delivery,
        }
    }

    fn step(&self, name: &str, alias: &str) -> Step {
        let payload = StepPayload::PushConfig(PushConfigPayload {
            biz_id: self.options.biz_id,
            batch_id: self.options.batch_id,
            operate_type: self.options.operate_type,
            operator_user: self.options.operator_user.clone(),
            generate_task_id: self.upstream.task_id.clone(),
        });
        Step::new(name, payload)
            .with_alias(alias)
            .with_max_execution(self.options.step_timeout)
            .with_max_tries(self.options.max_tries)
    }
}

impl TaskBuilder for ConfigPushTaskBuilder {
    fn task_info(&self) -> TaskInfo {
        let config_key = self
            .upstream
            .payload
            .config_payload
            .as_ref()
            .map(|c| c.config_instance_key.as_str())
            .unwrap_or_default();
        self.options.task_info(
            format!("{}_{}", self.options.operate_type, config_key),
            TASK_TYPE_CONFIG_PUSH,
        )
    }

    fn steps(&self) -> OrchestratorResult<Vec<Step>> {
        let common = self.upstream.payload.as_ref();
        common.process()?;
        if common.config()?.config_content_signature.is_empty() {
            return Err(OrchestratorError::payload(format!(
                "generate task {} produced no content signature",
                self.upstream.task_id
            )));
        }

        let validate = self.step(VALIDATE_PUSH_CONFIG, "validate_push_config");
        Ok(match self.delivery {
            PushDelivery::FileTransfer => vec![
                validate,
                self.step(DOWNLOAD_CONFIG, "download_config"),
                self.step(PUSH_CONFIG, "push_config_to_target"),
            ],
            PushDelivery::Script => vec![validate, self.step(RELEASE_CONFIG, "release_config")],
        })
    }

    fn finalize_task(&self, task: &mut Task) -> OrchestratorResult<()> {
        task.set_common_payload(self.upstream.payload.as_ref().clone());
        task.set_callback(PUSH_CONFIG_CALLBACK);
        Ok(())
    }
}
