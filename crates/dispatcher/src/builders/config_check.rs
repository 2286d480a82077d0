use orchestrator_domain::{
    CheckConfigPayload, CommonPayload, Step, StepPayload, Task, TaskInfo, CHECK_CONFIG_CALLBACK,
    CHECK_CONFIG_MD5, FETCH_CONFIG_CONTENT, TASK_TYPE_CONFIG_CHECK,
};
use orchestrator_errors::OrchestratorResult;

use super::{ConfigTarget, ConfigTaskOptions, TaskBuilder};

/// 比对目标主机上的配置文件：先算 md5，不一致时再读取内容
pub struct ConfigCheckTaskBuilder {
    options: ConfigTaskOptions,
    target: ConfigTarget,
}

impl ConfigCheckTaskBuilder {
    pub fn new(options: ConfigTaskOptions, target: ConfigTarget) -> Self {
        Self { options, target }
    }

    fn payload(&self) -> StepPayload {
        StepPayload::CheckConfig(CheckConfigPayload {
            biz_id: self.options.biz_id,
            batch_id: self.options.batch_id,
            operate_type: self.options.operate_type,
            operator_user: self.options.operator_user.clone(),
        })
    }
}

impl TaskBuilder for ConfigCheckTaskBuilder {
    fn task_info(&self) -> TaskInfo {
        self.options.task_info(
            self.target.task_name(self.options.operate_type),
            TASK_TYPE_CONFIG_CHECK,
        )
    }

    fn steps(&self) -> OrchestratorResult<Vec<Step>> {
        self.target.validate()?;
        Ok(vec![
            Step::new(CHECK_CONFIG_MD5, self.payload())
                .with_alias("check_config_md5")
                .with_max_execution(self.options.step_timeout)
                .with_max_tries(self.options.max_tries),
            // 仅在 md5 不一致时读取文件内容
            Step::new(FETCH_CONFIG_CONTENT, self.payload())
                .with_alias("fetch_config_content")
                .with_max_execution(self.options.step_timeout)
                .with_max_tries(self.options.max_tries),
        ])
    }

    fn finalize_task(&self, task: &mut Task) -> OrchestratorResult<()> {
        task.set_common_payload(CommonPayload::for_config_task(
            &self.target.template,
            &self.target.revision,
            &self.target.process,
            &self.target.instance,
        ));
        task.set_callback(CHECK_CONFIG_CALLBACK);
        Ok(())
    }
}
