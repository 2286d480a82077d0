use orchestrator_domain::{
    CommonPayload, GenerateConfigPayload, Step, StepPayload, Task, TaskInfo, GENERATE_CONFIG,
    GENERATE_CONFIG_CALLBACK, TASK_TYPE_CONFIG_GENERATE,
};
use orchestrator_errors::OrchestratorResult;

use super::{ConfigTarget, ConfigTaskOptions, TaskBuilder};

/// 按进程实例渲染模板，产出可下发的配置内容
pub struct ConfigGenerateTaskBuilder {
    options: ConfigTaskOptions,
    target: ConfigTarget,
}

impl ConfigGenerateTaskBuilder {
    pub fn new(options: ConfigTaskOptions, target: ConfigTarget) -> Self {
        Self { options, target }
    }
}

impl TaskBuilder for ConfigGenerateTaskBuilder {
    fn task_info(&self) -> TaskInfo {
        self.options.task_info(
            self.target.task_name(self.options.operate_type),
            TASK_TYPE_CONFIG_GENERATE,
        )
    }

    fn steps(&self) -> OrchestratorResult<Vec<Step>> {
        self.target.validate()?;
        let payload = StepPayload::GenerateConfig(GenerateConfigPayload {
            biz_id: self.options.biz_id,
            batch_id: self.options.batch_id,
            operate_type: self.options.operate_type,
            operator_user: self.options.operator_user.clone(),
            template_space_id: self.target.revision.template_space_id,
            content_signature: self.target.revision.content_signature.clone(),
        });

        Ok(vec![Step::new(GENERATE_CONFIG, payload)
            .with_alias("generate_config")
            .with_max_execution(self.options.generate_timeout)
            .with_max_tries(self.options.max_tries)])
    }

    fn finalize_task(&self, task: &mut Task) -> OrchestratorResult<()> {
        task.set_common_payload(CommonPayload::for_config_task(
            &self.target.template,
            &self.target.revision,
            &self.target.process,
            &self.target.instance,
        ));
        task.set_callback(GENERATE_CONFIG_CALLBACK);
        Ok(())
    }
}
