use std::collections::HashMap;
use std::sync::Arc;

use orchestrator_errors::{OrchestratorError, OrchestratorResult};

use crate::traits::{StepExecutor, TaskCallback};

/// 步骤名 -> 执行器、回调名 -> 回调 的注册表
///
/// 启动时构建一次，之后以 `Arc` 共享给运行时。
#[derive(Default)]
pub struct ExecutorRegistry {
    steps: HashMap<String, Arc<dyn StepExecutor>>,
    callbacks: HashMap<String, Arc<dyn TaskCallback>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_step(
        &mut self,
        name: impl Into<String>,
        executor: Arc<dyn StepExecutor>,
    ) -> OrchestratorResult<()> {
        let name = name.into();
        if self.steps.contains_key(&name) {
            return Err(OrchestratorError::config_error(format!(
                "步骤执行器重复注册: {name}"
            )));
        }
        self.steps.insert(name, executor);
        Ok(())
    }

    pub fn register_callback(
        &mut self,
        name: impl Into<String>,
        callback: Arc<dyn TaskCallback>,
    ) -> OrchestratorResult<()> {
        let name = name.into();
        if self.callbacks.contains_key(&name) {
            return Err(OrchestratorError::config_error(format!(
                "回调重复注册: {name}"
            )));
        }
        self.callbacks.insert(name, callback);
        Ok(())
    }

    pub fn step(&self, name: &str) -> OrchestratorResult<Arc<dyn StepExecutor>> {
        self.steps
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownStep(name.to_string()))
    }

    pub fn callback(&self, name: &str) -> OrchestratorResult<Arc<dyn TaskCallback>> {
        self.callbacks
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownCallback(name.to_string()))
    }

    pub fn contains_step(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn list_steps(&self) -> Vec<String> {
        let mut names: Vec<String> = self.steps.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_callbacks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.callbacks.keys().cloned().collect();
        names.sort();
        names
    }
}
