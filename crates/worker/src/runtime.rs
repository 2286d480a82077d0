use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use orchestrator_core::metrics::{STEPS_TOTAL, TASKS_TOTAL};
use orchestrator_domain::{CommonPayload, Step, StepOutcome, Task, TaskInfo, UpstreamTaskOutput};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::executor_registry::ExecutorRegistry;
use crate::traits::{CallbackContext, StepContext, TaskCompletion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRunStatus::Succeeded => "succeeded",
            TaskRunStatus::Failed => "failed",
            TaskRunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Succeeded,
    Reported,
    Failed,
    NotRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub alias: String,
    pub status: StepRunStatus,
    pub attempts: u32,
    pub message: Option<String>,
}

/// 一个任务执行结束后的记录
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub info: TaskInfo,
    pub status: TaskRunStatus,
    pub steps: Vec<StepRecord>,
    pub reports: Vec<String>,
    pub error: Option<String>,
    pub callback_error: Option<String>,
    #[serde(skip)]
    pub common_payload: Option<CommonPayload>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskReport {
    /// 所有步骤成功且没有上报失败
    pub fn is_success(&self) -> bool {
        self.status == TaskRunStatus::Succeeded && self.reports.is_empty()
    }
}

/// 按任务索引（批次ID）归档的执行记录
#[derive(Clone, Default)]
pub struct TaskHistory {
    reports: Arc<RwLock<HashMap<String, Vec<TaskReport>>>>,
}

impl TaskHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, report: TaskReport) {
        let mut reports = self.reports.write().await;
        reports
            .entry(report.info.task_index.clone())
            .or_default()
            .push(report);
    }

    pub async fn reports_for(&self, task_index: &str) -> Vec<TaskReport> {
        let reports = self.reports.read().await;
        reports.get(task_index).cloned().unwrap_or_default()
    }

    /// 某个批次中成功完成的指定类型任务的输出
    pub async fn successful_outputs(
        &self,
        task_index: &str,
        task_type: &str,
    ) -> Vec<UpstreamTaskOutput> {
        let reports = self.reports.read().await;
        reports
            .get(task_index)
            .map(|list| {
                list.iter()
                    .filter(|r| r.is_success() && r.info.task_type == task_type)
                    .filter_map(|r| {
                        r.common_payload
                            .clone()
                            .map(|p| UpstreamTaskOutput::new(r.task_id.clone(), p))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// 任务运行时：按序执行步骤、提交检查点、调用完成回调
pub struct TaskRuntime {
    registry: Arc<ExecutorRegistry>,
    history: TaskHistory,
    max_concurrent_tasks: usize,
}

impl TaskRuntime {
    pub fn new(registry: Arc<ExecutorRegistry>, max_concurrent_tasks: usize) -> Self {
        Self {
            registry,
            history: TaskHistory::new(),
            max_concurrent_tasks: max_concurrent_tasks.max(1),
        }
    }

    pub fn history(&self) -> &TaskHistory {
        &self.history
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// 并发执行一组任务，并发度受 `max_concurrent_tasks` 限制
    pub async fn run_all(&self, tasks: Vec<Task>, cancel: CancellationToken) -> Vec<TaskReport> {
        stream::iter(tasks)
            .map(|task| self.run_task(task, cancel.clone()))
            .buffer_unordered(self.max_concurrent_tasks)
            .collect()
            .await
    }

    #[instrument(skip_all, fields(task_id = %task.id(), task_name = %task.info().task_name))]
    pub async fn run_task(&self, mut task: Task, cancel: CancellationToken) -> TaskReport {
        let started_at = Utc::now();
        let steps: Vec<Step> = task.steps().to_vec();
        let mut records = Vec::with_capacity(steps.len());
        let mut reports = Vec::new();
        let mut failure: Option<OrchestratorError> = None;

        for step in &steps {
            if failure.is_some() {
                records.push(StepRecord {
                    name: step.name.clone(),
                    alias: step.alias.clone(),
                    status: StepRunStatus::NotRun,
                    attempts: 0,
                    message: None,
                });
                continue;
            }

            let (result, attempts) = self.run_step(&mut task, step, &cancel).await;
            let (status, message) = match result {
                Ok(StepOutcome::Completed) => (StepRunStatus::Succeeded, None),
                Ok(StepOutcome::Reported(message)) => {
                    warn!("步骤 {} 上报失败: {}", step.name, message);
                    reports.push(message.clone());
                    (StepRunStatus::Reported, Some(message))
                }
                Err(e) => {
                    error!("步骤 {} 执行失败: {}", step.name, e);
                    let message = e.to_string();
                    failure = Some(e);
                    (StepRunStatus::Failed, Some(message))
                }
            };
            records.push(StepRecord {
                name: step.name.clone(),
                alias: step.alias.clone(),
                status,
                attempts,
                message,
            });
        }

        let status = match &failure {
            None => TaskRunStatus::Succeeded,
            Some(OrchestratorError::Cancelled(_)) => TaskRunStatus::Cancelled,
            Some(_) => TaskRunStatus::Failed,
        };
        let error = failure.as_ref().map(|e| e.to_string());
        let completion = TaskCompletion {
            error: failure,
            reports: reports.clone(),
        };

        let callback_error = match self.invoke_callback(&task, &steps, &completion).await {
            Ok(()) => None,
            Err(e) => {
                error!("任务 {} 回调执行失败: {}", task.id(), e);
                Some(e.to_string())
            }
        };

        let outcome = if completion.is_success() {
            "success"
        } else {
            "failure"
        };
        counter!(TASKS_TOTAL, "task_type" => task.info().task_type.clone(), "outcome" => outcome)
            .increment(1);

        let report = TaskReport {
            task_id: task.id().to_string(),
            info: task.info().clone(),
            status,
            steps: records,
            reports,
            error,
            callback_error,
            common_payload: task.get_common_payload().ok(),
            started_at,
            finished_at: Utc::now(),
        };

        if report.is_success() {
            info!("任务 {} 执行成功", report.task_id);
        } else {
            warn!(
                "任务 {} 执行结束: status={}, error={:?}, reports={:?}",
                report.task_id,
                report.status.as_str(),
                report.error,
                report.reports
            );
        }

        self.history.record(report.clone()).await;
        report
    }

    /// 执行单个步骤，返回结果与实际尝试次数
    async fn run_step(
        &self,
        task: &mut Task,
        step: &Step,
        cancel: &CancellationToken,
    ) -> (OrchestratorResult<StepOutcome>, u32) {
        let executor = match self.registry.step(&step.name) {
            Ok(executor) => executor,
            Err(e) => return (Err(e), 0),
        };

        let attempts = step.attempts();
        let mut last_error =
            OrchestratorError::Internal(format!("步骤 {} 未执行", step.name));

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return (
                    Err(OrchestratorError::Cancelled(format!("步骤 {}", step.name))),
                    attempt - 1,
                );
            }

            debug!("执行步骤 {} (第 {}/{} 次)", step.name, attempt, attempts);
            let step_cancel = cancel.child_token();
            let mut ctx = StepContext::new(
                task.id(),
                step.name.clone(),
                step.payload.clone(),
                task.get_common_payload().ok(),
                step_cancel.clone(),
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    Err(OrchestratorError::Cancelled(format!("步骤 {}", step.name)))
                }
                r = tokio::time::timeout(step.max_execution, executor.execute(&mut ctx)) => match r {
                    Ok(inner) => inner,
                    Err(_) => Err(OrchestratorError::timeout(format!(
                        "步骤 {} 执行超过 {:?}",
                        step.name, step.max_execution
                    ))),
                },
            };
            step_cancel.cancel();

            match result {
                Ok(outcome) => {
                    if let Some(payload) = ctx.into_common_payload() {
                        task.set_common_payload(payload);
                    }
                    let label = match outcome {
                        StepOutcome::Completed => "success",
                        StepOutcome::Reported(_) => "reported",
                    };
                    counter!(STEPS_TOTAL, "step" => step.name.clone(), "outcome" => label)
                        .increment(1);
                    return (Ok(outcome), attempt);
                }
                Err(e) => {
                    counter!(STEPS_TOTAL, "step" => step.name.clone(), "outcome" => "failure")
                        .increment(1);
                    if matches!(e, OrchestratorError::Cancelled(_)) || e.is_fatal() {
                        return (Err(e), attempt);
                    }
                    if attempt < attempts {
                        warn!(
                            "步骤 {} 第 {} 次执行失败，准备重试: {}",
                            step.name, attempt, e
                        );
                    }
                    last_error = e;
                }
            }
        }

        (Err(last_error), attempts)
    }

    async fn invoke_callback(
        &self,
        task: &Task,
        steps: &[Step],
        completion: &TaskCompletion,
    ) -> OrchestratorResult<()> {
        let Some(name) = task.callback() else {
            return Ok(());
        };
        let callback = self.registry.callback(name)?;
        let ctx = CallbackContext {
            task_id: task.id().to_string(),
            info: task.info().clone(),
            payload: steps.last().map(|s| s.payload.clone()),
            common_payload: task.get_common_payload().ok(),
        };
        callback.on_complete(&ctx, completion).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{StepExecutor, TaskCallback};
    use async_trait::async_trait;
    use orchestrator_domain::{
        CheckConfigPayload, ConfigPayload, StepPayload, TaskAction, TASK_INDEX_TYPE,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// 把 config_content 追加上自己的标记
    struct AppendStep(&'static str);

    #[async_trait]
    impl StepExecutor for AppendStep {
        async fn execute(&self, ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
            let mut common = ctx.get_common_payload()?;
            common.config_mut()?.config_content.push_str(self.0);
            ctx.set_common_payload(common);
            Ok(StepOutcome::Completed)
        }
    }

    /// 修改负载后失败，修改不应被提交
    struct DirtyFailStep;

    #[async_trait]
    impl StepExecutor for DirtyFailStep {
        async fn execute(&self, ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
            let mut common = ctx.get_common_payload()?;
            common.config_mut()?.config_content.push_str("dirty");
            ctx.set_common_payload(common);
            Err(OrchestratorError::remote_job("agent offline"))
        }
    }

    struct ReportStep;

    #[async_trait]
    impl StepExecutor for ReportStep {
        async fn execute(&self, _ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
            Ok(StepOutcome::Reported("config content inconsistent".to_string()))
        }
    }

    struct FlakyStep {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl StepExecutor for FlakyStep {
        async fn execute(&self, _ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(StepOutcome::Completed)
            } else {
                Err(OrchestratorError::remote_job("transient"))
            }
        }
    }

    struct SlowStep;

    #[async_trait]
    impl StepExecutor for SlowStep {
        async fn execute(&self, _ctx: &mut StepContext) -> OrchestratorResult<StepOutcome> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(StepOutcome::Completed)
        }
    }

    #[derive(Default)]
    struct RecordingCallback {
        outcomes: Mutex<Vec<(bool, Option<String>)>>,
    }

    #[async_trait]
    impl TaskCallback for RecordingCallback {
        async fn on_complete(
            &self,
            ctx: &CallbackContext,
            completion: &TaskCompletion,
        ) -> OrchestratorResult<()> {
            let content = ctx
                .common_payload()
                .ok()
                .and_then(|p| p.config_payload.as_ref())
                .map(|c| c.config_content.clone());
            self.outcomes
                .lock()
                .unwrap()
                .push((completion.is_success(), content));
            Ok(())
        }
    }

    fn step(name: &str) -> Step {
        Step::new(
            name,
            StepPayload::CheckConfig(CheckConfigPayload {
                biz_id: 1,
                batch_id: 7,
                operate_type: TaskAction::ConfigCheck,
                operator_user: "admin".to_string(),
            }),
        )
    }

    fn task(steps: Vec<Step>) -> Task {
        let info = TaskInfo {
            task_name: "test".to_string(),
            task_type: "config_check".to_string(),
            task_index_type: TASK_INDEX_TYPE.to_string(),
            task_index: "7".to_string(),
            creator: "admin".to_string(),
        };
        let mut task = Task::new(info, steps);
        task.set_common_payload(CommonPayload {
            process_payload: None,
            config_payload: Some(ConfigPayload::default()),
        });
        task.set_callback("Record");
        task
    }

    fn runtime(callback: Arc<RecordingCallback>) -> TaskRuntime {
        let mut registry = ExecutorRegistry::new();
        registry.register_step("A", Arc::new(AppendStep("a"))).unwrap();
        registry.register_step("B", Arc::new(AppendStep("b"))).unwrap();
        registry.register_step("Dirty", Arc::new(DirtyFailStep)).unwrap();
        registry.register_step("Report", Arc::new(ReportStep)).unwrap();
        registry.register_step("Slow", Arc::new(SlowStep)).unwrap();
        registry
            .register_step(
                "Flaky",
                Arc::new(FlakyStep {
                    calls: AtomicU32::new(0),
                    succeed_on: 3,
                }),
            )
            .unwrap();
        registry.register_callback("Record", callback).unwrap();
        TaskRuntime::new(Arc::new(registry), 4)
    }

    #[tokio::test]
    async fn test_steps_commit_payload_in_order() {
        let callback = Arc::new(RecordingCallback::default());
        let rt = runtime(callback.clone());

        let report = rt
            .run_task(task(vec![step("A"), step("B")]), CancellationToken::new())
            .await;

        assert!(report.is_success());
        assert_eq!(
            callback.outcomes.lock().unwrap().as_slice(),
            &[(true, Some("ab".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_failed_step_discards_uncommitted_changes_and_skips_rest() {
        let callback = Arc::new(RecordingCallback::default());
        let rt = runtime(callback.clone());

        let report = rt
            .run_task(
                task(vec![step("A"), step("Dirty"), step("B")]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(report.status, TaskRunStatus::Failed);
        assert_eq!(report.steps[2].status, StepRunStatus::NotRun);
        assert!(report.error.as_deref().unwrap().contains("agent offline"));
        assert_eq!(
            callback.outcomes.lock().unwrap().as_slice(),
            &[(false, Some("a".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_reported_outcome_fails_callback_but_not_task() {
        let callback = Arc::new(RecordingCallback::default());
        let rt = runtime(callback.clone());

        let report = rt
            .run_task(task(vec![step("A"), step("Report")]), CancellationToken::new())
            .await;

        assert_eq!(report.status, TaskRunStatus::Succeeded);
        assert!(!report.is_success());
        assert_eq!(report.reports, vec!["config content inconsistent".to_string()]);
        assert!(!callback.outcomes.lock().unwrap()[0].0);
    }

    #[tokio::test]
    async fn test_retries_up_to_max_tries() {
        let callback = Arc::new(RecordingCallback::default());
        let rt = runtime(callback);

        let report = rt
            .run_task(
                task(vec![step("Flaky").with_max_tries(3)]),
                CancellationToken::new(),
            )
            .await;

        assert!(report.is_success());
        assert_eq!(report.steps[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_step_timeout_fails_task() {
        let callback = Arc::new(RecordingCallback::default());
        let rt = runtime(callback.clone());

        let report = rt
            .run_task(
                task(vec![step("Slow").with_max_execution(Duration::from_millis(50))]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(report.status, TaskRunStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("超时"));
        assert_eq!(callback.outcomes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_step_and_cancellation() {
        let callback = Arc::new(RecordingCallback::default());
        let rt = runtime(callback);

        let report = rt
            .run_task(task(vec![step("Missing")]), CancellationToken::new())
            .await;
        assert_eq!(report.status, TaskRunStatus::Failed);
        assert_eq!(report.steps[0].attempts, 0);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = rt.run_task(task(vec![step("A")]), cancel).await;
        assert_eq!(report.status, TaskRunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_run_all_records_history() {
        let callback = Arc::new(RecordingCallback::default());
        let rt = runtime(callback.clone());

        let tasks = (0..6).map(|_| task(vec![step("A")])).collect();
        let reports = rt.run_all(tasks, CancellationToken::new()).await;

        assert_eq!(reports.len(), 6);
        assert_eq!(rt.history().reports_for("7").await.len(), 6);
        assert_eq!(
            rt.history()
                .successful_outputs("7", "config_check")
                .await
                .len(),
            6
        );
        assert_eq!(callback.outcomes.lock().unwrap().len(), 6);
    }
}
