use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use orchestrator_core::AppConfig;
use orchestrator_dispatcher::{ConfigBatchService, ConfigTaskMode, ConfigTaskRequest};
use orchestrator_domain::{TaskBatch, TaskBatchRepository};
use orchestrator_infrastructure::{
    DatabaseManager, FsContentRepository, LocalScriptExecutor, SqliteConfigInstanceRepository,
    SqliteTaskBatchRepository, StaticServerIdentity, VariableRenderer,
};
use orchestrator_worker::{
    register_config_executors, ConfigExecutorDeps, ExecutorRegistry, RemoteSettings, StagingArea,
    TaskReport, TaskRuntime,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::plan::PlanFile;

/// 计划的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Check,
    Generate,
    /// 先生成，再把生成结果下发到目标主机
    Push,
}

impl std::str::FromStr for PlanAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "check" => Ok(PlanAction::Check),
            "generate" => Ok(PlanAction::Generate),
            "push" => Ok(PlanAction::Push),
            other => Err(anyhow::anyhow!("不支持的操作: {other}")),
        }
    }
}

/// 一个批次的执行结果
pub struct BatchOutcome {
    pub batch: TaskBatch,
    pub reports: Vec<TaskReport>,
}

pub struct Application {
    database: DatabaseManager,
    task_batches: Arc<SqliteTaskBatchRepository>,
    content: Arc<FsContentRepository>,
    service: ConfigBatchService,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await?;

        let task_batches = Arc::new(SqliteTaskBatchRepository::new(database.pool().clone()));
        let config_instances =
            Arc::new(SqliteConfigInstanceRepository::new(database.pool().clone()));
        let content = Arc::new(FsContentRepository::new(&config.content.root_dir));

        let deps = Arc::new(ConfigExecutorDeps {
            task_batches: task_batches.clone(),
            config_instances,
            remote: Arc::new(LocalScriptExecutor::new()),
            content: content.clone(),
            renderer: Arc::new(VariableRenderer::new()),
            identity: Arc::new(StaticServerIdentity::new(config.remote.node_agent_id.clone())),
            staging: Arc::new(StagingArea::new(&config.staging.cache_dir)),
            settings: RemoteSettings::from_config(&config.remote),
        });

        let mut registry = ExecutorRegistry::new();
        register_config_executors(&mut registry, deps)?;
        let runtime = Arc::new(TaskRuntime::new(
            Arc::new(registry),
            config.worker.max_concurrent_tasks,
        ));

        let service = ConfigBatchService::new(
            task_batches.clone(),
            runtime,
            config.worker.clone(),
        );

        Ok(Self {
            database,
            task_batches,
            content,
            service,
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.service.shutdown_token()
    }

    /// 执行计划，按顺序返回涉及到的所有批次
    pub async fn run_plan(
        &self,
        plan: &PlanFile,
        base_dir: &Path,
        action: PlanAction,
    ) -> Result<Vec<BatchOutcome>> {
        let targets = plan.prepare_targets(base_dir, &self.content).await?;
        info!("计划展开为 {} 个配置目标", targets.len());

        let request = ConfigTaskRequest {
            biz_id: plan.biz_id,
            operator: plan.operator.clone(),
            environment: plan.environment.clone(),
            targets,
        };
        let mode = match action {
            PlanAction::Check => ConfigTaskMode::Check,
            PlanAction::Generate | PlanAction::Push => ConfigTaskMode::Generate,
        };

        let handle = self.service.submit_config_tasks(mode, request).await?;
        let batch_id = handle.batch_id;
        let reports = handle.wait().await?;
        let first = BatchOutcome {
            batch: self.service.get_batch(batch_id).await?,
            reports,
        };

        if action != PlanAction::Push {
            return Ok(vec![first]);
        }
        if first.reports.iter().all(|r| !r.is_success()) {
            warn!("生成批次 {} 没有成功的任务，跳过下发", batch_id);
            return Ok(vec![first]);
        }

        let handle = self.service.push_config(batch_id, &plan.operator).await?;
        let push_id = handle.batch_id;
        let reports = handle.wait().await?;
        let second = BatchOutcome {
            batch: self.service.get_batch(push_id).await?,
            reports,
        };
        Ok(vec![first, second])
    }

    pub async fn show_batch(&self, batch_id: i64) -> Result<TaskBatch> {
        self.task_batches
            .get_by_id(batch_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("任务批次不存在: {batch_id}"))
    }

    pub async fn close(&self) {
        self.database.close().await;
        info!("数据库连接已关闭");
    }
}
