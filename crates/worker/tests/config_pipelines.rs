use std::sync::Arc;
use std::time::Duration;

use orchestrator_domain::{
    CheckConfigPayload, CommonPayload, CompareStatus, ConfigInstanceKey, ContentScope,
    GenerateConfigPayload, Process, PushConfigPayload, Step, StepPayload, Task, TaskAction,
    TaskBatchRepository, TaskBatchStatus, TaskInfo, TemplateRevision, CHECK_CONFIG_CALLBACK,
    CHECK_CONFIG_MD5, DOWNLOAD_CONFIG, FETCH_CONFIG_CONTENT, GENERATE_CONFIG,
    GENERATE_CONFIG_CALLBACK, PUSH_CONFIG, PUSH_CONFIG_CALLBACK, RELEASE_CONFIG,
    TASK_INDEX_TYPE, VALIDATE_PUSH_CONFIG,
};
use orchestrator_testing_utils::{
    config_instance, config_template, md5_hex, process_instance, sha256_hex,
    MockConfigInstanceRepository, MockContentRepository, MockRemoteExecutor,
    MockServerIdentity, MockTaskBatchRepository, ProcessBuilder, SimpleTemplateRenderer,
    TaskBatchBuilder, TemplateRevisionBuilder,
};
use orchestrator_worker::{
    register_config_executors, ConfigExecutorDeps, ExecutorRegistry, PollPolicy, RemoteSettings,
    StagingArea, TaskRunStatus, TaskRuntime, TransferCompletion,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const BIZ_ID: u32 = 2;
const TEMPLATE_ID: u32 = 7;

struct Harness {
    batches: MockTaskBatchRepository,
    instances: MockConfigInstanceRepository,
    remote: MockRemoteExecutor,
    content: MockContentRepository,
    runtime: TaskRuntime,
    staging_dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_completion(TransferCompletion::Await)
    }

    fn with_completion(transfer_completion: TransferCompletion) -> Self {
        let batches = MockTaskBatchRepository::new();
        let instances = MockConfigInstanceRepository::new();
        let remote = MockRemoteExecutor::new();
        let content = MockContentRepository::new();
        let staging_dir = tempfile::tempdir().unwrap();

        let settings = RemoteSettings {
            poll: PollPolicy {
                interval: Duration::from_millis(5),
                max_wait: Duration::from_millis(300),
            },
            transfer_completion,
            ..RemoteSettings::default()
        };
        let deps = Arc::new(ConfigExecutorDeps {
            task_batches: Arc::new(batches.clone()),
            config_instances: Arc::new(instances.clone()),
            remote: Arc::new(remote.clone()),
            content: Arc::new(content.clone()),
            renderer: Arc::new(SimpleTemplateRenderer::new()),
            identity: Arc::new(MockServerIdentity::default()),
            staging: Arc::new(StagingArea::new(staging_dir.path())),
            settings,
        });

        let mut registry = ExecutorRegistry::new();
        register_config_executors(&mut registry, deps).unwrap();

        Self {
            batches,
            instances,
            remote,
            content,
            runtime: TaskRuntime::new(Arc::new(registry), 8),
            staging_dir,
        }
    }

    async fn batch(&self, action: TaskAction, total: u32) -> i64 {
        let batch = self
            .batches
            .create(
                &TaskBatchBuilder::new()
                    .with_biz_id(BIZ_ID)
                    .with_action(action)
                    .with_total(total)
                    .build(),
            )
            .await
            .unwrap();
        self.batches
            .update_status(batch.id, TaskBatchStatus::Running)
            .await
            .unwrap();
        batch.id
    }
}

fn info(task_type: &str, batch_id: i64) -> TaskInfo {
    TaskInfo {
        task_name: format!("{task_type}_test"),
        task_type: task_type.to_string(),
        task_index_type: TASK_INDEX_TYPE.to_string(),
        task_index: batch_id.to_string(),
        creator: "admin".to_string(),
    }
}

fn common(process: &Process, revision: &TemplateRevision, module_inst_seq: u32) -> CommonPayload {
    CommonPayload::for_config_task(
        &config_template(TEMPLATE_ID, "nginx.conf"),
        revision,
        process,
        &process_instance(1, module_inst_seq),
    )
}

fn check_task(batch_id: i64, common: CommonPayload) -> Task {
    let payload = StepPayload::CheckConfig(CheckConfigPayload {
        biz_id: BIZ_ID,
        batch_id,
        operate_type: TaskAction::ConfigCheck,
        operator_user: "admin".to_string(),
    });
    let mut task = Task::new(
        info("config_check", batch_id),
        vec![
            Step::new(CHECK_CONFIG_MD5, payload.clone()),
            Step::new(FETCH_CONFIG_CONTENT, payload),
        ],
    );
    task.set_common_payload(common);
    task.set_callback(CHECK_CONFIG_CALLBACK);
    task
}

fn generate_task(batch_id: i64, revision: &TemplateRevision, common: CommonPayload) -> Task {
    let payload = StepPayload::GenerateConfig(GenerateConfigPayload {
        biz_id: BIZ_ID,
        batch_id,
        operate_type: TaskAction::ConfigGenerate,
        operator_user: "admin".to_string(),
        template_space_id: revision.template_space_id,
        content_signature: revision.content_signature.clone(),
    });
    let mut task = Task::new(
        info("config_generate", batch_id),
        vec![Step::new(GENERATE_CONFIG, payload)],
    );
    task.set_common_payload(common);
    task.set_callback(GENERATE_CONFIG_CALLBACK);
    task
}

fn push_task(batch_id: i64, steps: &[&str], generate_task_id: &str, common: CommonPayload) -> Task {
    let payload = StepPayload::PushConfig(PushConfigPayload {
        biz_id: BIZ_ID,
        batch_id,
        operate_type: TaskAction::ConfigPublish,
        operator_user: "publisher".to_string(),
        generate_task_id: generate_task_id.to_string(),
    });
    let mut task = Task::new(
        info("config_push", batch_id),
        steps
            .iter()
            .map(|name| Step::new(*name, payload.clone()))
            .collect(),
    );
    task.set_common_payload(common);
    task.set_callback(PUSH_CONFIG_CALLBACK);
    task
}

#[tokio::test]
async fn check_reports_same_when_md5_matches() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigCheck, 1).await;
    let process = ProcessBuilder::new().build();
    h.instances
        .insert(config_instance(BIZ_ID, TEMPLATE_ID, process.cc_process_id, 1, "port=80\n"));
    h.remote.set_file(&process.agent_id, "port=80\n");

    let revision = TemplateRevisionBuilder::new().build();
    let report = h
        .runtime
        .run_task(check_task(batch_id, common(&process, &revision, 1)), CancellationToken::new())
        .await;

    assert!(report.is_success());
    let config = report.common_payload.unwrap().config_payload.unwrap();
    assert_eq!(config.compare_status, CompareStatus::Same);
    assert_eq!(config.config_content_signature, md5_hex(b"port=80\n"));
    // 内容一致时不会再读取文件
    assert_eq!(h.remote.submitted_scripts().len(), 1);

    let batch = h.batches.get(batch_id).unwrap();
    assert_eq!(batch.status, TaskBatchStatus::Success);
    assert_eq!(batch.success_count, 1);
}

#[tokio::test]
async fn check_drift_fetches_content_and_fails_target() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigCheck, 1).await;
    let process = ProcessBuilder::new().build();
    h.instances
        .insert(config_instance(BIZ_ID, TEMPLATE_ID, process.cc_process_id, 1, "port=80\n"));
    h.remote.set_file(&process.agent_id, "port=8080\n");

    let revision = TemplateRevisionBuilder::new().build();
    let report = h
        .runtime
        .run_task(check_task(batch_id, common(&process, &revision, 1)), CancellationToken::new())
        .await;

    assert_eq!(report.status, TaskRunStatus::Succeeded);
    assert_eq!(report.reports, vec!["config content inconsistent".to_string()]);
    let config = report.common_payload.as_ref().unwrap().config().unwrap();
    assert_eq!(config.compare_status, CompareStatus::Different);
    assert_eq!(config.config_content, "port=8080\n");

    let scripts = h.remote.submitted_scripts();
    assert_eq!(scripts.len(), 2);
    assert!(scripts[1].script_name.starts_with("bk_ges_cat_config_"));

    let batch = h.batches.get(batch_id).unwrap();
    assert_eq!(batch.status, TaskBatchStatus::Failed);
    assert_eq!(batch.failed_count, 1);
}

#[tokio::test]
async fn check_never_published_succeeds() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigCheck, 1).await;
    let process = ProcessBuilder::new().build();
    h.remote.set_file(&process.agent_id, "anything");

    let revision = TemplateRevisionBuilder::new().build();
    let report = h
        .runtime
        .run_task(check_task(batch_id, common(&process, &revision, 1)), CancellationToken::new())
        .await;

    assert!(report.is_success());
    let config = report.common_payload.unwrap().config_payload.unwrap();
    assert_eq!(config.compare_status, CompareStatus::NeverPublished);
    assert_eq!(
        h.batches.get(batch_id).unwrap().status,
        TaskBatchStatus::Success
    );
}

#[tokio::test]
async fn check_renders_file_name_before_reading() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigCheck, 1).await;
    let process = ProcessBuilder::new().build();
    let revision = TemplateRevisionBuilder::new()
        .with_file_name("config_${inst_id}.yaml")
        .with_file_path("/data/${bk_process_name}")
        .build();

    h.runtime
        .run_task(check_task(batch_id, common(&process, &revision, 2)), CancellationToken::new())
        .await;

    let scripts = h.remote.submitted_scripts();
    assert!(scripts[0]
        .script_content
        .contains("TARGET_PATH='/data/nginx/config_2.yaml'"));
    assert_eq!(scripts[0].agents[0].agent_id, "agent-1");
    assert_eq!(scripts[0].agents[0].user, "root");
}

#[tokio::test]
async fn check_script_failure_fails_target() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigCheck, 1).await;
    let process = ProcessBuilder::new().build();
    h.remote.fail_agent(&process.agent_id, 1, "No such file or directory");

    let revision = TemplateRevisionBuilder::new().build();
    let report = h
        .runtime
        .run_task(check_task(batch_id, common(&process, &revision, 1)), CancellationToken::new())
        .await;

    assert_eq!(report.status, TaskRunStatus::Failed);
    let error = report.error.unwrap();
    assert!(error.starts_with("script execution failed, agent=agent-1"));
    assert!(error.contains("code=1"));
    assert_eq!(h.batches.get(batch_id).unwrap().status, TaskBatchStatus::Failed);
}

#[tokio::test]
async fn check_times_out_when_job_never_finishes() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigCheck, 1).await;
    let process = ProcessBuilder::new().build();
    h.remote.set_never_finish(true);

    let revision = TemplateRevisionBuilder::new().build();
    let report = h
        .runtime
        .run_task(check_task(batch_id, common(&process, &revision, 1)), CancellationToken::new())
        .await;

    assert_eq!(report.status, TaskRunStatus::Failed);
    assert!(report.error.unwrap().contains("超时"));
    assert_eq!(h.batches.get(batch_id).unwrap().failed_count, 1);
}

#[tokio::test]
async fn three_targets_settle_partial_success() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigCheck, 3).await;
    let revision = TemplateRevisionBuilder::new().build();

    let mut tasks = Vec::new();
    for (i, agent) in ["agent-1", "agent-2", "agent-3"].iter().enumerate() {
        let process = ProcessBuilder::new()
            .with_cc_process_id(3001 + i as u32)
            .with_agent_id(agent)
            .build();
        h.instances
            .insert(config_instance(BIZ_ID, TEMPLATE_ID, process.cc_process_id, 1, "v1"));
        h.remote.set_file(agent, if i == 2 { "v2" } else { "v1" });
        tasks.push(check_task(batch_id, common(&process, &revision, 1)));
    }

    let reports = h.runtime.run_all(tasks, CancellationToken::new()).await;
    assert_eq!(reports.len(), 3);
    assert_eq!(reports.iter().filter(|r| r.is_success()).count(), 2);

    let batch = h.batches.get(batch_id).unwrap();
    assert_eq!(batch.completed_count, 3);
    assert_eq!(batch.success_count, 2);
    assert_eq!(batch.failed_count, 1);
    assert_eq!(batch.status, TaskBatchStatus::PartialSuccess);
    assert!(batch.end_at.is_some());
}

#[tokio::test]
async fn generate_renders_template_for_instance() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigGenerate, 1).await;
    let body = "listen ${bk_host_innerip}\nworker=${inst_id}\n";
    let revision = TemplateRevisionBuilder::new().with_content(body).build();
    h.content.insert(
        ContentScope {
            biz_id: BIZ_ID,
            template_space_id: revision.template_space_id,
        },
        &revision.content_signature,
        body.as_bytes(),
    );
    let process = ProcessBuilder::new().build();

    let report = h
        .runtime
        .run_task(
            generate_task(batch_id, &revision, common(&process, &revision, 2)),
            CancellationToken::new(),
        )
        .await;

    assert!(report.is_success());
    let config = report.common_payload.unwrap().config_payload.unwrap();
    assert_eq!(config.config_content, "listen 10.0.0.1\nworker=2\n");
    assert_eq!(
        config.config_content_signature,
        sha256_hex(b"listen 10.0.0.1\nworker=2\n")
    );
    assert_eq!(
        config.config_instance_key,
        ConfigInstanceKey::new(TEMPLATE_ID, 3001, 2).to_string()
    );
    assert_eq!(
        h.batches.get(batch_id).unwrap().status,
        TaskBatchStatus::Success
    );
}

#[tokio::test]
async fn generate_without_template_body_produces_empty_content() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigGenerate, 1).await;
    let revision = TemplateRevisionBuilder::new().build();
    let process = ProcessBuilder::new().build();

    let report = h
        .runtime
        .run_task(
            generate_task(batch_id, &revision, common(&process, &revision, 1)),
            CancellationToken::new(),
        )
        .await;

    assert!(report.is_success());
    let config = report.common_payload.unwrap().config_payload.unwrap();
    assert!(config.config_content.is_empty());
    assert_eq!(config.config_content_signature, sha256_hex(b""));
}

#[tokio::test]
async fn generate_fails_when_content_missing() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigGenerate, 1).await;
    let revision = TemplateRevisionBuilder::new().with_content("x=1").build();
    let process = ProcessBuilder::new().build();

    let report = h
        .runtime
        .run_task(
            generate_task(batch_id, &revision, common(&process, &revision, 1)),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(report.status, TaskRunStatus::Failed);
    assert_eq!(h.batches.get(batch_id).unwrap().status, TaskBatchStatus::Failed);
}

fn generated(content: &str) -> CommonPayload {
    let process = ProcessBuilder::new().build();
    let revision = TemplateRevisionBuilder::new().build();
    let mut payload = common(&process, &revision, 1);
    let config = payload.config_payload.as_mut().unwrap();
    config.config_content = content.to_string();
    config.config_content_signature = sha256_hex(content.as_bytes());
    payload
}

#[tokio::test]
async fn push_transfers_generated_content_and_records_instance() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigPublish, 1).await;
    let content = "port=80\n";

    let report = h
        .runtime
        .run_task(
            push_task(
                batch_id,
                &[VALIDATE_PUSH_CONFIG, DOWNLOAD_CONFIG, PUSH_CONFIG],
                "gen-task-1",
                generated(content),
            ),
            CancellationToken::new(),
        )
        .await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(h.remote.file("agent-1").as_deref(), Some(content));

    let transfers = h.remote.submitted_transfers();
    assert_eq!(transfers.len(), 1);
    let transfer = &transfers[0];
    assert_eq!(transfer.source.agents[0].agent_id, "server-agent");
    assert_eq!(
        transfer.source.store_dir,
        h.staging_dir.path().join("2").display().to_string()
    );
    assert_eq!(transfer.source.file_name, sha256_hex(content.as_bytes()));
    assert_eq!(transfer.target.store_dir, "/etc/app");
    assert_eq!(transfer.target.file_name, "app.conf");
    assert_eq!(transfer.target.agents[0].user, "root");
    assert!(transfer.auto_mkdir);

    let config = report.common_payload.unwrap().config_payload.unwrap();
    assert!(config.transfer_job_id.is_some());

    let instance = h
        .instances
        .find(&ConfigInstanceKey::new(TEMPLATE_ID, 3001, 1))
        .unwrap();
    assert_eq!(instance.md5, md5_hex(content.as_bytes()));
    assert_eq!(instance.content, content);
    assert_eq!(instance.generate_task_id, "gen-task-1");
    assert_eq!(instance.creator, "publisher");
    assert_eq!(
        h.batches.get(batch_id).unwrap().status,
        TaskBatchStatus::Success
    );
}

#[tokio::test]
async fn push_then_check_reports_same() {
    let h = Harness::new();
    let push_batch = h.batch(TaskAction::ConfigPublish, 1).await;
    h.runtime
        .run_task(
            push_task(
                push_batch,
                &[VALIDATE_PUSH_CONFIG, DOWNLOAD_CONFIG, PUSH_CONFIG],
                "gen-task-1",
                generated("a=1\n"),
            ),
            CancellationToken::new(),
        )
        .await;

    let check_batch = h.batch(TaskAction::ConfigCheck, 1).await;
    let process = ProcessBuilder::new().build();
    let revision = TemplateRevisionBuilder::new().build();
    let report = h
        .runtime
        .run_task(
            check_task(check_batch, common(&process, &revision, 1)),
            CancellationToken::new(),
        )
        .await;

    assert!(report.is_success());
    let config = report.common_payload.unwrap().config_payload.unwrap();
    assert_eq!(config.compare_status, CompareStatus::Same);
}

#[tokio::test]
async fn push_tolerates_transient_poll_errors() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigPublish, 1).await;
    h.remote.fail_next_polls(2);

    let report = h
        .runtime
        .run_task(
            push_task(
                batch_id,
                &[VALIDATE_PUSH_CONFIG, DOWNLOAD_CONFIG, PUSH_CONFIG],
                "gen-task-1",
                generated("x"),
            ),
            CancellationToken::new(),
        )
        .await;

    assert!(report.is_success(), "{:?}", report.error);
}

#[tokio::test]
async fn push_submit_only_does_not_wait() {
    let h = Harness::with_completion(TransferCompletion::SubmitOnly);
    let batch_id = h.batch(TaskAction::ConfigPublish, 1).await;
    h.remote.set_never_finish(true);

    let report = h
        .runtime
        .run_task(
            push_task(
                batch_id,
                &[VALIDATE_PUSH_CONFIG, DOWNLOAD_CONFIG, PUSH_CONFIG],
                "gen-task-1",
                generated("x"),
            ),
            CancellationToken::new(),
        )
        .await;

    assert!(report.is_success());
    assert_eq!(h.instances.count(), 1);
}

#[tokio::test]
async fn push_transfer_failure_skips_instance() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigPublish, 1).await;
    h.remote.fail_agent("agent-1", 3, "permission denied");

    let report = h
        .runtime
        .run_task(
            push_task(
                batch_id,
                &[VALIDATE_PUSH_CONFIG, DOWNLOAD_CONFIG, PUSH_CONFIG],
                "gen-task-1",
                generated("x"),
            ),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(report.status, TaskRunStatus::Failed);
    assert_eq!(
        report.error.as_deref(),
        Some("transfer failed, agent: agent-1, code: 3, msg: permission denied")
    );
    assert_eq!(h.instances.count(), 0);
    assert_eq!(h.batches.get(batch_id).unwrap().status, TaskBatchStatus::Failed);
}

#[tokio::test]
async fn validate_rejects_tampered_content() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigPublish, 1).await;
    let mut payload = generated("x");
    payload.config_payload.as_mut().unwrap().config_content = "y".to_string();

    let report = h
        .runtime
        .run_task(
            push_task(
                batch_id,
                &[VALIDATE_PUSH_CONFIG, DOWNLOAD_CONFIG, PUSH_CONFIG],
                "gen-task-1",
                payload,
            ),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(report.status, TaskRunStatus::Failed);
    assert!(h.remote.submitted_transfers().is_empty());
}

#[tokio::test]
async fn release_writes_file_through_script() {
    let h = Harness::new();
    let batch_id = h.batch(TaskAction::ConfigPublish, 1).await;

    let report = h
        .runtime
        .run_task(
            push_task(
                batch_id,
                &[VALIDATE_PUSH_CONFIG, RELEASE_CONFIG],
                "gen-task-1",
                generated("port=80\n"),
            ),
            CancellationToken::new(),
        )
        .await;

    assert!(report.is_success(), "{:?}", report.error);
    let scripts = h.remote.submitted_scripts();
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].script_name.starts_with("bk_ges_release_config_"));
    assert!(scripts[0].script_content.contains("cG9ydD04MAo="));
    assert!(scripts[0].script_content.contains("chmod 0644"));
    assert!(h.remote.submitted_transfers().is_empty());
    assert_eq!(h.instances.count(), 1);
}

#[tokio::test]
async fn check_rejects_missing_or_relative_file_path() {
    let h = Harness::new();
    let process = ProcessBuilder::new().build();
    h.remote.set_file(&process.agent_id, "port=80\n");

    for file_path in ["", "etc/app"] {
        let batch_id = h.batch(TaskAction::ConfigCheck, 1).await;
        let revision = TemplateRevisionBuilder::new().with_file_path(file_path).build();
        let report = h
            .runtime
            .run_task(
                check_task(batch_id, common(&process, &revision, 1)),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(report.status, TaskRunStatus::Failed);
        let error = report.error.unwrap();
        assert!(error.starts_with("任务负载错误"), "{error}");
        assert!(error.contains("must be absolute"), "{error}");
        assert_eq!(h.batches.get(batch_id).unwrap().status, TaskBatchStatus::Failed);
    }
    assert!(h.remote.submitted_scripts().is_empty());
}

#[tokio::test]
async fn push_steps_reject_missing_file_path() {
    let h = Harness::new();

    for steps in [
        &[VALIDATE_PUSH_CONFIG, RELEASE_CONFIG][..],
        &[VALIDATE_PUSH_CONFIG, DOWNLOAD_CONFIG, PUSH_CONFIG][..],
    ] {
        let batch_id = h.batch(TaskAction::ConfigPublish, 1).await;
        let mut payload = generated("port=80\n");
        payload.config_payload.as_mut().unwrap().config_file_path = String::new();

        let report = h
            .runtime
            .run_task(
                push_task(batch_id, steps, "gen-task-1", payload),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(report.status, TaskRunStatus::Failed);
        assert!(report.error.unwrap().contains("must be absolute"));
    }
    assert!(h.remote.submitted_scripts().is_empty());
    assert!(h.remote.submitted_transfers().is_empty());
    assert_eq!(h.instances.count(), 0);
}
