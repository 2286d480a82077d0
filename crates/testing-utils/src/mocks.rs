//! In-memory implementations of the repository and port traits
//!
//! These mocks keep their state behind `Arc<Mutex<..>>` so clones share
//! the same data, which lets a test hand one copy to the code under test
//! and inspect another.

use async_trait::async_trait;
use chrono::Utc;
use md5::{Digest, Md5};
use orchestrator_domain::{
    AgentJobResult, ConfigInstance, ConfigInstanceKey, ConfigInstanceRepository,
    ContentRepository, ContentScope, ExecuteScriptRequest, JobState, JobStatus, RemoteExecutor,
    RenderContext, ServerAgent, ServerIdentity, TaskAction, TaskBatch, TaskBatchFilter,
    TaskBatchRepository, TaskBatchStatus, TemplateRenderer, TransferFileRequest,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock implementation of TaskBatchRepository with the same counter semantics as the SQL store
#[derive(Debug, Clone)]
pub struct MockTaskBatchRepository {
    batches: Arc<Mutex<HashMap<i64, TaskBatch>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockTaskBatchRepository {
    pub fn new() -> Self {
        Self {
            batches: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn get(&self, id: i64) -> Option<TaskBatch> {
        self.batches.lock().unwrap().get(&id).cloned()
    }

    fn apply_counts(
        &self,
        id: i64,
        completed: u32,
        success: u32,
        failed: u32,
    ) -> OrchestratorResult<TaskBatch> {
        let mut batches = self.batches.lock().unwrap();
        let batch = batches
            .get_mut(&id)
            .ok_or(OrchestratorError::TaskBatchNotFound { id })?;
        if batch.status.is_terminal() {
            return Err(OrchestratorError::TaskBatchFinalized { id });
        }

        batch.completed_count += completed;
        batch.success_count += success;
        batch.failed_count += failed;
        batch.updated_at = Utc::now();
        if let Some(status) = TaskBatchStatus::settle(
            batch.total_count,
            batch.completed_count,
            batch.success_count,
            batch.failed_count,
        ) {
            batch.status = status;
            batch.end_at = Some(Utc::now());
        }
        Ok(batch.clone())
    }
}

impl Default for MockTaskBatchRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskBatchRepository for MockTaskBatchRepository {
    async fn create(&self, batch: &TaskBatch) -> OrchestratorResult<TaskBatch> {
        batch.validate_create()?;
        let mut batches = self.batches.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut created = batch.clone();
        created.id = *next_id;
        *next_id += 1;
        batches.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<TaskBatch>> {
        Ok(self.get(id))
    }

    async fn list(&self, filter: &TaskBatchFilter) -> OrchestratorResult<Vec<TaskBatch>> {
        let batches = self.batches.lock().unwrap();
        let mut result: Vec<TaskBatch> = batches
            .values()
            .filter(|b| filter.biz_id.map_or(true, |biz| b.biz_id == biz))
            .filter(|b| filter.task_action.map_or(true, |a| b.task_action == a))
            .filter(|b| filter.status.map_or(true, |s| b.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.id.cmp(&a.id));
        if let Some(limit) = filter.limit {
            result.truncate(limit.max(0) as usize);
        }
        Ok(result)
    }

    async fn update_status(&self, id: i64, status: TaskBatchStatus) -> OrchestratorResult<()> {
        let mut batches = self.batches.lock().unwrap();
        let batch = batches
            .get_mut(&id)
            .ok_or(OrchestratorError::TaskBatchNotFound { id })?;
        batch.status = status;
        if status == TaskBatchStatus::Running && batch.start_at.is_none() {
            batch.start_at = Some(Utc::now());
        }
        if status.is_terminal() {
            batch.end_at = Some(Utc::now());
        }
        batch.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_completed_count(
        &self,
        id: i64,
        success: bool,
    ) -> OrchestratorResult<TaskBatch> {
        if success {
            self.apply_counts(id, 1, 1, 0)
        } else {
            self.apply_counts(id, 1, 0, 1)
        }
    }

    async fn add_failed_count(&self, id: i64, count: u32) -> OrchestratorResult<TaskBatch> {
        self.apply_counts(id, count, 0, count)
    }

    async fn reset_counts_for_retry(&self, id: i64, retry_count: u32) -> OrchestratorResult<()> {
        let mut batches = self.batches.lock().unwrap();
        let batch = batches
            .get_mut(&id)
            .ok_or(OrchestratorError::TaskBatchNotFound { id })?;
        batch.completed_count = batch.completed_count.saturating_sub(retry_count);
        batch.failed_count = batch.failed_count.saturating_sub(retry_count);
        batch.status = TaskBatchStatus::Running;
        batch.end_at = None;
        batch.updated_at = Utc::now();
        Ok(())
    }

    async fn has_running_config_push_tasks(
        &self,
        biz_id: u32,
        config_template_ids: &[u32],
    ) -> OrchestratorResult<bool> {
        let batches = self.batches.lock().unwrap();
        Ok(batches.values().any(|b| {
            b.biz_id == biz_id
                && b.task_action == TaskAction::ConfigPublish
                && !b.status.is_terminal()
                && b.execution_data().is_ok_and(|data| {
                    config_template_ids.is_empty()
                        || data
                            .config_template_ids
                            .iter()
                            .any(|id| config_template_ids.contains(id))
                })
        }))
    }
}

/// Mock implementation of ConfigInstanceRepository keyed by instance key
#[derive(Debug, Clone)]
pub struct MockConfigInstanceRepository {
    instances: Arc<Mutex<HashMap<ConfigInstanceKey, ConfigInstance>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockConfigInstanceRepository {
    pub fn new() -> Self {
        Self {
            instances: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_instances(instances: Vec<ConfigInstance>) -> Self {
        let repo = Self::new();
        for instance in instances {
            repo.insert(instance);
        }
        repo
    }

    pub fn insert(&self, instance: ConfigInstance) {
        self.instances
            .lock()
            .unwrap()
            .insert(instance.key(), instance);
    }

    pub fn find(&self, key: &ConfigInstanceKey) -> Option<ConfigInstance> {
        self.instances.lock().unwrap().get(key).cloned()
    }

    pub fn count(&self) -> usize {
        self.instances.lock().unwrap().len()
    }
}

impl Default for MockConfigInstanceRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigInstanceRepository for MockConfigInstanceRepository {
    async fn get(
        &self,
        biz_id: u32,
        key: &ConfigInstanceKey,
    ) -> OrchestratorResult<Option<ConfigInstance>> {
        Ok(self.find(key).filter(|i| i.biz_id == biz_id))
    }

    async fn upsert(&self, instance: &ConfigInstance) -> OrchestratorResult<()> {
        let mut instances = self.instances.lock().unwrap();
        let key = instance.key();
        let mut stored = instance.clone();
        match instances.get(&key) {
            Some(existing) => {
                stored.id = existing.id;
                stored.creator = existing.creator.clone();
                stored.created_at = existing.created_at;
            }
            None => {
                let mut next_id = self.next_id.lock().unwrap();
                stored.id = *next_id;
                *next_id += 1;
            }
        }
        instances.insert(key, stored);
        Ok(())
    }

    async fn list_by_template(
        &self,
        biz_id: u32,
        config_template_id: u32,
    ) -> OrchestratorResult<Vec<ConfigInstance>> {
        let instances = self.instances.lock().unwrap();
        let mut result: Vec<ConfigInstance> = instances
            .values()
            .filter(|i| i.biz_id == biz_id && i.config_template_id == config_template_id)
            .cloned()
            .collect();
        result.sort_by_key(|i| (i.cc_process_id, i.module_inst_seq));
        Ok(result)
    }
}

#[derive(Debug, Clone)]
struct MockJob {
    results: Vec<AgentJobResult>,
    polls_before_done: u32,
}

#[derive(Debug, Default)]
struct RemoteState {
    next_job: u64,
    jobs: HashMap<String, MockJob>,
    /// Content of the single managed file on each agent
    files: HashMap<String, String>,
    failing_agents: HashMap<String, (i32, String)>,
    scripts: Vec<ExecuteScriptRequest>,
    transfers: Vec<TransferFileRequest>,
    polls_before_done: u32,
    never_finish: bool,
    failing_polls: u32,
}

/// Scripted RemoteExecutor that simulates one managed file per agent
///
/// md5 scripts report the md5 of the agent's file, cat scripts return its
/// content, and file transfers copy the staged source file onto each target
/// agent.
#[derive(Debug, Clone, Default)]
pub struct MockRemoteExecutor {
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemoteExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_file(&self, agent_id: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(agent_id.to_string(), content.to_string());
    }

    pub fn file(&self, agent_id: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(agent_id).cloned()
    }

    /// Jobs touching this agent finish with the given error code
    pub fn fail_agent(&self, agent_id: &str, code: i32, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_agents
            .insert(agent_id.to_string(), (code, message.to_string()));
    }

    /// Number of polls that report Executing before a job is Done
    pub fn set_polls_before_done(&self, polls: u32) {
        self.state.lock().unwrap().polls_before_done = polls;
    }

    pub fn set_never_finish(&self, never_finish: bool) {
        self.state.lock().unwrap().never_finish = never_finish;
    }

    /// The next `count` polls fail with a remote job error
    pub fn fail_next_polls(&self, count: u32) {
        self.state.lock().unwrap().failing_polls = count;
    }

    pub fn submitted_scripts(&self) -> Vec<ExecuteScriptRequest> {
        self.state.lock().unwrap().scripts.clone()
    }

    pub fn submitted_transfers(&self) -> Vec<TransferFileRequest> {
        self.state.lock().unwrap().transfers.clone()
    }

    fn result_for(state: &RemoteState, agent_id: &str, output: String) -> AgentJobResult {
        match state.failing_agents.get(agent_id) {
            Some((code, message)) => AgentJobResult {
                agent_id: agent_id.to_string(),
                error_code: *code,
                error_message: message.clone(),
                ..Default::default()
            },
            None => AgentJobResult {
                agent_id: agent_id.to_string(),
                output,
                ..Default::default()
            },
        }
    }

    fn add_job(state: &mut RemoteState, results: Vec<AgentJobResult>) -> String {
        state.next_job += 1;
        let job_id = format!("job-{}", state.next_job);
        let polls_before_done = state.polls_before_done;
        state.jobs.insert(
            job_id.clone(),
            MockJob {
                results,
                polls_before_done,
            },
        );
        job_id
    }
}

#[async_trait]
impl RemoteExecutor for MockRemoteExecutor {
    async fn submit_script(&self, request: &ExecuteScriptRequest) -> OrchestratorResult<String> {
        let mut state = self.state.lock().unwrap();
        state.scripts.push(request.clone());

        let results = request
            .agents
            .iter()
            .map(|agent| {
                let file = state.files.get(&agent.agent_id).cloned();
                let output = if request.script_name.starts_with("bk_ges_check_config_md5") {
                    file.map(|c| format!("{:x}\n", Md5::digest(c.as_bytes())))
                        .unwrap_or_default()
                } else if request.script_name.starts_with("bk_ges_cat_config") {
                    file.unwrap_or_default()
                } else {
                    String::new()
                };
                Self::result_for(&state, &agent.agent_id, output)
            })
            .collect();
        Ok(Self::add_job(&mut state, results))
    }

    async fn poll_job_state(
        &self,
        job_id: &str,
        agent_ids: &[String],
    ) -> OrchestratorResult<JobState> {
        let mut state = self.state.lock().unwrap();
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(OrchestratorError::remote_job("poll failed"));
        }
        let never_finish = state.never_finish;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| OrchestratorError::remote_job(format!("job {job_id} not found")))?;

        if never_finish {
            return Ok(JobState::running(JobStatus::Executing));
        }
        if job.polls_before_done > 0 {
            job.polls_before_done -= 1;
            return Ok(JobState::running(JobStatus::Executing));
        }
        Ok(JobState::done(
            job.results
                .iter()
                .filter(|r| agent_ids.contains(&r.agent_id))
                .cloned()
                .collect(),
        ))
    }

    async fn submit_file_transfer(
        &self,
        request: &TransferFileRequest,
    ) -> OrchestratorResult<String> {
        let source = format!(
            "{}/{}",
            request.source.store_dir.trim_end_matches('/'),
            request.source.file_name
        );
        let content = std::fs::read_to_string(&source);

        let mut state = self.state.lock().unwrap();
        state.transfers.push(request.clone());

        let mut results = Vec::with_capacity(request.target.agents.len());
        for agent in &request.target.agents {
            let result = match &content {
                Ok(content) => {
                    let result = Self::result_for(&state, &agent.agent_id, String::new());
                    if result.error_code == 0 {
                        state.files.insert(agent.agent_id.clone(), content.clone());
                    }
                    result
                }
                Err(e) => AgentJobResult {
                    agent_id: agent.agent_id.clone(),
                    error_code: 2,
                    error_message: format!("source {source} unreadable: {e}"),
                    ..Default::default()
                },
            };
            results.push(result);
        }
        Ok(Self::add_job(&mut state, results))
    }
}

/// Mock implementation of ContentRepository keyed by signature
#[derive(Debug, Clone, Default)]
pub struct MockContentRepository {
    contents: Arc<Mutex<HashMap<(ContentScope, String), Vec<u8>>>>,
}

impl MockContentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, scope: ContentScope, signature: &str, content: &[u8]) {
        self.contents
            .lock()
            .unwrap()
            .insert((scope, signature.to_string()), content.to_vec());
    }
}

#[async_trait]
impl ContentRepository for MockContentRepository {
    async fn download(&self, scope: &ContentScope, signature: &str) -> OrchestratorResult<Vec<u8>> {
        self.contents
            .lock()
            .unwrap()
            .get(&(*scope, signature.to_string()))
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::ContentDownload(format!("content {signature} not found"))
            })
    }
}

/// Renders through the shared `${name}` interpolation and counts calls
#[derive(Debug, Clone, Default)]
pub struct SimpleTemplateRenderer {
    calls: Arc<Mutex<u32>>,
}

impl SimpleTemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TemplateRenderer for SimpleTemplateRenderer {
    async fn render(&self, template: &str, context: &RenderContext) -> OrchestratorResult<String> {
        *self.calls.lock().unwrap() += 1;
        orchestrator_domain::interpolate(template, context)
    }
}

/// Fixed server identity
#[derive(Debug, Clone)]
pub struct MockServerIdentity {
    agent: ServerAgent,
}

impl MockServerIdentity {
    pub fn new(agent_id: &str) -> Self {
        Self {
            agent: ServerAgent {
                agent_id: agent_id.to_string(),
                container_id: None,
            },
        }
    }
}

impl Default for MockServerIdentity {
    fn default() -> Self {
        Self::new("server-agent")
    }
}

#[async_trait]
impl ServerIdentity for MockServerIdentity {
    async fn resolve(&self) -> OrchestratorResult<ServerAgent> {
        Ok(self.agent.clone())
    }
}
