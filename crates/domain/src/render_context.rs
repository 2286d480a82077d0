use std::sync::LazyLock;

use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::payload::ProcessPayload;
use crate::ports::RenderContext;

/// 模板中请求帮助信息的标记
pub const HELP_MARKER: &str = "${HELP}";

const HELP_KEY: &str = "HELP";
const WITH_HELP_KEY: &str = "_with_help";

/// 依次匹配 `$${` 转义、`${name}` 变量和未闭合的 `${`
// 常量表达式，expect 不会触发
#[allow(clippy::expect_used)]
pub static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$\{|\$\{([^}]*)(\})?").expect("constant regex pattern is valid")
});

/// 构建进程渲染上下文所需的参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessContextParams {
    pub module_inst_seq: u32,
    pub host_inst_seq: u32,
    pub set_name: String,
    pub module_name: String,
    pub service_name: String,
    pub process_name: String,
    pub process_id: u32,
    pub func_name: String,
    pub work_path: String,
    pub pid_file: String,
    pub host_inner_ip: String,
    pub cloud_id: i64,
    pub with_help: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessSourceData {
    #[serde(default)]
    work_path: String,
    #[serde(default)]
    pid_file: String,
}

impl ProcessContextParams {
    pub fn from_payload(payload: &ProcessPayload, with_help: bool) -> Self {
        // 源数据缺失或格式异常时按空处理，不影响渲染
        let source: ProcessSourceData = if payload.config_data.is_empty() {
            ProcessSourceData::default()
        } else {
            serde_json::from_str(&payload.config_data).unwrap_or_default()
        };

        Self {
            module_inst_seq: payload.module_inst_seq,
            host_inst_seq: payload.host_inst_seq,
            set_name: payload.set_name.clone(),
            module_name: payload.module_name.clone(),
            service_name: payload.service_name.clone(),
            process_name: payload.alias.clone(),
            process_id: payload.cc_process_id,
            func_name: payload.func_name.clone(),
            work_path: source.work_path,
            pid_file: source.pid_file,
            host_inner_ip: payload.inner_ip.clone(),
            cloud_id: payload.cloud_id,
            with_help,
        }
    }
}

/// 构建进程模板渲染上下文
pub fn build_process_context(params: &ProcessContextParams) -> RenderContext {
    let inst_id = i64::from(params.module_inst_seq);
    let local_inst_id = i64::from(params.host_inst_seq);

    let scope = if !params.set_name.is_empty()
        && !params.module_name.is_empty()
        && !params.service_name.is_empty()
        && !params.process_name.is_empty()
    {
        format!(
            "{}.{}.{}.{}.{}",
            params.set_name,
            params.module_name,
            params.service_name,
            params.process_name,
            params.process_id
        )
    } else {
        String::new()
    };

    let entries: [(&str, Value); 23] = [
        ("Scope", json!(scope)),
        ("FuncID", json!(params.process_name)),
        ("InstID", json!(inst_id)),
        ("InstID0", json!(inst_id - 1)),
        ("ModuleInstSeq", json!(params.module_inst_seq)),
        ("HostInstSeq", json!(params.host_inst_seq)),
        ("LocalInstID", json!(local_inst_id)),
        ("LocalInstID0", json!(local_inst_id - 1)),
        ("inst_id", json!(inst_id)),
        ("inst_id0", json!(inst_id - 1)),
        ("local_inst_id", json!(local_inst_id)),
        ("local_inst_id0", json!(local_inst_id - 1)),
        ("bk_set_name", json!(params.set_name)),
        ("bk_module_name", json!(params.module_name)),
        ("bk_service_name", json!(params.service_name)),
        ("bk_host_innerip", json!(params.host_inner_ip)),
        ("bk_cloud_id", json!(params.cloud_id)),
        ("bk_process_id", json!(params.process_id)),
        ("bk_process_name", json!(params.process_name)),
        ("FuncName", json!(params.func_name)),
        ("ProcName", json!(params.process_name)),
        ("WorkPath", json!(params.work_path)),
        ("PidFile", json!(params.pid_file)),
    ];

    let mut context: RenderContext = entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

    if params.with_help {
        context.insert(WITH_HELP_KEY.to_string(), Value::Bool(true));
    }

    context
}

/// 模板正文是否请求了帮助信息
pub fn needs_help(template: &str) -> bool {
    template.contains(HELP_MARKER)
}

/// 用上下文替换模板中的 `${name}`
///
/// 未定义的变量和未闭合的 `${` 都是渲染错误；`$${` 输出为字面量 `${`。
/// `${HELP}` 仅在上下文带有帮助标记时展开为变量清单，否则替换为空。
pub fn interpolate(template: &str, context: &RenderContext) -> OrchestratorResult<String> {
    let with_help = matches!(context.get(WITH_HELP_KEY), Some(Value::Bool(true)));
    let mut failure: Option<OrchestratorError> = None;

    let rendered = VAR_PATTERN.replace_all(template, |caps: &Captures| {
        if failure.is_some() {
            return String::new();
        }
        let Some(name) = caps.get(1) else {
            return "${".to_string();
        };
        if caps.get(2).is_none() {
            failure = Some(OrchestratorError::render(format!(
                "变量未闭合: {}",
                preview(&caps[0])
            )));
            return String::new();
        }

        let name = name.as_str().trim();
        if name == HELP_KEY {
            return if with_help {
                help_text(context)
            } else {
                String::new()
            };
        }
        match context.get(name) {
            Some(value) => value_to_text(value),
            None => {
                failure = Some(OrchestratorError::render(format!("未定义的变量: {name}")));
                String::new()
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn help_text(context: &RenderContext) -> String {
    let mut lines = vec!["# 可用变量:".to_string()];
    lines.extend(
        context
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| format!("#   ${{{}}} = {}", k, value_to_text(v))),
    );
    lines.join("\n")
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(32) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
