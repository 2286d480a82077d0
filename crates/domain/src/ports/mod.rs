pub mod content;
pub mod identity;
pub mod remote;
pub mod render;

pub use content::{ContentRepository, ContentScope};
pub use identity::{ServerAgent, ServerIdentity};
pub use remote::{
    AgentJobResult, AgentTarget, ExecuteScriptRequest, FileTransferEndpoint, JobState, JobStatus,
    RemoteExecutor, TransferFileRequest,
};
pub use render::{RenderContext, TemplateRenderer};
