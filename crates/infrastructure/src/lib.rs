pub mod content;
pub mod database;
pub mod identity;
pub mod local_executor;
pub mod render;

pub use content::FsContentRepository;
pub use database::*;
pub use identity::StaticServerIdentity;
pub use local_executor::LocalScriptExecutor;
pub use render::VariableRenderer;
