pub mod config;
pub mod logging;
pub mod metrics;

pub use config::*;
pub use logging::init_logging;
pub use orchestrator_errors::{OrchestratorError, OrchestratorResult};
