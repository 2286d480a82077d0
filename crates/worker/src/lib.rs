pub mod executor_registry;
pub mod executors;
pub mod runtime;
pub mod staging;
pub mod traits;
pub mod wait;

pub use executor_registry::ExecutorRegistry;
pub use executors::{
    register_config_executors, ConfigExecutorDeps, RemoteSettings, TransferCompletion,
};
pub use runtime::{StepRecord, StepRunStatus, TaskHistory, TaskReport, TaskRunStatus, TaskRuntime};
pub use staging::{StagedFile, StagingArea};
pub use traits::{CallbackContext, StepContext, StepExecutor, TaskCallback, TaskCompletion};
pub use wait::{poll_until, wait_script_finish, wait_transfer_finish, PollPolicy};
