pub mod app_config;
pub mod database;
pub mod observability;
pub mod worker_remote;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use observability::{LogFormat, ObservabilityConfig};
pub use worker_remote::{ContentConfig, RemoteExecutionConfig, StagingConfig, WorkerConfig};
