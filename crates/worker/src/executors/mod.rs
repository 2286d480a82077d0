//! 配置下发相关的步骤执行器与完成回调

pub mod common;
pub mod config_check;
pub mod config_generate;
pub mod config_push;
pub mod scripts;

use std::sync::Arc;

use orchestrator_domain::{
    CHECK_CONFIG_CALLBACK, CHECK_CONFIG_MD5, DOWNLOAD_CONFIG, FETCH_CONFIG_CONTENT,
    GENERATE_CONFIG, GENERATE_CONFIG_CALLBACK, PUSH_CONFIG, PUSH_CONFIG_CALLBACK, RELEASE_CONFIG,
    VALIDATE_PUSH_CONFIG,
};
use orchestrator_errors::OrchestratorResult;

pub use common::{ConfigExecutorDeps, RemoteSettings, TransferCompletion};
pub use config_check::{
    CheckConfigCallback, CheckConfigMd5Executor, FetchConfigContentExecutor, CONTENT_INCONSISTENT,
};
pub use config_generate::{GenerateConfigCallback, GenerateConfigExecutor};
pub use config_push::{
    DownloadConfigExecutor, PushConfigCallback, PushConfigExecutor, ReleaseConfigExecutor,
    ValidatePushConfigExecutor,
};

use crate::executor_registry::ExecutorRegistry;

/// 注册全部配置类步骤与回调
pub fn register_config_executors(
    registry: &mut ExecutorRegistry,
    deps: Arc<ConfigExecutorDeps>,
) -> OrchestratorResult<()> {
    registry.register_step(
        CHECK_CONFIG_MD5,
        Arc::new(CheckConfigMd5Executor::new(deps.clone())),
    )?;
    registry.register_step(
        FETCH_CONFIG_CONTENT,
        Arc::new(FetchConfigContentExecutor::new(deps.clone())),
    )?;
    registry.register_step(
        GENERATE_CONFIG,
        Arc::new(GenerateConfigExecutor::new(deps.clone())),
    )?;
    registry.register_step(VALIDATE_PUSH_CONFIG, Arc::new(ValidatePushConfigExecutor))?;
    registry.register_step(
        DOWNLOAD_CONFIG,
        Arc::new(DownloadConfigExecutor::new(deps.clone())),
    )?;
    registry.register_step(PUSH_CONFIG, Arc::new(PushConfigExecutor::new(deps.clone())))?;
    registry.register_step(
        RELEASE_CONFIG,
        Arc::new(ReleaseConfigExecutor::new(deps.clone())),
    )?;

    registry.register_callback(
        CHECK_CONFIG_CALLBACK,
        Arc::new(CheckConfigCallback::new(deps.clone())),
    )?;
    registry.register_callback(
        GENERATE_CONFIG_CALLBACK,
        Arc::new(GenerateConfigCallback::new(deps.clone())),
    )?;
    registry.register_callback(PUSH_CONFIG_CALLBACK, Arc::new(PushConfigCallback::new(deps)))?;
    Ok(())
}
