//! 配置任务分发
//!
//! 负责把一次批量操作拆成按目标构建的任务，创建批次记录并交给运行时执行。

pub mod batch_service;
pub mod builders;

pub use batch_service::{BatchHandle, ConfigBatchService, ConfigTaskMode, ConfigTaskRequest};
pub use builders::{
    build_task, ConfigCheckTaskBuilder, ConfigGenerateTaskBuilder, ConfigPushTaskBuilder,
    ConfigTarget, ConfigTaskOptions, PushDelivery, TaskBuilder,
};
