//! 配置管理
//!
//! 配置按 默认值 -> TOML 文件 -> `ORCHESTRATOR_` 环境变量 的顺序叠加。

pub mod models;

pub use models::*;
