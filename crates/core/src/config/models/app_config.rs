use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    observability::ObservabilityConfig,
    worker_remote::{ContentConfig, RemoteExecutionConfig, StagingConfig, WorkerConfig},
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub remote: RemoteExecutionConfig,
    pub staging: StagingConfig,
    pub content: ContentConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Built-in defaults
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: ORCHESTRATOR_, nested keys split by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/orchestrator.toml",
                "orchestrator.toml",
                "/etc/orchestrator/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ORCHESTRATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.remote.validate().context("远程执行配置验证失败")?;

        if self.staging.cache_dir.is_empty() {
            return Err(anyhow::anyhow!("暂存目录不能为空"));
        }

        if self.content.root_dir.is_empty() {
            return Err(anyhow::anyhow!("内容仓库目录不能为空"));
        }

        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::LogFormat;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.remote.poll_interval_ms, 2000);
        assert_eq!(config.remote.max_wait_seconds, 10);
        assert_eq!(config.worker.generate_timeout_seconds, 120);
        assert!(config.remote.node_agent_id.is_none());
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let toml_str = r#"
            [database]
            url = "sqlite::memory:"
            max_connections = 1

            [remote]
            node_agent_id = "020000000052540011223344"
            await_transfer = false

            [observability]
            log_level = "debug"
            log_format = "json"
        "#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 1);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(
            config.remote.node_agent_id.as_deref(),
            Some("020000000052540011223344")
        );
        assert!(!config.remote.await_transfer);
        assert_eq!(config.remote.script_timeout_seconds, 3600);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_database_url_rejected() {
        let toml_str = r#"
            [database]
            url = "postgresql://localhost/orchestrator"
        "#;

        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_relative_script_dir_rejected() {
        let mut config = AppConfig::default();
        config.remote.script_store_dir = "scripts".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_and_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [worker]
            max_concurrent_tasks = 4

            [staging]
            cache_dir = "/var/lib/orchestrator/cache"
            "#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.worker.max_concurrent_tasks, 4);
        assert_eq!(config.staging.cache_dir, "/var/lib/orchestrator/cache");

        let serialized = config.to_toml().unwrap();
        let reparsed = AppConfig::from_toml(&serialized).unwrap();
        assert_eq!(reparsed.worker.max_concurrent_tasks, 4);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(AppConfig::load(Some("/nonexistent/orchestrator.toml")).is_err());
    }
}
