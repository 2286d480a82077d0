use anyhow::Result;
use std::net::SocketAddr;
use tracing::info;

pub const STEPS_TOTAL: &str = "orchestrator_steps_total";
pub const TASKS_TOTAL: &str = "orchestrator_tasks_total";
pub const REMOTE_JOBS_TOTAL: &str = "orchestrator_remote_jobs_total";
pub const BATCH_COUNTER_UPDATES_TOTAL: &str = "orchestrator_batch_counter_updates_total";

/// 安装 Prometheus 指标导出器，需要在 tokio 运行时内调用
pub fn init_metrics(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| anyhow::anyhow!("无效的指标监听地址 {bind_address}: {e}"))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("安装Prometheus导出器失败: {e}"))?;

    info!("Prometheus 指标导出器已启动: {}", addr);
    Ok(())
}
