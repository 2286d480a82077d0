use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use orchestrator_core::{init_logging, metrics::init_metrics, AppConfig};
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod plan;

use app::{Application, BatchOutcome, PlanAction};
use plan::PlanFile;

fn cli() -> Command {
    Command::new("orchestrator")
        .version("1.0.0")
        .about("配置分发任务编排系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("配置文件路径，缺省时按默认路径查找"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .global(true)
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .subcommand_required(true)
        .subcommand(Command::new("migrate").about("初始化数据库表结构"))
        .subcommand(
            Command::new("run")
                .about("执行操作计划")
                .arg(
                    Arg::new("plan")
                        .short('p')
                        .long("plan")
                        .value_name("FILE")
                        .required(true)
                        .help("计划文件路径"),
                )
                .arg(
                    Arg::new("action")
                        .short('a')
                        .long("action")
                        .value_name("ACTION")
                        .value_parser(["check", "generate", "push"])
                        .default_value("check")
                        .help("检查、生成或生成后下发"),
                ),
        )
        .subcommand(
            Command::new("batch").about("查看任务批次").arg(
                Arg::new("id")
                    .value_name("BATCH_ID")
                    .required(true)
                    .value_parser(clap::value_parser!(i64)),
            ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).context("加载配置失败")?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }

    init_logging(
        &config.observability.log_level,
        config.observability.log_format,
    )?;
    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_bind_address)?;
    }

    info!("启动配置分发任务编排系统");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let app = Application::new(config).await?;
    let result = match matches.subcommand() {
        Some(("migrate", _)) => {
            info!("数据库表结构已就绪");
            Ok(())
        }
        Some(("run", sub)) => run_plan(&app, sub).await,
        Some(("batch", sub)) => show_batch(&app, sub).await,
        _ => Err(anyhow::anyhow!("未知的子命令")),
    };

    app.close().await;
    result
}

async fn run_plan(app: &Application, matches: &ArgMatches) -> Result<()> {
    let plan_path = matches
        .get_one::<String>("plan")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("缺少计划文件"))?;
    let action: PlanAction = matches
        .get_one::<String>("action")
        .map(String::as_str)
        .unwrap_or("check")
        .parse()?;

    let (plan, base_dir) = PlanFile::load(&plan_path)?;
    info!(
        "执行计划 {}: action={:?}, biz_id={}",
        plan_path.display(),
        action,
        plan.biz_id
    );

    let shutdown = app.shutdown_token();
    let outcomes = tokio::select! {
        outcomes = app.run_plan(&plan, &base_dir, action) => outcomes?,
        _ = wait_for_shutdown_signal() => {
            warn!("收到关闭信号，取消未完成的任务");
            shutdown.cancel();
            return Err(anyhow::anyhow!("计划执行被中断"));
        }
    };

    for outcome in &outcomes {
        print_outcome(outcome)?;
    }
    Ok(())
}

async fn show_batch(app: &Application, matches: &ArgMatches) -> Result<()> {
    let id = *matches
        .get_one::<i64>("id")
        .ok_or_else(|| anyhow::anyhow!("缺少批次ID"))?;
    let batch = app.show_batch(id).await?;
    println!("{}", serde_json::to_string_pretty(&batch)?);
    Ok(())
}

fn print_outcome(outcome: &BatchOutcome) -> Result<()> {
    let batch = &outcome.batch;
    println!(
        "批次 {} [{}] 状态: {}, 完成 {}/{}, 成功 {}, 失败 {}",
        batch.id,
        batch.task_action,
        batch.status,
        batch.completed_count,
        batch.total_count,
        batch.success_count,
        batch.failed_count
    );
    for report in outcome.reports.iter().filter(|r| !r.is_success()) {
        error!(
            "任务 {} 未成功: {}",
            report.info.task_name,
            serde_json::to_string(report)?
        );
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到Ctrl+C信号"),
        _ = terminate => info!("收到SIGTERM信号"),
    }
}
