use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use orchestrator_config::{OrchestratorConfig, SchedulerConfig};
use orchestrator_core::models::TaskDescriptor;
use orchestrator_dispatcher::{Orchestrator, OrchestratorSettings, WorkerEventListener};
use orchestrator_infrastructure::{InMemoryLogStorage, LocalHostRuntime, LocalHostRuntimeConfig};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod shutdown;

use shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("orchestrator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式执行编排器")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/orchestrator.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别（覆盖配置文件）")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式（覆盖配置文件）")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("submit")
                .short('s')
                .long("submit")
                .value_name("FILE")
                .help("启动后提交的任务描述（JSON），可以重复指定")
                .action(ArgAction::Append),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| "config/orchestrator.toml".to_string());

    // 加载配置
    let config = OrchestratorConfig::load(Some(&config_path))
        .with_context(|| format!("加载配置文件失败: {config_path}"))?;

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.logging.level.to_string());
    let log_format = matches
        .get_one::<String>("log-format")
        .cloned()
        .unwrap_or_else(|| config.logging.format.to_string());

    // 初始化日志系统
    init_logging(&log_level, &log_format)?;

    info!("启动分布式执行编排器");
    info!("配置文件: {config_path}");

    if config.metrics.enabled {
        init_metrics(&config.metrics.listen_address)?;
    }

    let shutdown_manager = ShutdownManager::new();
    let log_storage = Arc::new(InMemoryLogStorage::new());
    let config_store = Arc::new(orchestrator_config::FileConfigStore::new(&config_path));

    if !config.local_runtime.enabled {
        warn!("本地主机运行时未启用，不会注册任何主机");
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let runtime = Arc::new(LocalHostRuntime::new(
        LocalHostRuntimeConfig {
            simulated_run: Duration::from_millis(config.local_runtime.simulated_run_millis),
            work_root: PathBuf::from(&config.local_runtime.work_root),
        },
        events_tx,
    ));

    let orchestrator = Orchestrator::builder(runtime, log_storage)
        .with_config_store(config_store)
        .with_settings(orchestrator_settings(&config.scheduler))
        .build();

    // 启动worker事件监听
    let listener = Arc::new(WorkerEventListener::new(orchestrator.clone()));
    let listener_handle = {
        let listener = Arc::clone(&listener);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = listener.listen(events_rx, shutdown_rx).await {
                error!("worker事件监听器运行失败: {e}");
            }
        })
    };

    if config.local_runtime.enabled {
        register_hosts(&orchestrator, &config.local_runtime.hosts).await?;
    }

    let descriptors: Vec<String> = matches
        .get_many::<String>("submit")
        .map(|files| files.cloned().collect())
        .unwrap_or_default();
    for file in &descriptors {
        if let Err(e) = submit_from_file(&orchestrator, file).await {
            error!("提交任务描述 {file} 失败: {e:#}");
        }
    }

    // 等待关闭信号
    wait_for_shutdown_signal().await;

    info!("收到关闭信号，开始优雅关闭...");

    shutdown_manager.shutdown().await;
    listener.stop().await;

    match tokio::time::timeout(Duration::from_secs(30), listener_handle).await {
        Ok(Ok(())) => info!("worker事件监听器已退出"),
        Ok(Err(e)) => error!("worker事件监听器退出时发生错误: {e}"),
        Err(_) => warn!("worker事件监听器关闭超时，强制退出"),
    }

    info!("分布式执行编排器已退出");
    Ok(())
}

/// 调度器配置映射为编排器设置
fn orchestrator_settings(config: &SchedulerConfig) -> OrchestratorSettings {
    OrchestratorSettings {
        max_package_cache_size: config.max_package_cache_size,
        kept_closed_context_count: config.kept_closed_context_count,
        default_finished_tasks_kept: config.default_finished_tasks_kept,
        default_load_units: config.default_load_units,
        default_host_load_limit: config.default_host_load_limit,
        fallback_load_limit: config.effective_default_load_limit(),
        rng_seed: config.rng_seed,
    }
}

/// 注册配置中的主机，未配置时注册本机
async fn register_hosts(orchestrator: &Orchestrator, hosts: &[String]) -> Result<()> {
    let hosts = if hosts.is_empty() {
        let local = hostname::get()
            .context("获取本机主机名失败")?
            .to_string_lossy()
            .into_owned();
        vec![local]
    } else {
        hosts.to_vec()
    };

    for host in &hosts {
        orchestrator
            .register_host_runtime(host)
            .await
            .with_context(|| format!("注册主机运行时失败: {host}"))?;
        info!("已注册主机运行时: {host}");
    }
    Ok(())
}

/// 从JSON文件读取任务描述并提交，所属上下文不存在时自动创建
async fn submit_from_file(orchestrator: &Orchestrator, file: &str) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("读取文件失败: {file}"))?;
    let descriptors: Vec<TaskDescriptor> = match serde_json::from_str(&content) {
        Ok(list) => list,
        Err(_) => vec![serde_json::from_str(&content).context("解析任务描述失败")?],
    };

    for descriptor in descriptors {
        let context_id = descriptor.context_id.clone();
        if orchestrator.get_context(&context_id).await.is_err() {
            orchestrator
                .new_context(Some(&context_id), &context_id, file, serde_json::Value::Null, false)
                .await?;
        }
        let task_id = descriptor.task_id.clone();
        orchestrator.submit_task(descriptor).await?;
        info!("已提交任务 {task_id} (上下文: {context_id})");
    }
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 安装Prometheus指标导出器
fn init_metrics(listen_address: &str) -> Result<()> {
    let address: SocketAddr = listen_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {listen_address}"))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| anyhow::anyhow!("安装Prometheus导出器失败: {e}"))?;
    info!("Prometheus指标导出器监听于 {address}");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
