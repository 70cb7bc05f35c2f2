use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use orchestrator::app::Application;
use orchestrator::common::{init_logging, init_metrics, StartupConfig};
use orchestrator::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use orchestrator_core::constants::{FORCE_STOP_TIMEOUT, TASK_STOP_TIMEOUT};
use orchestrator_core::AppConfig;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("orchestrator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("视频流分析任务编排引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时尝试 config/orchestrator.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("submit")
                .short('s')
                .long("submit")
                .value_name("FILE")
                .help("启动后提交的请求文件（JSON，单个请求或数组）"),
        )
        .get_matches();

    let startup = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
        submit_file: matches.get_one::<String>("submit").cloned(),
    };

    // 配置先于日志加载，加载失败时错误直接返回给调用方
    let config = AppConfig::load(startup.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup.config_path.as_deref().unwrap_or("<默认>")
        )
    })?;

    let log_level = startup
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    let log_format = startup
        .log_format
        .as_deref()
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    info!("启动视频流分析任务编排引擎");
    if let Some(path) = &startup.config_path {
        info!("配置文件: {path}");
    }
    if let Some(listen) = &config.observability.metrics_listen {
        init_metrics(listen)?;
    }

    let app = Arc::new(Application::new(config).await?);

    // 先启动后台服务，提交的子任务才能收到代理关闭通知
    let shutdown_manager = ShutdownManager::new();
    let app_handle = {
        let app = Arc::clone(&app);
        let token = shutdown_manager.subscribe();
        tokio::spawn(async move {
            if let Err(e) = app.run(token).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    if let Some(path) = &startup.submit_file {
        match app.submit_file(Path::new(path)).await {
            Ok(responses) => {
                for response in &responses {
                    match serde_json::to_string(response) {
                        Ok(json) => info!("提交结果: {json}"),
                        Err(e) => warn!("序列化提交结果失败: {e}"),
                    }
                }
            }
            Err(e) => error!("提交请求文件失败: {e:#}"),
        }
    }

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown();

    // 任务停止有自己的超时，这里额外留出余量
    let shutdown_limit = TASK_STOP_TIMEOUT + FORCE_STOP_TIMEOUT + Duration::from_secs(5);
    match tokio::time::timeout(shutdown_limit, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("视频流分析任务编排引擎已退出");
    Ok(())
}
