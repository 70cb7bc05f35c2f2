use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use orchestrator_core::config::LocalNodeConfig;
use orchestrator_core::models::{NodeHeartbeat, SubmitRequest, SubmitResponse};
use orchestrator_core::AppConfig;
use orchestrator_dispatcher::{
    NodeRegistry, OrchestratorComponents, OrchestratorSettings, TaskOrchestrator,
};
use orchestrator_infrastructure::{
    CallbackDispatcher, HttpModelExecutor, InMemoryCallbackRepository, InMemoryNodeRepository,
    InMemorySubTaskRepository, InMemoryTaskRepository, StreamProxyManager, ZlmHttpProxy,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MEMINFO_PATH: &str = "/proc/meminfo";

/// 主应用程序
pub struct Application {
    config: AppConfig,
    orchestrator: TaskOrchestrator,
    registry: Arc<NodeRegistry>,
    zlm: ZlmHttpProxy,
}

impl Application {
    /// 创建新的应用实例，需要在 tokio 运行时内调用
    pub async fn new(config: AppConfig) -> Result<Self> {
        config.validate().context("配置校验失败")?;
        info!(
            media_api = %config.proxy.api_url,
            analysis_url = %config.executor.analysis_url,
            "初始化编排引擎"
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.executor.request_timeout_seconds))
            .build()
            .context("创建HTTP客户端失败")?;
        let zlm = ZlmHttpProxy::new(config.proxy.clone(), http_client)
            .context("创建媒体代理适配器失败")?;
        let proxies = Arc::new(StreamProxyManager::new(
            Arc::new(zlm.clone()),
            config.proxy.clone(),
        ));

        let registry = Arc::new(NodeRegistry::with_repository(
            config.node_registry.clone(),
            Arc::new(InMemoryNodeRepository::new()),
        ));
        registry.restore().await.context("恢复计算节点失败")?;

        let executor =
            Arc::new(HttpModelExecutor::new(&config.executor).context("创建分析服务客户端失败")?);
        let dispatcher =
            CallbackDispatcher::new(&config.callback).context("创建回调投递器失败")?;

        let orchestrator = TaskOrchestrator::new(
            OrchestratorComponents {
                tasks: Arc::new(InMemoryTaskRepository::new()),
                subtasks: Arc::new(InMemorySubTaskRepository::new()),
                callbacks: Arc::new(InMemoryCallbackRepository::new()),
                selector: registry.clone(),
                proxies,
                executor,
                dispatcher,
            },
            OrchestratorSettings::from_config(&config),
        );

        Ok(Self {
            config,
            orchestrator,
            registry,
            zlm,
        })
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// 媒体服务器适配器，外部收到会话断开通知时通过它转发
    pub fn media_proxy(&self) -> &ZlmHttpProxy {
        &self.zlm
    }

    /// 提交文件中的请求，文件内容可以是单个请求或请求数组
    ///
    /// 单个请求被拒绝不影响其余请求，拒绝原因以结构化错误记录。
    pub async fn submit_file(&self, path: &Path) -> Result<Vec<SubmitResponse>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取提交文件失败: {}", path.display()))?;
        let requests = parse_requests(&content)
            .with_context(|| format!("解析提交文件失败: {}", path.display()))?;

        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            match self.orchestrator.submit(request).await {
                Ok(response) => {
                    info!(
                        task_id = response.parent_task_id,
                        subtasks = response.sub_tasks.len(),
                        "已提交任务"
                    );
                    responses.push(response);
                }
                Err(e) => {
                    let rejected = e.to_response();
                    warn!(kind = %rejected.kind, message = %rejected.message, "提交被拒绝");
                }
            }
        }
        Ok(responses)
    }

    /// 运行后台服务直到关闭信号，随后停止全部活动任务
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        handles.push(
            self.orchestrator
                .spawn_close_listener(shutdown.child_token()),
        );

        {
            let registry = Arc::clone(&self.registry);
            let cancel = shutdown.child_token();
            handles.push(tokio::spawn(async move {
                registry.run_sweeper(cancel).await;
            }));
        }

        if let Some(local) = self.config.local_node.clone() {
            let registry = Arc::clone(&self.registry);
            let cancel = shutdown.child_token();
            handles.push(tokio::spawn(async move {
                run_local_heartbeat(registry, local, cancel).await;
            }));
        }

        info!("编排引擎已启动");
        shutdown.cancelled().await;

        info!("停止全部活动任务");
        self.orchestrator.shutdown().await;
        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务异常退出: {e}");
            }
        }
        info!("编排引擎已停止");
        Ok(())
    }
}

fn parse_requests(content: &str) -> Result<Vec<SubmitRequest>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let requests = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(requests)
}

/// 本机作为计算节点时定期上报心跳
async fn run_local_heartbeat(
    registry: Arc<NodeRegistry>,
    local: LocalNodeConfig,
    cancel: CancellationToken,
) {
    let node_id = local.id.clone().unwrap_or_else(local_hostname);
    let mut ticker =
        tokio::time::interval(Duration::from_secs(local.heartbeat_interval_seconds));
    info!(%node_id, compute_type = %local.compute_type, "启动本机节点心跳");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let heartbeat = NodeHeartbeat {
                    node_id: node_id.clone(),
                    compute_type: local.compute_type,
                    service_type: local.service_type,
                    memory_usage: read_memory_usage().unwrap_or(0.0),
                    // 没有可用的GPU显存采集方式
                    gpu_memory_usage: 0.0,
                    timestamp: Utc::now(),
                };
                if let Err(e) = registry.update_heartbeat(heartbeat).await {
                    warn!(%node_id, error = %e, "本机心跳上报失败");
                }
            }
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn read_memory_usage() -> Option<f64> {
    let content = std::fs::read_to_string(MEMINFO_PATH).ok()?;
    parse_meminfo(&content)
}

/// 由 MemTotal 与 MemAvailable 计算内存占用率
fn parse_meminfo(content: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        content
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|value| value.parse::<f64>().ok())
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    if total <= 0.0 {
        return None;
    }
    Some(((total - available) / total).clamp(0.0, 1.0))
}
