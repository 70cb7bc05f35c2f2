use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use orchestrator_core::config::NodeRegistryConfig;
use orchestrator_core::models::{ComputeType, Node, NodeHeartbeat, ServiceType, SubTask};
use orchestrator_core::traits::NodeRepository;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 为子任务挑选计算节点
#[async_trait]
pub trait NodeSelector: Send + Sync {
    async fn select_for(
        &self,
        subtask: &SubTask,
        service_type: ServiceType,
        compute_hint: Option<ComputeType>,
    ) -> OrchestratorResult<Node>;
}

/// 一次巡检发现的状态变化
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 本次巡检新变为失联的节点
    pub stale: Vec<String>,
    /// 重新上报心跳后恢复的节点
    pub recovered: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.stale.is_empty() && self.recovered.is_empty()
    }
}

/// 计算节点注册表
///
/// 每个节点有独立的锁，不同节点的心跳更新互不阻塞。
/// 失联节点只是不参与调度，不会被删除，重新上报心跳后自动恢复。
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, Arc<RwLock<Node>>>>,
    config: NodeRegistryConfig,
    repository: Option<Arc<dyn NodeRepository>>,
    stale: Mutex<HashSet<String>>,
}

impl NodeRegistry {
    pub fn new(config: NodeRegistryConfig) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            config,
            repository: None,
            stale: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_repository(config: NodeRegistryConfig, repository: Arc<dyn NodeRepository>) -> Self {
        Self {
            repository: Some(repository),
            ..Self::new(config)
        }
    }

    /// 从仓储恢复已知节点
    pub async fn restore(&self) -> OrchestratorResult<usize> {
        let Some(repository) = &self.repository else {
            return Ok(0);
        };
        let stored = repository.list().await?;
        let count = stored.len();
        let mut nodes = self.nodes.write().await;
        for node in stored {
            nodes.insert(node.id.clone(), Arc::new(RwLock::new(node)));
        }
        info!(count, "从存储恢复计算节点");
        Ok(count)
    }

    /// 写入一次心跳，新节点自动注册
    ///
    /// 晚于当前时刻的时间戳按当前时刻处理，避免节点时钟超前导致永远新鲜。
    pub async fn update_heartbeat(&self, heartbeat: NodeHeartbeat) -> OrchestratorResult<Node> {
        if heartbeat.node_id.trim().is_empty() {
            return Err(OrchestratorError::Validation("node_id 不能为空".to_string()));
        }
        let mut heartbeat = heartbeat;
        let now = Utc::now();
        if heartbeat.timestamp > now {
            heartbeat.timestamp = now;
        }

        let existing = self.nodes.read().await.get(&heartbeat.node_id).cloned();
        let entry = match existing {
            Some(entry) => {
                entry.write().await.apply_heartbeat(&heartbeat);
                entry
            }
            None => {
                let mut nodes = self.nodes.write().await;
                let entry = nodes
                    .entry(heartbeat.node_id.clone())
                    .or_insert_with(|| {
                        info!(
                            node_id = %heartbeat.node_id,
                            compute_type = %heartbeat.compute_type,
                            service_type = %heartbeat.service_type,
                            "注册新的计算节点"
                        );
                        Arc::new(RwLock::new(Node::from_heartbeat(&heartbeat)))
                    })
                    .clone();
                drop(nodes);
                entry.write().await.apply_heartbeat(&heartbeat);
                entry
            }
        };

        let node = entry.read().await.clone();
        counter!("node_heartbeats_total").increment(1);
        debug!(
            node_id = %node.id,
            memory_usage = node.memory_usage,
            gpu_memory_usage = node.gpu_memory_usage,
            "收到节点心跳"
        );

        if let Some(repository) = &self.repository {
            if let Err(e) = repository.upsert(&node).await {
                warn!(node_id = %node.id, error = %e, "节点信息持久化失败");
            }
        }
        Ok(node)
    }

    pub async fn select_node(
        &self,
        service_type: ServiceType,
        compute_hint: Option<ComputeType>,
    ) -> OrchestratorResult<Node> {
        self.select_node_at(Utc::now(), service_type, compute_hint)
            .await
    }

    /// 按服务类型和心跳新鲜度过滤，再按负载分数升序选择，分数相同按节点ID
    pub async fn select_node_at(
        &self,
        now: DateTime<Utc>,
        service_type: ServiceType,
        compute_hint: Option<ComputeType>,
    ) -> OrchestratorResult<Node> {
        let window = self.config.freshness_window();
        let snapshot = self.snapshot().await;
        let known = snapshot.len();

        let eligible: Vec<Node> = snapshot
            .into_iter()
            .filter(|node| node.service_type == service_type && node.is_fresh(now, window))
            .collect();

        if eligible.is_empty() {
            return Err(OrchestratorError::NoCapacity(format!(
                "已知节点 {known} 个，其中没有心跳在 {} 秒内且服务类型为 {service_type} 的节点",
                self.config.freshness_window_seconds
            )));
        }

        let preferred: Vec<&Node> = match compute_hint {
            Some(hint) => eligible.iter().filter(|n| n.compute_type == hint).collect(),
            None => Vec::new(),
        };
        let candidates: Vec<&Node> = if preferred.is_empty() {
            eligible.iter().collect()
        } else {
            preferred
        };

        let (mw, gw) = (self.config.memory_weight, self.config.gpu_memory_weight);
        let selected = candidates
            .into_iter()
            .min_by(|a, b| {
                a.load_score(mw, gw)
                    .total_cmp(&b.load_score(mw, gw))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned()
            .ok_or_else(|| OrchestratorError::Internal("候选节点为空".to_string()))?;

        debug!(
            node_id = %selected.id,
            load = selected.load_score(mw, gw),
            eligible = eligible.len(),
            "负载策略选择节点"
        );
        Ok(selected)
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// 巡检心跳新鲜度，每个节点的失联与恢复各只记录一次
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let window = self.config.freshness_window();
        let snapshot = self.snapshot().await;
        let mut report = SweepReport::default();
        let mut fresh_count = 0usize;

        {
            let mut stale = self.stale.lock().unwrap_or_else(|p| p.into_inner());
            for node in &snapshot {
                if node.is_fresh(now, window) {
                    fresh_count += 1;
                    if stale.remove(&node.id) {
                        report.recovered.push(node.id.clone());
                    }
                } else if stale.insert(node.id.clone()) {
                    report.stale.push(node.id.clone());
                }
            }
        }

        report.stale.sort();
        report.recovered.sort();
        for id in &report.stale {
            warn!(node_id = %id, "计算节点心跳超时，暂停向其调度");
        }
        for id in &report.recovered {
            info!(node_id = %id, "计算节点恢复心跳");
        }
        gauge!("nodes_fresh").set(fresh_count as f64);
        gauge!("nodes_known").set(snapshot.len() as f64);
        report
    }

    /// 按固定间隔巡检，直到取消
    pub async fn run_sweeper(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_seconds = self.config.sweep_interval_seconds,
            "启动节点健康巡检"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
        info!("节点健康巡检已停止");
    }

    pub async fn get(&self, node_id: &str) -> Option<Node> {
        let entry = self.nodes.read().await.get(node_id).cloned()?;
        let node = entry.read().await.clone();
        Some(node)
    }

    pub async fn list(&self) -> Vec<Node> {
        let mut nodes = self.snapshot().await;
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn config(&self) -> &NodeRegistryConfig {
        &self.config
    }

    async fn snapshot(&self) -> Vec<Node> {
        let entries: Vec<Arc<RwLock<Node>>> = self.nodes.read().await.values().cloned().collect();
        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            nodes.push(entry.read().await.clone());
        }
        nodes
    }
}

#[async_trait]
impl NodeSelector for NodeRegistry {
    async fn select_for(
        &self,
        _subtask: &SubTask,
        service_type: ServiceType,
        compute_hint: Option<ComputeType>,
    ) -> OrchestratorResult<Node> {
        self.select_node(service_type, compute_hint).await
    }
}
