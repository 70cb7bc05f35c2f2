use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 节点计算类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ComputeType {
    Cpu,
    Gpu,
    Camera,
    Elastic,
}

/// 节点服务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Analysis,
    Model,
    Cloud,
}

impl fmt::Display for ComputeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComputeType::Cpu => "cpu",
            ComputeType::Gpu => "gpu",
            ComputeType::Camera => "camera",
            ComputeType::Elastic => "elastic",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceType::Analysis => "analysis",
            ServiceType::Model => "model",
            ServiceType::Cloud => "cloud",
        };
        f.write_str(s)
    }
}

/// 计算节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    pub compute_type: ComputeType,
    pub service_type: ServiceType,
    /// 内存使用率，取值 [0, 1]
    pub memory_usage: f64,
    /// 显存使用率，取值 [0, 1]
    pub gpu_memory_usage: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// 节点心跳
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHeartbeat {
    pub node_id: String,
    pub compute_type: ComputeType,
    pub service_type: ServiceType,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub gpu_memory_usage: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Node {
    pub fn from_heartbeat(heartbeat: &NodeHeartbeat) -> Self {
        Self {
            id: heartbeat.node_id.clone(),
            compute_type: heartbeat.compute_type,
            service_type: heartbeat.service_type,
            memory_usage: normalize_utilization(heartbeat.memory_usage),
            gpu_memory_usage: normalize_utilization(heartbeat.gpu_memory_usage),
            last_heartbeat: heartbeat.timestamp,
            registered_at: heartbeat.timestamp,
        }
    }

    /// 加权负载分数，越低越空闲
    pub fn load_score(&self, memory_weight: f64, gpu_memory_weight: f64) -> f64 {
        self.memory_usage * memory_weight + self.gpu_memory_usage * gpu_memory_weight
    }

    /// 心跳是否在新鲜度窗口内
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.last_heartbeat <= window
    }

    pub fn apply_heartbeat(&mut self, heartbeat: &NodeHeartbeat) {
        self.compute_type = heartbeat.compute_type;
        self.service_type = heartbeat.service_type;
        self.memory_usage = normalize_utilization(heartbeat.memory_usage);
        self.gpu_memory_usage = normalize_utilization(heartbeat.gpu_memory_usage);
        // 乱序到达的旧心跳不回退时间戳
        if heartbeat.timestamp > self.last_heartbeat {
            self.last_heartbeat = heartbeat.timestamp;
        }
    }
}

/// 大于1的取值按百分比解读
pub fn normalize_utilization(value: f64) -> f64 {
    if !value.is_finite() || value < 0.0 {
        return 0.0;
    }
    let value = if value > 1.0 { value / 100.0 } else { value };
    value.min(1.0)
}
