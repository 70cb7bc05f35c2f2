use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{DEFAULT_APP, DEFAULT_VHOST};
use crate::models::{ComputeType, ServiceType};

/// 媒体代理配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    pub vhost: String,
    pub app: String,
    /// 本地代理地址中的主机名
    pub local_host: String,
    pub rtsp_port: u16,
    pub rtsp_enabled: bool,
    /// 媒体服务器HTTP API地址
    pub api_url: String,
    pub secret: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            vhost: DEFAULT_VHOST.to_string(),
            app: DEFAULT_APP.to_string(),
            local_host: "127.0.0.1".to_string(),
            rtsp_port: 8554,
            rtsp_enabled: true,
            api_url: "http://127.0.0.1:80".to_string(),
            secret: String::new(),
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.vhost.is_empty() || self.app.is_empty() {
            return Err(anyhow::anyhow!("vhost 和 app 不能为空"));
        }
        if self.local_host.is_empty() {
            return Err(anyhow::anyhow!("local_host 不能为空"));
        }
        if self.rtsp_port == 0 {
            return Err(anyhow::anyhow!("RTSP端口必须大于0"));
        }
        Url::parse(&self.api_url)
            .map_err(|e| anyhow::anyhow!("无效的媒体服务器API地址 {}: {e}", self.api_url))?;
        Ok(())
    }

    /// 会话对应的本地代理地址
    pub fn local_url(&self, session_id: &str) -> String {
        format!(
            "rtsp://{}:{}/{}/{}",
            self.local_host, self.rtsp_port, self.app, session_id
        )
    }
}

/// 节点注册表配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeRegistryConfig {
    pub freshness_window_seconds: u64,
    pub memory_weight: f64,
    pub gpu_memory_weight: f64,
    pub sweep_interval_seconds: u64,
}

impl Default for NodeRegistryConfig {
    fn default() -> Self {
        Self {
            freshness_window_seconds: 120,
            memory_weight: 0.5,
            gpu_memory_weight: 0.5,
            sweep_interval_seconds: 30,
        }
    }
}

impl NodeRegistryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.freshness_window_seconds == 0 {
            return Err(anyhow::anyhow!("心跳新鲜度窗口必须大于0"));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("节点巡检间隔必须大于0"));
        }
        if self.memory_weight < 0.0 || self.gpu_memory_weight < 0.0 {
            return Err(anyhow::anyhow!("负载权重不能为负数"));
        }
        if self.memory_weight + self.gpu_memory_weight <= 0.0 {
            return Err(anyhow::anyhow!("负载权重之和必须大于0"));
        }
        Ok(())
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.freshness_window_seconds as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// 调度配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// 子任务要求的节点服务类型
    pub service_type: ServiceType,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            service_type: ServiceType::Analysis,
        }
    }
}

/// 回调投递配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallbackConfig {
    pub request_timeout_seconds: u64,
    /// 请求中直接给出的回调地址使用的重试次数
    pub default_retry_count: u32,
    pub default_retry_interval_seconds: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
            default_retry_count: 3,
            default_retry_interval_seconds: 1,
        }
    }
}

impl CallbackConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("回调请求超时必须大于0"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// 模型执行服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub analysis_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            analysis_url: "http://127.0.0.1:8002".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.analysis_url)
            .map_err(|e| anyhow::anyhow!("无效的分析服务地址 {}: {e}", self.analysis_url))?;
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("分析服务请求超时必须大于0"));
        }
        Ok(())
    }
}

/// 本机作为计算节点时的上报配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalNodeConfig {
    /// 为空时使用主机名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_compute_type")]
    pub compute_type: ComputeType,
    #[serde(default = "default_service_type")]
    pub service_type: ServiceType,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
}

fn default_compute_type() -> ComputeType {
    ComputeType::Cpu
}

fn default_service_type() -> ServiceType {
    ServiceType::Analysis
}

fn default_heartbeat_interval() -> u64 {
    10
}

impl LocalNodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if matches!(&self.id, Some(id) if id.trim().is_empty()) {
            return Err(anyhow::anyhow!("本地节点ID不能为空字符串"));
        }
        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }
        Ok(())
    }
}

/// 日志与指标配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// "pretty" 或 "json"
    pub log_format: String,
    /// Prometheus 指标监听地址，为空时不启动
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_listen: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_listen: None,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level,
                valid_levels
            ));
        }
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志格式: {}，支持的格式: {:?}",
                self.log_format,
                valid_formats
            ));
        }
        if let Some(listen) = &self.metrics_listen {
            listen
                .parse::<SocketAddr>()
                .map_err(|e| anyhow::anyhow!("无效的指标监听地址 {listen}: {e}"))?;
        }
        Ok(())
    }
}
