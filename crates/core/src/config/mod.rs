//! 配置管理
//!
//! 加载顺序：各段默认值 → TOML 配置文件 → `ORCHESTRATOR_` 前缀的环境变量。
//! 嵌套字段使用双下划线分隔，例如 `ORCHESTRATOR_PROXY__RTSP_PORT=8555`。

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

mod sections;

pub use sections::{
    CallbackConfig, DispatchConfig, ExecutorConfig, LocalNodeConfig, NodeRegistryConfig,
    ObservabilityConfig, ProxyConfig,
};

pub const DEFAULT_CONFIG_PATH: &str = "config/orchestrator.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub proxy: ProxyConfig,
    pub node_registry: NodeRegistryConfig,
    pub dispatch: DispatchConfig,
    pub callback: CallbackConfig,
    pub executor: ExecutorConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_node: Option<LocalNodeConfig>,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 加载配置
    ///
    /// 显式给出的路径必须存在；未给出时尝试默认路径，不存在则只使用默认值和环境变量。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(anyhow::anyhow!("配置文件不存在: {}", path));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if Path::new(DEFAULT_CONFIG_PATH).exists() {
                    builder = builder.add_source(File::new(DEFAULT_CONFIG_PATH, FileFormat::Toml));
                }
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

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.proxy.validate().context("媒体代理配置验证失败")?;
        self.node_registry
            .validate()
            .context("节点注册表配置验证失败")?;
        self.callback.validate().context("回调配置验证失败")?;
        self.executor.validate().context("分析服务配置验证失败")?;
        if let Some(local_node) = &self.local_node {
            local_node.validate().context("本地节点配置验证失败")?;
        }
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        Ok(())
    }
}
