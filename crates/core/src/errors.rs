use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SubTaskStatus;

/// 编排引擎错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("请求参数校验失败: {0}")]
    Validation(String),

    #[error("没有可用的计算节点: {0}")]
    NoCapacity(String),

    #[error("流代理超时: 会话 {session_id} 在 {timeout_ms}ms 内未返回播放结果")]
    ProxyTimeout { session_id: String, timeout_ms: u64 },

    #[error("流代理错误: 会话 {session_id} 错误码 {code}: {message}")]
    Proxy {
        session_id: String,
        code: i32,
        message: String,
    },

    #[error("非法状态转换: 子任务 {subtask_id} 无法从 {from} 转换到 {to}")]
    IllegalTransition {
        subtask_id: i64,
        from: SubTaskStatus,
        to: SubTaskStatus,
    },

    #[error("回调投递失败: {url} 共尝试 {attempts} 次, 最后错误: {reason}")]
    DeliveryFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("子任务未找到: {id}")]
    SubTaskNotFound { id: i64 },

    #[error("回调配置未找到: {id}")]
    CallbackNotFound { id: i64 },

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("操作已取消")]
    Cancelled,

    #[error("内部错误: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// 错误分类名称，对外稳定
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "ValidationError",
            OrchestratorError::NoCapacity(_) => "NoCapacityError",
            OrchestratorError::ProxyTimeout { .. } => "ProxyTimeoutError",
            OrchestratorError::Proxy { .. } => "ProxyError",
            OrchestratorError::IllegalTransition { .. } => "IllegalTransition",
            OrchestratorError::DeliveryFailed { .. } => "DeliveryFailed",
            OrchestratorError::TaskNotFound { .. }
            | OrchestratorError::SubTaskNotFound { .. }
            | OrchestratorError::CallbackNotFound { .. } => "NotFound",
            OrchestratorError::Storage(_) => "StorageError",
            OrchestratorError::Network(_) => "NetworkError",
            OrchestratorError::Configuration(_) => "ConfigurationError",
            OrchestratorError::Serialization(_) => "SerializationError",
            OrchestratorError::Cancelled => "Cancelled",
            OrchestratorError::Internal(_) => "InternalError",
        }
    }

    /// 是否为流代理协商失败（超时或错误码）
    pub fn is_proxy_failure(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ProxyTimeout { .. } | OrchestratorError::Proxy { .. }
        )
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// 返回给提交方的结构化错误
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub kind: String,
    pub message: String,
}

impl From<&OrchestratorError> for ErrorResponse {
    fn from(error: &OrchestratorError) -> Self {
        error.to_response()
    }
}

/// 统一的Result类型
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
