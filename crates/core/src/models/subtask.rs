use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{OrchestratorError, OrchestratorResult};

/// 子任务状态
///
/// 对外使用整数编码 `{-1: FAILED, 0: PENDING, 1: RUNNING, 2: STOPPED}`，
/// 反序列化时拒绝未知取值。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "i32", into = "i32")]
pub enum SubTaskStatus {
    Failed,
    Pending,
    Running,
    Stopped,
}

impl SubTaskStatus {
    pub fn code(self) -> i32 {
        match self {
            SubTaskStatus::Failed => -1,
            SubTaskStatus::Pending => 0,
            SubTaskStatus::Running => 1,
            SubTaskStatus::Stopped => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SubTaskStatus::Stopped | SubTaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubTaskStatus::Failed => "FAILED",
            SubTaskStatus::Pending => "PENDING",
            SubTaskStatus::Running => "RUNNING",
            SubTaskStatus::Stopped => "STOPPED",
        }
    }
}

impl TryFrom<i32> for SubTaskStatus {
    type Error = OrchestratorError;

    fn try_from(value: i32) -> OrchestratorResult<Self> {
        match value {
            -1 => Ok(SubTaskStatus::Failed),
            0 => Ok(SubTaskStatus::Pending),
            1 => Ok(SubTaskStatus::Running),
            2 => Ok(SubTaskStatus::Stopped),
            other => Err(OrchestratorError::Storage(format!(
                "无效的子任务状态码: {other}"
            ))),
        }
    }
}

impl From<SubTaskStatus> for i32 {
    fn from(status: SubTaskStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for SubTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 感兴趣区域，像素坐标
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Roi {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// 子任务分析配置
///
/// 枚举全部可识别字段，未知字段在反序列化时直接拒绝。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SubTaskConfig {
    pub roi: Option<Roi>,
    /// 回调间隔（秒）
    pub callback_interval: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// 只保留这些类别的检测结果，空表示全部
    pub categories: Vec<String>,
    pub save_result: bool,
}

impl Default for SubTaskConfig {
    fn default() -> Self {
        Self {
            roi: None,
            callback_interval: 1,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            categories: Vec::new(),
            save_result: false,
        }
    }
}

impl SubTaskConfig {
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.callback_interval < 1 {
            return Err(OrchestratorError::Validation(
                "callback_interval 必须大于等于1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(OrchestratorError::Validation(format!(
                "confidence_threshold 必须在 [0, 1] 范围内: {}",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(OrchestratorError::Validation(format!(
                "iou_threshold 必须在 [0, 1] 范围内: {}",
                self.iou_threshold
            )));
        }
        if let Some(roi) = &self.roi {
            if roi.x1 < 0 || roi.y1 < 0 || roi.x2 <= roi.x1 || roi.y2 <= roi.y1 {
                return Err(OrchestratorError::Validation(format!(
                    "无效的ROI区域: ({}, {}) - ({}, {})",
                    roi.x1, roi.y1, roi.x2, roi.y2
                )));
            }
        }
        Ok(())
    }
}

/// 子任务：一路视频流 × 一个模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: i64,
    /// 所属任务ID（仅反向引用）
    pub task_id: i64,
    pub model_code: String,
    pub stream_url: String,
    pub node_id: Option<String>,
    pub status: SubTaskStatus,
    /// 本地代理地址，RUNNING 期间有效
    pub proxy_url: Option<String>,
    pub output_url: Option<String>,
    pub enable_callback: bool,
    pub callback_urls: Vec<String>,
    pub config: SubTaskConfig,
    pub error_message: Option<String>,
    pub delivery_failures: u32,
    pub last_delivery_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl SubTask {
    pub fn new(task_id: i64, model_code: &str, stream_url: &str) -> Self {
        Self {
            id: 0, // 由存储层分配
            task_id,
            model_code: model_code.to_string(),
            stream_url: stream_url.to_string(),
            node_id: None,
            status: SubTaskStatus::Pending,
            proxy_url: None,
            output_url: None,
            enable_callback: false,
            callback_urls: Vec::new(),
            config: SubTaskConfig::default(),
            error_message: None,
            delivery_failures: 0,
            last_delivery_error: None,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 流代理会话ID，同一子任务始终相同
    pub fn session_id(&self) -> String {
        format!("{}_{}", self.task_id, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_integer_codes() {
        assert_eq!(serde_json::to_string(&SubTaskStatus::Failed).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&SubTaskStatus::Pending).unwrap(), "0");
        assert_eq!(serde_json::to_string(&SubTaskStatus::Running).unwrap(), "1");
        assert_eq!(serde_json::to_string(&SubTaskStatus::Stopped).unwrap(), "2");

        let status: SubTaskStatus = serde_json::from_str("2").unwrap();
        assert_eq!(status, SubTaskStatus::Stopped);
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(serde_json::from_str::<SubTaskStatus>("7").is_err());
        assert!(serde_json::from_str::<SubTaskStatus>("\"running\"").is_err());
        assert!(SubTaskStatus::try_from(3).is_err());
    }

    #[test]
    fn test_config_defaults_and_unknown_fields() {
        let config: SubTaskConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SubTaskConfig::default());
        assert_eq!(config.callback_interval, 1);

        let err = serde_json::from_str::<SubTaskConfig>(r#"{"threshold": 0.3}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SubTaskConfig::default();
        assert!(config.validate().is_ok());

        config.callback_interval = 0;
        assert!(config.validate().is_err());

        config.callback_interval = 2;
        config.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        config.confidence_threshold = 0.3;
        config.roi = Some(Roi {
            x1: 100,
            y1: 100,
            x2: 50,
            y2: 200,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_id_is_stable() {
        let mut subtask = SubTask::new(3, "yolo", "rtsp://cam/1");
        subtask.id = 9;
        assert_eq!(subtask.session_id(), "3_9");
        assert_eq!(subtask.session_id(), subtask.session_id());
    }
}
