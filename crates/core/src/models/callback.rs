use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::subtask::SubTaskStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
}

/// 回调目标配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackTarget {
    pub id: i64,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 请求体模板，与负载合并后发送，负载字段优先
    #[serde(default)]
    pub body_template: Option<serde_json::Value>,
    /// 额外重试次数，总尝试次数为 retry_count + 1
    pub retry_count: u32,
    /// 两次尝试之间的固定间隔（秒）
    pub retry_interval_secs: u64,
}

impl CallbackTarget {
    /// 由请求中直接给出的回调地址构造临时目标
    pub fn ad_hoc(url: &str, retry_count: u32, retry_interval_secs: u64) -> Self {
        Self {
            id: 0,
            name: url.to_string(),
            url: url.to_string(),
            method: HttpMethod::Post,
            headers: HashMap::new(),
            body_template: None,
            retry_count,
            retry_interval_secs,
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// 单个检测目标
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Detection>,
}

/// 模型执行方上报的一帧分析结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionReport {
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// base64 编码的结果帧或其存储地址
    #[serde(default)]
    pub result_frame: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// 推送给回调端点的负载
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackPayload {
    pub task_id: i64,
    pub subtask_id: i64,
    pub status: SubTaskStatus,
    pub stream_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<Detection>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_frame: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}
