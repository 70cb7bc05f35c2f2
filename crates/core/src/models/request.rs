use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use super::node::ComputeType;
use super::subtask::{SubTaskConfig, SubTaskStatus};
use crate::errors::{OrchestratorError, OrchestratorResult};

const STREAM_SCHEMES: &[&str] = &["rtsp", "rtsps", "rtmp", "http", "https"];
const CALLBACK_SCHEMES: &[&str] = &["http", "https"];

/// 视频流分析提交请求
///
/// `model_code` 与 `stream_url` 既可以是单个字符串也可以是列表，
/// 每个 (流, 模型) 组合生成一个子任务，按流优先顺序排列。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub model_code: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub stream_url: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub callback_urls: Vec<String>,
    #[serde(default)]
    pub callback_ids: Vec<i64>,
    #[serde(default)]
    pub output_url: Option<String>,
    #[serde(default = "default_callback_interval")]
    pub callback_interval: u32,
    #[serde(default)]
    pub enable_callback: Option<bool>,
    #[serde(default)]
    pub compute_hint: Option<ComputeType>,
    #[serde(default)]
    pub config: Option<SubTaskConfig>,
}

fn default_callback_interval() -> u32 {
    1
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

impl SubmitRequest {
    pub fn new(model_code: &str, stream_url: &str) -> Self {
        Self {
            name: None,
            model_code: vec![model_code.to_string()],
            stream_url: vec![stream_url.to_string()],
            callback_urls: Vec::new(),
            callback_ids: Vec::new(),
            output_url: None,
            callback_interval: default_callback_interval(),
            enable_callback: None,
            compute_hint: None,
            config: None,
        }
    }

    /// 校验请求，失败时不得创建任何资源
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.model_code.is_empty() || self.model_code.iter().any(|m| m.trim().is_empty()) {
            return Err(OrchestratorError::Validation(
                "model_code 不能为空".to_string(),
            ));
        }
        if self.stream_url.is_empty() {
            return Err(OrchestratorError::Validation(
                "stream_url 不能为空".to_string(),
            ));
        }
        for stream_url in &self.stream_url {
            check_url("stream_url", stream_url, STREAM_SCHEMES)?;
        }
        for callback_url in &self.callback_urls {
            check_url("callback_urls", callback_url, CALLBACK_SCHEMES)?;
        }
        if let Some(output_url) = &self.output_url {
            if output_url.trim().is_empty() {
                return Err(OrchestratorError::Validation(
                    "output_url 不能为空字符串".to_string(),
                ));
            }
        }
        if self.callback_interval < 1 {
            return Err(OrchestratorError::Validation(format!(
                "callback_interval 必须大于等于1, 实际为 {}",
                self.callback_interval
            )));
        }
        self.subtask_config().validate()
    }

    /// 生效的子任务配置，请求级 callback_interval 覆盖配置中的取值
    pub fn subtask_config(&self) -> SubTaskConfig {
        let mut config = self.config.clone().unwrap_or_default();
        config.callback_interval = self.callback_interval;
        config
    }

    pub fn callbacks_enabled(&self) -> bool {
        self.enable_callback
            .unwrap_or(!self.callback_urls.is_empty() || !self.callback_ids.is_empty())
    }

    /// (stream_url, model_code) 组合，流优先
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.stream_url.iter().flat_map(move |stream| {
            self.model_code
                .iter()
                .map(move |model| (stream.as_str(), model.as_str()))
        })
    }

    pub fn task_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            format!("{}@{}", self.model_code.join(","), self.stream_url.len())
        })
    }
}

fn check_url(field: &str, value: &str, schemes: &[&str]) -> OrchestratorResult<()> {
    let parsed = Url::parse(value).map_err(|e| {
        OrchestratorError::Validation(format!("{field} 不是合法的URL: {value}: {e}"))
    })?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(OrchestratorError::Validation(format!(
            "{field} 不支持的协议 {}: {value}",
            parsed.scheme()
        )));
    }
    Ok(())
}

/// 提交结果中的子任务摘要
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmittedSubTask {
    pub task_id: i64,
    pub status: SubTaskStatus,
    pub stream_url: String,
    pub output_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResponse {
    pub parent_task_id: i64,
    pub sub_tasks: Vec<SubmittedSubTask>,
}

/// 交给模型执行方的子任务描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisAssignment {
    pub task_id: i64,
    pub subtask_id: i64,
    pub model_code: String,
    pub stream_url: String,
    /// 本地代理地址，模型执行方从这里拉流
    pub proxy_url: String,
    pub node_id: String,
    pub output_url: Option<String>,
    pub callback_interval: u32,
    pub config: SubTaskConfig,
}
