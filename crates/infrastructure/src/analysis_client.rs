use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::config::ExecutorConfig;
use orchestrator_core::models::AnalysisAssignment;
use orchestrator_core::traits::ModelExecutor;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use serde_json::json;
use tracing::{debug, info, warn};

/// 通过HTTP把子任务交给分析服务
pub struct HttpModelExecutor {
    analysis_url: String,
    http_client: reqwest::Client,
}

impl HttpModelExecutor {
    pub fn new(config: &ExecutorConfig) -> OrchestratorResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| OrchestratorError::Network(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            analysis_url: config.analysis_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl ModelExecutor for HttpModelExecutor {
    async fn start(&self, assignment: &AnalysisAssignment) -> OrchestratorResult<()> {
        let url = format!("{}/analyze/stream", self.analysis_url);
        let body = json!({
            "task_id": assignment.task_id,
            "subtask_id": assignment.subtask_id,
            "model_code": assignment.model_code,
            "stream_url": assignment.proxy_url,
            "source_url": assignment.stream_url,
            "node_id": assignment.node_id,
            "output_url": assignment.output_url,
            "callback_interval": assignment.callback_interval,
            "config": assignment.config,
        });

        match self.http_client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!(
                    subtask_id = assignment.subtask_id,
                    node_id = %assignment.node_id,
                    "子任务已交付分析服务"
                );
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                warn!(subtask_id = assignment.subtask_id, %status, "分析服务拒绝子任务");
                Err(OrchestratorError::Network(format!(
                    "分析服务返回 HTTP {status}: {text}"
                )))
            }
            Err(e) => Err(OrchestratorError::Network(format!("连接分析服务失败: {e}"))),
        }
    }

    async fn stop(&self, subtask_id: i64) -> OrchestratorResult<()> {
        let url = format!("{}/analyze/stream/{}/stop", self.analysis_url, subtask_id);
        match self.http_client.post(&url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(subtask_id, "分析服务已停止子任务");
                Ok(())
            }
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                debug!(subtask_id, "分析服务中不存在该子任务");
                Ok(())
            }
            Ok(response) => Err(OrchestratorError::Network(format!(
                "停止子任务失败: HTTP {}",
                response.status()
            ))),
            Err(e) => Err(OrchestratorError::Network(format!("连接分析服务失败: {e}"))),
        }
    }

    fn name(&self) -> &str {
        "http-analysis"
    }
}
