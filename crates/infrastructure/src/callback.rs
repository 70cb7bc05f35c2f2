use std::time::Duration;

use metrics::counter;
use orchestrator_core::config::CallbackConfig;
use orchestrator_core::constants::DELIVERY_ID_HEADER;
use orchestrator_core::models::{CallbackTarget, HttpMethod};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 一次投递的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32, status_code: u16 },
    Failed { attempts: u32, reason: String },
    /// 等待重试期间任务被停止，未再发起请求
    Cancelled { attempts: u32 },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts, .. }
            | DeliveryOutcome::Failed { attempts, .. }
            | DeliveryOutcome::Cancelled { attempts } => *attempts,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn into_result(self, url: &str) -> OrchestratorResult<u16> {
        match self {
            DeliveryOutcome::Delivered { status_code, .. } => Ok(status_code),
            DeliveryOutcome::Failed { attempts, reason } => Err(OrchestratorError::DeliveryFailed {
                url: url.to_string(),
                attempts,
                reason,
            }),
            DeliveryOutcome::Cancelled { .. } => Err(OrchestratorError::Cancelled),
        }
    }
}

/// 回调投递器
///
/// 每次投递独立执行：请求只构造一次，所有尝试发送完全相同的内容，
/// 并携带同一个投递ID。
#[derive(Clone)]
pub struct CallbackDispatcher {
    http_client: reqwest::Client,
}

impl CallbackDispatcher {
    pub fn new(config: &CallbackConfig) -> OrchestratorResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| OrchestratorError::Network(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { http_client })
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    pub async fn deliver<P: Serialize>(
        &self,
        target: &CallbackTarget,
        payload: &P,
        cancel: &CancellationToken,
    ) -> DeliveryOutcome {
        let delivery_id = Uuid::new_v4().to_string();
        let request = match self.build_request(target, payload, &delivery_id) {
            Ok(request) => request,
            Err(reason) => {
                warn!(url = %target.url, %reason, "回调请求构造失败");
                counter!("callback_deliveries_total", "outcome" => "failed").increment(1);
                return DeliveryOutcome::Failed {
                    attempts: 0,
                    reason,
                };
            }
        };

        let total_attempts = target.total_attempts();
        let interval = Duration::from_secs(target.retry_interval_secs);
        let mut last_error = String::new();

        for attempt in 1..=total_attempts {
            if cancel.is_cancelled() {
                return cancelled(target, attempt - 1);
            }

            counter!("callback_attempts_total").increment(1);
            match self.send_once(&request).await {
                Ok(status_code) => {
                    counter!("callback_deliveries_total", "outcome" => "delivered").increment(1);
                    debug!(url = %target.url, %delivery_id, attempt, status_code, "回调投递成功");
                    return DeliveryOutcome::Delivered {
                        attempts: attempt,
                        status_code,
                    };
                }
                Err(reason) => {
                    warn!(
                        url = %target.url,
                        %delivery_id,
                        attempt,
                        total_attempts,
                        %reason,
                        "回调投递失败"
                    );
                    last_error = reason;
                }
            }

            if attempt < total_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return cancelled(target, attempt),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        counter!("callback_deliveries_total", "outcome" => "failed").increment(1);
        DeliveryOutcome::Failed {
            attempts: total_attempts,
            reason: last_error,
        }
    }

    fn build_request<P: Serialize>(
        &self,
        target: &CallbackTarget,
        payload: &P,
        delivery_id: &str,
    ) -> Result<reqwest::Request, String> {
        let payload = serde_json::to_value(payload).map_err(|e| format!("序列化负载失败: {e}"))?;
        let body = render_body(target.body_template.as_ref(), payload);

        let mut builder = match target.method {
            HttpMethod::Get => self
                .http_client
                .get(&target.url)
                .query(&query_pairs(&body)),
            HttpMethod::Post => self.http_client.post(&target.url).json(&body),
            HttpMethod::Put => self.http_client.put(&target.url).json(&body),
        };
        for (name, value) in &target.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
            .header(DELIVERY_ID_HEADER, delivery_id)
            .build()
            .map_err(|e| format!("构造请求失败: {e}"))
    }

    async fn send_once(&self, request: &reqwest::Request) -> Result<u16, String> {
        let request = request
            .try_clone()
            .ok_or_else(|| "请求体不可重复发送".to_string())?;
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| format!("请求失败: {e}"))?;
        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(format!("HTTP {status}"))
        }
    }
}

fn cancelled(target: &CallbackTarget, attempts: u32) -> DeliveryOutcome {
    counter!("callback_deliveries_total", "outcome" => "cancelled").increment(1);
    info!(url = %target.url, attempts, "任务已停止，取消剩余回调重试");
    DeliveryOutcome::Cancelled { attempts }
}

/// 模板与负载合并，负载字段覆盖模板中的同名字段
fn render_body(template: Option<&Value>, payload: Value) -> Value {
    match (template, payload) {
        (Some(Value::Object(template)), Value::Object(payload)) => {
            let mut merged = template.clone();
            merged.extend(payload);
            Value::Object(merged)
        }
        (_, payload) => payload,
    }
}

/// GET 请求只携带顶层标量字段
fn query_pairs(body: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = body else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key.clone(), s.clone())),
            Value::Number(n) => Some((key.clone(), n.to_string())),
            Value::Bool(b) => Some((key.clone(), b.to_string())),
            _ => None,
        })
        .collect()
}
