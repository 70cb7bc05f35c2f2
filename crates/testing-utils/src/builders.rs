//! Test data builders with sensible defaults

use chrono::{DateTime, Utc};
use orchestrator_core::models::{
    CallbackTarget, ComputeType, HttpMethod, NodeHeartbeat, ServiceType, SubTaskConfig,
    SubmitRequest,
};
use std::collections::HashMap;

/// Builder for node heartbeats
pub struct HeartbeatBuilder {
    heartbeat: NodeHeartbeat,
}

impl HeartbeatBuilder {
    pub fn new(node_id: &str) -> Self {
        Self {
            heartbeat: NodeHeartbeat {
                node_id: node_id.to_string(),
                compute_type: ComputeType::Gpu,
                service_type: ServiceType::Analysis,
                memory_usage: 0.0,
                gpu_memory_usage: 0.0,
                timestamp: Utc::now(),
            },
        }
    }

    pub fn with_compute_type(mut self, compute_type: ComputeType) -> Self {
        self.heartbeat.compute_type = compute_type;
        self
    }

    pub fn with_service_type(mut self, service_type: ServiceType) -> Self {
        self.heartbeat.service_type = service_type;
        self
    }

    /// Set memory and GPU memory usage to the same value
    pub fn with_load(mut self, load: f64) -> Self {
        self.heartbeat.memory_usage = load;
        self.heartbeat.gpu_memory_usage = load;
        self
    }

    pub fn with_memory_usage(mut self, usage: f64) -> Self {
        self.heartbeat.memory_usage = usage;
        self
    }

    pub fn with_gpu_memory_usage(mut self, usage: f64) -> Self {
        self.heartbeat.gpu_memory_usage = usage;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.heartbeat.timestamp = timestamp;
        self
    }

    pub fn build(self) -> NodeHeartbeat {
        self.heartbeat
    }
}

/// Builder for submission requests
pub struct SubmitRequestBuilder {
    request: SubmitRequest,
}

impl SubmitRequestBuilder {
    pub fn new() -> Self {
        Self {
            request: SubmitRequest::new("yolov8", "rtsp://camera.local/stream1"),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.request.name = Some(name.to_string());
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.request.model_code = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_streams(mut self, streams: &[&str]) -> Self {
        self.request.stream_url = streams.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_callback_url(mut self, url: &str) -> Self {
        self.request.callback_urls.push(url.to_string());
        self
    }

    pub fn with_callback_id(mut self, id: i64) -> Self {
        self.request.callback_ids.push(id);
        self
    }

    pub fn with_output_url(mut self, url: &str) -> Self {
        self.request.output_url = Some(url.to_string());
        self
    }

    pub fn with_callback_interval(mut self, seconds: u32) -> Self {
        self.request.callback_interval = seconds;
        self
    }

    pub fn with_compute_hint(mut self, hint: ComputeType) -> Self {
        self.request.compute_hint = Some(hint);
        self
    }

    pub fn with_config(mut self, config: SubTaskConfig) -> Self {
        self.request.config = Some(config);
        self
    }

    pub fn build(self) -> SubmitRequest {
        self.request
    }
}

impl Default for SubmitRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for stored callback targets
pub struct CallbackTargetBuilder {
    target: CallbackTarget,
}

impl CallbackTargetBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            target: CallbackTarget {
                id: 0,
                name: "test-callback".to_string(),
                url: url.to_string(),
                method: HttpMethod::Post,
                headers: HashMap::new(),
                body_template: None,
                retry_count: 0,
                retry_interval_secs: 0,
            },
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.target.method = method;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.target
            .headers
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body_template(mut self, template: serde_json::Value) -> Self {
        self.target.body_template = Some(template);
        self
    }

    pub fn with_retries(mut self, retry_count: u32, retry_interval_secs: u64) -> Self {
        self.target.retry_count = retry_count;
        self.target.retry_interval_secs = retry_interval_secs;
        self
    }

    pub fn build(self) -> CallbackTarget {
        self.target
    }
}
