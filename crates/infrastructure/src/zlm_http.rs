//! ZLMediaKit HTTP API 适配
//!
//! 通过 `/index/api/addStreamProxy` 和 `/index/api/delStreamProxy` 实现原生代理边界。
//! 播放请求在运行时上异步执行，结果经回调返回，与SDK的回调语义一致。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use orchestrator_core::config::ProxyConfig;
use orchestrator_core::traits::{CloseCallback, NativeHandle, NativeProxy, PlayResultCallback};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use serde::Deserialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};

struct ZlmSession {
    vhost: String,
    app: String,
    stream_id: String,
    rtsp_enabled: bool,
    key: Option<String>,
    on_close: Option<CloseCallback>,
}

#[derive(Debug, Deserialize)]
struct ZlmResponse {
    code: i32,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

struct ZlmInner {
    client: reqwest::Client,
    config: ProxyConfig,
    runtime: Handle,
    sessions: Mutex<HashMap<u64, ZlmSession>>,
    next_handle: AtomicU64,
}

impl ZlmInner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, ZlmSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn add_stream_proxy(
        &self,
        vhost: &str,
        app: &str,
        stream_id: &str,
        url: &str,
        rtsp_enabled: bool,
    ) -> (i32, String, Option<String>) {
        let endpoint = format!("{}/index/api/addStreamProxy", self.config.api_url);
        let enable_rtsp = if rtsp_enabled { "1" } else { "0" };
        let request = self.client.get(&endpoint).query(&[
            ("secret", self.config.secret.as_str()),
            ("vhost", vhost),
            ("app", app),
            ("stream", stream_id),
            ("url", url),
            ("enable_rtsp", enable_rtsp),
        ]);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return (-1, format!("请求媒体服务器失败: {e}"), None),
        };
        if !response.status().is_success() {
            return (-1, format!("媒体服务器返回 HTTP {}", response.status()), None);
        }
        match response.json::<ZlmResponse>().await {
            Ok(body) => {
                let key = body
                    .data
                    .as_ref()
                    .and_then(|data| data.get("key"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                (body.code, body.msg.unwrap_or_default(), key)
            }
            Err(e) => (-1, format!("解析媒体服务器响应失败: {e}"), None),
        }
    }

    async fn del_stream_proxy(&self, key: &str) {
        let endpoint = format!("{}/index/api/delStreamProxy", self.config.api_url);
        let result = self
            .client
            .get(&endpoint)
            .query(&[("secret", self.config.secret.as_str()), ("key", key)])
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(key, "媒体服务器代理已删除");
            }
            Ok(response) => warn!(key, status = %response.status(), "删除媒体服务器代理失败"),
            Err(e) => warn!(key, error = %e, "删除媒体服务器代理失败"),
        }
    }
}

#[derive(Clone)]
pub struct ZlmHttpProxy {
    inner: Arc<ZlmInner>,
}

impl ZlmHttpProxy {
    /// 必须在 tokio 运行时内创建，后续请求都提交到该运行时
    pub fn new(config: ProxyConfig, client: reqwest::Client) -> OrchestratorResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| OrchestratorError::Configuration(format!("未在tokio运行时内创建: {e}")))?;
        Ok(Self {
            inner: Arc::new(ZlmInner {
                client,
                config,
                runtime,
                sessions: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
            }),
        })
    }

    /// 外部观察到会话断开（例如媒体服务器的无人观看或流断开事件）
    ///
    /// 返回是否找到了对应的活动会话。
    pub fn notify_closed(&self, stream_id: &str, reason: &str) -> bool {
        let on_close = {
            let mut sessions = self.inner.sessions();
            sessions
                .values_mut()
                .find(|s| s.stream_id == stream_id)
                .map(|s| s.on_close.take())
        };
        match on_close {
            Some(Some(callback)) => {
                callback(reason.to_string());
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.sessions().len()
    }
}

impl NativeProxy for ZlmHttpProxy {
    fn create(
        &self,
        vhost: &str,
        app: &str,
        stream_id: &str,
        rtsp_enabled: bool,
    ) -> OrchestratorResult<NativeHandle> {
        let id = self.inner.next_handle.fetch_add(1, Ordering::Relaxed);
        self.inner.sessions().insert(
            id,
            ZlmSession {
                vhost: vhost.to_string(),
                app: app.to_string(),
                stream_id: stream_id.to_string(),
                rtsp_enabled,
                key: None,
                on_close: None,
            },
        );
        Ok(NativeHandle(id))
    }

    fn set_on_close(&self, handle: NativeHandle, on_close: CloseCallback) {
        if let Some(session) = self.inner.sessions().get_mut(&handle.0) {
            session.on_close = Some(on_close);
        }
    }

    fn play(
        &self,
        handle: NativeHandle,
        url: &str,
        on_result: PlayResultCallback,
    ) -> OrchestratorResult<()> {
        let (vhost, app, stream_id, rtsp_enabled) = {
            let sessions = self.inner.sessions();
            let session = sessions.get(&handle.0).ok_or_else(|| {
                OrchestratorError::Internal(format!("未知的代理句柄: {}", handle.0))
            })?;
            (
                session.vhost.clone(),
                session.app.clone(),
                session.stream_id.clone(),
                session.rtsp_enabled,
            )
        };

        let inner = Arc::clone(&self.inner);
        let url = url.to_string();
        self.inner.runtime.spawn(async move {
            let (code, message, key) = inner
                .add_stream_proxy(&vhost, &app, &stream_id, &url, rtsp_enabled)
                .await;

            // 播放期间句柄已被释放时，立即删除刚建立的代理
            let orphaned = {
                let mut sessions = inner.sessions();
                match sessions.get_mut(&handle.0) {
                    Some(session) => {
                        session.key = key.clone();
                        None
                    }
                    None => key,
                }
            };
            if let Some(key) = orphaned {
                inner.del_stream_proxy(&key).await;
            }
            on_result(code, message);
        });
        Ok(())
    }

    fn release(&self, handle: NativeHandle) {
        let session = self.inner.sessions().remove(&handle.0);
        if let Some(key) = session.and_then(|s| s.key) {
            let inner = Arc::clone(&self.inner);
            self.inner.runtime.spawn(async move {
                inner.del_stream_proxy(&key).await;
            });
        }
    }
}
