//! 流代理会话管理
//!
//! 原生媒体代理的播放结果通过异步回调返回。`StreamProxyManager::open` 把这种
//! 回调式接口桥接成“发起后等待结果”的同步语义：
//!
//! ```text
//!  open() ── 登记等待项 ──► create ──► set_on_close ──► play
//!    │                                                  │
//!    │◄──────────── oneshot(code, msg) ◄── 原生回调 ─────┘
//!    │
//!    └─ 超时 / 错误码 / 取消：释放原生句柄后返回错误
//! ```
//!
//! 等待表中的条目只在一次 `open` 调用期间存在，任何返回路径上都会被移除。
//! 迟到的播放回调通过代号比对被丢弃，不会落到已经返回的调用上。
//! 远端断开由 `set_on_close` 注册的回调转成 [`ProxyClosed`] 事件广播给编排器。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::counter;
use orchestrator_core::config::ProxyConfig;
use orchestrator_core::traits::{NativeHandle, NativeProxy};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type PendingTable = Arc<Mutex<HashMap<String, PendingOpen>>>;

struct PendingOpen {
    generation: u64,
    tx: oneshot::Sender<(i32, String)>,
}

/// 远端关闭了一个仍在使用中的会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyClosed {
    pub session_id: String,
    pub reason: String,
}

fn lock_table(
    table: &Mutex<HashMap<String, PendingOpen>>,
) -> MutexGuard<'_, HashMap<String, PendingOpen>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 一个已建立的代理会话
///
/// 由唯一的子任务独占持有。`close` 至多释放一次原生资源；
/// 未显式关闭就被析构时同样会释放，并记录警告。
pub struct StreamProxyHandle {
    session_id: String,
    native_handle: NativeHandle,
    local_url: String,
    native: Arc<dyn NativeProxy>,
    released: Arc<AtomicBool>,
}

impl StreamProxyHandle {
    fn new(
        session_id: &str,
        native_handle: NativeHandle,
        local_url: String,
        native: Arc<dyn NativeProxy>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            native_handle,
            local_url,
            native,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn local_url(&self) -> &str {
        &self.local_url
    }

    pub fn native_handle(&self) -> NativeHandle {
        self.native_handle
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// 释放原生会话，返回本次调用是否真正执行了释放
    pub fn close(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.native.release(self.native_handle);
        counter!("stream_proxy_released_total").increment(1);
        debug!(session_id = %self.session_id, "流代理会话已释放");
        true
    }
}

impl Drop for StreamProxyHandle {
    fn drop(&mut self) {
        if !self.is_released() {
            warn!(
                session_id = %self.session_id,
                "流代理句柄未显式关闭，析构时释放"
            );
            self.close();
        }
    }
}

impl fmt::Debug for StreamProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProxyHandle")
            .field("session_id", &self.session_id)
            .field("native_handle", &self.native_handle)
            .field("local_url", &self.local_url)
            .field("released", &self.is_released())
            .finish()
    }
}

/// 从等待表移除本次 open 登记的条目
///
/// 只删除代号一致的条目，不会误删同一会话后续 open 的登记。
struct PendingGuard {
    table: PendingTable,
    session_id: String,
    generation: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut table = lock_table(&self.table);
        if matches!(table.get(&self.session_id), Some(entry) if entry.generation == self.generation)
        {
            table.remove(&self.session_id);
        }
    }
}

enum WaitOutcome {
    Completed(i32, String),
    CallbackDropped,
    TimedOut,
    Cancelled,
}

pub struct StreamProxyManager {
    native: Arc<dyn NativeProxy>,
    config: ProxyConfig,
    pending: PendingTable,
    next_generation: AtomicU64,
    closed_tx: broadcast::Sender<ProxyClosed>,
}

impl StreamProxyManager {
    pub fn new(native: Arc<dyn NativeProxy>, config: ProxyConfig) -> Self {
        let (closed_tx, _) = broadcast::channel(256);
        Self {
            native,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            closed_tx,
        }
    }

    pub async fn open(
        &self,
        stream_url: &str,
        session_id: &str,
        timeout: Duration,
    ) -> OrchestratorResult<StreamProxyHandle> {
        self.open_with_cancel(stream_url, session_id, timeout, &CancellationToken::new())
            .await
    }

    /// 打开代理会话并等待原生播放结果
    ///
    /// 超时、错误码和取消三种失败路径都会在返回前释放原生句柄。
    pub async fn open_with_cancel(
        &self,
        stream_url: &str,
        session_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<StreamProxyHandle> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut table = lock_table(&self.pending);
            if table.contains_key(session_id) {
                return Err(OrchestratorError::Proxy {
                    session_id: session_id.to_string(),
                    code: -1,
                    message: "同一会话正在打开".to_string(),
                });
            }
            table.insert(session_id.to_string(), PendingOpen { generation, tx });
        }
        let guard = PendingGuard {
            table: Arc::clone(&self.pending),
            session_id: session_id.to_string(),
            generation,
        };

        let native_handle = self.native.create(
            &self.config.vhost,
            &self.config.app,
            session_id,
            self.config.rtsp_enabled,
        )?;
        let handle = StreamProxyHandle::new(
            session_id,
            native_handle,
            self.config.local_url(session_id),
            Arc::clone(&self.native),
        );

        let closed_tx = self.closed_tx.clone();
        let released = Arc::clone(&handle.released);
        let close_session = session_id.to_string();
        self.native.set_on_close(
            native_handle,
            Box::new(move |reason| {
                // 主动释放之后的关闭通知不再上报
                if !released.load(Ordering::Acquire) {
                    let _ = closed_tx.send(ProxyClosed {
                        session_id: close_session,
                        reason,
                    });
                }
            }),
        );

        let table = Arc::clone(&self.pending);
        let result_session = session_id.to_string();
        let played = self.native.play(
            native_handle,
            stream_url,
            Box::new(move |code, message| {
                let entry = {
                    let mut table = lock_table(&table);
                    let current = matches!(
                        table.get(&result_session),
                        Some(entry) if entry.generation == generation
                    );
                    if current {
                        table.remove(&result_session)
                    } else {
                        None
                    }
                };
                match entry {
                    Some(entry) => {
                        let _ = entry.tx.send((code, message));
                    }
                    None => debug!(session_id = %result_session, code, "丢弃迟到的播放回调"),
                }
            }),
        );
        if let Err(e) = played {
            handle.close();
            counter!("stream_proxy_open_total", "outcome" => "error").increment(1);
            return Err(e);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
            waited = tokio::time::timeout(timeout, rx) => match waited {
                Ok(Ok((code, message))) => WaitOutcome::Completed(code, message),
                Ok(Err(_)) => WaitOutcome::CallbackDropped,
                Err(_) => WaitOutcome::TimedOut,
            },
        };
        drop(guard);

        match outcome {
            WaitOutcome::Completed(0, _) => {
                counter!("stream_proxy_open_total", "outcome" => "success").increment(1);
                info!(
                    session_id,
                    stream_url,
                    local_url = %handle.local_url(),
                    "流代理会话已建立"
                );
                Ok(handle)
            }
            WaitOutcome::Completed(code, message) => {
                handle.close();
                counter!("stream_proxy_open_total", "outcome" => "error").increment(1);
                warn!(session_id, stream_url, code, %message, "流代理播放失败");
                Err(OrchestratorError::Proxy {
                    session_id: session_id.to_string(),
                    code,
                    message,
                })
            }
            WaitOutcome::CallbackDropped => {
                handle.close();
                counter!("stream_proxy_open_total", "outcome" => "error").increment(1);
                Err(OrchestratorError::Proxy {
                    session_id: session_id.to_string(),
                    code: -1,
                    message: "播放回调未被调用即被丢弃".to_string(),
                })
            }
            WaitOutcome::TimedOut => {
                handle.close();
                counter!("stream_proxy_open_total", "outcome" => "timeout").increment(1);
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(session_id, stream_url, timeout_ms, "等待流代理播放结果超时");
                Err(OrchestratorError::ProxyTimeout {
                    session_id: session_id.to_string(),
                    timeout_ms,
                })
            }
            WaitOutcome::Cancelled => {
                handle.close();
                counter!("stream_proxy_open_total", "outcome" => "cancelled").increment(1);
                debug!(session_id, "打开流代理时收到取消信号");
                Err(OrchestratorError::Cancelled)
            }
        }
    }

    pub fn close(&self, handle: &StreamProxyHandle) -> bool {
        handle.close()
    }

    /// 正在等待播放结果的会话数
    pub fn pending_count(&self) -> usize {
        lock_table(&self.pending).len()
    }

    pub fn subscribe_closed(&self) -> broadcast::Receiver<ProxyClosed> {
        self.closed_tx.subscribe()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}
