//! 子任务状态机
//!
//! 合法转换：
//!
//! ```text
//! PENDING ──start──► RUNNING ──stop──► STOPPED / FAILED
//!    │
//!    └──────stop────► STOPPED / FAILED
//! ```
//!
//! 终态不可离开，任何转换都不能回到 PENDING。对同一子任务的全部转换都在
//! [`SubTaskSlot`] 的互斥锁内完成，代理句柄也在锁内被取走，因此并发的
//! start/stop 不会交错，句柄不会被重复释放。原生释放是同步调用，
//! 放到阻塞线程池并在锁外完成，卡住的释放不会占住运行时线程或这把锁。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::counter;
use orchestrator_core::models::{CallbackTarget, SubTask, SubTaskStatus};
use orchestrator_core::traits::SubTaskRepository;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_infrastructure::StreamProxyHandle;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// 停止原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// 本次调用完成了转换
    Stopped(SubTaskStatus),
    /// 子任务早已处于终态，未做任何修改
    AlreadyTerminal(SubTaskStatus),
}

pub struct SubtaskStateMachine;

impl SubtaskStateMachine {
    pub fn can_transition(from: SubTaskStatus, to: SubTaskStatus) -> bool {
        use SubTaskStatus::*;
        matches!(
            (from, to),
            (Pending, Running)
                | (Pending, Stopped)
                | (Pending, Failed)
                | (Running, Stopped)
                | (Running, Failed)
        )
    }

    /// 执行一次转换并维护时间戳，非法转换时子任务保持不变
    pub fn transition(subtask: &mut SubTask, to: SubTaskStatus) -> OrchestratorResult<()> {
        let from = subtask.status;
        if !Self::can_transition(from, to) {
            return Err(OrchestratorError::IllegalTransition {
                subtask_id: subtask.id,
                from,
                to,
            });
        }

        let now = Utc::now();
        match to {
            SubTaskStatus::Running => subtask.started_at = Some(now),
            SubTaskStatus::Stopped | SubTaskStatus::Failed => subtask.stopped_at = Some(now),
            SubTaskStatus::Pending => {}
        }
        subtask.status = to;
        counter!("subtask_transitions_total", "to" => to.as_str()).increment(1);
        Ok(())
    }

    pub fn start(subtask: &mut SubTask) -> OrchestratorResult<()> {
        Self::transition(subtask, SubTaskStatus::Running)
    }

    /// 幂等停止：终态子任务直接返回 `AlreadyTerminal`
    pub fn stop(subtask: &mut SubTask, reason: &StopReason) -> OrchestratorResult<StopOutcome> {
        if subtask.is_terminal() {
            return Ok(StopOutcome::AlreadyTerminal(subtask.status));
        }
        let target = match reason {
            StopReason::Requested => SubTaskStatus::Stopped,
            StopReason::Failed(_) => SubTaskStatus::Failed,
        };
        Self::transition(subtask, target)?;
        if let StopReason::Failed(message) = reason {
            subtask.error_message = Some(message.clone());
        }
        Ok(StopOutcome::Stopped(target))
    }
}

/// 在阻塞线程池上释放原生句柄并等待完成
pub async fn release_blocking(proxy: StreamProxyHandle) {
    let session_id = proxy.session_id().to_string();
    if let Err(e) = tokio::task::spawn_blocking(move || proxy.close()).await {
        warn!(%session_id, error = %e, "释放流代理失败");
    }
}

struct SlotState {
    subtask: SubTask,
    proxy: Option<StreamProxyHandle>,
    targets: Vec<CallbackTarget>,
    last_published: Option<Instant>,
}

/// 单个子任务的运行时状态，持有其代理句柄与回调目标
pub struct SubTaskSlot {
    subtask_id: i64,
    state: Mutex<SlotState>,
    repository: Arc<dyn SubTaskRepository>,
}

impl SubTaskSlot {
    pub fn new(
        subtask: SubTask,
        targets: Vec<CallbackTarget>,
        repository: Arc<dyn SubTaskRepository>,
    ) -> Self {
        Self {
            subtask_id: subtask.id,
            state: Mutex::new(SlotState {
                subtask,
                proxy: None,
                targets,
                last_published: None,
            }),
            repository,
        }
    }

    pub fn subtask_id(&self) -> i64 {
        self.subtask_id
    }

    pub async fn snapshot(&self) -> SubTask {
        self.state.lock().await.subtask.clone()
    }

    pub async fn status(&self) -> SubTaskStatus {
        self.state.lock().await.subtask.status
    }

    pub async fn targets(&self) -> Vec<CallbackTarget> {
        self.state.lock().await.targets.clone()
    }

    pub async fn is_terminal(&self) -> bool {
        self.state.lock().await.subtask.is_terminal()
    }

    pub async fn has_proxy(&self) -> bool {
        self.state.lock().await.proxy.is_some()
    }

    async fn persist(&self, subtask: &SubTask) {
        if let Err(e) = self.repository.update(subtask).await {
            warn!(subtask_id = subtask.id, error = %e, "子任务状态持久化失败");
        }
    }

    /// PENDING → RUNNING，接管代理句柄
    ///
    /// 转换非法时立即关闭传入的句柄，保证不会泄漏。
    pub async fn start(&self, node_id: &str, proxy: StreamProxyHandle) -> OrchestratorResult<SubTask> {
        let mut state = self.state.lock().await;
        if let Err(e) = SubtaskStateMachine::start(&mut state.subtask) {
            drop(state);
            warn!(subtask_id = self.subtask_id, error = %e, "子任务启动被拒绝");
            release_blocking(proxy).await;
            return Err(e);
        }
        state.subtask.node_id = Some(node_id.to_string());
        state.subtask.proxy_url = Some(proxy.local_url().to_string());
        state.proxy = Some(proxy);
        info!(
            subtask_id = self.subtask_id,
            task_id = state.subtask.task_id,
            node_id,
            "子任务进入运行状态"
        );
        let snapshot = state.subtask.clone();
        self.persist(&snapshot).await;
        Ok(snapshot)
    }

    /// 停止子任务
    ///
    /// 锁内取走代理句柄并转换状态，锁外释放原生句柄，释放完成后才返回。
    pub async fn stop(&self, reason: StopReason) -> OrchestratorResult<(StopOutcome, SubTask)> {
        let mut state = self.state.lock().await;
        if state.subtask.is_terminal() {
            return Ok((
                StopOutcome::AlreadyTerminal(state.subtask.status),
                state.subtask.clone(),
            ));
        }

        let outcome = SubtaskStateMachine::stop(&mut state.subtask, &reason)?;
        let proxy = state.proxy.take();
        state.subtask.proxy_url = None;

        match &reason {
            StopReason::Requested => {
                info!(subtask_id = self.subtask_id, "子任务已停止");
            }
            StopReason::Failed(message) => {
                warn!(subtask_id = self.subtask_id, %message, "子任务失败");
            }
        }
        let snapshot = state.subtask.clone();
        self.persist(&snapshot).await;
        drop(state);

        if let Some(proxy) = proxy {
            release_blocking(proxy).await;
        }
        Ok((outcome, snapshot))
    }

    /// 取出代理句柄，由调用方在锁外释放
    pub async fn take_proxy(&self) -> Option<StreamProxyHandle> {
        self.state.lock().await.proxy.take()
    }

    /// 节流检查：运行中且启用回调，并且距上次发布已满间隔
    pub async fn try_mark_published(
        &self,
        now: Instant,
    ) -> Option<(SubTask, Vec<CallbackTarget>)> {
        let mut state = self.state.lock().await;
        let subtask = &state.subtask;
        if subtask.status != SubTaskStatus::Running
            || !subtask.enable_callback
            || state.targets.is_empty()
        {
            return None;
        }
        let interval = Duration::from_secs(u64::from(subtask.config.callback_interval));
        if let Some(last) = state.last_published {
            if now.saturating_duration_since(last) < interval {
                return None;
            }
        }
        state.last_published = Some(now);
        Some((state.subtask.clone(), state.targets.clone()))
    }

    pub async fn record_delivery_failure(&self, reason: &str) {
        let mut state = self.state.lock().await;
        state.subtask.delivery_failures += 1;
        state.subtask.last_delivery_error = Some(reason.to_string());
        let snapshot = state.subtask.clone();
        self.persist(&snapshot).await;
    }
}
