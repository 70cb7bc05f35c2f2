//! 任务编排器
//!
//! 负责任务的提交、调度、停止和状态查询。每个子任务的调度是独立的
//! tokio 任务，互不阻塞：
//!
//! ```text
//! submit ──► 创建 Task + SubTask(PENDING) ──► 每个子任务 spawn dispatch
//!
//! dispatch:  选择节点 ──► 打开流代理 ──► start(RUNNING) ──► 交给模型执行方
//!               │             │                                  │
//!               └── 失败 ─────┴──────────► FAILED ◄───── 失败 ───┘
//! ```
//!
//! 停止任务时先取消调度令牌，再逐个子任务关闭代理、转换状态。整体受
//! 停止超时约束，超时后剩余子任务在本地强制标记为 STOPPED。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, gauge};
use orchestrator_core::config::AppConfig;
use orchestrator_core::constants::{FORCE_STOP_TIMEOUT, PROXY_OPEN_TIMEOUT, TASK_STOP_TIMEOUT};
use orchestrator_core::models::{
    AnalysisAssignment, CallbackPayload, CallbackTarget, ComputeType, DetectionReport,
    ServiceType, SubTask, SubTaskStatus, SubmitRequest, SubmitResponse, SubmittedSubTask, Task,
    TaskView,
};
use orchestrator_core::traits::{
    CallbackRepository, ModelExecutor, SubTaskRepository, TaskRepository,
};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_infrastructure::{CallbackDispatcher, ProxyClosed, StreamProxyManager};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::node_registry::NodeSelector;
use crate::state_machine::{
    release_blocking, StopOutcome, StopReason, SubTaskSlot, SubtaskStateMachine,
};

/// 编排器依赖的协作方
pub struct OrchestratorComponents {
    pub tasks: Arc<dyn TaskRepository>,
    pub subtasks: Arc<dyn SubTaskRepository>,
    pub callbacks: Arc<dyn CallbackRepository>,
    pub selector: Arc<dyn NodeSelector>,
    pub proxies: Arc<StreamProxyManager>,
    pub executor: Arc<dyn ModelExecutor>,
    pub dispatcher: CallbackDispatcher,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub service_type: ServiceType,
    pub proxy_timeout: Duration,
    pub stop_timeout: Duration,
    /// 停止超时后强制标记阶段的上限
    pub force_stop_timeout: Duration,
    /// 请求中直接给出的回调地址使用的重试策略
    pub default_retry_count: u32,
    pub default_retry_interval_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            service_type: config.dispatch.service_type,
            proxy_timeout: PROXY_OPEN_TIMEOUT,
            stop_timeout: TASK_STOP_TIMEOUT,
            force_stop_timeout: FORCE_STOP_TIMEOUT,
            default_retry_count: config.callback.default_retry_count,
            default_retry_interval_secs: config.callback.default_retry_interval_seconds,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_proxy_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_timeout = timeout;
        self
    }
}

/// 一个活动任务的运行时信息
struct TaskRuntime {
    /// 取消在途调度
    cancel: CancellationToken,
    /// 取消等待中的回调重试
    delivery_cancel: CancellationToken,
    subtask_ids: Vec<i64>,
    dispatches: Mutex<Vec<(i64, JoinHandle<()>)>>,
}

impl TaskRuntime {
    fn take_dispatches(&self) -> HashMap<i64, JoinHandle<()>> {
        let mut dispatches = self.dispatches.lock().unwrap_or_else(|p| p.into_inner());
        dispatches.drain(..).collect()
    }
}

struct Inner {
    tasks: Arc<dyn TaskRepository>,
    subtasks: Arc<dyn SubTaskRepository>,
    callbacks: Arc<dyn CallbackRepository>,
    selector: Arc<dyn NodeSelector>,
    proxies: Arc<StreamProxyManager>,
    executor: Arc<dyn ModelExecutor>,
    dispatcher: CallbackDispatcher,
    settings: OrchestratorSettings,
    runtimes: RwLock<HashMap<i64, Arc<TaskRuntime>>>,
    slots: RwLock<HashMap<i64, Arc<SubTaskSlot>>>,
    /// 代理会话ID → 子任务ID，仅包含 RUNNING 子任务
    sessions: RwLock<HashMap<String, i64>>,
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

impl TaskOrchestrator {
    pub fn new(components: OrchestratorComponents, settings: OrchestratorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: components.tasks,
                subtasks: components.subtasks,
                callbacks: components.callbacks,
                selector: components.selector,
                proxies: components.proxies,
                executor: components.executor,
                dispatcher: components.dispatcher,
                settings,
                runtimes: RwLock::new(HashMap::new()),
                slots: RwLock::new(HashMap::new()),
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// 提交分析请求
    ///
    /// 校验失败时不会创建任何记录。每个 (流, 模型) 组合生成一个 PENDING
    /// 子任务，调度在后台并发进行，本方法不等待调度结果。
    pub async fn submit(&self, request: SubmitRequest) -> OrchestratorResult<SubmitResponse> {
        request.validate()?;
        let targets = self.inner.resolve_targets(&request).await?;
        let config = request.subtask_config();
        let enable_callback = request.callbacks_enabled();

        let task = self
            .inner
            .tasks
            .create(&Task::new(&request.task_name()))
            .await?;

        let mut created = Vec::new();
        for (stream_url, model_code) in request.pairs() {
            let mut subtask = SubTask::new(task.id, model_code, stream_url);
            subtask.output_url = request.output_url.clone();
            subtask.enable_callback = enable_callback;
            subtask.callback_urls = request.callback_urls.clone();
            subtask.config = config.clone();
            match self.inner.subtasks.create(&subtask).await {
                Ok(subtask) => created.push(subtask),
                Err(e) => {
                    self.inner.abandon_submission(task, created, &e).await;
                    return Err(e);
                }
            }
        }

        let runtime = Arc::new(TaskRuntime {
            cancel: CancellationToken::new(),
            delivery_cancel: CancellationToken::new(),
            subtask_ids: created.iter().map(|s| s.id).collect(),
            dispatches: Mutex::new(Vec::new()),
        });

        let mut slots = Vec::with_capacity(created.len());
        {
            let mut table = self.inner.slots.write().await;
            for subtask in &created {
                let slot = Arc::new(SubTaskSlot::new(
                    subtask.clone(),
                    targets.clone(),
                    Arc::clone(&self.inner.subtasks),
                ));
                table.insert(subtask.id, Arc::clone(&slot));
                slots.push(slot);
            }
        }
        self.inner
            .runtimes
            .write()
            .await
            .insert(task.id, Arc::clone(&runtime));

        {
            // 持锁期间完成全部 spawn，停止方拿到的一定是完整列表
            let mut dispatches = runtime.dispatches.lock().unwrap_or_else(|p| p.into_inner());
            for slot in slots {
                let inner = Arc::clone(&self.inner);
                let cancel = runtime.cancel.child_token();
                let hint = request.compute_hint;
                let subtask_id = slot.subtask_id();
                let join = tokio::spawn(async move { inner.dispatch(slot, cancel, hint).await });
                dispatches.push((subtask_id, join));
            }
        }

        counter!("tasks_submitted_total").increment(1);
        gauge!("tasks_active").increment(1.0);
        info!(
            task_id = task.id,
            name = %task.name,
            subtasks = created.len(),
            callbacks = targets.len(),
            "任务已提交"
        );

        Ok(SubmitResponse {
            parent_task_id: task.id,
            sub_tasks: created
                .into_iter()
                .map(|s| SubmittedSubTask {
                    task_id: s.id,
                    status: s.status,
                    stream_url: s.stream_url,
                    output_url: s.output_url,
                })
                .collect(),
        })
    }

    /// 停止任务
    ///
    /// 对已经处于终态的子任务是空操作，重复停止同一任务返回成功。
    pub async fn stop(&self, task_id: i64) -> OrchestratorResult<()> {
        let runtime = self.inner.runtimes.read().await.get(&task_id).cloned();
        let Some(runtime) = runtime else {
            return self.inner.stop_detached(task_id).await;
        };

        info!(task_id, subtasks = runtime.subtask_ids.len(), "开始停止任务");
        runtime.cancel.cancel();
        runtime.delivery_cancel.cancel();

        let mut dispatches = runtime.take_dispatches();
        let mut slots = Vec::with_capacity(runtime.subtask_ids.len());
        {
            let table = self.inner.slots.read().await;
            for id in &runtime.subtask_ids {
                if let Some(slot) = table.get(id) {
                    slots.push(Arc::clone(slot));
                }
            }
        }

        let settles = slots.iter().map(|slot| {
            let join = dispatches.remove(&slot.subtask_id());
            Arc::clone(&self.inner).settle(Arc::clone(slot), join)
        });
        let stop_timeout = self.inner.settings.stop_timeout;
        if tokio::time::timeout(stop_timeout, join_all(settles))
            .await
            .is_err()
        {
            warn!(
                task_id,
                timeout_ms = duration_ms(stop_timeout),
                "任务停止超时，剩余子任务在本地强制标记为已停止"
            );
            counter!("task_stop_timeouts_total").increment(1);
            let force_timeout = self.inner.settings.force_stop_timeout;
            let forced = join_all(slots.iter().map(|slot| self.inner.force_stop(slot)));
            if tokio::time::timeout(force_timeout, forced).await.is_err() {
                error!(
                    task_id,
                    timeout_ms = duration_ms(force_timeout),
                    "强制停止阶段超时，部分子任务状态未能更新"
                );
            }
        }

        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.retain(|_, id| !runtime.subtask_ids.contains(id));
        }
        {
            let mut table = self.inner.slots.write().await;
            for id in &runtime.subtask_ids {
                table.remove(id);
            }
        }
        if self.inner.runtimes.write().await.remove(&task_id).is_some() {
            gauge!("tasks_active").decrement(1.0);
        }

        self.inner.mark_task_stopped(task_id).await?;
        info!(task_id, "任务已停止");
        Ok(())
    }

    /// 查询任务及其全部子任务的当前状态，只读
    pub async fn get_status(&self, task_id: i64) -> OrchestratorResult<TaskView> {
        let task = self
            .inner
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or(OrchestratorError::TaskNotFound { id: task_id })?;
        let subtasks = self.inner.subtasks.get_by_task_id(task_id).await?;
        Ok(TaskView::from_parts(task, subtasks))
    }

    /// 模型执行方上报检测结果
    ///
    /// 返回是否实际发起了投递：子任务不在运行、未启用回调或未到回调间隔时返回 `false`。
    pub async fn publish_result(
        &self,
        subtask_id: i64,
        report: DetectionReport,
    ) -> OrchestratorResult<bool> {
        let slot = self.inner.slots.read().await.get(&subtask_id).cloned();
        let Some(slot) = slot else {
            return match self.inner.subtasks.get_by_id(subtask_id).await? {
                Some(_) => Ok(false),
                None => Err(OrchestratorError::SubTaskNotFound { id: subtask_id }),
            };
        };

        let Some((subtask, targets)) = slot.try_mark_published(Instant::now()).await else {
            return Ok(false);
        };
        let cancel = match self.inner.runtimes.read().await.get(&subtask.task_id) {
            Some(runtime) => runtime.delivery_cancel.clone(),
            None => return Ok(false),
        };

        let payload = CallbackPayload {
            task_id: subtask.task_id,
            subtask_id: subtask.id,
            status: subtask.status,
            stream_url: subtask.stream_url.clone(),
            output_url: subtask.output_url.clone(),
            detections: Some(report.detections),
            result_frame: report.result_frame,
            error: None,
            stopped_at: None,
            timestamp: report.timestamp.unwrap_or_else(Utc::now),
        };
        spawn_deliveries(&self.inner.dispatcher, slot, targets, payload, cancel);
        Ok(true)
    }

    /// 处理远端关闭的代理会话，对应子任务转为 FAILED
    pub async fn handle_proxy_closed(&self, event: ProxyClosed) {
        let subtask_id = self.inner.sessions.read().await.get(&event.session_id).copied();
        let Some(subtask_id) = subtask_id else {
            debug!(session_id = %event.session_id, "忽略未关联子任务的会话关闭通知");
            return;
        };
        let slot = self.inner.slots.read().await.get(&subtask_id).cloned();
        let Some(slot) = slot else {
            return;
        };

        warn!(
            subtask_id,
            session_id = %event.session_id,
            reason = %event.reason,
            "流代理会话被远端关闭"
        );
        let message = format!("ProxyError: 流代理会话被远端关闭: {}", event.reason);
        let failed = self.inner.finish(&slot, StopReason::Failed(message)).await;
        // 仍在打开阶段的子任务尚未交给执行方
        if matches!(failed, Some(subtask) if subtask.started_at.is_some()) {
            if let Err(e) = self.inner.executor.stop(subtask_id).await {
                warn!(subtask_id, error = %e, "通知模型执行方停止失败");
            }
        }
    }

    /// 订阅代理关闭事件并在后台处理，直到取消
    pub fn spawn_close_listener(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let receiver = self.inner.proxies.subscribe_closed();
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run_close_listener(receiver, cancel).await })
    }

    async fn run_close_listener(
        &self,
        mut receiver: broadcast::Receiver<ProxyClosed>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = receiver.recv() => match event {
                    Ok(event) => {
                        let orchestrator = self.clone();
                        tokio::spawn(async move { orchestrator.handle_proxy_closed(event).await });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "代理关闭事件积压，部分通知被丢弃");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("代理关闭监听已退出");
    }

    /// 停止全部活动任务，进程退出前调用
    pub async fn shutdown(&self) {
        let task_ids: Vec<i64> = self.inner.runtimes.read().await.keys().copied().collect();
        if task_ids.is_empty() {
            return;
        }
        info!(tasks = task_ids.len(), "停止全部活动任务");
        let results = join_all(task_ids.iter().map(|id| self.stop(*id))).await;
        for (task_id, result) in task_ids.iter().zip(results) {
            if let Err(e) = result {
                error!(task_id, error = %e, "关闭时停止任务失败");
            }
        }
    }

    pub async fn active_task_count(&self) -> usize {
        self.inner.runtimes.read().await.len()
    }
}

impl Inner {
    async fn resolve_targets(&self, request: &SubmitRequest) -> OrchestratorResult<Vec<CallbackTarget>> {
        let mut targets = Vec::new();
        for id in &request.callback_ids {
            let target = self
                .callbacks
                .get_by_id(*id)
                .await?
                .ok_or_else(|| OrchestratorError::Validation(format!("回调配置不存在: {id}")))?;
            targets.push(target);
        }
        for url in &request.callback_urls {
            targets.push(CallbackTarget::ad_hoc(
                url,
                self.settings.default_retry_count,
                self.settings.default_retry_interval_secs,
            ));
        }
        Ok(targets)
    }

    async fn dispatch(
        self: Arc<Self>,
        slot: Arc<SubTaskSlot>,
        cancel: CancellationToken,
        compute_hint: Option<ComputeType>,
    ) {
        let subtask = slot.snapshot().await;
        let subtask_id = subtask.id;
        if cancel.is_cancelled() {
            return;
        }

        let node = match self
            .selector
            .select_for(&subtask, self.settings.service_type, compute_hint)
            .await
        {
            Ok(node) => node,
            Err(e) => {
                warn!(subtask_id, error = %e, "节点选择失败");
                self.finish(&slot, StopReason::Failed(describe(&e))).await;
                return;
            }
        };

        // 关闭回调在 open 内部就已生效，映射必须先于 open 建立
        let session_id = subtask.session_id();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), subtask_id);

        let handle = match self
            .proxies
            .open_with_cancel(
                &subtask.stream_url,
                &session_id,
                self.settings.proxy_timeout,
                &cancel,
            )
            .await
        {
            Ok(handle) => handle,
            Err(OrchestratorError::Cancelled) => {
                debug!(subtask_id, %session_id, "调度被取消");
                self.sessions.write().await.remove(&session_id);
                return;
            }
            Err(e) => {
                warn!(subtask_id, %session_id, error = %e, "打开流代理失败");
                self.finish(&slot, StopReason::Failed(describe(&e))).await;
                self.sessions.write().await.remove(&session_id);
                return;
            }
        };

        if cancel.is_cancelled() {
            self.sessions.write().await.remove(&session_id);
            release_blocking(handle).await;
            return;
        }

        let running = match slot.start(&node.id, handle).await {
            Ok(running) => running,
            Err(e) => {
                // 远端关闭或停止抢先让子任务进入了终态，传入的句柄已被释放
                debug!(subtask_id, error = %e, "子任务在启动前已结束");
                self.sessions.write().await.remove(&session_id);
                return;
            }
        };

        let assignment = AnalysisAssignment {
            task_id: running.task_id,
            subtask_id,
            model_code: running.model_code.clone(),
            stream_url: running.stream_url.clone(),
            proxy_url: running.proxy_url.clone().unwrap_or_default(),
            node_id: node.id.clone(),
            output_url: running.output_url.clone(),
            callback_interval: running.config.callback_interval,
            config: running.config.clone(),
        };
        if let Err(e) = self.executor.start(&assignment).await {
            warn!(
                subtask_id,
                executor = self.executor.name(),
                error = %e,
                "模型执行方拒绝任务"
            );
            self.finish(&slot, StopReason::Failed(describe(&e))).await;
            return;
        }

        // 交接期间子任务被远端关闭，执行方此前未收到停止通知
        if slot.is_terminal().await {
            if let Err(e) = self.executor.stop(subtask_id).await {
                warn!(subtask_id, error = %e, "通知模型执行方停止失败");
            }
        }
    }

    /// 停止单个子任务：等待调度结束，通知执行方，锁外释放代理，再转换状态
    async fn settle(self: Arc<Self>, slot: Arc<SubTaskSlot>, dispatch: Option<JoinHandle<()>>) {
        let subtask_id = slot.subtask_id();
        if let Some(join) = dispatch {
            if let Err(e) = join.await {
                warn!(subtask_id, error = %e, "调度任务异常退出");
            }
        }

        if slot.status().await == SubTaskStatus::Running {
            if let Err(e) = self.executor.stop(subtask_id).await {
                warn!(subtask_id, error = %e, "通知模型执行方停止失败");
            }
        }

        if let Some(proxy) = slot.take_proxy().await {
            release_blocking(proxy).await;
        }

        self.finish(&slot, StopReason::Requested).await;
    }

    /// 超时后的本地强制停止，不等待原生释放完成
    async fn force_stop(&self, slot: &Arc<SubTaskSlot>) {
        if let Some(proxy) = slot.take_proxy().await {
            tokio::task::spawn_blocking(move || {
                proxy.close();
            });
        }
        if self.finish(slot, StopReason::Requested).await.is_some() {
            warn!(subtask_id = slot.subtask_id(), "子任务未在超时内完成停止，已强制标记");
        }
    }

    /// 转换到终态并发送状态通知，本次调用完成了转换时返回终态快照
    async fn finish(&self, slot: &Arc<SubTaskSlot>, reason: StopReason) -> Option<SubTask> {
        match slot.stop(reason).await {
            Ok((StopOutcome::Stopped(_), snapshot)) => {
                self.sessions.write().await.remove(&snapshot.session_id());
                self.notify_terminal(slot, snapshot.clone());
                Some(snapshot)
            }
            Ok((StopOutcome::AlreadyTerminal(_), _)) => None,
            Err(e) => {
                error!(subtask_id = slot.subtask_id(), error = %e, "子任务停止失败");
                None
            }
        }
    }

    /// 终态通知不受任务停止的取消影响
    fn notify_terminal(&self, slot: &Arc<SubTaskSlot>, subtask: SubTask) {
        if !subtask.enable_callback {
            return;
        }
        let payload = CallbackPayload {
            task_id: subtask.task_id,
            subtask_id: subtask.id,
            status: subtask.status,
            stream_url: subtask.stream_url.clone(),
            output_url: subtask.output_url.clone(),
            detections: None,
            result_frame: None,
            error: subtask.error_message.clone(),
            stopped_at: subtask.stopped_at,
            timestamp: Utc::now(),
        };
        let slot = Arc::clone(slot);
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let targets = slot.targets().await;
            spawn_deliveries(&dispatcher, slot, targets, payload, CancellationToken::new());
        });
    }

    /// 子任务创建中途失败：已写入的记录标记为失败，不再调度
    async fn abandon_submission(
        &self,
        mut task: Task,
        created: Vec<SubTask>,
        cause: &OrchestratorError,
    ) {
        let message = format!("任务创建未完成: {}", describe(cause));
        warn!(task_id = task.id, created = created.len(), %message, "提交中途失败");
        for mut subtask in created {
            let stop = StopReason::Failed(message.clone());
            if SubtaskStateMachine::stop(&mut subtask, &stop).is_ok() {
                if let Err(e) = self.subtasks.update(&subtask).await {
                    warn!(subtask_id = subtask.id, error = %e, "标记子任务失败时出错");
                }
            }
        }
        task.error_message = Some(message);
        task.stopped_at = Some(Utc::now());
        if let Err(e) = self.tasks.update(&task).await {
            warn!(task_id = task.id, error = %e, "标记任务失败时出错");
        }
    }

    /// 没有运行时记录的任务：已停止过或来自之前的进程
    async fn stop_detached(&self, task_id: i64) -> OrchestratorResult<()> {
        if self.tasks.get_by_id(task_id).await?.is_none() {
            return Err(OrchestratorError::TaskNotFound { id: task_id });
        }
        for mut subtask in self.subtasks.get_by_task_id(task_id).await? {
            if subtask.is_terminal() {
                continue;
            }
            SubtaskStateMachine::stop(&mut subtask, &StopReason::Requested)?;
            subtask.proxy_url = None;
            self.subtasks.update(&subtask).await?;
            info!(task_id, subtask_id = subtask.id, "标记遗留子任务为已停止");
        }
        self.mark_task_stopped(task_id).await
    }

    async fn mark_task_stopped(&self, task_id: i64) -> OrchestratorResult<()> {
        let mut task = self
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or(OrchestratorError::TaskNotFound { id: task_id })?;
        if task.stopped_at.is_none() {
            task.stopped_at = Some(Utc::now());
            self.tasks.update(&task).await?;
        }
        Ok(())
    }
}

/// 每个回调目标独立投递，失败记录到子任务上
fn spawn_deliveries(
    dispatcher: &CallbackDispatcher,
    slot: Arc<SubTaskSlot>,
    targets: Vec<CallbackTarget>,
    payload: CallbackPayload,
    cancel: CancellationToken,
) {
    let payload = Arc::new(payload);
    for target in targets {
        let dispatcher = dispatcher.clone();
        let slot = Arc::clone(&slot);
        let payload = Arc::clone(&payload);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = dispatcher.deliver(&target, payload.as_ref(), &cancel).await;
            match outcome.into_result(&target.url) {
                Ok(_) | Err(OrchestratorError::Cancelled) => {}
                Err(e) => {
                    warn!(subtask_id = slot.subtask_id(), error = %e, "回调投递最终失败");
                    slot.record_delivery_failure(&e.to_string()).await;
                }
            }
        });
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// 子任务错误信息带上错误分类，便于调用方区分
fn describe(error: &OrchestratorError) -> String {
    format!("{}: {}", error.kind(), error)
}
