//! Test doubles for the native proxy boundary and the model executor
//!
//! `MockNativeProxy` mimics an SDK that reports play results through
//! callbacks, optionally from a foreign thread, and counts every release so
//! tests can assert that no handle leaks or is released twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::models::{AnalysisAssignment, SubTask};
use orchestrator_core::traits::{
    CloseCallback, ModelExecutor, NativeHandle, NativeProxy, PlayResultCallback,
    SubTaskRepository,
};
use orchestrator_core::{OrchestratorError, OrchestratorResult};

/// How the mock answers a `play` call
#[derive(Debug, Clone, PartialEq)]
pub enum PlayBehavior {
    /// Report success inline, before `play` returns
    Succeed,
    /// Report the given non-zero code inline
    Fail(i32),
    /// Keep the callback and never invoke it
    NeverCallback,
    /// Invoke the callback from another thread after a delay
    Delayed { delay: Duration, code: i32 },
    /// Report success inline, then drop the session from the far end
    SucceedThenClose(String),
}

struct MockSession {
    stream_id: String,
    on_close: Option<CloseCallback>,
    retained_result: Option<PlayResultCallback>,
}

struct MockState {
    default_behavior: PlayBehavior,
    session_behaviors: HashMap<String, PlayBehavior>,
    sessions: HashMap<u64, MockSession>,
    created: usize,
    played_urls: Vec<String>,
    releases: HashMap<u64, usize>,
    fail_create: bool,
    release_delay: Option<Duration>,
}

pub struct MockNativeProxy {
    state: Mutex<MockState>,
    next_handle: AtomicU64,
}

impl MockNativeProxy {
    pub fn new(behavior: PlayBehavior) -> Self {
        Self {
            state: Mutex::new(MockState {
                default_behavior: behavior,
                session_behaviors: HashMap::new(),
                sessions: HashMap::new(),
                created: 0,
                played_urls: Vec::new(),
                releases: HashMap::new(),
                fail_create: false,
                release_delay: None,
            }),
            next_handle: AtomicU64::new(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_behavior(&self, behavior: PlayBehavior) {
        self.state().default_behavior = behavior;
    }

    /// Override the play behavior for one session id
    pub fn set_session_behavior(&self, session_id: &str, behavior: PlayBehavior) {
        self.state()
            .session_behaviors
            .insert(session_id.to_string(), behavior);
    }

    pub fn fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    /// Make every `release` block the calling thread for the given duration
    pub fn set_release_delay(&self, delay: Duration) {
        self.state().release_delay = Some(delay);
    }

    pub fn created_count(&self) -> usize {
        self.state().created
    }

    pub fn played_urls(&self) -> Vec<String> {
        self.state().played_urls.clone()
    }

    pub fn release_count(&self, handle: NativeHandle) -> usize {
        self.state().releases.get(&handle.0).copied().unwrap_or(0)
    }

    pub fn total_releases(&self) -> usize {
        self.state().releases.values().sum()
    }

    /// True when some handle was released more than once
    pub fn has_double_release(&self) -> bool {
        self.state().releases.values().any(|count| *count > 1)
    }

    /// Sessions created but not yet released
    pub fn live_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    /// Simulate the far end dropping a session
    pub fn trigger_close(&self, session_id: &str, reason: &str) -> bool {
        let callback = {
            let mut state = self.state();
            state
                .sessions
                .values_mut()
                .find(|s| s.stream_id == session_id)
                .and_then(|s| s.on_close.take())
        };
        match callback {
            Some(callback) => {
                callback(reason.to_string());
                true
            }
            None => false,
        }
    }
}

impl NativeProxy for MockNativeProxy {
    fn create(
        &self,
        _vhost: &str,
        _app: &str,
        stream_id: &str,
        _rtsp_enabled: bool,
    ) -> OrchestratorResult<NativeHandle> {
        let mut state = self.state();
        if state.fail_create {
            return Err(OrchestratorError::Internal("mock create failure".to_string()));
        }
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        state.created += 1;
        state.sessions.insert(
            id,
            MockSession {
                stream_id: stream_id.to_string(),
                on_close: None,
                retained_result: None,
            },
        );
        Ok(NativeHandle(id))
    }

    fn set_on_close(&self, handle: NativeHandle, on_close: CloseCallback) {
        if let Some(session) = self.state().sessions.get_mut(&handle.0) {
            session.on_close = Some(on_close);
        }
    }

    fn play(
        &self,
        handle: NativeHandle,
        url: &str,
        on_result: PlayResultCallback,
    ) -> OrchestratorResult<()> {
        let behavior = {
            let mut state = self.state();
            let stream_id = match state.sessions.get(&handle.0) {
                Some(session) => session.stream_id.clone(),
                None => {
                    return Err(OrchestratorError::Internal(format!(
                        "unknown handle {}",
                        handle.0
                    )))
                }
            };
            state.played_urls.push(url.to_string());
            state
                .session_behaviors
                .get(&stream_id)
                .cloned()
                .unwrap_or_else(|| state.default_behavior.clone())
        };

        // callbacks run without the state lock held
        match behavior {
            PlayBehavior::Succeed => on_result(0, "success".to_string()),
            PlayBehavior::Fail(code) => on_result(code, "mock play failure".to_string()),
            PlayBehavior::NeverCallback => {
                if let Some(session) = self.state().sessions.get_mut(&handle.0) {
                    session.retained_result = Some(on_result);
                }
            }
            PlayBehavior::Delayed { delay, code } => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    on_result(code, "delayed".to_string());
                });
            }
            PlayBehavior::SucceedThenClose(reason) => {
                on_result(0, "success".to_string());
                let on_close = self
                    .state()
                    .sessions
                    .get_mut(&handle.0)
                    .and_then(|s| s.on_close.take());
                if let Some(on_close) = on_close {
                    on_close(reason);
                }
            }
        }
        Ok(())
    }

    fn release(&self, handle: NativeHandle) {
        let delay = self.state().release_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.state();
        state.sessions.remove(&handle.0);
        *state.releases.entry(handle.0).or_insert(0) += 1;
    }
}

/// Records every hand-off and stop request
#[derive(Default)]
pub struct RecordingModelExecutor {
    started: Mutex<Vec<AnalysisAssignment>>,
    stopped: Mutex<Vec<i64>>,
    fail_start: Mutex<bool>,
    stop_delay: Mutex<Option<Duration>>,
}

impl RecordingModelExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_fail_start(&self, fail: bool) {
        *self.fail_start.lock().unwrap_or_else(|p| p.into_inner()) = fail;
    }

    /// Make every `stop` call hang for the given duration
    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap_or_else(|p| p.into_inner()) = Some(delay);
    }

    pub fn started(&self) -> Vec<AnalysisAssignment> {
        self.started
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn stopped(&self) -> Vec<i64> {
        self.stopped
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl ModelExecutor for RecordingModelExecutor {
    async fn start(&self, assignment: &AnalysisAssignment) -> OrchestratorResult<()> {
        if *self.fail_start.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(OrchestratorError::Network(
                "mock executor rejected assignment".to_string(),
            ));
        }
        self.started
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(assignment.clone());
        Ok(())
    }

    async fn stop(&self, subtask_id: i64) -> OrchestratorResult<()> {
        let delay = *self.stop_delay.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.stopped
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(subtask_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Wraps a subtask repository with slow updates or failing creates
pub struct FlakySubTaskRepository {
    inner: Arc<dyn SubTaskRepository>,
    update_delay: Option<Duration>,
    creates_before_failure: Option<usize>,
    creates: AtomicU64,
}

impl FlakySubTaskRepository {
    pub fn new(inner: Arc<dyn SubTaskRepository>) -> Self {
        Self {
            inner,
            update_delay: None,
            creates_before_failure: None,
            creates: AtomicU64::new(0),
        }
    }

    /// Sleep before every `update`, widening windows around persistence
    pub fn with_update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = Some(delay);
        self
    }

    /// Let `count` creates through, then fail every later one
    pub fn fail_creates_after(mut self, count: usize) -> Self {
        self.creates_before_failure = Some(count);
        self
    }
}

#[async_trait]
impl SubTaskRepository for FlakySubTaskRepository {
    async fn create(&self, subtask: &SubTask) -> OrchestratorResult<SubTask> {
        let attempt = self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.creates_before_failure {
            if attempt >= limit as u64 {
                return Err(OrchestratorError::Storage("mock create failure".to_string()));
            }
        }
        self.inner.create(subtask).await
    }

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<SubTask>> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_task_id(&self, task_id: i64) -> OrchestratorResult<Vec<SubTask>> {
        self.inner.get_by_task_id(task_id).await
    }

    async fn update(&self, subtask: &SubTask) -> OrchestratorResult<()> {
        if let Some(delay) = self.update_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.update(subtask).await
    }
}
