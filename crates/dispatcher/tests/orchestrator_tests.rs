use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use orchestrator_core::config::{CallbackConfig, NodeRegistryConfig, ProxyConfig};
use orchestrator_core::models::{
    BBox, ComputeType, Detection, DetectionReport, Node, ServiceType, SubTask, SubTaskStatus,
    TaskView,
};
use orchestrator_core::traits::{CallbackRepository, SubTaskRepository, TaskRepository};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_dispatcher::{
    NodeRegistry, NodeSelector, OrchestratorComponents, OrchestratorSettings, TaskOrchestrator,
};
use orchestrator_infrastructure::{
    CallbackDispatcher, InMemoryCallbackRepository, InMemorySubTaskRepository,
    InMemoryTaskRepository, StreamProxyManager,
};
use orchestrator_testing_utils::{
    CallbackServer, CallbackTargetBuilder, FlakySubTaskRepository, HeartbeatBuilder,
    MockNativeProxy, PlayBehavior, RecordingModelExecutor, SubmitRequestBuilder,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

struct Harness {
    orchestrator: TaskOrchestrator,
    registry: Arc<NodeRegistry>,
    native: Arc<MockNativeProxy>,
    proxies: Arc<StreamProxyManager>,
    executor: Arc<RecordingModelExecutor>,
    tasks: Arc<InMemoryTaskRepository>,
    subtasks: Arc<InMemorySubTaskRepository>,
    callbacks: Arc<InMemoryCallbackRepository>,
}

struct HarnessOptions {
    selector: Option<Arc<dyn NodeSelector>>,
    settings: OrchestratorSettings,
    behavior: PlayBehavior,
    with_node: bool,
    subtask_update_delay: Option<Duration>,
    subtask_creates_before_failure: Option<usize>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            selector: None,
            settings: OrchestratorSettings::default().with_proxy_timeout(Duration::from_secs(2)),
            behavior: PlayBehavior::Succeed,
            with_node: true,
            subtask_update_delay: None,
            subtask_creates_before_failure: None,
        }
    }
}

async fn harness_with(options: HarnessOptions) -> Harness {
    let registry = Arc::new(NodeRegistry::new(NodeRegistryConfig::default()));
    if options.with_node {
        registry
            .update_heartbeat(HeartbeatBuilder::new("edge-1").with_load(0.3).build())
            .await
            .unwrap();
    }
    let native = Arc::new(MockNativeProxy::new(options.behavior));
    let proxies = Arc::new(StreamProxyManager::new(native.clone(), ProxyConfig::default()));
    let executor = RecordingModelExecutor::arc();
    let tasks = Arc::new(InMemoryTaskRepository::new());
    let subtasks = Arc::new(InMemorySubTaskRepository::new());
    let callbacks = Arc::new(InMemoryCallbackRepository::new());
    let mut subtask_store = FlakySubTaskRepository::new(subtasks.clone());
    if let Some(delay) = options.subtask_update_delay {
        subtask_store = subtask_store.with_update_delay(delay);
    }
    if let Some(count) = options.subtask_creates_before_failure {
        subtask_store = subtask_store.fail_creates_after(count);
    }
    let subtask_store: Arc<dyn SubTaskRepository> = Arc::new(subtask_store);
    let selector: Arc<dyn NodeSelector> = match options.selector {
        Some(selector) => selector,
        None => registry.clone(),
    };

    let orchestrator = TaskOrchestrator::new(
        OrchestratorComponents {
            tasks: tasks.clone(),
            subtasks: subtask_store,
            callbacks: callbacks.clone(),
            selector,
            proxies: proxies.clone(),
            executor: executor.clone(),
            dispatcher: CallbackDispatcher::new(&CallbackConfig::default()).unwrap(),
        },
        options.settings,
    );

    Harness {
        orchestrator,
        registry,
        native,
        proxies,
        executor,
        tasks,
        subtasks,
        callbacks,
    }
}

async fn harness() -> Harness {
    harness_with(HarnessOptions::default()).await
}

/// Poll the task view until `check` passes, returning the last view either way
async fn wait_for_view<F>(orchestrator: &TaskOrchestrator, task_id: i64, check: F) -> TaskView
where
    F: Fn(&TaskView) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let view = orchestrator.get_status(task_id).await.unwrap();
        if check(&view) || Instant::now() >= deadline {
            return view;
        }
        sleep(Duration::from_millis(20)).await;
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    check()
}

fn all_running(view: &TaskView) -> bool {
    view.sub_tasks
        .iter()
        .all(|s| s.status == SubTaskStatus::Running)
}

fn report() -> DetectionReport {
    DetectionReport {
        detections: vec![Detection {
            track_id: Some(7),
            class_name: "person".to_string(),
            confidence: 0.91,
            bbox: BBox {
                x1: 10.0,
                y1: 20.0,
                x2: 110.0,
                y2: 220.0,
            },
            children: Vec::new(),
        }],
        result_frame: Some("frames/0001.jpg".to_string()),
        timestamp: None,
    }
}

/// Fails selection for one stream url, delegates everything else
struct FailingForStream {
    stream_url: String,
    registry: Arc<NodeRegistry>,
}

#[async_trait]
impl NodeSelector for FailingForStream {
    async fn select_for(
        &self,
        subtask: &SubTask,
        service_type: ServiceType,
        compute_hint: Option<ComputeType>,
    ) -> OrchestratorResult<Node> {
        if subtask.stream_url == self.stream_url {
            return Err(OrchestratorError::NoCapacity(format!(
                "no node for {}",
                subtask.stream_url
            )));
        }
        self.registry.select_node(service_type, compute_hint).await
    }
}

#[tokio::test]
async fn test_submit_dispatches_every_pair() {
    let h = harness().await;
    let request = SubmitRequestBuilder::new()
        .with_models(&["yolo", "pose"])
        .with_streams(&["rtsp://cam/1", "rtsp://cam/2"])
        .with_output_url("rtmp://out/live")
        .build();

    let response = h.orchestrator.submit(request).await.unwrap();
    assert_eq!(response.sub_tasks.len(), 4);
    assert!(response
        .sub_tasks
        .iter()
        .all(|s| s.status == SubTaskStatus::Pending));
    let streams: Vec<&str> = response
        .sub_tasks
        .iter()
        .map(|s| s.stream_url.as_str())
        .collect();
    assert_eq!(
        streams,
        vec!["rtsp://cam/1", "rtsp://cam/1", "rtsp://cam/2", "rtsp://cam/2"]
    );
    assert!(response
        .sub_tasks
        .iter()
        .all(|s| s.output_url.as_deref() == Some("rtmp://out/live")));

    let task_id = response.parent_task_id;
    let view = wait_for_view(&h.orchestrator, task_id, all_running).await;
    assert_eq!(view.status, SubTaskStatus::Running);
    assert!(view.started_at.is_some());
    for subtask in &view.sub_tasks {
        assert_eq!(subtask.status, SubTaskStatus::Running);
        assert_eq!(subtask.node_id.as_deref(), Some("edge-1"));
        assert_eq!(
            subtask.proxy_url.as_deref(),
            Some(format!("rtsp://127.0.0.1:8554/live/{}_{}", task_id, subtask.id).as_str())
        );
    }

    let executor = h.executor.clone();
    assert!(eventually(|| executor.started().len() == 4).await);
    let started = h.executor.started();
    let assignment = &started[0];
    assert_eq!(assignment.node_id, "edge-1");
    assert!(assignment.proxy_url.starts_with("rtsp://127.0.0.1:8554/live/"));
    assert_eq!(h.proxies.pending_count(), 0);

    h.orchestrator.stop(task_id).await.unwrap();
}

#[tokio::test]
async fn test_dispatch_failure_is_isolated_per_subtask() {
    let registry = Arc::new(NodeRegistry::new(NodeRegistryConfig::default()));
    registry
        .update_heartbeat(HeartbeatBuilder::new("edge-1").build())
        .await
        .unwrap();
    let selector: Arc<dyn NodeSelector> = Arc::new(FailingForStream {
        stream_url: "rtsp://cam/2".to_string(),
        registry,
    });
    let h = harness_with(HarnessOptions {
        selector: Some(selector),
        ..HarnessOptions::default()
    })
    .await;

    let request = SubmitRequestBuilder::new()
        .with_streams(&["rtsp://cam/1", "rtsp://cam/2", "rtsp://cam/3"])
        .build();
    let task_id = h.orchestrator.submit(request).await.unwrap().parent_task_id;

    let view = wait_for_view(&h.orchestrator, task_id, |v| {
        v.sub_tasks.iter().all(|s| s.status != SubTaskStatus::Pending)
    })
    .await;
    let statuses: Vec<SubTaskStatus> = view.sub_tasks.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            SubTaskStatus::Running,
            SubTaskStatus::Failed,
            SubTaskStatus::Running
        ]
    );
    let failed = &view.sub_tasks[1];
    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .contains("NoCapacityError"));
    assert!(failed.node_id.is_none());
    assert_eq!(view.status, SubTaskStatus::Running);
    assert_eq!(h.native.created_count(), 2);

    h.orchestrator.stop(task_id).await.unwrap();
}

#[tokio::test]
async fn test_no_nodes_fails_every_subtask() {
    let h = harness_with(HarnessOptions {
        with_node: false,
        ..HarnessOptions::default()
    })
    .await;
    let request = SubmitRequestBuilder::new()
        .with_streams(&["rtsp://cam/1", "rtsp://cam/2"])
        .build();
    let task_id = h.orchestrator.submit(request).await.unwrap().parent_task_id;

    let view = wait_for_view(&h.orchestrator, task_id, |v| v.status == SubTaskStatus::Failed).await;
    assert_eq!(view.status, SubTaskStatus::Failed);
    assert!(view
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("NoCapacityError"));
    assert_eq!(h.native.created_count(), 0);
    assert!(h.executor.started().is_empty());
}

#[tokio::test]
async fn test_zero_callback_interval_is_rejected_before_any_row() {
    let h = harness().await;
    let request = SubmitRequestBuilder::new().with_callback_interval(0).build();

    let err = h.orchestrator.submit(request).await.unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert_eq!(err.to_response().kind, "ValidationError");
    assert_eq!(h.tasks.count().await, 0);
    assert_eq!(h.subtasks.count().await, 0);
    assert_eq!(h.orchestrator.active_task_count().await, 0);
}

#[tokio::test]
async fn test_unknown_callback_id_is_rejected_before_any_row() {
    let h = harness().await;
    let request = SubmitRequestBuilder::new().with_callback_id(42).build();

    let err = h.orchestrator.submit(request).await.unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert!(err.to_string().contains("42"));
    assert_eq!(h.tasks.count().await, 0);
}

#[tokio::test]
async fn test_proxy_error_code_fails_subtask_and_releases_handle() {
    let h = harness_with(HarnessOptions {
        behavior: PlayBehavior::Fail(-400),
        ..HarnessOptions::default()
    })
    .await;
    let task_id = h
        .orchestrator
        .submit(SubmitRequestBuilder::new().build())
        .await
        .unwrap()
        .parent_task_id;

    let view = wait_for_view(&h.orchestrator, task_id, |v| v.status == SubTaskStatus::Failed).await;
    let subtask = &view.sub_tasks[0];
    assert_eq!(subtask.status, SubTaskStatus::Failed);
    let message = subtask.error_message.as_deref().unwrap();
    assert!(message.starts_with("ProxyError"), "{message}");
    assert!(message.contains("-400"));
    assert!(subtask.proxy_url.is_none());
    assert_eq!(h.native.total_releases(), 1);
    assert_eq!(h.native.live_sessions(), 0);
    assert!(h.executor.started().is_empty());
}

#[tokio::test]
async fn test_slow_open_does_not_block_sibling_subtasks() {
    let h = harness_with(HarnessOptions {
        settings: OrchestratorSettings::default().with_proxy_timeout(Duration::from_millis(500)),
        ..HarnessOptions::default()
    })
    .await;
    // first task gets id 1 and its subtasks 1 and 2
    h.native.set_session_behavior("1_1", PlayBehavior::NeverCallback);

    let request = SubmitRequestBuilder::new()
        .with_streams(&["rtsp://cam/slow", "rtsp://cam/fast"])
        .build();
    let task_id = h.orchestrator.submit(request).await.unwrap().parent_task_id;
    assert_eq!(task_id, 1);

    let view = wait_for_view(&h.orchestrator, task_id, |v| {
        v.sub_tasks[1].status == SubTaskStatus::Running
    })
    .await;
    assert_eq!(view.sub_tasks[1].status, SubTaskStatus::Running);

    let view = wait_for_view(&h.orchestrator, task_id, |v| {
        v.sub_tasks[0].status == SubTaskStatus::Failed
    })
    .await;
    let slow = &view.sub_tasks[0];
    assert_eq!(slow.status, SubTaskStatus::Failed);
    assert!(slow
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("ProxyTimeoutError"));
    assert_eq!(h.proxies.pending_count(), 0);

    h.orchestrator.stop(task_id).await.unwrap();
    assert_eq!(h.native.live_sessions(), 0);
    assert!(!h.native.has_double_release());
}

#[tokio::test]
async fn test_stop_releases_every_handle_once_and_is_idempotent() {
    let h = harness().await;
    let request = SubmitRequestBuilder::new()
        .with_streams(&["rtsp://cam/1", "rtsp://cam/2"])
        .build();
    let task_id = h.orchestrator.submit(request).await.unwrap().parent_task_id;
    wait_for_view(&h.orchestrator, task_id, all_running).await;

    h.orchestrator.stop(task_id).await.unwrap();
    let view = h.orchestrator.get_status(task_id).await.unwrap();
    assert_eq!(view.status, SubTaskStatus::Stopped);
    assert!(view.stopped_at.is_some());
    for subtask in &view.sub_tasks {
        assert_eq!(subtask.status, SubTaskStatus::Stopped);
        assert!(subtask.stopped_at.is_some());
        assert!(subtask.proxy_url.is_none());
    }
    assert_eq!(h.native.total_releases(), 2);
    assert_eq!(h.native.live_sessions(), 0);

    let mut stopped = h.executor.stopped();
    stopped.sort();
    let mut ids: Vec<i64> = view.sub_tasks.iter().map(|s| s.id).collect();
    ids.sort();
    assert_eq!(stopped, ids);

    h.orchestrator.stop(task_id).await.unwrap();
    let again = h.orchestrator.get_status(task_id).await.unwrap();
    assert_eq!(again.status, SubTaskStatus::Stopped);
    assert_eq!(again.stopped_at, view.stopped_at);
    assert_eq!(h.native.total_releases(), 2);
    assert!(!h.native.has_double_release());
    assert_eq!(h.orchestrator.active_task_count().await, 0);
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let h = harness().await;
    assert_eq!(
        h.orchestrator.get_status(99).await.unwrap_err().kind(),
        "NotFound"
    );
    assert_eq!(h.orchestrator.stop(99).await.unwrap_err().kind(), "NotFound");
}

#[tokio::test]
async fn test_stop_cancels_in_flight_open_and_cleans_up() {
    let h = harness_with(HarnessOptions {
        behavior: PlayBehavior::NeverCallback,
        settings: OrchestratorSettings::default().with_proxy_timeout(Duration::from_secs(5)),
        ..HarnessOptions::default()
    })
    .await;
    let task_id = h
        .orchestrator
        .submit(SubmitRequestBuilder::new().build())
        .await
        .unwrap()
        .parent_task_id;

    let native = h.native.clone();
    assert!(eventually(|| native.created_count() == 1).await);

    let started = Instant::now();
    h.orchestrator.stop(task_id).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    let view = h.orchestrator.get_status(task_id).await.unwrap();
    assert_eq!(view.sub_tasks[0].status, SubTaskStatus::Stopped);
    assert_eq!(h.native.live_sessions(), 0);
    assert_eq!(h.native.total_releases(), 1);
    assert_eq!(h.proxies.pending_count(), 0);
    assert!(h.executor.started().is_empty());
}

#[tokio::test]
async fn test_stop_timeout_force_marks_remaining_subtasks() {
    let h = harness_with(HarnessOptions {
        settings: OrchestratorSettings::default()
            .with_proxy_timeout(Duration::from_secs(2))
            .with_stop_timeout(Duration::from_millis(300)),
        ..HarnessOptions::default()
    })
    .await;
    let task_id = h
        .orchestrator
        .submit(SubmitRequestBuilder::new().build())
        .await
        .unwrap()
        .parent_task_id;
    wait_for_view(&h.orchestrator, task_id, all_running).await;

    h.executor.set_stop_delay(Duration::from_secs(10));
    let started = Instant::now();
    h.orchestrator.stop(task_id).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    let view = h.orchestrator.get_status(task_id).await.unwrap();
    assert_eq!(view.sub_tasks[0].status, SubTaskStatus::Stopped);
    assert_eq!(view.status, SubTaskStatus::Stopped);

    let native = h.native.clone();
    assert!(eventually(|| native.total_releases() == 1).await);
    assert!(!h.native.has_double_release());
}

#[tokio::test]
async fn test_executor_rejection_fails_subtask_and_releases_proxy() {
    let h = harness().await;
    h.executor.set_fail_start(true);
    let task_id = h
        .orchestrator
        .submit(SubmitRequestBuilder::new().build())
        .await
        .unwrap()
        .parent_task_id;

    let view = wait_for_view(&h.orchestrator, task_id, |v| v.status == SubTaskStatus::Failed).await;
    let subtask = &view.sub_tasks[0];
    assert_eq!(subtask.status, SubTaskStatus::Failed);
    assert!(subtask.started_at.is_some());
    assert!(subtask
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("NetworkError"));
    let native = h.native.clone();
    assert!(eventually(|| native.total_releases() == 1).await);
    assert_eq!(h.native.live_sessions(), 0);
}

#[tokio::test]
async fn test_remote_close_fails_running_subtask() {
    let h = harness().await;
    let listener_cancel = CancellationToken::new();
    let listener = h.orchestrator.spawn_close_listener(listener_cancel.clone());

    let task_id = h
        .orchestrator
        .submit(SubmitRequestBuilder::new().build())
        .await
        .unwrap()
        .parent_task_id;
    let view = wait_for_view(&h.orchestrator, task_id, all_running).await;
    let subtask_id = view.sub_tasks[0].id;

    assert!(h
        .native
        .trigger_close(&format!("{task_id}_{subtask_id}"), "peer gone"));

    let view = wait_for_view(&h.orchestrator, task_id, |v| v.status == SubTaskStatus::Failed).await;
    let subtask = &view.sub_tasks[0];
    assert_eq!(subtask.status, SubTaskStatus::Failed);
    let message = subtask.error_message.as_deref().unwrap();
    assert!(message.starts_with("ProxyError"));
    assert!(message.contains("peer gone"));
    let native = h.native.clone();
    assert!(eventually(|| native.total_releases() == 1).await);

    let executor = h.executor.clone();
    assert!(eventually(|| executor.stopped().contains(&subtask_id)).await);

    h.orchestrator.stop(task_id).await.unwrap();
    assert_eq!(h.native.total_releases(), 1);

    listener_cancel.cancel();
    listener.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_during_open_fails_subtask() {
    let h = harness_with(HarnessOptions {
        behavior: PlayBehavior::SucceedThenClose("peer gone".to_string()),
        subtask_update_delay: Some(Duration::from_millis(50)),
        ..HarnessOptions::default()
    })
    .await;
    let listener_cancel = CancellationToken::new();
    let listener = h.orchestrator.spawn_close_listener(listener_cancel.clone());

    let task_id = h
        .orchestrator
        .submit(SubmitRequestBuilder::new().build())
        .await
        .unwrap()
        .parent_task_id;

    let view = wait_for_view(&h.orchestrator, task_id, |v| v.status == SubTaskStatus::Failed).await;
    let subtask = &view.sub_tasks[0];
    assert_eq!(subtask.status, SubTaskStatus::Failed);
    let message = subtask.error_message.as_deref().unwrap();
    assert!(message.starts_with("ProxyError"), "{message}");
    assert!(message.contains("peer gone"));
    assert!(subtask.proxy_url.is_none());

    let native = h.native.clone();
    assert!(eventually(|| native.total_releases() == 1).await);
    assert_eq!(h.native.live_sessions(), 0);
    assert!(!h.native.has_double_release());

    // 若已交给执行方，必须也收到停止通知
    let executor = h.executor.clone();
    assert!(
        eventually(|| {
            let stopped = executor.stopped();
            executor
                .started()
                .iter()
                .all(|a| stopped.contains(&a.subtask_id))
        })
        .await
    );

    listener_cancel.cancel();
    listener.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_native_release_does_not_stall_remote_close_or_stop() {
    let h = harness_with(HarnessOptions {
        settings: OrchestratorSettings::default()
            .with_proxy_timeout(Duration::from_secs(2))
            .with_stop_timeout(Duration::from_millis(300)),
        ..HarnessOptions::default()
    })
    .await;
    let listener_cancel = CancellationToken::new();
    let listener = h.orchestrator.spawn_close_listener(listener_cancel.clone());

    let task_id = h
        .orchestrator
        .submit(SubmitRequestBuilder::new().build())
        .await
        .unwrap()
        .parent_task_id;
    let view = wait_for_view(&h.orchestrator, task_id, all_running).await;
    let subtask_id = view.sub_tasks[0].id;

    h.native.set_release_delay(Duration::from_secs(2));
    let started = Instant::now();
    assert!(h
        .native
        .trigger_close(&format!("{task_id}_{subtask_id}"), "peer gone"));

    let view = wait_for_view(&h.orchestrator, task_id, |v| v.status == SubTaskStatus::Failed).await;
    assert_eq!(view.sub_tasks[0].status, SubTaskStatus::Failed);
    h.orchestrator.stop(task_id).await.unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "stop waited on the native release: {:?}",
        started.elapsed()
    );

    let native = h.native.clone();
    assert!(eventually(|| native.total_releases() == 1).await);
    assert!(!h.native.has_double_release());

    listener_cancel.cancel();
    listener.await.unwrap();
}

#[tokio::test]
async fn test_partial_submission_is_marked_failed() {
    let h = harness_with(HarnessOptions {
        subtask_creates_before_failure: Some(1),
        ..HarnessOptions::default()
    })
    .await;
    let request = SubmitRequestBuilder::new()
        .with_streams(&["rtsp://cam/1", "rtsp://cam/2"])
        .build();

    let err = h.orchestrator.submit(request).await.unwrap_err();
    assert_eq!(err.kind(), "StorageError");
    assert_eq!(h.orchestrator.active_task_count().await, 0);
    assert_eq!(h.native.created_count(), 0);

    let tasks = h.tasks.list().await.unwrap();
    assert_eq!(tasks.len(), 1);
    let view = h.orchestrator.get_status(tasks[0].id).await.unwrap();
    assert_eq!(view.sub_tasks.len(), 1);
    assert_eq!(view.sub_tasks[0].status, SubTaskStatus::Failed);
    assert_eq!(view.status, SubTaskStatus::Failed);
    assert!(view.stopped_at.is_some());
    let message = view.error_message.as_deref().unwrap();
    assert!(message.contains("StorageError"), "{message}");
}

#[tokio::test]
async fn test_publish_result_is_throttled_per_interval() {
    let server = CallbackServer::always(200).await;
    let h = harness().await;
    let request = SubmitRequestBuilder::new()
        .with_callback_url(&server.url("/results"))
        .with_callback_interval(60)
        .build();
    let task_id = h.orchestrator.submit(request).await.unwrap().parent_task_id;
    let view = wait_for_view(&h.orchestrator, task_id, all_running).await;
    let subtask_id = view.sub_tasks[0].id;

    assert!(h.orchestrator.publish_result(subtask_id, report()).await.unwrap());
    assert!(!h.orchestrator.publish_result(subtask_id, report()).await.unwrap());

    assert!(eventually(|| server.request_count() == 1).await);
    let requests = server.requests();
    let request = &requests[0];
    assert_eq!(request.path, "/results");
    assert_eq!(request.body["task_id"], task_id);
    assert_eq!(request.body["subtask_id"], subtask_id);
    assert_eq!(request.body["status"], 1);
    assert_eq!(request.body["detections"][0]["class_name"], "person");
    assert_eq!(request.body["detections"][0]["bbox"]["x2"], 110.0);
    assert_eq!(request.body["result_frame"], "frames/0001.jpg");

    assert_eq!(
        h.orchestrator.publish_result(999, report()).await.unwrap_err().kind(),
        "NotFound"
    );

    h.orchestrator.stop(task_id).await.unwrap();
    assert!(!h.orchestrator.publish_result(subtask_id, report()).await.unwrap());
}

#[tokio::test]
async fn test_publish_without_callbacks_is_skipped() {
    let h = harness().await;
    let task_id = h
        .orchestrator
        .submit(SubmitRequestBuilder::new().build())
        .await
        .unwrap()
        .parent_task_id;
    let view = wait_for_view(&h.orchestrator, task_id, all_running).await;

    assert!(!h
        .orchestrator
        .publish_result(view.sub_tasks[0].id, report())
        .await
        .unwrap());
    h.orchestrator.stop(task_id).await.unwrap();
}

#[tokio::test]
async fn test_task_stop_cancels_pending_result_retries() {
    let server = CallbackServer::always(500).await;
    let h = harness().await;
    let target = h
        .callbacks
        .create(
            &CallbackTargetBuilder::new(&server.url("/alarm"))
                .with_retries(5, 2)
                .build(),
        )
        .await
        .unwrap();

    let request = SubmitRequestBuilder::new()
        .with_callback_id(target.id)
        .build();
    let task_id = h.orchestrator.submit(request).await.unwrap().parent_task_id;
    let view = wait_for_view(&h.orchestrator, task_id, all_running).await;
    let subtask_id = view.sub_tasks[0].id;

    assert!(h.orchestrator.publish_result(subtask_id, report()).await.unwrap());
    assert!(eventually(|| server.request_count() >= 1).await);

    h.orchestrator.stop(task_id).await.unwrap();
    sleep(Duration::from_millis(2500)).await;

    let result_attempts = server
        .requests()
        .iter()
        .filter(|r| r.body.get("detections").is_some())
        .count();
    assert_eq!(result_attempts, 1);

    // the terminal status notification is not cancelled by stop
    let status_attempts = server
        .requests()
        .iter()
        .filter(|r| r.body["status"] == 2)
        .count();
    assert!(status_attempts >= 1);
}

#[tokio::test]
async fn test_terminal_status_is_delivered_on_stop() {
    let server = CallbackServer::always(200).await;
    let h = harness().await;
    let request = SubmitRequestBuilder::new()
        .with_callback_url(&server.url("/status"))
        .build();
    let task_id = h.orchestrator.submit(request).await.unwrap().parent_task_id;
    wait_for_view(&h.orchestrator, task_id, all_running).await;

    h.orchestrator.stop(task_id).await.unwrap();
    assert!(eventually(|| server.request_count() == 1).await);

    let requests = server.requests();
    let request = &requests[0];
    assert_eq!(request.body["status"], 2);
    assert!(request.body.get("stopped_at").is_some());
    assert!(request.body.get("detections").is_none());
    assert!(request.header("x-delivery-id").is_some());
}

#[tokio::test]
async fn test_delivery_failure_is_recorded_without_failing_subtask() {
    let server = CallbackServer::always(500).await;
    let mut settings = OrchestratorSettings::default().with_proxy_timeout(Duration::from_secs(2));
    settings.default_retry_count = 0;
    let h = harness_with(HarnessOptions {
        settings,
        ..HarnessOptions::default()
    })
    .await;

    let request = SubmitRequestBuilder::new()
        .with_callback_url(&server.url("/results"))
        .build();
    let task_id = h.orchestrator.submit(request).await.unwrap().parent_task_id;
    let view = wait_for_view(&h.orchestrator, task_id, all_running).await;
    let subtask_id = view.sub_tasks[0].id;

    assert!(h.orchestrator.publish_result(subtask_id, report()).await.unwrap());
    let view = wait_for_view(&h.orchestrator, task_id, |v| {
        v.sub_tasks[0].delivery_failures == 1
    })
    .await;
    let subtask = &view.sub_tasks[0];
    assert_eq!(subtask.delivery_failures, 1);
    assert!(subtask
        .last_delivery_error
        .as_deref()
        .unwrap()
        .contains("500"));
    assert_eq!(subtask.status, SubTaskStatus::Running);

    h.orchestrator.stop(task_id).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_all_active_tasks() {
    let h = harness().await;
    let first = h
        .orchestrator
        .submit(SubmitRequestBuilder::new().with_streams(&["rtsp://cam/1"]).build())
        .await
        .unwrap()
        .parent_task_id;
    let second = h
        .orchestrator
        .submit(SubmitRequestBuilder::new().with_streams(&["rtsp://cam/2"]).build())
        .await
        .unwrap()
        .parent_task_id;
    wait_for_view(&h.orchestrator, first, all_running).await;
    wait_for_view(&h.orchestrator, second, all_running).await;
    assert_eq!(h.orchestrator.active_task_count().await, 2);

    h.orchestrator.shutdown().await;

    assert_eq!(h.orchestrator.active_task_count().await, 0);
    for task_id in [first, second] {
        let view = h.orchestrator.get_status(task_id).await.unwrap();
        assert_eq!(view.status, SubTaskStatus::Stopped);
    }
    assert_eq!(h.native.live_sessions(), 0);
    assert_eq!(h.native.total_releases(), 2);
}

#[tokio::test]
async fn test_compute_hint_reaches_registry() {
    let h = harness().await;
    h.registry
        .update_heartbeat(
            HeartbeatBuilder::new("cam-node")
                .with_compute_type(ComputeType::Camera)
                .with_load(0.9)
                .build(),
        )
        .await
        .unwrap();

    let request = SubmitRequestBuilder::new()
        .with_compute_hint(ComputeType::Camera)
        .build();
    let task_id = h.orchestrator.submit(request).await.unwrap().parent_task_id;
    let view = wait_for_view(&h.orchestrator, task_id, all_running).await;
    assert_eq!(view.sub_tasks[0].node_id.as_deref(), Some("cam-node"));

    h.orchestrator.stop(task_id).await.unwrap();
}
