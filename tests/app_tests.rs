use std::io::Write;
use std::time::Duration;

use orchestrator::app::Application;
use orchestrator_core::models::SubTaskStatus;
use orchestrator_core::AppConfig;
use tokio_util::sync::CancellationToken;

fn write_requests(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_submit_file_without_nodes_fails_subtasks() {
    let app = Application::new(AppConfig::default()).await.unwrap();
    let file = write_requests(
        r#"[{"model_code":"yolo","stream_url":["rtsp://cam/1","rtsp://cam/2"]},
            {"model_code":"yolo","stream_url":"rtsp://cam/3","callback_interval":0}]"#,
    );

    let responses = app.submit_file(file.path()).await.unwrap();
    // 第二个请求因回调间隔非法被拒绝
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].sub_tasks.len(), 2);

    let task_id = responses[0].parent_task_id;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let view = loop {
        let view = app.orchestrator().get_status(task_id).await.unwrap();
        if view
            .sub_tasks
            .iter()
            .all(|s| s.status == SubTaskStatus::Failed)
        {
            break view;
        }
        assert!(tokio::time::Instant::now() < deadline, "子任务未进入失败状态");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(view.status, SubTaskStatus::Failed);
    for subtask in &view.sub_tasks {
        let message = subtask.error_message.as_deref().unwrap_or_default();
        assert!(message.starts_with("NoCapacityError"), "{message}");
    }
}

#[tokio::test]
async fn test_submit_file_rejects_malformed_json() {
    let app = Application::new(AppConfig::default()).await.unwrap();
    let file = write_requests("{not json");
    assert!(app.submit_file(file.path()).await.is_err());
}

#[tokio::test]
async fn test_run_stops_active_tasks_on_shutdown() {
    let app = std::sync::Arc::new(Application::new(AppConfig::default()).await.unwrap());
    let file = write_requests(r#"{"model_code":"yolo","stream_url":"rtsp://cam/1"}"#);
    let responses = app.submit_file(file.path()).await.unwrap();
    assert_eq!(responses.len(), 1);

    let token = CancellationToken::new();
    let handle = {
        let app = app.clone();
        let token = token.clone();
        tokio::spawn(async move { app.run(token).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(app.orchestrator().active_task_count().await, 0);
}
