//! Test helper utilities
//!
//! `CallbackServer` is a real HTTP endpoint on `127.0.0.1:0` that records
//! every request it receives and answers with scripted status codes.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::Router;
use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// Poll `condition` until it returns true or `timeout` elapses
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }
        condition().await
    }
}

/// One request observed by the callback server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub received_at: Instant,
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: serde_json::Value,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct CallbackServerConfig {
    /// Status codes returned in order, one per request
    pub script: Vec<u16>,
    /// Status returned once the script is exhausted
    pub default_status: u16,
    /// Delay before every response
    pub response_delay: Duration,
}

impl Default for CallbackServerConfig {
    fn default() -> Self {
        Self {
            script: Vec::new(),
            default_status: 200,
            response_delay: Duration::ZERO,
        }
    }
}

struct ServerState {
    script: Mutex<VecDeque<u16>>,
    default_status: u16,
    response_delay: Duration,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct CallbackServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

async fn record(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: axum::http::Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> StatusCode {
    let received_at = Instant::now();
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

    locked(&state.requests).push(RecordedRequest {
        received_at,
        method: method.to_string(),
        path: uri.path().to_string(),
        headers,
        query,
        body,
    });

    if !state.response_delay.is_zero() {
        sleep(state.response_delay).await;
    }

    let code = locked(&state.script)
        .pop_front()
        .unwrap_or(state.default_status);
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl CallbackServer {
    /// Server that always answers with `status`
    pub async fn always(status: u16) -> Self {
        Self::start(CallbackServerConfig {
            default_status: status,
            ..CallbackServerConfig::default()
        })
        .await
    }

    pub async fn start(config: CallbackServerConfig) -> Self {
        let state = Arc::new(ServerState {
            script: Mutex::new(config.script.into_iter().collect()),
            default_status: config.default_status,
            response_delay: config.response_delay,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .fallback(record)
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind callback server");
        let addr = listener.local_addr().expect("callback server address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        locked(&self.state.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        locked(&self.state.requests).len()
    }
}
