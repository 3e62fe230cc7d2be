//! Mock dashboard server for testing.
//!
//! `mock_exchange` produces the same `ChatInbound` sequence the real server
//! emits for one chat submission. `MockDashboard` serves it over a loopback
//! WebSocket together with stand-ins for the PTY bridge, the command runner,
//! the upload endpoint and the session history endpoint, and records every
//! frame it receives so tests can assert on the wire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use rd_protocol::{ChatInbound, ChatOutbound, ChunkKind, Role, RunnerInbound, RunnerOutbound, WireFrame};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use url::Url;

/// Configurable mock responses for one chat exchange.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Emit a chunk of the given kind.
    Chunk { kind: ChunkKind, content: String },
    /// Emit an error and end the exchange without `done`.
    Error { message: String },
    /// Delay before next event (for timing tests).
    Delay { ms: u64 },
}

/// Configuration for a mock exchange.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Sequence of responses to emit.
    pub responses: Vec<MockResponse>,
    /// Optional delay between each event (ms).
    pub chunk_delay_ms: Option<u64>,
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(mut self, responses: Vec<MockResponse>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_chunk_delay(mut self, ms: u64) -> Self {
        self.chunk_delay_ms = Some(ms);
        self
    }
}

/// The frames the server sends for one submission: `session_id`, the
/// configured chunks, then `done` (or a terminal `error`).
pub fn mock_exchange(config: MockConfig, session_id: String) -> impl Stream<Item = ChatInbound> {
    stream! {
        yield ChatInbound::SessionId { session_id: session_id.clone() };

        for response in config.responses {
            if let Some(delay_ms) = config.chunk_delay_ms {
                sleep(Duration::from_millis(delay_ms)).await;
            }

            match response {
                MockResponse::Chunk { kind, content } => {
                    yield ChatInbound::chunk(kind, content);
                }
                MockResponse::Error { message } => {
                    yield ChatInbound::Error { message };
                    return;
                }
                MockResponse::Delay { ms } => {
                    sleep(Duration::from_millis(ms)).await;
                }
            }
        }

        yield ChatInbound::Done { session_id: Some(session_id) };
    }
}

/// Built-in exchange fixtures for common scenarios.
pub mod fixtures {
    use super::*;

    fn chunk(kind: ChunkKind, content: &str) -> MockResponse {
        MockResponse::Chunk {
            kind,
            content: content.to_string(),
        }
    }

    /// Narrated text only.
    pub fn streaming_text(chunks: &[&str]) -> MockConfig {
        MockConfig::new().with_responses(
            chunks
                .iter()
                .map(|c| chunk(ChunkKind::Text, c))
                .collect(),
        )
    }

    /// Narration and a tool call, then a structured final answer.
    pub fn narrated_then_result(narration: &str, tool: &str, result: &str) -> MockConfig {
        MockConfig::new().with_responses(vec![
            chunk(ChunkKind::Text, narration),
            chunk(ChunkKind::ToolUse, tool),
            chunk(ChunkKind::ToolResult, "ok"),
            chunk(ChunkKind::Result, result),
        ])
    }

    /// Tool activity with nothing to show as a final answer.
    pub fn tools_only(tool: &str, output: &str) -> MockConfig {
        MockConfig::new().with_responses(vec![
            chunk(ChunkKind::ToolUse, tool),
            chunk(ChunkKind::ToolResult, output),
        ])
    }

    /// Some text, then a server-side failure.
    pub fn error_mid_stream(text_before: &str, error: &str) -> MockConfig {
        MockConfig::new().with_responses(vec![
            chunk(ChunkKind::Text, text_before),
            MockResponse::Error {
                message: error.to_string(),
            },
        ])
    }
}

/// Which endpoint a frame or connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Chat,
    Pty,
    Runner,
}

/// An accepted WebSocket upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub route: Route,
    pub token: Option<String>,
}

struct MockState {
    token: Option<String>,
    chat: MockConfig,
    runner_cwd: String,
    upload_failure: Option<String>,
    history: HashMap<String, Vec<(Role, String)>>,
    connections: Mutex<Vec<ConnectionRecord>>,
    received: Mutex<Vec<(Route, WireFrame)>>,
    uploads: AtomicU64,
    sessions: AtomicU64,
    kick: broadcast::Sender<()>,
    changed: Notify,
}

impl MockState {
    fn authorized(&self, presented: Option<&str>) -> bool {
        match &self.token {
            Some(expected) => presented == Some(expected.as_str()),
            None => true,
        }
    }

    fn record(&self, route: Route, frame: WireFrame) {
        self.received.lock().push((route, frame));
        self.changed.notify_waiters();
    }

    fn next_session_id(&self) -> String {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        format!("mock-session-{n}")
    }
}

/// Builder for [`MockDashboard`].
#[derive(Default)]
pub struct MockDashboardBuilder {
    token: Option<String>,
    chat: MockConfig,
    runner_cwd: Option<String>,
    upload_failure: Option<String>,
    history: HashMap<String, Vec<(Role, String)>>,
}

impl MockDashboardBuilder {
    /// Require this token on every endpoint.
    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Exchange played for every chat submission.
    pub fn chat(mut self, config: MockConfig) -> Self {
        self.chat = config;
        self
    }

    pub fn runner_cwd(mut self, cwd: &str) -> Self {
        self.runner_cwd = Some(cwd.to_string());
        self
    }

    /// Answer every upload with `500` and this detail.
    pub fn fail_uploads(mut self, detail: &str) -> Self {
        self.upload_failure = Some(detail.to_string());
        self
    }

    pub fn history(mut self, session_id: &str, messages: Vec<(Role, &str)>) -> Self {
        self.history.insert(
            session_id.to_string(),
            messages
                .into_iter()
                .map(|(role, content)| (role, content.to_string()))
                .collect(),
        );
        self
    }

    pub async fn start(self) -> std::io::Result<MockDashboard> {
        let (kick, _) = broadcast::channel(4);
        let state = Arc::new(MockState {
            token: self.token,
            chat: self.chat,
            runner_cwd: self.runner_cwd.unwrap_or_else(|| "/home/mock".to_string()),
            upload_failure: self.upload_failure,
            history: self.history,
            connections: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            uploads: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            kick,
            changed: Notify::new(),
        });

        let app = Router::new()
            .route("/api/chat/stream", get(chat_upgrade))
            .route("/api/pty/ws", get(pty_upgrade))
            .route("/api/terminal/ws", get(runner_upgrade))
            .route("/api/files/upload", post(upload))
            .route("/api/sessions/:id", get(session))
            .layer(DefaultBodyLimit::max(16 * 1024 * 1024))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!("mock dashboard stopped: {e}");
            }
        });

        let http_base = Url::parse(&format!("http://{addr}/"))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        Ok(MockDashboard {
            addr,
            http_base,
            state,
            task,
        })
    }
}

/// A running mock dashboard bound to a loopback port.
pub struct MockDashboard {
    addr: SocketAddr,
    http_base: Url,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockDashboard {
    pub fn builder() -> MockDashboardBuilder {
        MockDashboardBuilder::default()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port>/`
    pub fn http_base(&self) -> Url {
        self.http_base.clone()
    }

    pub fn connections(&self) -> Vec<ConnectionRecord> {
        self.state.connections.lock().clone()
    }

    pub fn connection_count(&self, route: Route) -> usize {
        self.state
            .connections
            .lock()
            .iter()
            .filter(|c| c.route == route)
            .count()
    }

    /// Frames received on one route, in arrival order.
    pub fn received(&self, route: Route) -> Vec<WireFrame> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|(r, _)| *r == route)
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// Chat submissions received, decoded.
    pub fn chat_messages(&self) -> Vec<ChatOutbound> {
        self.received(Route::Chat)
            .into_iter()
            .filter_map(|f| match f {
                WireFrame::Text(text) => serde_json::from_str(&text).ok(),
                WireFrame::Binary(_) => None,
            })
            .collect()
    }

    pub fn upload_count(&self) -> u64 {
        self.state.uploads.load(Ordering::SeqCst)
    }

    /// Close every open socket from the server side.
    pub fn kick(&self) {
        let _ = self.state.kick.send(());
    }

    /// Wait until `route` has received at least `count` frames.
    pub async fn wait_for_frames(&self, route: Route, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.state.changed.notified();
                if self.received(route).len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Wait until `route` has accepted at least `count` connections.
    pub async fn wait_for_connections(&self, route: Route, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.state.changed.notified();
                if self.connection_count(route) >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Drop for MockDashboard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type WsSender = SplitSink<WebSocket, WsMessage>;

fn accept(
    state: &Arc<MockState>,
    route: Route,
    params: &HashMap<String, String>,
) -> Result<(), Response> {
    let token = params.get("token").cloned();
    if !state.authorized(token.as_deref()) {
        return Err((StatusCode::UNAUTHORIZED, "Unauthorized").into_response());
    }
    state.connections.lock().push(ConnectionRecord { route, token });
    state.changed.notify_waiters();
    Ok(())
}

async fn send_json<T: serde::Serialize>(sender: &mut WsSender, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(text) => sender.send(WsMessage::Text(text)).await.is_ok(),
        Err(_) => false,
    }
}

async fn chat_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(rejection) = accept(&state, Route::Chat, &params) {
        return rejection;
    }
    ws.on_upgrade(move |socket| chat_socket(socket, state))
}

async fn chat_socket(socket: WebSocket, state: Arc<MockState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut kick = state.kick.subscribe();

    loop {
        let msg = tokio::select! {
            _ = kick.recv() => break,
            msg = receiver.next() => msg,
        };
        let Some(Ok(msg)) = msg else { break };
        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        state.record(Route::Chat, WireFrame::Text(text.clone()));

        let Ok(ChatOutbound::Message {
            content,
            attachments,
            session_id,
            ..
        }) = serde_json::from_str::<ChatOutbound>(&text)
        else {
            continue;
        };

        if content.trim().is_empty() && attachments.is_empty() {
            let err = ChatInbound::Error {
                message: "Empty message".to_string(),
            };
            if !send_json(&mut sender, &err).await {
                break;
            }
            continue;
        }

        let sid = session_id.unwrap_or_else(|| state.next_session_id());
        let mut events = std::pin::pin!(mock_exchange(state.chat.clone(), sid));
        loop {
            let event = tokio::select! {
                _ = kick.recv() => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    return;
                }
                event = events.next() => event,
            };
            let Some(event) = event else { break };
            if !send_json(&mut sender, &event).await {
                return;
            }
        }
    }

    let _ = sender.send(WsMessage::Close(None)).await;
}

async fn pty_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(rejection) = accept(&state, Route::Pty, &params) {
        return rejection;
    }
    ws.on_upgrade(move |socket| pty_socket(socket, state))
}

/// Echoes keystrokes back like a shell with echo enabled; resize frames are
/// only recorded.
async fn pty_socket(socket: WebSocket, state: Arc<MockState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut kick = state.kick.subscribe();

    loop {
        let msg = tokio::select! {
            _ = kick.recv() => break,
            msg = receiver.next() => msg,
        };
        let Some(Ok(msg)) = msg else { break };
        match msg {
            WsMessage::Binary(bytes) => {
                state.record(Route::Pty, WireFrame::Binary(bytes.clone()));
                if sender.send(WsMessage::Binary(bytes)).await.is_err() {
                    break;
                }
            }
            WsMessage::Text(text) => {
                state.record(Route::Pty, WireFrame::Text(text.clone()));
                let is_control = text.starts_with('{')
                    && serde_json::from_str::<rd_protocol::PtyControl>(&text).is_ok();
                if !is_control && sender.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    let _ = sender.send(WsMessage::Close(None)).await;
}

async fn runner_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(rejection) = accept(&state, Route::Runner, &params) {
        return rejection;
    }
    ws.on_upgrade(move |socket| runner_socket(socket, state))
}

/// Echoes each command as its output and reports exit code 0.
async fn runner_socket(socket: WebSocket, state: Arc<MockState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut kick = state.kick.subscribe();
    let cwd = state.runner_cwd.clone();

    if !send_json(&mut sender, &RunnerInbound::Prompt { cwd: cwd.clone() }).await {
        return;
    }

    loop {
        let msg = tokio::select! {
            _ = kick.recv() => break,
            msg = receiver.next() => msg,
        };
        let Some(Ok(msg)) = msg else { break };
        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        state.record(Route::Runner, WireFrame::Text(text.clone()));

        let Ok(RunnerOutbound::Command { content }) = serde_json::from_str(&text) else {
            continue;
        };
        let command = content.trim();
        let ok = if command.is_empty() {
            send_json(&mut sender, &RunnerInbound::Prompt { cwd: cwd.clone() }).await
        } else {
            send_json(
                &mut sender,
                &RunnerInbound::Output {
                    content: format!("{command}\n"),
                },
            )
            .await
                && send_json(
                    &mut sender,
                    &RunnerInbound::Exit {
                        code: Some(0),
                        cwd: Some(cwd.clone()),
                    },
                )
                .await
        };
        if !ok {
            break;
        }
    }

    let _ = sender.send(WsMessage::Close(None)).await;
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn upload(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if !state.authorized(bearer(&headers)) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Invalid token"}))).into_response();
    }
    if let Some(detail) = &state.upload_failure {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": detail })),
        )
            .into_response();
    }

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload").replace(['/', '\\'], "_");
        let content_type = field.content_type().map(str::to_string);
        let Ok(data) = field.bytes().await else {
            return (StatusCode::BAD_REQUEST, Json(json!({"detail": "bad body"}))).into_response();
        };

        state.uploads.fetch_add(1, Ordering::SeqCst);
        let filename = format!("1700000000_{name}");
        return Json(json!({
            "filename": filename,
            "path": format!("/srv/uploads/{filename}"),
            "size": data.len(),
            "content_type": content_type,
        }))
        .into_response();
    }

    (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "missing file"}))).into_response()
}

async fn session(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !state.authorized(bearer(&headers)) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Invalid token"}))).into_response();
    }
    let Some(messages) = state.history.get(&id) else {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Session not found"}))).into_response();
    };

    let rows: Vec<_> = messages
        .iter()
        .enumerate()
        .map(|(i, (role, content))| {
            json!({
                "id": i + 1,
                "session_id": id,
                "role": role,
                "content": content,
                "attachments": [],
                "timestamp": format!("2024-05-01T10:00:{:02}+00:00", i % 60),
            })
        })
        .collect();

    Json(json!({ "id": id, "title": "mock", "messages": rows })).into_response()
}
