//! In-process stand-in for the proxy control plane used by unit tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use devtool_core::{NetworkFilters, ProxyStatus};

use crate::control::ControlClient;

#[derive(Debug, Clone)]
enum WsCommand {
    Frame(String),
    Close,
}

#[derive(Default)]
struct MockState {
    enabled: bool,
    filters: NetworkFilters,
    sessions: Vec<String>,
    certificate: Vec<u8>,
    fail_status: Option<u16>,
    ws_backlog: Vec<String>,
    ws_connections: usize,
    status_requests: usize,
}

struct Shared {
    state: Mutex<MockState>,
    ws_tx: broadcast::Sender<WsCommand>,
}

type AppState = Arc<Shared>;

/// Mock proxy serving the control-plane routes and `/ws`.
pub(crate) struct MockProxy {
    addr: SocketAddr,
    shared: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockProxy {
    pub(crate) async fn start() -> Self {
        let (ws_tx, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            state: Mutex::new(MockState::default()),
            ws_tx,
        });

        let app = Router::new()
            .route("/proxy/status", get(status))
            .route("/proxy/start", post(start))
            .route("/proxy/stop", post(stop))
            .route("/filters", get(get_filters).put(put_filters))
            .route("/sessions", get(get_sessions).delete(delete_sessions))
            .route("/proxy/cert", get(certificate))
            .route("/ws", get(ws_upgrade))
            .with_state(Arc::clone(&shared));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            addr,
            shared,
            shutdown: Some(shutdown_tx),
        }
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    pub(crate) fn client(&self) -> ControlClient {
        ControlClient::new("127.0.0.1", self.port()).unwrap()
    }

    pub(crate) fn push_session(&self, raw: &str) {
        self.shared.state.lock().sessions.push(raw.to_string());
    }

    pub(crate) fn set_certificate(&self, bytes: Vec<u8>) {
        self.shared.state.lock().certificate = bytes;
    }

    /// Makes every HTTP route answer with `status`.
    pub(crate) fn fail_with(&self, status: u16) {
        self.shared.state.lock().fail_status = Some(status);
    }

    pub(crate) fn recover(&self) {
        self.shared.state.lock().fail_status = None;
    }

    pub(crate) fn status_requests(&self) -> usize {
        self.shared.state.lock().status_requests
    }

    /// Frames sent to every socket right after it connects.
    pub(crate) fn queue_frame(&self, frame: &str) {
        self.shared.state.lock().ws_backlog.push(frame.to_string());
    }

    /// Sends a frame to every currently connected socket.
    pub(crate) fn send_frame(&self, frame: &str) {
        let _ = self.shared.ws_tx.send(WsCommand::Frame(frame.to_string()));
    }

    /// Closes every open socket; the listener keeps accepting.
    pub(crate) fn drop_sockets(&self) {
        let _ = self.shared.ws_tx.send(WsCommand::Close);
    }

    pub(crate) fn ws_connections(&self) -> usize {
        self.shared.state.lock().ws_connections
    }

    /// Closes every socket and stops accepting connections.
    pub(crate) fn shutdown(&mut self) {
        self.drop_sockets();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockProxy {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A local port with nothing listening on it.
pub(crate) async fn unused_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    listener.local_addr().unwrap().port()
}

fn failure(shared: &Shared) -> Option<Response> {
    let status = shared.state.lock().fail_status?;
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Some(code.into_response())
}

async fn status(State(shared): State<AppState>) -> Response {
    shared.state.lock().status_requests += 1;
    if let Some(resp) = failure(&shared) {
        return resp;
    }
    let enabled = shared.state.lock().enabled;
    Json(ProxyStatus { enabled }).into_response()
}

async fn start(State(shared): State<AppState>) -> Response {
    if let Some(resp) = failure(&shared) {
        return resp;
    }
    shared.state.lock().enabled = true;
    Json(ProxyStatus { enabled: true }).into_response()
}

async fn stop(State(shared): State<AppState>) -> Response {
    if let Some(resp) = failure(&shared) {
        return resp;
    }
    shared.state.lock().enabled = false;
    Json(ProxyStatus { enabled: false }).into_response()
}

async fn get_filters(State(shared): State<AppState>) -> Response {
    if let Some(resp) = failure(&shared) {
        return resp;
    }
    let filters = shared.state.lock().filters.clone();
    Json(filters).into_response()
}

async fn put_filters(
    State(shared): State<AppState>,
    Json(filters): Json<NetworkFilters>,
) -> Response {
    if let Some(resp) = failure(&shared) {
        return resp;
    }
    shared.state.lock().filters = filters.clone();
    Json(filters).into_response()
}

async fn get_sessions(State(shared): State<AppState>) -> Response {
    if let Some(resp) = failure(&shared) {
        return resp;
    }
    let body = format!("[{}]", shared.state.lock().sessions.join(","));
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn delete_sessions(State(shared): State<AppState>) -> Response {
    if let Some(resp) = failure(&shared) {
        return resp;
    }
    shared.state.lock().sessions.clear();
    StatusCode::NO_CONTENT.into_response()
}

async fn certificate(State(shared): State<AppState>) -> Response {
    if let Some(resp) = failure(&shared) {
        return resp;
    }
    let bytes = shared.state.lock().certificate.clone();
    if bytes.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    ([(header::CONTENT_TYPE, "application/x-x509-ca-cert")], bytes).into_response()
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(shared): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, shared))
}

async fn serve_socket(mut socket: WebSocket, shared: AppState) {
    let (backlog, mut commands) = {
        let mut state = shared.state.lock();
        state.ws_connections += 1;
        (state.ws_backlog.clone(), shared.ws_tx.subscribe())
    };

    for frame in backlog {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(WsCommand::Frame(frame)) => {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
                Ok(WsCommand::Close) | Err(_) => {
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(_)) => {}
                _ => return,
            },
        }
    }
}
