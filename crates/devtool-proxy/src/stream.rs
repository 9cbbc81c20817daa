//! Live event stream from the proxy's WebSocket data plane.
//!
//! The proxy pushes one JSON-encoded [`NetworkEvent`] per text frame on
//! `ws://{host}:{port}/ws`. [`LiveStream`] keeps a single connection open in
//! a background task, decodes each frame and fans the event out to every
//! subscriber in arrival order.
//!
//! ## Connection States
//!
//! ```text
//! Disconnected → Connecting → Connected
//!                   ↑   │         │ (closed / transport error)
//!                   │   ↓         ↓
//!                   └─ Backoff ←──┘
//! ```
//!
//! With [`ReconnectPolicy::Stop`] a failure moves straight back to
//! `Disconnected`. Every failure is published on [`LiveStream::status`].
//! Frames that fail to decode are logged and dropped; they never end the
//! receive loop. Events missed while disconnected are not replayed.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use devtool_core::NetworkEvent;

use crate::error::StreamError;
use crate::readiness::Backoff;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builds `ws://{host}:{port}/ws`.
pub fn stream_url(host: &str, port: u16) -> Result<String, StreamError> {
    let url = reqwest::Url::parse(&format!("ws://{}:{}/ws", host, port))
        .map_err(|e| StreamError::InvalidUrl(format!("{}:{}: {}", host, port, e)))?;
    Ok(url.to_string())
}

/// Connection state of a [`LiveStream`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    /// No connection and no reconnect scheduled.
    #[default]
    Disconnected,
    /// Opening the WebSocket.
    Connecting,
    /// Receiving frames.
    Connected,
    /// Waiting before reconnect attempt `attempt + 1`.
    Backoff { attempt: u32, delay: Duration },
}

/// Observable state plus the most recent connection failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStatus {
    pub state: StreamState,
    /// Cleared when a connection succeeds.
    pub last_error: Option<String>,
}

/// What the stream does after the connection fails or closes.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Report the failure and stay disconnected.
    Stop,
    /// Reconnect following the schedule until it is exhausted.
    Backoff(Backoff),
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Backoff(Backoff::default())
    }
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<NetworkEvent>>>>;

struct Connection {
    url: String,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Client side of the live event stream.
///
/// Holds at most one connection. Dropping the stream cancels it.
pub struct LiveStream {
    policy: ReconnectPolicy,
    subscribers: Subscribers,
    status: Arc<watch::Sender<StreamStatus>>,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for LiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStream")
            .field("policy", &self.policy)
            .field("status", &*self.status.borrow())
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

impl Default for LiveStream {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

impl LiveStream {
    /// Creates a disconnected stream.
    pub fn new(policy: ReconnectPolicy) -> Self {
        let (status, _) = watch::channel(StreamStatus::default());
        Self {
            policy,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(status),
            connection: Mutex::new(None),
        }
    }

    /// Registers a subscriber.
    ///
    /// Delivery never blocks: each subscriber buffers independently, and a
    /// subscriber whose receiver is dropped is forgotten.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<NetworkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Watches connection state and failures.
    pub fn status(&self) -> watch::Receiver<StreamStatus> {
        self.status.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> StreamState {
        self.status.borrow().state.clone()
    }

    /// Whether frames are currently being received.
    pub fn is_connected(&self) -> bool {
        self.state() == StreamState::Connected
    }

    /// Starts streaming from `ws://{host}:{port}/ws`.
    ///
    /// Does nothing while a connection task is alive, even if it targets a
    /// different address. Must be called from within a tokio runtime.
    pub fn connect(&self, host: &str, port: u16) -> Result<(), StreamError> {
        let url = stream_url(host, port)?;
        let mut connection = self.connection.lock();

        if let Some(existing) = connection.as_ref() {
            if !existing.handle.is_finished() {
                tracing::debug!(url = %existing.url, "Live stream already active");
                return Ok(());
            }
        }

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run(
            url.clone(),
            self.policy.clone(),
            Arc::clone(&self.subscribers),
            Arc::clone(&self.status),
            shutdown_rx,
        ));

        *connection = Some(Connection {
            url,
            shutdown,
            handle,
        });
        Ok(())
    }

    /// Cancels the connection and waits for the receive task to finish.
    ///
    /// Safe to call when not connected.
    pub async fn disconnect(&self) {
        let connection = self.connection.lock().take();
        let Some(connection) = connection else {
            return;
        };

        let _ = connection.shutdown.send(());
        if let Err(e) = connection.handle.await {
            tracing::warn!("Live stream task failed: {}", e);
        }

        self.status.send_modify(|s| s.state = StreamState::Disconnected);
        tracing::info!(url = %connection.url, "Live stream disconnected");
    }
}

enum ReceiveEnd {
    Cancelled,
    Closed,
    Failed(String),
}

async fn run(
    url: String,
    policy: ReconnectPolicy,
    subscribers: Subscribers,
    status: Arc<watch::Sender<StreamStatus>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut attempt = 0u32;

    loop {
        status.send_modify(|s| s.state = StreamState::Connecting);

        let connected = tokio::select! {
            _ = shutdown.recv() => break,
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
        };

        let failure = match connected {
            Ok((socket, _)) => {
                attempt = 0;
                status.send_modify(|s| {
                    s.state = StreamState::Connected;
                    s.last_error = None;
                });
                tracing::info!(%url, "Live stream connected");

                match receive(socket, &subscribers, &mut shutdown).await {
                    ReceiveEnd::Cancelled => break,
                    ReceiveEnd::Closed => "connection closed by proxy".to_string(),
                    ReceiveEnd::Failed(e) => e,
                }
            }
            Err(e) => e.to_string(),
        };

        attempt += 1;
        tracing::warn!(%url, attempt, "Live stream connection lost: {}", failure);

        let delay = match &policy {
            ReconnectPolicy::Backoff(backoff) if backoff.allows(attempt) => {
                backoff.delay(attempt)
            }
            _ => {
                status.send_modify(|s| {
                    s.state = StreamState::Disconnected;
                    s.last_error = Some(failure);
                });
                return;
            }
        };

        status.send_modify(|s| {
            s.state = StreamState::Backoff { attempt, delay };
            s.last_error = Some(failure);
        });

        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    status.send_modify(|s| s.state = StreamState::Disconnected);
}

async fn receive(
    mut socket: Socket,
    subscribers: &Subscribers,
    shutdown: &mut broadcast::Receiver<()>,
) -> ReceiveEnd {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                let _ = socket.close(None).await;
                return ReceiveEnd::Cancelled;
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(text.as_str(), subscribers),
                Some(Ok(Message::Close(_))) | None => return ReceiveEnd::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => return ReceiveEnd::Failed(e.to_string()),
            },
        }
    }
}

fn dispatch(frame: &str, subscribers: &Subscribers) {
    let event = match NetworkEvent::from_wire(frame) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Dropping malformed stream frame: {}", e);
            return;
        }
    };

    tracing::trace!(id = %event.id, kind = %event.kind, "Stream event");
    subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockProxy;
    use devtool_core::EventKind;

    const REQUEST_FRAME: &str =
        r#"{"type":"request","request":{"method":"GET","url":"http://x","header":{},"body":null}}"#;
    const RESPONSE_FRAME: &str =
        r#"{"type":"response","response":{"status":"200 OK","status_code":200,"header":{}}}"#;

    fn fast_backoff() -> ReconnectPolicy {
        ReconnectPolicy::Backoff(Backoff {
            initial: Duration::from_millis(20),
            max: Duration::from_millis(100),
            factor: 2.0,
            max_attempts: None,
        })
    }

    async fn wait_for_status<F>(stream: &LiveStream, predicate: F) -> StreamStatus
    where
        F: Fn(&StreamStatus) -> bool,
    {
        let mut rx = stream.status();
        let status = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for stream status")
            .unwrap()
            .clone();
        status
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<NetworkEvent>) -> NetworkEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("stream closed")
    }

    #[test]
    fn url_format() {
        assert_eq!(stream_url("localhost", 9999).unwrap(), "ws://localhost:9999/ws");
        assert!(matches!(
            stream_url("bad host", 1),
            Err(StreamError::InvalidUrl(_))
        ));
    }

    #[test]
    fn default_policy_is_backoff() {
        assert_eq!(
            ReconnectPolicy::default(),
            ReconnectPolicy::Backoff(Backoff::default())
        );
    }

    #[tokio::test]
    async fn malformed_frame_does_not_stop_stream() {
        let mock = MockProxy::start().await;
        mock.queue_frame("{not json");
        mock.queue_frame(r#"{"type":""}"#);
        mock.queue_frame(REQUEST_FRAME);

        let stream = LiveStream::new(ReconnectPolicy::Stop);
        let mut events = stream.subscribe();
        stream.connect("127.0.0.1", mock.port()).unwrap();

        let event = next_event(&mut events).await;
        assert_eq!(event.kind, EventKind::Request);
        assert_eq!(event.method(), Some("GET"));
        assert!(event.response.is_none());
        assert!(stream.is_connected());

        stream.disconnect().await;
    }

    #[tokio::test]
    async fn events_arrive_in_order_to_every_subscriber() {
        let mock = MockProxy::start().await;
        let stream = LiveStream::new(ReconnectPolicy::Stop);
        let mut first = stream.subscribe();
        let mut second = stream.subscribe();

        stream.connect("127.0.0.1", mock.port()).unwrap();
        wait_until(|| mock.ws_connections() == 1).await;

        mock.send_frame(REQUEST_FRAME);
        mock.send_frame(RESPONSE_FRAME);

        for rx in [&mut first, &mut second] {
            assert!(next_event(rx).await.is_request());
            assert!(next_event(rx).await.is_response());
        }

        stream.disconnect().await;
    }

    #[tokio::test]
    async fn dropped_subscriber_is_forgotten() {
        let mock = MockProxy::start().await;
        let stream = LiveStream::new(ReconnectPolicy::Stop);
        let dropped = stream.subscribe();
        let mut kept = stream.subscribe();
        drop(dropped);

        stream.connect("127.0.0.1", mock.port()).unwrap();
        wait_until(|| mock.ws_connections() == 1).await;
        mock.send_frame(REQUEST_FRAME);

        assert!(next_event(&mut kept).await.is_request());
        assert_eq!(stream.subscribers.lock().len(), 1);

        stream.disconnect().await;
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let mock = MockProxy::start().await;
        let stream = LiveStream::new(ReconnectPolicy::Stop);

        stream.connect("127.0.0.1", mock.port()).unwrap();
        wait_for_status(&stream, |s| s.state == StreamState::Connected).await;
        stream.connect("127.0.0.1", mock.port()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.ws_connections(), 1);
        assert!(stream.is_connected());

        stream.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_when_not_connected() {
        let stream = LiveStream::default();
        stream.disconnect().await;
        assert_eq!(stream.state(), StreamState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_cancels_connection() {
        let mock = MockProxy::start().await;
        let stream = LiveStream::new(fast_backoff());
        stream.connect("127.0.0.1", mock.port()).unwrap();
        wait_for_status(&stream, |s| s.state == StreamState::Connected).await;

        stream.disconnect().await;
        assert_eq!(stream.state(), StreamState::Disconnected);

        // A later connect opens a fresh connection.
        stream.connect("127.0.0.1", mock.port()).unwrap();
        wait_until(|| mock.ws_connections() == 2).await;
        stream.disconnect().await;
    }

    #[tokio::test]
    async fn stop_policy_reports_failure() {
        let mock = MockProxy::start().await;
        let stream = LiveStream::new(ReconnectPolicy::Stop);
        stream.connect("127.0.0.1", mock.port()).unwrap();
        wait_until(|| mock.ws_connections() == 1).await;

        mock.drop_sockets();
        let status = wait_for_status(&stream, |s| s.last_error.is_some()).await;
        assert_eq!(status.state, StreamState::Disconnected);
    }

    #[tokio::test]
    async fn reconnects_after_close() {
        let mock = MockProxy::start().await;
        let stream = LiveStream::new(fast_backoff());
        let mut events = stream.subscribe();
        stream.connect("127.0.0.1", mock.port()).unwrap();
        wait_until(|| mock.ws_connections() == 1).await;

        mock.drop_sockets();
        wait_until(|| mock.ws_connections() == 2).await;

        mock.send_frame(RESPONSE_FRAME);
        assert!(next_event(&mut events).await.is_response());

        stream.disconnect().await;
    }

    #[tokio::test]
    async fn unreachable_proxy_enters_backoff() {
        let port = crate::test_support::unused_port().await;
        let stream = LiveStream::new(ReconnectPolicy::Backoff(Backoff {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(30),
            factor: 2.0,
            max_attempts: None,
        }));
        stream.connect("127.0.0.1", port).unwrap();

        let status =
            wait_for_status(&stream, |s| matches!(s.state, StreamState::Backoff { .. })).await;
        assert_eq!(
            status.state,
            StreamState::Backoff {
                attempt: 1,
                delay: Duration::from_secs(30)
            }
        );
        assert!(status.last_error.is_some());

        // Cancelling during backoff returns promptly.
        tokio::time::timeout(Duration::from_secs(5), stream.disconnect())
            .await
            .unwrap();
        assert_eq!(stream.state(), StreamState::Disconnected);
    }

    #[tokio::test]
    async fn exhausted_backoff_stops() {
        let port = crate::test_support::unused_port().await;
        let stream = LiveStream::new(ReconnectPolicy::Backoff(Backoff {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(5),
            factor: 1.0,
            max_attempts: Some(2),
        }));
        stream.connect("127.0.0.1", port).unwrap();

        let status = wait_for_status(&stream, |s| {
            s.state == StreamState::Disconnected && s.last_error.is_some()
        })
        .await;
        assert!(status.last_error.is_some());
    }
}
