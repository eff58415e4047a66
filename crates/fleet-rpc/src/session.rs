//! [`Session`] – one live connection, driven by its own task.
//!
//! Each session runs three cooperating tasks:
//!
//! | Task | Job |
//! |---|---|
//! | reader | parses frames; replies complete waiting callers, calls go to the dispatcher |
//! | dispatcher | runs the [`CallHandler`] for inbound calls, one at a time, in arrival order |
//! | writer | serialises outgoing frames onto the socket |
//!
//! Keeping the reader separate from the dispatcher is what lets a handler
//! call back into the remote side and await the answer in the middle of an
//! inbound call.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fleet_types::{Call, FleetError, Frame, ReplyValue};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async, connect_async};
use tracing::{debug, error, warn};

use crate::CallHandler;

/// Default bound on how long an outbound call waits for its reply.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// How long queued frames may take to flush once the session winds down.
const WRITER_GRACE: Duration = Duration::from_secs(1);

type ReplySender = oneshot::Sender<Result<ReplyValue, FleetError>>;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the remote end, used in logs.
    pub label: String,
    pub call_timeout: Duration,
}

impl SessionConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

enum Outgoing {
    Frame(Frame),
    Close,
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<u64, ReplySender>,
    closed: bool,
}

struct PeerShared {
    label: String,
    call_timeout: Duration,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
}

impl PeerShared {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle for calling the remote side of a session.
#[derive(Clone)]
pub struct PeerHandle {
    shared: Arc<PeerShared>,
}

impl PeerHandle {
    /// Name of the remote end.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Issue `call` and wait for the reply.
    ///
    /// # Errors
    ///
    /// * [`FleetError::Timeout`] – no reply within the session's call timeout.
    /// * [`FleetError::Disconnected`] – the connection closed before a reply
    ///   arrived.
    /// * Whatever error the remote handler replied with.
    pub async fn call(&self, call: Call) -> Result<ReplyValue, FleetError> {
        let method = call.method();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending();
            if pending.closed {
                return Err(FleetError::Disconnected);
            }
            pending.waiters.insert(id, tx);
        }

        if self
            .shared
            .outgoing
            .send(Outgoing::Frame(Frame::Call { id, call }))
            .is_err()
        {
            self.shared.pending().waiters.remove(&id);
            return Err(FleetError::Disconnected);
        }

        match tokio::time::timeout(self.shared.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(FleetError::Disconnected),
            Err(_) => {
                self.shared.pending().waiters.remove(&id);
                Err(FleetError::Timeout {
                    method: method.to_string(),
                    after_ms: u64::try_from(self.shared.call_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Start a graceful close: a close frame is sent after anything already
    /// queued.
    pub fn close(&self) {
        let _ = self.shared.outgoing.send(Outgoing::Close);
    }

    fn reply(&self, id: u64, result: Result<ReplyValue, FleetError>) {
        let _ = self
            .shared
            .outgoing
            .send(Outgoing::Frame(Frame::Reply { id, result }));
    }

    fn resolve(&self, id: u64, result: Result<ReplyValue, FleetError>) {
        let waiter = self.shared.pending().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(peer = %self.label(), id, "reply for unknown or expired call"),
        }
    }

    /// Fail every in-flight call and refuse new ones.
    fn shut(&self) {
        let mut pending = self.shared.pending();
        pending.closed = true;
        for (_, tx) in pending.waiters.drain() {
            let _ = tx.send(Err(FleetError::Disconnected));
        }
    }
}

/// A running connection.
pub struct Session {
    peer: PeerHandle,
    task: JoinHandle<()>,
}

impl Session {
    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    /// Wait until the connection is gone and the handler has been told.
    pub async fn closed(self) {
        if let Err(e) = self.task.await {
            error!(peer = %self.peer.label(), error = %e, "session task failed");
        }
    }
}

/// Drive `ws` with `handler` answering inbound calls.
pub fn spawn_session<S, H>(ws: WebSocketStream<S>, handler: Arc<H>, config: SessionConfig) -> Session
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: CallHandler,
{
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let peer = PeerHandle {
        shared: Arc::new(PeerShared {
            label: config.label,
            call_timeout: config.call_timeout,
            outgoing: outgoing_tx,
            pending: Mutex::new(Pending::default()),
            next_id: AtomicU64::new(1),
        }),
    };
    let task = tokio::spawn(drive(ws, handler, peer.clone(), outgoing_rx));
    Session { peer, task }
}

/// Open a session to the coordinator at `addr` (`host:port` or a `ws://` URL).
///
/// # Errors
///
/// Returns [`FleetError::Transport`] if the TCP connection or the WebSocket
/// handshake fails.
pub async fn connect<H>(
    addr: &str,
    handler: Arc<H>,
    call_timeout: Duration,
) -> Result<Session, FleetError>
where
    H: CallHandler,
{
    let url = if addr.starts_with("ws://") || addr.starts_with("wss://") {
        addr.to_string()
    } else {
        format!("ws://{addr}/")
    };
    let (ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| FleetError::Transport(format!("connect to {url}: {e}")))?;
    Ok(spawn_session(
        ws,
        handler,
        SessionConfig::new(addr).with_call_timeout(call_timeout),
    ))
}

/// Complete the WebSocket handshake on an accepted socket and start a session.
///
/// # Errors
///
/// Returns [`FleetError::Transport`] if the handshake fails.
pub async fn accept<H>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    call_timeout: Duration,
) -> Result<Session, FleetError>
where
    H: CallHandler,
{
    let ws = accept_async(stream)
        .await
        .map_err(|e| FleetError::Transport(format!("ws handshake from {peer}: {e}")))?;
    Ok(spawn_session(
        ws,
        handler,
        SessionConfig::new(peer.to_string()).with_call_timeout(call_timeout),
    ))
}

async fn drive<S, H>(
    ws: WebSocketStream<S>,
    handler: Arc<H>,
    peer: PeerHandle,
    outgoing: mpsc::UnboundedReceiver<Outgoing>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: CallHandler,
{
    let (sink, mut stream) = ws.split();
    let mut writer = tokio::spawn(write_frames(sink, outgoing, peer.label().to_string()));
    let (calls_tx, calls_rx) = mpsc::unbounded_channel();
    let dispatcher = tokio::spawn(dispatch_calls(Arc::clone(&handler), peer.clone(), calls_rx));

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(text.as_str()) {
                Ok(Frame::Call { id, call }) => {
                    let _ = calls_tx.send((id, call));
                }
                Ok(Frame::Reply { id, result }) => peer.resolve(id, result),
                Err(e) => {
                    warn!(peer = %peer.label(), error = %e, "malformed frame");
                    if let Some(id) = call_id(text.as_str()) {
                        peer.reply(id, Err(FleetError::Protocol(e.to_string())));
                    }
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(peer = %peer.label(), error = %e, "connection read failed");
                break;
            }
        }
    }

    peer.shut();
    drop(calls_tx);
    if let Err(e) = dispatcher.await {
        error!(peer = %peer.label(), error = %e, "call dispatcher failed");
    }
    handler.on_disconnect().await;

    peer.close();
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    debug!(peer = %peer.label(), "session closed");
}

async fn dispatch_calls<H>(
    handler: Arc<H>,
    peer: PeerHandle,
    mut calls: mpsc::UnboundedReceiver<(u64, Call)>,
) where
    H: CallHandler,
{
    while let Some((id, call)) = calls.recv().await {
        let method = call.method();
        let result = handler.handle_call(&peer, call).await;
        if let Err(e) = &result {
            debug!(peer = %peer.label(), method, error = %e, "call rejected");
        }
        peer.reply(id, result);
    }
}

async fn write_frames<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    label: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(item) = outgoing.recv().await {
        let frame = match item {
            Outgoing::Frame(frame) => frame,
            Outgoing::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                error!(peer = %label, error = %e, "frame serialization failed");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json.into())).await {
            debug!(peer = %label, error = %e, "connection write failed");
            break;
        }
    }
}

/// Id of a call frame that failed to parse, so it can still be answered.
fn call_id(text: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(text).ok()?;
    if json.get("kind")?.as_str()? != "call" {
        return None;
    }
    json.get("id")?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoInboundCalls;
    use async_trait::async_trait;
    use fleet_types::ACK_OK;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        tokio::join!(
            WebSocketStream::from_raw_socket(a, Role::Server, None),
            WebSocketStream::from_raw_socket(b, Role::Client, None),
        )
    }

    fn config(label: &str, timeout_ms: u64) -> SessionConfig {
        SessionConfig::new(label).with_call_timeout(Duration::from_millis(timeout_ms))
    }

    async fn read_frame(ws: &mut WebSocketStream<DuplexStream>) -> Frame {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    }

    async fn send_text(ws: &mut WebSocketStream<DuplexStream>, text: &str) {
        ws.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    /// Answers `ReportDriveStatus` with a fixed status, optionally slowly.
    struct StatusResponder {
        status: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl CallHandler for StatusResponder {
        async fn handle_call(&self, _peer: &PeerHandle, call: Call) -> Result<ReplyValue, FleetError> {
            match call {
                Call::ReportDriveStatus(_) => {
                    tokio::time::sleep(self.delay).await;
                    Ok(ReplyValue::DriveStatus(self.status.to_string()))
                }
                other => Err(FleetError::UnsupportedCall(other.method().to_string())),
            }
        }
    }

    /// On `Query`, asks the caller for its drive status and echoes it back.
    #[derive(Default)]
    struct EchoingServer {
        disconnects: AtomicUsize,
        order: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CallHandler for EchoingServer {
        async fn handle_call(&self, peer: &PeerHandle, call: Call) -> Result<ReplyValue, FleetError> {
            match call {
                Call::Query(_) => match peer.call(Call::ReportDriveStatus(0)).await? {
                    ReplyValue::DriveStatus(status) => Ok(ReplyValue::DriveStatus(status)),
                    other => Err(FleetError::Protocol(format!("unexpected {other:?}"))),
                },
                Call::Register(vin) => {
                    self.order.lock().unwrap().push(vin);
                    Ok(ReplyValue::Ack(ACK_OK))
                }
                other => Err(FleetError::UnsupportedCall(other.method().to_string())),
            }
        }

        async fn on_disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn handler_can_call_back_mid_request() {
        let (server_ws, client_ws) = ws_pair().await;
        let _server = spawn_session(server_ws, Arc::new(EchoingServer::default()), config("client", 1000));
        let client = spawn_session(
            client_ws,
            Arc::new(StatusResponder { status: "parked", delay: Duration::ZERO }),
            config("server", 1000),
        );

        let reply = client.peer().call(Call::Query("all".into())).await.unwrap();
        assert_eq!(reply, ReplyValue::DriveStatus("parked".to_string()));
    }

    #[tokio::test]
    async fn remote_errors_are_returned_to_the_caller() {
        let (server_ws, client_ws) = ws_pair().await;
        let _server = spawn_session(server_ws, Arc::new(EchoingServer::default()), config("client", 1000));
        let client = spawn_session(client_ws, Arc::new(NoInboundCalls), config("server", 1000));

        let err = client
            .peer()
            .call(Call::ExecuteCommand("honk".into()))
            .await
            .unwrap_err();
        assert_eq!(err, FleetError::UnsupportedCall("ExecuteCommand".to_string()));
    }

    #[tokio::test]
    async fn outbound_call_times_out_and_session_survives() {
        let (server_ws, client_ws) = ws_pair().await;
        let server = spawn_session(server_ws, Arc::new(NoInboundCalls), config("client", 100));
        let _client = spawn_session(
            client_ws,
            Arc::new(StatusResponder { status: "driving", delay: Duration::from_millis(300) }),
            config("server", 1000),
        );

        let err = server.peer().call(Call::ReportDriveStatus(0)).await.unwrap_err();
        assert_eq!(
            err,
            FleetError::Timeout { method: "ReportDriveStatus".to_string(), after_ms: 100 }
        );
        assert!(server.peer.shared.pending().waiters.is_empty());

        // Let the late reply arrive and be discarded.
        tokio::time::sleep(Duration::from_millis(400)).await;

        let err = server.peer().call(Call::ExecuteCommand("honk".into())).await.unwrap_err();
        assert_eq!(err, FleetError::UnsupportedCall("ExecuteCommand".to_string()));
    }

    #[tokio::test]
    async fn disconnect_is_reported_exactly_once() {
        let (server_ws, client_ws) = ws_pair().await;
        let handler = Arc::new(EchoingServer::default());
        let server = spawn_session(server_ws, Arc::clone(&handler), config("client", 1000));
        let client = spawn_session(client_ws, Arc::new(NoInboundCalls), config("server", 1000));

        client.peer().call(Call::Register("J1".into())).await.unwrap();
        client.peer().close();

        tokio::time::timeout(Duration::from_secs(2), server.closed())
            .await
            .expect("server session must end after the client closes");
        assert_eq!(handler.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn in_flight_call_fails_when_peer_vanishes() {
        let (server_ws, mut raw) = ws_pair().await;
        let server = spawn_session(server_ws, Arc::new(NoInboundCalls), config("client", 5000));

        let peer = server.peer().clone();
        let call = tokio::spawn(async move { peer.call(Call::ReportDriveStatus(0)).await });

        assert!(matches!(read_frame(&mut raw).await, Frame::Call { .. }));
        drop(raw);

        let result = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("call must not wait for the timeout")
            .unwrap();
        assert_eq!(result, Err(FleetError::Disconnected));

        let handle = server.peer().clone();
        server.closed().await;
        let err = handle.call(Call::ReportDriveStatus(0)).await;
        assert_eq!(err, Err(FleetError::Disconnected));
    }

    #[tokio::test]
    async fn inbound_calls_are_answered_in_arrival_order() {
        let (server_ws, mut raw) = ws_pair().await;
        let handler = Arc::new(EchoingServer::default());
        let _server = spawn_session(server_ws, Arc::clone(&handler), config("client", 1000));

        for (id, vin) in [(1, "A"), (2, "B"), (3, "C")] {
            let frame = Frame::Call { id, call: Call::Register(vin.to_string()) };
            send_text(&mut raw, &serde_json::to_string(&frame).unwrap()).await;
        }

        for expected in 1..=3u64 {
            match read_frame(&mut raw).await {
                Frame::Reply { id, result } => {
                    assert_eq!(id, expected);
                    assert_eq!(result, Ok(ReplyValue::Ack(ACK_OK)));
                }
                other => panic!("expected reply, got {other:?}"),
            }
        }
        assert_eq!(*handler.order.lock().unwrap(), ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn unknown_method_gets_protocol_error_reply() {
        let (server_ws, mut raw) = ws_pair().await;
        let _server = spawn_session(server_ws, Arc::new(NoInboundCalls), config("client", 1000));

        send_text(&mut raw, r#"{"kind":"call","id":42,"call":{"method":"SelfDestruct","params":1}}"#).await;

        match read_frame(&mut raw).await {
            Frame::Reply { id: 42, result: Err(FleetError::Protocol(_)) } => {}
            other => panic!("expected protocol error reply, got {other:?}"),
        }
    }

    #[test]
    fn call_id_only_for_call_frames() {
        assert_eq!(call_id(r#"{"kind":"call","id":9,"call":{}}"#), Some(9));
        assert_eq!(call_id(r#"{"kind":"reply","id":9}"#), None);
        assert_eq!(call_id("not json"), None);
    }
}
