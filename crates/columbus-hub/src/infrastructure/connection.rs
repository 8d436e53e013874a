//! Per-client connection state machine over tokio-tungstenite.
//!
//! Each accepted WebSocket becomes one [`WsConnection`] driving two duties
//! concurrently:
//!
//! - **Heartbeat**: after a grace period of one interval, send `Heartbeat`
//!   and wait for `HeartbeatAck`.  The whole round (write and ack) must fit
//!   in one interval.  On ack, record the latency and sleep for the rest of
//!   the interval; otherwise close with "protocol error".
//! - **Poll**: read frames in order.  `Heartbeat` is answered immediately,
//!   `HeartbeatAck` resolves the pending ack, `Dispatch` goes to the hub's
//!   event bus.  Undecodable frames close the connection with "unsupported
//!   data".
//!
//! Whichever duty finishes first ends the other; closing is idempotent, so a
//! race between the two (or with a server shutdown) is harmless.
//!
//! Every write gives up after one heartbeat interval.  A peer that stops
//! reading therefore cannot hold the sink, and is closed and removed like
//! one that stops answering.
//!
//! ```text
//! Open ──close(reason)──▶ Closing ──close frame written──▶ Closed
//!   └──────────peer closed / transport error─────────────▶ Closed
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use columbus_core::{decode_inbound, CloseReason, Frame, Inbound};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::application::{ClientLink, Hub, LinkError};
use crate::domain::{ConnectionId, ConnectionState};

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;
type WsSource<S> = SplitStream<WebSocketStream<S>>;

/// One client connection after a successful handshake.
pub struct WsConnection<S> {
    id: ConnectionId,
    sink: tokio::sync::Mutex<WsSink<S>>,
    state: watch::Sender<ConnectionState>,
    pending_ack: Mutex<Option<oneshot::Sender<()>>>,
    latency: Mutex<Option<Duration>>,
    heartbeat_interval: Duration,
}

impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Serves one client from Hello to close.
    ///
    /// Attaches the connection to `hub`, runs both duties until the
    /// connection ends, then detaches it.  The connection is out of the
    /// registry on every exit path.
    pub async fn serve(ws: WebSocketStream<S>, hub: Arc<Hub>) {
        let (conn, source) = Self::new(ws, hub.config().heartbeat_interval);

        let registration = match hub.attach(Arc::clone(&conn) as Arc<dyn ClientLink>).await {
            Ok(registration) => registration,
            Err(e) => {
                debug!("connection {}: not attached: {e}", conn.id);
                return;
            }
        };

        conn.run(source, &hub).await;
        hub.detach(registration);
    }

    /// Splits `ws` into the connection handle and its read half.
    pub fn new(ws: WebSocketStream<S>, heartbeat_interval: Duration) -> (Arc<Self>, WsSource<S>) {
        let (sink, source) = ws.split();
        let (state, _) = watch::channel(ConnectionState::Open);
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            sink: tokio::sync::Mutex::new(sink),
            state,
            pending_ack: Mutex::new(None),
            latency: Mutex::new(None),
            heartbeat_interval,
        });
        (conn, source)
    }

    /// Drives the heartbeat and poll duties until the connection ends.
    pub async fn run(self: &Arc<Self>, mut source: WsSource<S>, hub: &Arc<Hub>) {
        let mut state = self.state.subscribe();

        let reason = tokio::select! {
            reason = self.heartbeat_duty() => reason,
            reason = self.poll_duty(&mut source, hub) => reason,
            // Closed from outside, e.g. server shutdown.
            _ = async { let _ = state.wait_for(|s| !s.is_open()).await; } => None,
        };

        if let Some(reason) = reason {
            info!("connection {}: closing: {reason}", self.id);
            self.close(reason).await;
        }
        self.state.send_replace(ConnectionState::Closed);
        debug!("connection {} closed", self.id);
    }

    /// Returns the reason to close with, or `None` if the link is already gone.
    async fn heartbeat_duty(&self) -> Option<CloseReason> {
        let interval = self.heartbeat_interval;
        sleep(interval).await;

        loop {
            let sent_at = Instant::now();
            match timeout(interval, self.heartbeat_round()).await {
                Ok(Ok(())) => {
                    let latency = sent_at.elapsed();
                    *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
                    debug!("connection {}: heartbeat latency {latency:?}", self.id);
                    sleep(interval.saturating_sub(latency)).await;
                }
                Ok(Err(LinkError::Closed)) => return None,
                Ok(Err(e)) => {
                    warn!("connection {}: heartbeat not delivered: {e}", self.id);
                    return Some(CloseReason::ProtocolError);
                }
                Err(_) => {
                    warn!("connection {}: no heartbeat ack within {interval:?}", self.id);
                    return Some(CloseReason::ProtocolError);
                }
            }
        }
    }

    /// Sends one heartbeat and waits for its ack, without a deadline.
    async fn heartbeat_round(&self) -> Result<(), LinkError> {
        self.send_frame(&Frame::heartbeat()).await?;

        // Acks that arrived before the heartbeat was written are stray.
        let (ack_tx, ack_rx) = oneshot::channel();
        *self.pending_ack.lock().unwrap_or_else(PoisonError::into_inner) = Some(ack_tx);
        ack_rx.await.map_err(|_| LinkError::Closed)
    }

    /// Returns the reason to close with, or `None` if the peer went away.
    async fn poll_duty(self: &Arc<Self>, source: &mut WsSource<S>, hub: &Arc<Hub>) -> Option<CloseReason> {
        while let Some(message) = source.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(_)) => {
                    warn!("connection {}: binary frame received", self.id);
                    return Some(CloseReason::UnsupportedData);
                }
                Ok(Message::Close(frame)) => {
                    debug!("connection {}: peer closed ({frame:?})", self.id);
                    return None;
                }
                // Ping/Pong are answered by tungstenite itself.
                Ok(_) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => {
                    debug!("connection {}: read error: {e}", self.id);
                    return None;
                }
            };

            match decode_inbound(&text) {
                Ok(Inbound::Heartbeat) => {
                    if let Err(e) = self.send_frame(&Frame::heartbeat_ack()).await {
                        debug!("connection {}: heartbeat ack not sent: {e}", self.id);
                        return None;
                    }
                }
                Ok(Inbound::HeartbeatAck) => self.resolve_ack(),
                Ok(Inbound::Dispatch { event, payload }) => {
                    debug!("connection {}: dispatch \"{event}\"", self.id);
                    let origin: Arc<dyn ClientLink> = Arc::clone(self) as Arc<dyn ClientLink>;
                    hub.route_inbound(origin, &event, payload);
                }
                Ok(Inbound::Unexpected(op)) => {
                    debug!("connection {}: ignoring server-only opcode {}", self.id, op.value());
                }
                Err(e) if !e.is_fatal() => debug!("connection {}: {e}; ignored", self.id),
                Err(e) => {
                    warn!("connection {}: {e}", self.id);
                    return Some(CloseReason::UnsupportedData);
                }
            }
        }
        None
    }

    /// Resolves the outstanding heartbeat, if any.
    fn resolve_ack(&self) {
        let pending = self
            .pending_ack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ack) = pending {
            // The heartbeat duty may have timed out already.
            let _ = ack.send(());
        }
    }

    /// Writes one message, giving up after one heartbeat interval.
    async fn write(&self, message: Message) -> Result<(), LinkError> {
        let deadline = self.heartbeat_interval;
        let written = timeout(deadline, async {
            let mut sink = self.sink.lock().await;
            sink.send(message).await
        })
        .await;

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => Err(LinkError::Closed),
            Ok(Err(e)) => Err(LinkError::Transport(e.to_string())),
            Err(_) => Err(LinkError::Transport(format!("write stalled for {deadline:?}"))),
        }
    }
}

#[async_trait]
impl<S> ClientLink for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: String) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        self.write(Message::Text(text)).await
    }

    async fn close(&self, reason: CloseReason) {
        let first = self.state.send_if_modified(|state| {
            if state.is_open() {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        });
        if !first {
            return;
        }

        let frame = CloseFrame {
            code: CloseCode::from(reason.code()),
            reason: reason.description().into(),
        };
        if let Err(e) = self.write(Message::Close(Some(frame))).await {
            debug!("connection {}: close frame not sent: {e}", self.id);
        }
        self.state.send_replace(ConnectionState::Closed);
    }

    fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }

    fn latency(&self) -> Option<Duration> {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HubConfig;
    use columbus_core::Opcode;
    use serde_json::json;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    type Client = WebSocketStream<DuplexStream>;

    /// Connects an in-memory client to a served connection.
    async fn connect(hub: &Arc<Hub>) -> (Client, tokio::task::JoinHandle<()>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let task = tokio::spawn(WsConnection::serve(server, Arc::clone(hub)));
        (client, task)
    }

    async fn next_frame(client: &mut Client) -> Frame {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(Message::Close(frame))) => panic!("unexpected close: {frame:?}"),
                Some(Ok(_)) => continue,
                other => panic!("stream ended: {other:?}"),
            }
        }
    }

    async fn close_code(client: &mut Client) -> u16 {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
                Some(Ok(_)) => continue,
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    }

    fn empty_hub() -> Arc<Hub> {
        Hub::new(HubConfig::default(), Vec::new()).unwrap()
    }

    #[tokio::test]
    async fn test_hello_is_the_first_frame() {
        // Arrange
        let hub = empty_hub();

        // Act
        let (mut client, _task) = connect(&hub).await;

        // Assert
        let hello = next_frame(&mut client).await;
        assert_eq!(hello.op, Opcode::Hello);
        assert_eq!(hello.d["modules"], json!([]));
    }

    #[tokio::test]
    async fn test_client_heartbeat_is_acked_immediately() {
        // Arrange
        let hub = empty_hub();
        let (mut client, _task) = connect(&hub).await;
        next_frame(&mut client).await;

        // Act
        client
            .send(Message::Text(r#"{"op":10}"#.to_string()))
            .await
            .unwrap();

        // Assert
        assert_eq!(next_frame(&mut client).await.op, Opcode::HeartbeatAck);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ack_closes_with_protocol_error() {
        // Arrange
        let hub = empty_hub();
        let (mut client, task) = connect(&hub).await;
        next_frame(&mut client).await;

        // Act: the server heartbeats after the grace period; we never ack
        let heartbeat = next_frame(&mut client).await;

        // Assert
        assert_eq!(heartbeat.op, Opcode::Heartbeat);
        assert_eq!(close_code(&mut client).await, 1002);
        task.await.unwrap();
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acked_heartbeat_keeps_connection_open() {
        // Arrange
        let hub = empty_hub();
        let (mut client, _task) = connect(&hub).await;
        next_frame(&mut client).await;

        // Act: answer two heartbeats in a row
        for _ in 0..2 {
            assert_eq!(next_frame(&mut client).await.op, Opcode::Heartbeat);
            client
                .send(Message::Text(r#"{"op":11,"d":{}}"#.to_string()))
                .await
                .unwrap();
        }

        // Assert
        let link = hub.registry().snapshot().pop().unwrap();
        assert!(link.is_open());
        assert!(link.latency().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_that_stops_reading_is_closed_and_removed() {
        // Arrange: the client end is kept open but never read
        let hub = empty_hub();
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let task = tokio::spawn(WsConnection::serve(server, Arc::clone(&hub)));
        while hub.connection_count() == 0 {
            tokio::task::yield_now().await;
        }

        // Act: broadcast more than the pipe holds
        let filler = "x".repeat(2048);
        for _ in 0..8 {
            let _ = hub.dispatch("telemetry", json!(filler));
        }
        let finished = timeout(Duration::from_secs(120), task).await;

        // Assert
        assert!(finished.is_ok(), "connection task still running");
        assert_eq!(hub.connection_count(), 0);
        drop(client_io);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_before_heartbeat_is_written_does_not_count() {
        // Arrange: a broadcast larger than the pipe holds the heartbeat back
        let hub = empty_hub();
        let (client_io, server_io) = tokio::io::duplex(1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let _task = tokio::spawn(WsConnection::serve(server, Arc::clone(&hub)));
        next_frame(&mut client).await;
        sleep(Duration::from_millis(9_900)).await;
        let _ = hub.dispatch("telemetry", json!("x".repeat(8 * 1024)));
        sleep(Duration::from_millis(600)).await;

        // Act: ack while the heartbeat is still queued, then drain
        client.send(Message::Text(r#"{"op":11}"#.to_string())).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        while next_frame(&mut client).await.op != Opcode::Heartbeat {}

        // Assert
        let link = hub.registry().snapshot().pop().unwrap();
        assert!(link.latency().is_none());
        assert_eq!(close_code(&mut client).await, 1002);
    }

    #[tokio::test]
    async fn test_stray_ack_is_ignored() {
        let hub = empty_hub();
        let (mut client, _task) = connect(&hub).await;
        next_frame(&mut client).await;

        client.send(Message::Text(r#"{"op":11}"#.to_string())).await.unwrap();
        client.send(Message::Text(r#"{"op":10}"#.to_string())).await.unwrap();

        assert_eq!(next_frame(&mut client).await.op, Opcode::HeartbeatAck);
    }

    #[tokio::test]
    async fn test_invalid_json_closes_with_unsupported_data() {
        // Arrange
        let hub = empty_hub();
        let (mut client, task) = connect(&hub).await;
        next_frame(&mut client).await;

        // Act
        client.send(Message::Text("not-json".to_string())).await.unwrap();

        // Assert
        assert_eq!(close_code(&mut client).await, 1003);
        task.await.unwrap();
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_binary_frame_closes_with_unsupported_data() {
        let hub = empty_hub();
        let (mut client, _task) = connect(&hub).await;
        next_frame(&mut client).await;

        client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();

        assert_eq!(close_code(&mut client).await, 1003);
    }

    #[tokio::test]
    async fn test_unknown_opcode_is_ignored() {
        let hub = empty_hub();
        let (mut client, _task) = connect(&hub).await;
        next_frame(&mut client).await;

        client.send(Message::Text(r#"{"op":42}"#.to_string())).await.unwrap();
        client.send(Message::Text(r#"{"op":10}"#.to_string())).await.unwrap();

        assert_eq!(next_frame(&mut client).await.op, Opcode::HeartbeatAck);
    }

    #[tokio::test]
    async fn test_peer_close_removes_connection() {
        // Arrange
        let hub = empty_hub();
        let (mut client, task) = connect(&hub).await;
        next_frame(&mut client).await;
        assert_eq!(hub.connection_count(), 1);

        // Act
        client.close(None).await.unwrap();
        task.await.unwrap();

        // Assert
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_going_away() {
        let hub = empty_hub();
        let (mut client, task) = connect(&hub).await;
        next_frame(&mut client).await;

        hub.shutdown().await;

        assert_eq!(close_code(&mut client).await, 1001);
        task.await.unwrap();
    }
}
