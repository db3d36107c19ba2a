//! Connection manager: supervises the signaling websocket.
//!
//! One background task owns the connect/read/backoff cycle for the life of
//! the session. Failed connects and dropped connections retry with
//! exponential backoff; any successful connection resets the delay.
//! Decoded inbound messages are forwarded in arrival order on an unbounded
//! channel to the session's dispatch task.
//!
//! Writes go through [`ConnectionManager::send`], which holds an async
//! mutex on the sink so frames are never interleaved.

use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::events::SessionFault;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use signal_proto::Message;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Signaling endpoint path appended to the configured server URL.
const SIGNALING_PATH: &str = "/rtc";

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Lifecycle of the supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Between attempts, waiting out the backoff delay.
    BackoffWait,
    /// Deliberately shut down; the supervise loop has exited.
    Closed,
}

struct Shared {
    sink: Mutex<Option<WsSink>>,
    token: StdMutex<SecretString>,
    /// Staleness timeout in milliseconds; updated when the join response
    /// carries server timing.
    idle_timeout_ms: AtomicU64,
}

/// Handle to the supervised signaling connection.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Spawn the supervise loop. Inbound messages arrive on `inbound`;
    /// lifecycle problems on `faults`.
    #[must_use]
    pub fn spawn(
        config: SessionConfig,
        inbound: mpsc::UnboundedSender<Message>,
        faults: mpsc::UnboundedSender<SessionFault>,
    ) -> Self {
        let shared = Arc::new(Shared {
            sink: Mutex::new(None),
            token: StdMutex::new(config.token.clone()),
            idle_timeout_ms: AtomicU64::new(duration_millis(config.ping_timeout)),
        });
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shutdown = CancellationToken::new();

        let supervisor = Supervisor {
            config,
            shared: Arc::clone(&shared),
            inbound,
            faults,
            state: state_tx,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(supervisor.run());

        ConnectionManager {
            shared,
            state: state_rx,
            shutdown,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), SessionError> {
        let mut state = self.state.clone();
        loop {
            if *state.borrow_and_update() == target {
                return Ok(());
            }
            state.changed().await.map_err(|_| SessionError::Closed)?;
        }
    }

    /// Encode and write one message.
    ///
    /// # Errors
    ///
    /// `SessionError::NotConnected` when there is no live connection; the
    /// message is not queued. Write failures surface as
    /// `SessionError::Transport` and the read side will notice the broken
    /// connection and reconnect.
    pub async fn send(&self, message: &Message) -> Result<(), SessionError> {
        let frame = signal_proto::encode(message)?;
        let mut sink = self.shared.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        sink.send(WsMessage::Binary(frame.into())).await?;
        Ok(())
    }

    /// Replace the credential used by subsequent connection attempts.
    pub fn update_token(&self, token: SecretString) {
        if let Ok(mut slot) = self.shared.token.lock() {
            *slot = token;
        }
        debug!(target: "signal.conn", "access token rotated");
    }

    /// Adopt server-provided staleness timing.
    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.shared
            .idle_timeout_ms
            .store(duration_millis(timeout), Ordering::Relaxed);
    }

    /// Subscribe to connection state transitions.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop supervising and drop the connection. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Percent-encode a query value (RFC 3986 unreserved characters pass
/// through).
fn encode_query_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            other => {
                let _ = write!(encoded, "%{other:02X}");
            }
        }
    }
    encoded
}

/// Exponential retry delay: doubles up to a cap, reset by a successful
/// connection.
struct Backoff {
    base: Duration,
    cap: Duration,
    delay: Duration,
}

impl Backoff {
    fn new(base: Duration, cap: Duration) -> Self {
        Backoff {
            base,
            cap,
            delay: base,
        }
    }

    /// The delay to wait out before the next attempt; the one after
    /// doubles.
    fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(self.cap);
        delay
    }

    fn reset(&mut self) {
        self.delay = self.base;
    }
}

struct Supervisor {
    config: SessionConfig,
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedSender<Message>,
    faults: mpsc::UnboundedSender<SessionFault>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

/// Why the read phase ended.
enum ReadEnd {
    TransportLost,
    Stale,
    Cancelled,
}

impl Supervisor {
    fn connect_url(&self) -> String {
        let token = self
            .shared
            .token
            .lock()
            .map(|token| token.expose_secret().to_string())
            .unwrap_or_default();
        let mut url = format!(
            "{}{}?access_token={}&auto_subscribe={}",
            self.config.url.trim_end_matches('/'),
            SIGNALING_PATH,
            encode_query_value(&token),
            self.config.auto_subscribe,
        );
        for (name, value) in self.config.profile.sdk_params() {
            let _ = write!(url, "&{name}={}", encode_query_value(value));
        }
        url
    }

    async fn run(self) {
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_max);
        let mut was_connected = false;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let _ = self.state.send(ConnectionState::Connecting);

            let url = self.connect_url();
            let attempt = tokio::select! {
                () = self.shutdown.cancelled() => break,
                result = connect_async(url.as_str()) => result,
            };

            match attempt {
                Ok((stream, _response)) => {
                    info!(target: "signal.conn", url = %self.config.url, "signaling connected");
                    let (sink, source) = stream.split();
                    *self.shared.sink.lock().await = Some(sink);
                    let _ = self.state.send(ConnectionState::Connected);
                    backoff.reset();
                    if was_connected {
                        let _ = self.faults.send(SessionFault::Reconnected);
                    }
                    was_connected = true;

                    let end = self.read_phase(source).await;
                    self.drop_sink().await;
                    match end {
                        ReadEnd::Cancelled => break,
                        ReadEnd::Stale => {
                            warn!(target: "signal.conn", "no inbound traffic within idle timeout, reconnecting");
                            let _ = self.faults.send(SessionFault::KeepaliveTimeout);
                        }
                        ReadEnd::TransportLost => {
                            let _ = self
                                .faults
                                .send(SessionFault::ConnectionLost { reconnecting: true });
                        }
                    }
                }
                Err(error) => {
                    warn!(target: "signal.conn", %error, "signaling connect failed");
                }
            }

            let delay = backoff.next_delay();
            let _ = self.state.send(ConnectionState::BackoffWait);
            debug!(target: "signal.conn", ?delay, "waiting before reconnect");
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.drop_sink().await;
        let _ = self.state.send(ConnectionState::Closed);
        debug!(target: "signal.conn", "connection supervisor exited");
    }

    async fn drop_sink(&self) {
        let mut slot = self.shared.sink.lock().await;
        if let Some(mut sink) = slot.take() {
            let _ = sink.close().await;
        }
    }

    async fn read_phase(
        &self,
        mut source: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    ) -> ReadEnd {
        loop {
            let idle_timeout =
                Duration::from_millis(self.shared.idle_timeout_ms.load(Ordering::Relaxed));
            let frame = tokio::select! {
                () = self.shutdown.cancelled() => return ReadEnd::Cancelled,
                next = tokio::time::timeout(idle_timeout, source.next()) => next,
            };
            let frame = match frame {
                Err(_elapsed) => return ReadEnd::Stale,
                Ok(None) => {
                    debug!(target: "signal.conn", "signaling stream ended");
                    return ReadEnd::TransportLost;
                }
                Ok(Some(Err(error))) => {
                    warn!(target: "signal.conn", %error, "signaling read failed");
                    return ReadEnd::TransportLost;
                }
                Ok(Some(Ok(frame))) => frame,
            };
            let data = match frame {
                WsMessage::Binary(data) => data,
                WsMessage::Text(text) => text.into(),
                WsMessage::Close(_) => {
                    debug!(target: "signal.conn", "server closed signaling stream");
                    return ReadEnd::TransportLost;
                }
                // Transport-level ping/pong; tungstenite replies for us.
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            };
            match signal_proto::decode(data.as_ref()) {
                Ok(message) => {
                    if self.inbound.send(message).is_err() {
                        // Dispatch task is gone; the session is tearing down.
                        return ReadEnd::Cancelled;
                    }
                }
                Err(error) => {
                    warn!(target: "signal.conn", %error, "skipping malformed signaling frame");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_query_value_encoding() {
        assert_eq!(encode_query_value("abc-123._~"), "abc-123._~");
        assert_eq!(encode_query_value("a b&c"), "a%20b%26c");
        assert_eq!(
            encode_query_value("eyJhbGciOiJIUzI1NiJ9.x"),
            "eyJhbGciOiJIUzI1NiJ9.x"
        );
    }

    #[test]
    fn test_backoff_sequence_doubles_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let observed: Vec<Duration> = (0..7).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            observed,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(30),
                Duration::from_secs(30),
            ]
        );
    }

    #[test]
    fn test_backoff_resets_to_base_after_success() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }
}
