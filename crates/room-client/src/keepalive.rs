//! Keepalive supervisor.
//!
//! Sends `ping` messages at a fixed interval while a session is joined and
//! matches inbound `pong` replies against the most recent ping to produce a
//! round-trip time. The supervisor only produces traffic; staleness
//! detection and teardown belong to the connection manager.
//!
//! Starting an already running supervisor cancels the previous run first,
//! so a reconnect never ends up with two heartbeat streams.

use signal_proto::Message;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Milliseconds since the epoch, for ping timestamps.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| u64::try_from(elapsed.as_millis()).ok())
        .unwrap_or(0)
}

#[derive(Clone, Copy)]
struct PingRecord {
    timestamp: u64,
    sent_at: Instant,
}

/// Periodic ping sender for one session.
pub struct KeepaliveSupervisor {
    outbound: mpsc::UnboundedSender<Message>,
    run: Option<CancellationToken>,
    last_ping: Arc<Mutex<Option<PingRecord>>>,
}

impl KeepaliveSupervisor {
    /// Create an idle supervisor that will emit pings on `outbound`.
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        KeepaliveSupervisor {
            outbound,
            run: None,
            last_ping: Arc::new(Mutex::new(None)),
        }
    }

    /// Start pinging every `period`. Cancels any previous run first.
    pub fn start(&mut self, period: Duration) {
        self.stop();
        debug!(target: "signal.keepalive", ?period, "starting keepalive");

        let token = CancellationToken::new();
        let task_token = token.clone();
        let outbound = self.outbound.clone();
        let last_ping = Arc::clone(&self.last_ping);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately; the first ping waits a full period.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = task_token.cancelled() => {
                        trace!(target: "signal.keepalive", "keepalive run cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if task_token.is_cancelled() {
                            break;
                        }
                        let timestamp = now_millis();
                        if let Ok(mut slot) = last_ping.lock() {
                            *slot = Some(PingRecord {
                                timestamp,
                                sent_at: Instant::now(),
                            });
                        }
                        if outbound.send(Message::Ping(timestamp)).is_err() {
                            // Session dropped the outbound queue; nothing
                            // left to ping.
                            break;
                        }
                    }
                }
            }
        });

        self.run = Some(token);
    }

    /// Stop pinging. No ping is emitted after this returns. Idempotent.
    pub fn stop(&mut self) {
        if let Some(token) = self.run.take() {
            token.cancel();
            debug!(target: "signal.keepalive", "keepalive stopped");
        }
        if let Ok(mut slot) = self.last_ping.lock() {
            *slot = None;
        }
    }

    /// Match a pong against the most recent ping; the round-trip time when
    /// the echoed timestamp matches.
    pub fn note_pong(&self, timestamp: u64) -> Option<Duration> {
        let slot = self.last_ping.lock().ok()?;
        let record = (*slot)?;
        if record.timestamp == timestamp {
            Some(record.sent_at.elapsed())
        } else {
            trace!(
                target: "signal.keepalive",
                echoed = timestamp,
                expected = record.timestamp,
                "pong does not match last ping"
            );
            None
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|token| !token.is_cancelled())
    }
}

impl Drop for KeepaliveSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tokio::task::yield_now;
    use tokio::time::advance;

    async fn settle() {
        // Let spawned tasks observe elapsed time.
        for _ in 0..10 {
            yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_sent_every_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut supervisor = KeepaliveSupervisor::new(tx);
        supervisor.start(Duration::from_secs(30));
        settle().await;

        assert!(rx.try_recv().is_err(), "no ping before the first period");

        for _ in 0..3 {
            advance(Duration::from_secs(30)).await;
            settle().await;
            assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_leaves_a_single_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut supervisor = KeepaliveSupervisor::new(tx);
        supervisor.start(Duration::from_secs(30));
        settle().await;
        supervisor.start(Duration::from_secs(30));
        settle().await;

        advance(Duration::from_secs(30)).await;
        settle().await;

        assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));
        assert!(rx.try_recv().is_err(), "second stream survived restart");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_pings() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut supervisor = KeepaliveSupervisor::new(tx);
        supervisor.start(Duration::from_secs(30));
        settle().await;

        supervisor.stop();
        assert!(!supervisor.is_running());

        advance(Duration::from_secs(120)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_note_pong_measures_round_trip() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut supervisor = KeepaliveSupervisor::new(tx);
        supervisor.start(Duration::from_secs(30));
        settle().await;

        advance(Duration::from_secs(30)).await;
        settle().await;
        let Ok(Message::Ping(timestamp)) = rx.try_recv() else {
            panic!("expected a ping");
        };

        advance(Duration::from_millis(250)).await;
        let rtt = supervisor.note_pong(timestamp).unwrap();
        assert_eq!(rtt, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_pong_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut supervisor = KeepaliveSupervisor::new(tx);
        supervisor.start(Duration::from_secs(30));
        settle().await;

        advance(Duration::from_secs(30)).await;
        settle().await;
        let Ok(Message::Ping(timestamp)) = rx.try_recv() else {
            panic!("expected a ping");
        };

        assert_eq!(supervisor.note_pong(timestamp.wrapping_add(1)), None);
    }
}
