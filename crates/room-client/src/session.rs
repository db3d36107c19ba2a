//! Session facade.
//!
//! `RoomSession` ties the pieces together: it owns the connection manager,
//! both event buses, the participant/track tracker and the keepalive
//! supervisor, and runs the inbound dispatch task that keeps them
//! consistent before application handlers see a message.
//!
//! Lifecycle messages are handled internally:
//! - `join` starts keepalive with server timing and seeds the tracker,
//! - `update` applies participant and track changes,
//! - `refresh_token` rotates the stored credential,
//! - `pong` is matched against the last ping for a round-trip time,
//! - `leave` stops keepalive and, when the server forbids reconnecting,
//!   closes the session.
//!
//! Application handlers then run via the inbound bus, so they observe the
//! tracker in its post-update state.
//!
//! Heartbeats stop whenever the connection drops and resume only when the
//! next join response arrives.

use crate::config::SessionConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::errors::SessionError;
use crate::events::{EventBus, SessionFault, SubscriptionId};
use crate::keepalive::KeepaliveSupervisor;
use crate::tracker::{Tracker, TrackerEvent};
use secrecy::SecretString;
use signal_proto::message::{
    AddTrackRequest, JoinResponse, LeaveRequest, Message, MuteTrackRequest, SubscriptionPermission,
    SyncState, TrickleRequest, UpdateSubscription, UpdateTrackSettings,
};
use signal_proto::types::{
    DisconnectReason, IceCandidateInit, ParticipantId, ParticipantState, ParticipantTracks,
    SessionDescription, SignalTarget, TrackId, TrackSource, TrackType, VideoLayer, VideoQuality,
};
use signal_proto::MessageKind;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace, warn};

/// A live signaling session with a room server.
pub struct RoomSession {
    config: SessionConfig,
    closed: AtomicBool,
    connection: StdMutex<Option<Arc<ConnectionManager>>>,
    inbound: EventBus,
    outbound: EventBus,
    tracker: Arc<StdMutex<Tracker>>,
    keepalive: Arc<StdMutex<KeepaliveSupervisor>>,
    join: Arc<StdMutex<Option<JoinResponse>>>,
    join_notify: Arc<Notify>,
    faults_tx: mpsc::UnboundedSender<SessionFault>,
    faults_rx: StdMutex<Option<mpsc::UnboundedReceiver<SessionFault>>>,
    tracker_events: StdMutex<Option<mpsc::UnboundedReceiver<TrackerEvent>>>,
    ping_rx: StdMutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

impl RoomSession {
    /// Build a session. Fails fast on invalid configuration; no I/O
    /// happens until [`connect`](Self::connect).
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;

        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        let (tracker, tracker_events) = Tracker::new();
        let (ping_tx, ping_rx) = mpsc::unbounded_channel();

        Ok(RoomSession {
            config,
            closed: AtomicBool::new(false),
            connection: StdMutex::new(None),
            inbound: EventBus::new(faults_tx.clone()),
            outbound: EventBus::new(faults_tx.clone()),
            tracker: Arc::new(StdMutex::new(tracker)),
            keepalive: Arc::new(StdMutex::new(KeepaliveSupervisor::new(ping_tx))),
            join: Arc::new(StdMutex::new(None)),
            join_notify: Arc::new(Notify::new()),
            faults_tx,
            faults_rx: StdMutex::new(Some(faults_rx)),
            tracker_events: StdMutex::new(Some(tracker_events)),
            ping_rx: StdMutex::new(Some(ping_rx)),
        })
    }

    /// Start the connection supervise loop and the dispatch task.
    /// Idempotent while the session is open.
    pub fn connect(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let mut slot = self
            .connection
            .lock()
            .map_err(|_| SessionError::Closed)?;
        if let Some(connection) = slot.as_ref() {
            if connection.is_closed() {
                return Err(SessionError::Closed);
            }
            return Ok(());
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(ConnectionManager::spawn(
            self.config.clone(),
            inbound_tx,
            self.faults_tx.clone(),
        ));
        *slot = Some(Arc::clone(&connection));
        drop(slot);

        self.spawn_dispatch(inbound_rx, Arc::clone(&connection));
        self.spawn_state_watcher(connection.state_watch());
        self.spawn_ping_forwarder(connection);
        info!(target: "signal.session", url = %self.config.url, "session started");
        Ok(())
    }

    fn spawn_dispatch(
        &self,
        mut inbound_rx: mpsc::UnboundedReceiver<Message>,
        connection: Arc<ConnectionManager>,
    ) {
        let dispatch = Dispatch {
            config: self.config.clone(),
            connection,
            inbound: self.inbound.clone(),
            tracker: Arc::clone(&self.tracker),
            keepalive: Arc::clone(&self.keepalive),
            join: Arc::clone(&self.join),
            join_notify: Arc::clone(&self.join_notify),
            faults: self.faults_tx.clone(),
        };
        tokio::spawn(async move {
            while let Some(message) = inbound_rx.recv().await {
                dispatch.handle(&message);
            }
            debug!(target: "signal.session", "dispatch task exited");
        });
    }

    /// Stop heartbeats whenever the connection leaves the connected
    /// state; they resume only on the next join response.
    fn spawn_state_watcher(&self, mut state: tokio::sync::watch::Receiver<ConnectionState>) {
        let keepalive = Arc::clone(&self.keepalive);
        tokio::spawn(async move {
            loop {
                let current = *state.borrow_and_update();
                if current != ConnectionState::Connected {
                    if let Ok(mut keepalive) = keepalive.lock() {
                        keepalive.stop();
                    }
                }
                if current == ConnectionState::Closed {
                    break;
                }
                if state.changed().await.is_err() {
                    break;
                }
            }
            debug!(target: "signal.session", "state watcher exited");
        });
    }

    fn spawn_ping_forwarder(&self, connection: Arc<ConnectionManager>) {
        let Some(mut ping_rx) = self
            .ping_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
        else {
            return;
        };
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            while let Some(ping) = ping_rx.recv().await {
                match connection.send(&ping).await {
                    Ok(()) => outbound.emit(&ping),
                    Err(SessionError::NotConnected) => {
                        // Between connections; skip this ping rather than
                        // queue a stale timestamp.
                        trace!(target: "signal.keepalive", "dropping ping, not connected");
                    }
                    Err(error) => {
                        warn!(target: "signal.keepalive", %error, "ping send failed");
                    }
                }
            }
        });
    }

    fn connection(&self) -> Result<Arc<ConnectionManager>, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let slot = self
            .connection
            .lock()
            .map_err(|_| SessionError::Closed)?;
        match slot.as_ref() {
            Some(connection) if connection.is_closed() => Err(SessionError::Closed),
            Some(connection) => Ok(Arc::clone(connection)),
            None => Err(SessionError::NotConnected),
        }
    }

    /// Send one message and, on success, emit it on the outbound bus.
    pub async fn send(&self, message: Message) -> Result<(), SessionError> {
        let connection = self.connection()?;
        connection.send(&message).await?;
        self.outbound.emit(&message);
        Ok(())
    }

    /// Shut down the session. The first call wins; later calls, and
    /// closing a session that never connected twice, are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut keepalive) = self.keepalive.lock() {
            keepalive.stop();
        }
        if let Ok(slot) = self.connection.lock() {
            if let Some(connection) = slot.as_ref() {
                connection.close();
            }
        }
        let _ = self.faults_tx.send(SessionFault::Closed);
        info!(target: "signal.session", "session closed");
    }

    // --- request builders -------------------------------------------------

    /// Send a publisher offer.
    pub async fn send_offer(&self, sdp: impl Into<String>) -> Result<(), SessionError> {
        self.send(Message::SessionDescription(SessionDescription::offer(sdp)))
            .await
    }

    /// Send a subscriber answer.
    pub async fn send_answer(&self, sdp: impl Into<String>) -> Result<(), SessionError> {
        self.send(Message::SessionDescription(SessionDescription::answer(sdp)))
            .await
    }

    /// Relay a local ICE candidate.
    pub async fn send_trickle(
        &self,
        candidate: &IceCandidateInit,
        target: SignalTarget,
    ) -> Result<(), SessionError> {
        let candidate_init = serde_json::to_string(candidate)
            .map_err(signal_proto::CodecError::MalformedMessage)?;
        self.send(Message::Trickle(TrickleRequest {
            candidate_init,
            target,
        }))
        .await
    }

    /// Announce a camera video track with a single high layer.
    pub async fn send_add_track(
        &self,
        cid: impl Into<String>,
        name: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Result<(), SessionError> {
        self.send(Message::AddTrack(AddTrackRequest {
            cid: cid.into(),
            name: name.into(),
            track_type: TrackType::Video,
            width,
            height,
            muted: false,
            source: TrackSource::Camera,
            layers: vec![VideoLayer {
                quality: VideoQuality::High,
                width,
                height,
                bitrate: 0,
                ssrc: 0,
            }],
        }))
        .await
    }

    /// Allow every participant to subscribe to all local tracks.
    pub async fn grant_subscription_permission_to_all(&self) -> Result<(), SessionError> {
        self.send(Message::SubscriptionPermission(SubscriptionPermission {
            all_participants: true,
            track_permissions: vec![],
        }))
        .await
    }

    /// Subscribe to the listed tracks.
    pub async fn send_subscription_request(
        &self,
        participant_tracks: Vec<ParticipantTracks>,
    ) -> Result<(), SessionError> {
        let track_sids = participant_tracks
            .iter()
            .flat_map(|entry| entry.track_sids.iter().cloned())
            .collect();
        self.send(Message::Subscription(UpdateSubscription {
            track_sids,
            subscribe: true,
            participant_tracks,
        }))
        .await
    }

    /// Unsubscribe from a participant's tracks.
    pub async fn send_unsubscription_request(
        &self,
        participant_tracks: ParticipantTracks,
    ) -> Result<(), SessionError> {
        self.send(Message::Subscription(UpdateSubscription {
            track_sids: participant_tracks.track_sids.clone(),
            subscribe: false,
            participant_tracks: vec![participant_tracks],
        }))
        .await
    }

    /// Adjust delivery settings for one subscribed track.
    pub async fn send_update_track_settings(
        &self,
        track: TrackId,
        width: u32,
        height: u32,
        disabled: bool,
        fps: u32,
    ) -> Result<(), SessionError> {
        self.send(Message::TrackSetting(UpdateTrackSettings {
            track_sids: vec![track],
            disabled,
            width,
            height,
            fps,
        }))
        .await
    }

    /// Change the mute state of a local track.
    pub async fn send_mute_track(&self, track: TrackId, muted: bool) -> Result<(), SessionError> {
        self.send(Message::Mute(MuteTrackRequest { sid: track, muted }))
            .await
    }

    /// Resume-time state snapshot.
    pub async fn send_sync_state(&self, state: SyncState) -> Result<(), SessionError> {
        self.send(Message::SyncState(Box::new(state))).await
    }

    /// Tell the server we are leaving, then close the session.
    pub async fn send_leave(&self) -> Result<(), SessionError> {
        let result = self
            .send(Message::Leave(LeaveRequest {
                can_reconnect: false,
                reason: DisconnectReason::ClientInitiated,
            }))
            .await;
        self.close();
        result
    }

    // --- handler registration ---------------------------------------------

    pub fn on_inbound<F>(&self, kind: MessageKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&Message) -> anyhow::Result<()> + Send + 'static,
    {
        self.inbound.subscribe(kind, handler)
    }

    pub fn on_inbound_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: FnMut(&Message) -> anyhow::Result<()> + Send + 'static,
    {
        self.inbound.subscribe_all(handler)
    }

    pub fn on_outbound<F>(&self, kind: MessageKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&Message) -> anyhow::Result<()> + Send + 'static,
    {
        self.outbound.subscribe(kind, handler)
    }

    pub fn on_outbound_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: FnMut(&Message) -> anyhow::Result<()> + Send + 'static,
    {
        self.outbound.subscribe_all(handler)
    }

    pub fn unsubscribe_inbound(&self, id: SubscriptionId) {
        self.inbound.unsubscribe(id);
    }

    pub fn unsubscribe_outbound(&self, id: SubscriptionId) {
        self.outbound.unsubscribe(id);
    }

    // --- accessors --------------------------------------------------------

    /// Current connection state; `Disconnected` before `connect()`.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|connection| connection.state()))
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// The join response from the current connection, if received.
    #[must_use]
    pub fn join_response(&self) -> Option<JoinResponse> {
        self.join.lock().ok().and_then(|join| join.clone())
    }

    /// Wait for the join response, up to the configured join timeout.
    ///
    /// # Errors
    ///
    /// `SessionError::JoinTimeout` when the server never sends one.
    pub async fn wait_for_join(&self) -> Result<JoinResponse, SessionError> {
        let deadline = tokio::time::Instant::now() + self.config.join_timeout;
        loop {
            if let Some(join) = self.join_response() {
                return Ok(join);
            }
            tokio::select! {
                () = self.join_notify.notified() => {}
                () = tokio::time::sleep_until(deadline) => return Err(SessionError::JoinTimeout),
            }
        }
    }

    /// Take the fault receiver. Yields `None` after the first call.
    #[must_use]
    pub fn take_faults(&self) -> Option<mpsc::UnboundedReceiver<SessionFault>> {
        self.faults_rx.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Take the tracker event receiver. Yields `None` after the first call.
    #[must_use]
    pub fn take_tracker_events(&self) -> Option<mpsc::UnboundedReceiver<TrackerEvent>> {
        self.tracker_events
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
    }

    /// Known participants, in id order.
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.tracker
            .lock()
            .map(|tracker| tracker.participants())
            .unwrap_or_default()
    }

    /// Tracks owned by a participant.
    #[must_use]
    pub fn tracks_of(&self, participant: &ParticipantId) -> Vec<TrackId> {
        self.tracker
            .lock()
            .map(|tracker| tracker.tracks_of(participant))
            .unwrap_or_default()
    }

    /// The owner of a track and its sibling tracks, for unsubscription.
    #[must_use]
    pub fn participant_tracks(&self, track: &TrackId) -> Option<ParticipantTracks> {
        self.tracker
            .lock()
            .ok()
            .and_then(|tracker| tracker.participant_tracks(track))
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// State shared by the inbound dispatch task.
struct Dispatch {
    config: SessionConfig,
    connection: Arc<ConnectionManager>,
    inbound: EventBus,
    tracker: Arc<StdMutex<Tracker>>,
    keepalive: Arc<StdMutex<KeepaliveSupervisor>>,
    join: Arc<StdMutex<Option<JoinResponse>>>,
    join_notify: Arc<Notify>,
    faults: mpsc::UnboundedSender<SessionFault>,
}

impl Dispatch {
    /// Apply internal lifecycle handling, then run application handlers.
    fn handle(&self, message: &Message) {
        match message {
            Message::Join(join) => self.on_join(join),
            Message::Update(update) => self.apply_participants(&update.participants),
            Message::RefreshToken(token) => {
                self.connection
                    .update_token(SecretString::from(token.clone()));
            }
            Message::Pong(timestamp) => {
                let rtt = self
                    .keepalive
                    .lock()
                    .ok()
                    .and_then(|keepalive| keepalive.note_pong(*timestamp));
                if let Some(rtt) = rtt {
                    trace!(target: "signal.session", rtt_ms = u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX), "pong received");
                }
            }
            Message::Leave(leave) => self.on_leave(leave),
            Message::Unrecognized { kind, .. } => {
                debug!(target: "signal.session", kind = %kind, "unrecognized message kind");
            }
            _ => {}
        }
        self.inbound.emit(message);
    }

    fn on_join(&self, join: &JoinResponse) {
        let (interval, timeout) = keepalive_timing(&self.config, join);
        info!(
            target: "signal.session",
            room = %join.room.name,
            participant = %join.participant.sid,
            others = join.other_participants.len(),
            ?interval,
            ?timeout,
            "joined room"
        );
        self.connection.set_idle_timeout(timeout);
        if let Ok(mut keepalive) = self.keepalive.lock() {
            keepalive.start(interval);
        }
        if let Ok(mut slot) = self.join.lock() {
            *slot = Some(join.clone());
        }
        // notify_one leaves a permit even when no waiter is parked yet.
        self.join_notify.notify_one();
        self.apply_participants(&join.other_participants);
    }

    fn on_leave(&self, leave: &LeaveRequest) {
        info!(
            target: "signal.session",
            reason = ?leave.reason,
            can_reconnect = leave.can_reconnect,
            "server ended session"
        );
        if let Ok(mut keepalive) = self.keepalive.lock() {
            keepalive.stop();
        }
        if !leave.can_reconnect {
            // Terminal; the supervise loop must not retry.
            self.connection.close();
            let _ = self
                .faults
                .send(SessionFault::ConnectionLost { reconnecting: false });
        }
    }

    fn apply_participants(&self, participants: &[signal_proto::types::ParticipantInfo]) {
        let Ok(mut tracker) = self.tracker.lock() else {
            warn!(target: "signal.tracker", "tracker lock poisoned, dropping update");
            return;
        };
        for participant in participants {
            if participant.state == ParticipantState::Disconnected {
                tracker.remove_participant(&participant.sid);
                continue;
            }
            tracker.add_participant(&participant.sid);
            let announced: HashSet<&TrackId> =
                participant.tracks.iter().map(|track| &track.sid).collect();
            for vanished in tracker
                .tracks_of(&participant.sid)
                .into_iter()
                .filter(|track| !announced.contains(track))
                .collect::<Vec<_>>()
            {
                tracker.remove_track(&vanished);
            }
            for track in &participant.tracks {
                tracker.add_track(&participant.sid, &track.sid);
            }
        }
    }
}

/// Heartbeat timing for a joined session: server hints win over the
/// configured defaults.
fn keepalive_timing(config: &SessionConfig, join: &JoinResponse) -> (Duration, Duration) {
    let interval = join
        .ping_interval
        .map_or(config.ping_interval, |seconds| {
            Duration::from_secs(u64::from(seconds))
        });
    let timeout = join.ping_timeout.map_or(config.ping_timeout, |seconds| {
        Duration::from_secs(u64::from(seconds))
    });
    (interval, timeout)
}
