//! The closed tagged union of signaling messages.
//!
//! Every message kind the server and client exchange is a [`Message`]
//! variant with exactly one canonical string tag, enumerated by
//! [`MessageKind`]. Routing (the event bus) keys off [`MessageKind`], so
//! dispatch is checked exhaustively at compile time rather than by
//! free-form string matching.

use crate::codec::CodecError;
use crate::types::{
    ConnectionQualityInfo, DisconnectReason, ParticipantId, ParticipantInfo, ParticipantTracks,
    Room, SessionDescription, SignalTarget, SpeakerInfo, StreamStateInfo, SubscribedQuality,
    TrackId, TrackInfo, TrackPermission, TrackSource, TrackType, VideoLayer,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// First message from the server after a successful connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    #[serde(default)]
    pub room: Room,
    pub participant: ParticipantInfo,
    #[serde(default)]
    pub other_participants: Vec<ParticipantInfo>,
    /// Use the subscriber peer connection as primary.
    #[serde(default)]
    pub subscriber_primary: bool,
    /// Heartbeat interval in seconds; client default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_interval: Option<u32>,
    /// Staleness timeout in seconds; client default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_timeout: Option<u32>,
}

/// An ICE candidate relayed between the media engine and the server.
///
/// `candidate_init` is the engine's JSON serialization of the candidate
/// (see [`crate::types::IceCandidateInit`]); this crate never parses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrickleRequest {
    #[serde(rename = "candidateInit")]
    pub candidate_init: String,
    pub target: SignalTarget,
}

/// Request to publish a new track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTrackRequest {
    /// Client-chosen id, matched when the media-engine track arrives.
    pub cid: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub track_type: TrackType,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub muted: bool,
    pub source: TrackSource,
    #[serde(default)]
    pub layers: Vec<VideoLayer>,
}

/// Subscribe to or unsubscribe from a set of tracks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateSubscription {
    pub track_sids: Vec<TrackId>,
    pub subscribe: bool,
    #[serde(default)]
    pub participant_tracks: Vec<ParticipantTracks>,
}

/// Adjust delivery settings for subscribed tracks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateTrackSettings {
    pub track_sids: Vec<TrackId>,
    /// When true the track is paused server-side; no new data arrives.
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub fps: u32,
}

/// Report the currently published simulcast layers for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateVideoLayers {
    pub track_sid: TrackId,
    pub layers: Vec<VideoLayer>,
}

/// Grant other participants permission to subscribe to local tracks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionPermission {
    #[serde(default)]
    pub all_participants: bool,
    #[serde(default)]
    pub track_permissions: Vec<TrackPermission>,
}

/// Client state snapshot sent when resuming a session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncState {
    /// Last subscribe answer before reconnecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    /// Last received server-side offer before reconnecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default)]
    pub subscription: UpdateSubscription,
    #[serde(default)]
    pub publish_tracks: Vec<TrackPublishedResponse>,
}

/// Session termination, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    /// Server-initiated disconnects set this when the client should run the
    /// full reconnect sequence.
    #[serde(default)]
    pub can_reconnect: bool,
    pub reason: DisconnectReason,
}

/// Incremental participant state, including joins and disconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    pub participants: Vec<ParticipantInfo>,
}

/// Server acknowledgement that a published track is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPublishedResponse {
    pub cid: String,
    pub track: TrackInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackUnpublishedResponse {
    pub track_sid: TrackId,
}

/// Mute state change for a track, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteTrackRequest {
    pub sid: TrackId,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakersChanged {
    pub speakers: Vec<SpeakerInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomUpdate {
    pub room: Room,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionQualityUpdate {
    pub updates: Vec<ConnectionQualityInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStateUpdate {
    pub stream_states: Vec<StreamStateInfo>,
}

/// Which quality tiers the server wants published for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedQualityUpdate {
    pub track_sid: TrackId,
    #[serde(default)]
    pub subscribed_qualities: Vec<SubscribedQuality>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPermissionUpdate {
    pub participant_sid: ParticipantId,
    pub track_sid: TrackId,
    pub allowed: bool,
}

/// One signaling message, request or response.
///
/// Offer and answer share a single variant: the wire format reuses one
/// message shape for both and distinguishes them by the envelope tag, which
/// maps onto [`SessionDescription::kind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `offer` / `answer` — session description in either direction.
    SessionDescription(SessionDescription),
    Trickle(TrickleRequest),
    AddTrack(AddTrackRequest),
    Subscription(UpdateSubscription),
    TrackSetting(UpdateTrackSettings),
    UpdateLayers(UpdateVideoLayers),
    SubscriptionPermission(SubscriptionPermission),
    SyncState(Box<SyncState>),
    /// Heartbeat; carries the sender's timestamp in milliseconds.
    Ping(u64),
    Leave(LeaveRequest),
    Join(Box<JoinResponse>),
    Update(ParticipantUpdate),
    TrackPublished(TrackPublishedResponse),
    TrackUnpublished(TrackUnpublishedResponse),
    Mute(MuteTrackRequest),
    SpeakersChanged(SpeakersChanged),
    RoomUpdate(RoomUpdate),
    ConnectionQuality(ConnectionQualityUpdate),
    StreamStateUpdate(StreamStateUpdate),
    SubscribedQualityUpdate(SubscribedQualityUpdate),
    SubscriptionPermissionUpdate(SubscriptionPermissionUpdate),
    /// Replacement credential; must be stored before the next reconnect.
    RefreshToken(String),
    /// Heartbeat acknowledgement echoing the ping timestamp.
    Pong(u64),
    /// A kind this client does not know. Surfaced, never dropped.
    Unrecognized { kind: String, payload: Value },
}

impl Message {
    /// The routing kind of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::SessionDescription(desc) => match desc.kind {
                crate::types::SdpKind::Offer => MessageKind::Offer,
                crate::types::SdpKind::Answer => MessageKind::Answer,
            },
            Message::Trickle(_) => MessageKind::Trickle,
            Message::AddTrack(_) => MessageKind::AddTrack,
            Message::Subscription(_) => MessageKind::Subscription,
            Message::TrackSetting(_) => MessageKind::TrackSetting,
            Message::UpdateLayers(_) => MessageKind::UpdateLayers,
            Message::SubscriptionPermission(_) => MessageKind::SubscriptionPermission,
            Message::SyncState(_) => MessageKind::SyncState,
            Message::Ping(_) => MessageKind::Ping,
            Message::Leave(_) => MessageKind::Leave,
            Message::Join(_) => MessageKind::Join,
            Message::Update(_) => MessageKind::Update,
            Message::TrackPublished(_) => MessageKind::TrackPublished,
            Message::TrackUnpublished(_) => MessageKind::TrackUnpublished,
            Message::Mute(_) => MessageKind::Mute,
            Message::SpeakersChanged(_) => MessageKind::SpeakersChanged,
            Message::RoomUpdate(_) => MessageKind::RoomUpdate,
            Message::ConnectionQuality(_) => MessageKind::ConnectionQuality,
            Message::StreamStateUpdate(_) => MessageKind::StreamStateUpdate,
            Message::SubscribedQualityUpdate(_) => MessageKind::SubscribedQualityUpdate,
            Message::SubscriptionPermissionUpdate(_) => MessageKind::SubscriptionPermissionUpdate,
            Message::RefreshToken(_) => MessageKind::RefreshToken,
            Message::Pong(_) => MessageKind::Pong,
            Message::Unrecognized { .. } => MessageKind::Unrecognized,
        }
    }

    /// The canonical wire tag for this message.
    ///
    /// For [`Message::Unrecognized`] this is the original tag the server
    /// sent, preserved so re-encoding round-trips.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Message::Unrecognized { kind, .. } => kind,
            other => other.kind().as_tag(),
        }
    }
}

/// Every canonical message kind, used for event-bus routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Offer,
    Answer,
    Trickle,
    AddTrack,
    Subscription,
    TrackSetting,
    UpdateLayers,
    SubscriptionPermission,
    SyncState,
    Ping,
    Leave,
    Join,
    Update,
    TrackPublished,
    TrackUnpublished,
    Mute,
    SpeakersChanged,
    RoomUpdate,
    ConnectionQuality,
    StreamStateUpdate,
    SubscribedQualityUpdate,
    SubscriptionPermissionUpdate,
    RefreshToken,
    Pong,
    /// Routing bucket for kinds unknown to this client.
    Unrecognized,
}

impl MessageKind {
    /// The canonical string tag used on the wire and for routing.
    #[must_use]
    pub fn as_tag(self) -> &'static str {
        match self {
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::Trickle => "trickle",
            MessageKind::AddTrack => "add_track",
            MessageKind::Subscription => "subscription",
            MessageKind::TrackSetting => "track_setting",
            MessageKind::UpdateLayers => "update_layers",
            MessageKind::SubscriptionPermission => "subscription_permission",
            MessageKind::SyncState => "sync_state",
            MessageKind::Ping => "ping",
            MessageKind::Leave => "leave",
            MessageKind::Join => "join",
            MessageKind::Update => "update",
            MessageKind::TrackPublished => "track_published",
            MessageKind::TrackUnpublished => "track_unpublished",
            MessageKind::Mute => "mute",
            MessageKind::SpeakersChanged => "speakers_changed",
            MessageKind::RoomUpdate => "room_update",
            MessageKind::ConnectionQuality => "connection_quality",
            MessageKind::StreamStateUpdate => "stream_state_update",
            MessageKind::SubscribedQualityUpdate => "subscribed_quality_update",
            MessageKind::SubscriptionPermissionUpdate => "subscription_permission_update",
            MessageKind::RefreshToken => "refresh_token",
            MessageKind::Pong => "pong",
            MessageKind::Unrecognized => "unrecognized",
        }
    }

    /// Look up a kind by its canonical tag.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownMessageKind`] when the tag does not
    /// name a known kind.
    pub fn from_tag(tag: &str) -> Result<Self, CodecError> {
        match tag {
            "offer" => Ok(MessageKind::Offer),
            "answer" => Ok(MessageKind::Answer),
            "trickle" => Ok(MessageKind::Trickle),
            "add_track" => Ok(MessageKind::AddTrack),
            "subscription" => Ok(MessageKind::Subscription),
            "track_setting" => Ok(MessageKind::TrackSetting),
            "update_layers" => Ok(MessageKind::UpdateLayers),
            "subscription_permission" => Ok(MessageKind::SubscriptionPermission),
            "sync_state" => Ok(MessageKind::SyncState),
            "ping" => Ok(MessageKind::Ping),
            "leave" => Ok(MessageKind::Leave),
            "join" => Ok(MessageKind::Join),
            "update" => Ok(MessageKind::Update),
            "track_published" => Ok(MessageKind::TrackPublished),
            "track_unpublished" => Ok(MessageKind::TrackUnpublished),
            "mute" => Ok(MessageKind::Mute),
            "speakers_changed" => Ok(MessageKind::SpeakersChanged),
            "room_update" => Ok(MessageKind::RoomUpdate),
            "connection_quality" => Ok(MessageKind::ConnectionQuality),
            "stream_state_update" => Ok(MessageKind::StreamStateUpdate),
            "subscribed_quality_update" => Ok(MessageKind::SubscribedQualityUpdate),
            "subscription_permission_update" => Ok(MessageKind::SubscriptionPermissionUpdate),
            "refresh_token" => Ok(MessageKind::RefreshToken),
            "pong" => Ok(MessageKind::Pong),
            other => Err(CodecError::UnknownMessageKind(other.to_string())),
        }
    }

    /// Heartbeat kinds are excluded from the wildcard event channel so
    /// log-oriented consumers are not flooded.
    #[must_use]
    pub fn is_heartbeat(self) -> bool {
        matches!(self, MessageKind::Ping | MessageKind::Pong)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::SdpKind;

    const ALL_KINDS: [MessageKind; 24] = [
        MessageKind::Offer,
        MessageKind::Answer,
        MessageKind::Trickle,
        MessageKind::AddTrack,
        MessageKind::Subscription,
        MessageKind::TrackSetting,
        MessageKind::UpdateLayers,
        MessageKind::SubscriptionPermission,
        MessageKind::SyncState,
        MessageKind::Ping,
        MessageKind::Leave,
        MessageKind::Join,
        MessageKind::Update,
        MessageKind::TrackPublished,
        MessageKind::TrackUnpublished,
        MessageKind::Mute,
        MessageKind::SpeakersChanged,
        MessageKind::RoomUpdate,
        MessageKind::ConnectionQuality,
        MessageKind::StreamStateUpdate,
        MessageKind::SubscribedQualityUpdate,
        MessageKind::SubscriptionPermissionUpdate,
        MessageKind::RefreshToken,
        MessageKind::Pong,
    ];

    #[test]
    fn every_tag_round_trips_through_lookup() {
        for kind in ALL_KINDS {
            assert_eq!(MessageKind::from_tag(kind.as_tag()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let err = MessageKind::from_tag("simulate").unwrap_err();
        assert!(matches!(err, CodecError::UnknownMessageKind(t) if t == "simulate"));
    }

    #[test]
    fn session_description_kind_follows_sdp_type() {
        let offer = Message::SessionDescription(SessionDescription::offer("v=0"));
        assert_eq!(offer.kind(), MessageKind::Offer);
        assert_eq!(offer.tag(), "offer");

        let answer = Message::SessionDescription(SessionDescription {
            kind: SdpKind::Answer,
            sdp: "v=0".to_string(),
        });
        assert_eq!(answer.kind(), MessageKind::Answer);
    }

    #[test]
    fn unrecognized_preserves_original_tag() {
        let msg = Message::Unrecognized {
            kind: "simulate".to_string(),
            payload: serde_json::json!({"speaker_update": 1}),
        };
        assert_eq!(msg.kind(), MessageKind::Unrecognized);
        assert_eq!(msg.tag(), "simulate");
    }

    #[test]
    fn only_heartbeats_are_heartbeats() {
        for kind in ALL_KINDS {
            let expected = matches!(kind, MessageKind::Ping | MessageKind::Pong);
            assert_eq!(kind.is_heartbeat(), expected, "{kind}");
        }
    }
}
