//! Value types carried by signaling messages.
//!
//! These mirror the server's protocol model, trimmed to the fields the
//! client actually consumes. All types are plain data: `Clone`, `PartialEq`
//! and serde round-trippable, so messages can be compared structurally in
//! tests and relayed verbatim to collaborators.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque server-assigned participant identifier.
///
/// Never reused by the server for a different participant within a room's
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

/// Opaque server-assigned track identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Connection state of a participant as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
    /// Signaling connected, no offer exchanged yet.
    Joining,
    /// Server received the client offer.
    Joined,
    /// Media connectivity established.
    Active,
    /// Signaling connection dropped.
    Disconnected,
}

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackType {
    Audio,
    Video,
    Data,
}

/// Capture source of a published track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackSource {
    Unknown,
    Camera,
    Microphone,
    ScreenShare,
    ScreenShareAudio,
}

/// Simulcast quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoQuality {
    Low,
    Medium,
    High,
    Off,
}

/// One encoded quality/resolution variant of a simulcast track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoLayer {
    /// For tracks with a single layer, this is `High`.
    pub quality: VideoQuality,
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second.
    #[serde(default)]
    pub bitrate: u32,
    /// Synchronization source identifier; zero when not yet assigned.
    #[serde(default)]
    pub ssrc: u32,
}

/// Metadata for one published track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub sid: TrackId,
    #[serde(rename = "type")]
    pub track_type: TrackType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub muted: bool,
    /// Original video width; unset for audio.
    #[serde(default)]
    pub width: u32,
    /// Original video height; unset for audio.
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub simulcast: bool,
    pub source: TrackSource,
    #[serde(default)]
    pub layers: Vec<VideoLayer>,
    #[serde(default)]
    pub mime_type: String,
}

/// What a participant is allowed to do in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantPermission {
    #[serde(default)]
    pub can_subscribe: bool,
    #[serde(default)]
    pub can_publish: bool,
    #[serde(default)]
    pub can_publish_data: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub recorder: bool,
}

/// A remote or local endpoint and the tracks it publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub sid: ParticipantId,
    #[serde(default)]
    pub identity: String,
    pub state: ParticipantState,
    #[serde(default)]
    pub tracks: Vec<TrackInfo>,
    #[serde(default)]
    pub metadata: String,
    /// Seconds since epoch when the participant joined.
    #[serde(default)]
    pub joined_at: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permission: ParticipantPermission,
    #[serde(default)]
    pub is_publisher: bool,
}

/// Server-side room descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Room {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub empty_timeout: u32,
    #[serde(default)]
    pub max_participants: u32,
    #[serde(default)]
    pub creation_time: i64,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub num_participants: u32,
    #[serde(default)]
    pub active_recording: bool,
}

/// Active-speaker entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerInfo {
    pub sid: ParticipantId,
    /// Audio level, 0.0 to 1.0.
    #[serde(default)]
    pub level: f32,
    #[serde(default)]
    pub active: bool,
}

/// Coarse connection quality rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionQuality {
    Poor,
    Good,
    Excellent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionQualityInfo {
    pub participant_sid: ParticipantId,
    pub quality: ConnectionQuality,
    #[serde(default)]
    pub score: f32,
}

/// Whether a subscribed stream is currently delivering data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    Active,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStateInfo {
    pub participant_sid: ParticipantId,
    pub track_sid: TrackId,
    pub state: StreamState,
}

/// A quality tier the server is (or is not) forwarding for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedQuality {
    pub quality: VideoQuality,
    pub enabled: bool,
}

/// A participant and a set of its track ids, as used in subscription
/// requests and lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantTracks {
    pub participant_sid: ParticipantId,
    pub track_sids: Vec<TrackId>,
}

/// Subscription permission granted to one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPermission {
    #[serde(default)]
    pub participant_sid: String,
    #[serde(default)]
    pub all_tracks: bool,
    #[serde(default)]
    pub track_sids: Vec<TrackId>,
    #[serde(default)]
    pub participant_identity: String,
}

/// Which peer connection a signaling payload is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalTarget {
    Publisher,
    Subscriber,
}

/// Why the server ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisconnectReason {
    UnknownReason,
    ClientInitiated,
    DuplicateIdentity,
    ServerShutdown,
    ParticipantRemoved,
    RoomDeleted,
    StateMismatch,
    JoinFailure,
}

/// An incrementally discovered connectivity candidate, relayed verbatim
/// between the media engine and the wire as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u32>,
}

/// Whether a session description is an offer or an answer.
///
/// The wire format reuses one message shape for both and distinguishes them
/// by the envelope tag; this field carries that distinction in the typed
/// model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }
}

/// A session description exchanged with the media engine.
///
/// The SDP body is opaque to this crate; it is relayed without
/// interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn participant_state_uses_protocol_names() {
        let json = serde_json::to_string(&ParticipantState::Disconnected).unwrap();
        assert_eq!(json, "\"DISCONNECTED\"");

        let state: ParticipantState = serde_json::from_str("\"ACTIVE\"").unwrap();
        assert_eq!(state, ParticipantState::Active);
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = ParticipantId::from("PA_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"PA_abc\"");
    }

    #[test]
    fn track_info_tolerates_missing_optional_fields() {
        let info: TrackInfo = serde_json::from_str(
            r#"{"sid": "TR_1", "type": "VIDEO", "source": "CAMERA"}"#,
        )
        .unwrap();
        assert_eq!(info.sid, TrackId::from("TR_1"));
        assert!(info.layers.is_empty());
        assert_eq!(info.width, 0);
    }

    #[test]
    fn candidate_init_uses_wire_field_names() {
        let init = IceCandidateInit {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.1 54321 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let json = serde_json::to_value(&init).unwrap();
        assert!(json.get("sdpMid").is_some());
        assert!(json.get("sdpMLineIndex").is_some());
    }

    #[test]
    fn sdp_kind_round_trips_lowercase() {
        assert_eq!(serde_json::to_string(&SdpKind::Offer).unwrap(), "\"offer\"");
        let kind: SdpKind = serde_json::from_str("\"answer\"").unwrap();
        assert_eq!(kind, SdpKind::Answer);
    }
}
