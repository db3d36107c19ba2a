//! Wire codec for signaling frames.
//!
//! A frame is a binary websocket message holding a JSON envelope:
//!
//! ```json
//! {"kind": "trickle", "payload": {"candidateInit": "...", "target": "SUBSCRIBER"}}
//! ```
//!
//! [`encode`] and [`decode`] are inverse on every representable
//! [`Message`], including [`Message::Unrecognized`], whose original tag
//! and payload are re-emitted verbatim.

use crate::message::{
    AddTrackRequest, ConnectionQualityUpdate, JoinResponse, LeaveRequest, Message, MessageKind,
    MuteTrackRequest, ParticipantUpdate, RoomUpdate, SpeakersChanged, StreamStateUpdate,
    SubscribedQualityUpdate, SubscriptionPermission, SubscriptionPermissionUpdate, SyncState,
    TrackPublishedResponse, TrackUnpublishedResponse, TrickleRequest, UpdateSubscription,
    UpdateTrackSettings, UpdateVideoLayers,
};
use crate::types::{SdpKind, SessionDescription};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Codec failures. Neither direction panics on bad input.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame is not a well-formed envelope, or a known kind's payload
    /// does not match its schema.
    #[error("malformed signaling message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    /// The tag does not name a kind this client knows.
    ///
    /// [`decode`] never returns this; it maps unknown tags to
    /// [`Message::Unrecognized`] instead. Strict lookups via
    /// [`MessageKind::from_tag`] do.
    #[error("unknown message kind: {0}")]
    UnknownMessageKind(String),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    kind: String,
    payload: Value,
}

/// Encode a message into a wire frame.
///
/// # Errors
///
/// Returns [`CodecError::MalformedMessage`] if serialization fails.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let payload = match message {
        Message::SessionDescription(desc) => serde_json::to_value(desc)?,
        Message::Trickle(req) => serde_json::to_value(req)?,
        Message::AddTrack(req) => serde_json::to_value(req)?,
        Message::Subscription(req) => serde_json::to_value(req)?,
        Message::TrackSetting(req) => serde_json::to_value(req)?,
        Message::UpdateLayers(req) => serde_json::to_value(req)?,
        Message::SubscriptionPermission(req) => serde_json::to_value(req)?,
        Message::SyncState(state) => serde_json::to_value(state)?,
        Message::Ping(timestamp) | Message::Pong(timestamp) => Value::from(*timestamp),
        Message::Leave(req) => serde_json::to_value(req)?,
        Message::Join(resp) => serde_json::to_value(resp)?,
        Message::Update(update) => serde_json::to_value(update)?,
        Message::TrackPublished(resp) => serde_json::to_value(resp)?,
        Message::TrackUnpublished(resp) => serde_json::to_value(resp)?,
        Message::Mute(req) => serde_json::to_value(req)?,
        Message::SpeakersChanged(update) => serde_json::to_value(update)?,
        Message::RoomUpdate(update) => serde_json::to_value(update)?,
        Message::ConnectionQuality(update) => serde_json::to_value(update)?,
        Message::StreamStateUpdate(update) => serde_json::to_value(update)?,
        Message::SubscribedQualityUpdate(update) => serde_json::to_value(update)?,
        Message::SubscriptionPermissionUpdate(update) => serde_json::to_value(update)?,
        Message::RefreshToken(token) => Value::from(token.as_str()),
        Message::Unrecognized { payload, .. } => payload.clone(),
    };
    let envelope = Envelope {
        kind: message.tag().to_string(),
        payload,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decode a wire frame into a message.
///
/// Unknown tags decode to [`Message::Unrecognized`] rather than an error,
/// so server-side protocol additions cannot take the client down.
///
/// # Errors
///
/// Returns [`CodecError::MalformedMessage`] when the frame is not a valid
/// envelope or a known kind's payload does not deserialize.
pub fn decode(frame: &[u8]) -> Result<Message, CodecError> {
    let Envelope { kind, payload } = serde_json::from_slice(frame)?;
    let known = match MessageKind::from_tag(&kind) {
        Ok(known) => known,
        Err(_) => return Ok(Message::Unrecognized { kind, payload }),
    };
    let message = match known {
        MessageKind::Offer | MessageKind::Answer => {
            let mut desc: SessionDescription = serde_json::from_value(payload)?;
            // The envelope tag is authoritative; a payload whose embedded
            // type field disagrees is routed by the tag.
            desc.kind = match known {
                MessageKind::Offer => SdpKind::Offer,
                _ => SdpKind::Answer,
            };
            Message::SessionDescription(desc)
        }
        MessageKind::Trickle => Message::Trickle(from_payload::<TrickleRequest>(payload)?),
        MessageKind::AddTrack => Message::AddTrack(from_payload::<AddTrackRequest>(payload)?),
        MessageKind::Subscription => {
            Message::Subscription(from_payload::<UpdateSubscription>(payload)?)
        }
        MessageKind::TrackSetting => {
            Message::TrackSetting(from_payload::<UpdateTrackSettings>(payload)?)
        }
        MessageKind::UpdateLayers => {
            Message::UpdateLayers(from_payload::<UpdateVideoLayers>(payload)?)
        }
        MessageKind::SubscriptionPermission => {
            Message::SubscriptionPermission(from_payload::<SubscriptionPermission>(payload)?)
        }
        MessageKind::SyncState => Message::SyncState(Box::new(from_payload::<SyncState>(payload)?)),
        MessageKind::Ping => Message::Ping(from_payload::<u64>(payload)?),
        MessageKind::Leave => Message::Leave(from_payload::<LeaveRequest>(payload)?),
        MessageKind::Join => Message::Join(Box::new(from_payload::<JoinResponse>(payload)?)),
        MessageKind::Update => Message::Update(from_payload::<ParticipantUpdate>(payload)?),
        MessageKind::TrackPublished => {
            Message::TrackPublished(from_payload::<TrackPublishedResponse>(payload)?)
        }
        MessageKind::TrackUnpublished => {
            Message::TrackUnpublished(from_payload::<TrackUnpublishedResponse>(payload)?)
        }
        MessageKind::Mute => Message::Mute(from_payload::<MuteTrackRequest>(payload)?),
        MessageKind::SpeakersChanged => {
            Message::SpeakersChanged(from_payload::<SpeakersChanged>(payload)?)
        }
        MessageKind::RoomUpdate => Message::RoomUpdate(from_payload::<RoomUpdate>(payload)?),
        MessageKind::ConnectionQuality => {
            Message::ConnectionQuality(from_payload::<ConnectionQualityUpdate>(payload)?)
        }
        MessageKind::StreamStateUpdate => {
            Message::StreamStateUpdate(from_payload::<StreamStateUpdate>(payload)?)
        }
        MessageKind::SubscribedQualityUpdate => {
            Message::SubscribedQualityUpdate(from_payload::<SubscribedQualityUpdate>(payload)?)
        }
        MessageKind::SubscriptionPermissionUpdate => {
            Message::SubscriptionPermissionUpdate(from_payload::<SubscriptionPermissionUpdate>(
                payload,
            )?)
        }
        MessageKind::RefreshToken => Message::RefreshToken(from_payload::<String>(payload)?),
        MessageKind::Pong => Message::Pong(from_payload::<u64>(payload)?),
        // from_tag never yields this bucket.
        MessageKind::Unrecognized => Message::Unrecognized { kind, payload },
    };
    Ok(message)
}

fn from_payload<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, CodecError> {
    Ok(serde_json::from_value(payload)?)
}
