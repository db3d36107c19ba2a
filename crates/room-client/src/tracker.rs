//! Participant and track bookkeeping for one session.
//!
//! The tracker holds two views of the same facts: participant to owned
//! tracks, and track to owning participant. Both are mutated as a unit, so
//! a track id is in the reverse map exactly when it is listed under exactly
//! one participant in the forward map.
//!
//! Every mutation emits one [`TrackerEvent`] on an unbounded channel. The
//! session mutates the tracker only from its inbound dispatch task.

use signal_proto::types::{ParticipantId, ParticipantTracks, TrackId};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc;
use tracing::warn;

/// One observed change to room membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    ParticipantAdded(ParticipantId),
    ParticipantRemoved(ParticipantId),
    TrackAdded {
        participant: ParticipantId,
        track: TrackId,
    },
    TrackRemoved {
        participant: ParticipantId,
        track: TrackId,
    },
}

/// Who is in the room and what they publish.
pub struct Tracker {
    tracks_by_participant: HashMap<ParticipantId, BTreeSet<TrackId>>,
    participant_by_track: HashMap<TrackId, ParticipantId>,
    events: mpsc::UnboundedSender<TrackerEvent>,
}

impl Tracker {
    /// Create a tracker and the receiver for its change events.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Tracker {
                tracks_by_participant: HashMap::new(),
                participant_by_track: HashMap::new(),
                events,
            },
            receiver,
        )
    }

    fn emit(&self, event: TrackerEvent) {
        // Receiver dropped means nobody is watching; bookkeeping continues.
        let _ = self.events.send(event);
    }

    /// Add a participant with no tracks. Idempotent.
    pub fn add_participant(&mut self, participant: &ParticipantId) -> bool {
        if self.tracks_by_participant.contains_key(participant) {
            return false;
        }
        self.tracks_by_participant
            .insert(participant.clone(), BTreeSet::new());
        self.emit(TrackerEvent::ParticipantAdded(participant.clone()));
        true
    }

    /// Record a track under a participant, adding the participant first if
    /// unknown. Idempotent for a re-announced track; a track already owned
    /// by a different participant is refused.
    pub fn add_track(&mut self, participant: &ParticipantId, track: &TrackId) -> bool {
        if let Some(owner) = self.participant_by_track.get(track) {
            if owner != participant {
                warn!(
                    target: "signal.tracker",
                    %track,
                    %owner,
                    claimed_by = %participant,
                    "refusing to move track between participants"
                );
            }
            return false;
        }
        self.add_participant(participant);
        if let Some(tracks) = self.tracks_by_participant.get_mut(participant) {
            tracks.insert(track.clone());
        }
        self.participant_by_track
            .insert(track.clone(), participant.clone());
        self.emit(TrackerEvent::TrackAdded {
            participant: participant.clone(),
            track: track.clone(),
        });
        true
    }

    /// Forget a track. The owning participant stays, possibly trackless.
    pub fn remove_track(&mut self, track: &TrackId) -> bool {
        let Some(owner) = self.participant_by_track.remove(track) else {
            return false;
        };
        if let Some(tracks) = self.tracks_by_participant.get_mut(&owner) {
            tracks.remove(track);
        }
        self.emit(TrackerEvent::TrackRemoved {
            participant: owner,
            track: track.clone(),
        });
        true
    }

    /// Forget a participant: one `TrackRemoved` per owned track, then one
    /// `ParticipantRemoved`.
    pub fn remove_participant(&mut self, participant: &ParticipantId) -> bool {
        let Some(tracks) = self.tracks_by_participant.remove(participant) else {
            return false;
        };
        for track in tracks {
            self.participant_by_track.remove(&track);
            self.emit(TrackerEvent::TrackRemoved {
                participant: participant.clone(),
                track,
            });
        }
        self.emit(TrackerEvent::ParticipantRemoved(participant.clone()));
        true
    }

    /// Tracks currently owned by a participant, in id order.
    #[must_use]
    pub fn tracks_of(&self, participant: &ParticipantId) -> Vec<TrackId> {
        self.tracks_by_participant
            .get(participant)
            .map(|tracks| tracks.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The participant owning a track, if known.
    #[must_use]
    pub fn owner_of(&self, track: &TrackId) -> Option<&ParticipantId> {
        self.participant_by_track.get(track)
    }

    /// The owner of a track together with all its sibling tracks, shaped
    /// for an unsubscription request.
    #[must_use]
    pub fn participant_tracks(&self, track: &TrackId) -> Option<ParticipantTracks> {
        let owner = self.participant_by_track.get(track)?;
        Some(ParticipantTracks {
            participant_sid: owner.clone(),
            track_sids: self.tracks_of(owner),
        })
    }

    /// All known participants, in id order.
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.tracks_by_participant.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.tracks_by_participant.contains_key(participant)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn drain(receiver: &mut mpsc::UnboundedReceiver<TrackerEvent>) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_add_track_implicitly_adds_participant() {
        let (mut tracker, mut events) = Tracker::new();

        assert!(tracker.add_track(&"PA_1".into(), &"TR_a".into()));

        assert!(tracker.contains(&"PA_1".into()));
        assert_eq!(tracker.owner_of(&"TR_a".into()), Some(&"PA_1".into()));
        assert_eq!(
            drain(&mut events),
            vec![
                TrackerEvent::ParticipantAdded("PA_1".into()),
                TrackerEvent::TrackAdded {
                    participant: "PA_1".into(),
                    track: "TR_a".into()
                },
            ]
        );
    }

    #[test]
    fn test_readded_track_is_a_no_op() {
        let (mut tracker, mut events) = Tracker::new();
        tracker.add_track(&"PA_1".into(), &"TR_a".into());
        drain(&mut events);

        assert!(!tracker.add_track(&"PA_1".into(), &"TR_a".into()));

        assert!(drain(&mut events).is_empty());
        assert_eq!(tracker.tracks_of(&"PA_1".into()), vec![TrackId::from("TR_a")]);
    }

    #[test]
    fn test_track_cannot_move_between_participants() {
        let (mut tracker, mut events) = Tracker::new();
        tracker.add_track(&"PA_1".into(), &"TR_a".into());
        drain(&mut events);

        assert!(!tracker.add_track(&"PA_2".into(), &"TR_a".into()));

        assert_eq!(tracker.owner_of(&"TR_a".into()), Some(&"PA_1".into()));
        assert!(!tracker.contains(&"PA_2".into()));
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn test_remove_participant_emits_tracks_first() {
        let (mut tracker, mut events) = Tracker::new();
        tracker.add_track(&"PA_1".into(), &"TR_b".into());
        tracker.add_track(&"PA_1".into(), &"TR_a".into());
        drain(&mut events);

        assert!(tracker.remove_participant(&"PA_1".into()));

        assert_eq!(
            drain(&mut events),
            vec![
                TrackerEvent::TrackRemoved {
                    participant: "PA_1".into(),
                    track: "TR_a".into()
                },
                TrackerEvent::TrackRemoved {
                    participant: "PA_1".into(),
                    track: "TR_b".into()
                },
                TrackerEvent::ParticipantRemoved("PA_1".into()),
            ]
        );
        assert_eq!(tracker.owner_of(&"TR_a".into()), None);
        assert_eq!(tracker.owner_of(&"TR_b".into()), None);
    }

    #[test]
    fn test_removal_is_isolated_to_one_participant() {
        let (mut tracker, mut events) = Tracker::new();
        tracker.add_track(&"PA_1".into(), &"TR_a".into());
        tracker.add_track(&"PA_2".into(), &"TR_b".into());
        drain(&mut events);

        tracker.remove_participant(&"PA_1".into());

        assert!(tracker.contains(&"PA_2".into()));
        assert_eq!(tracker.owner_of(&"TR_b".into()), Some(&"PA_2".into()));
        assert_eq!(tracker.participants(), vec![ParticipantId::from("PA_2")]);
    }

    #[test]
    fn test_remove_track_keeps_participant() {
        let (mut tracker, mut events) = Tracker::new();
        tracker.add_track(&"PA_1".into(), &"TR_a".into());
        drain(&mut events);

        assert!(tracker.remove_track(&"TR_a".into()));

        assert!(tracker.contains(&"PA_1".into()));
        assert!(tracker.tracks_of(&"PA_1".into()).is_empty());
        assert_eq!(
            drain(&mut events),
            vec![TrackerEvent::TrackRemoved {
                participant: "PA_1".into(),
                track: "TR_a".into()
            }]
        );
    }

    #[test]
    fn test_participant_tracks_includes_siblings() {
        let (mut tracker, _events) = Tracker::new();
        tracker.add_track(&"PA_1".into(), &"TR_video".into());
        tracker.add_track(&"PA_1".into(), &"TR_audio".into());

        let lookup = tracker.participant_tracks(&"TR_video".into()).unwrap();

        assert_eq!(lookup.participant_sid, "PA_1".into());
        assert_eq!(
            lookup.track_sids,
            vec![TrackId::from("TR_audio"), TrackId::from("TR_video")]
        );
    }

    #[test]
    fn test_forward_and_reverse_maps_stay_consistent() {
        let (mut tracker, _events) = Tracker::new();
        tracker.add_track(&"PA_1".into(), &"TR_a".into());
        tracker.add_track(&"PA_1".into(), &"TR_b".into());
        tracker.add_track(&"PA_2".into(), &"TR_c".into());
        tracker.remove_track(&"TR_b".into());
        tracker.remove_participant(&"PA_2".into());

        for participant in tracker.participants() {
            for track in tracker.tracks_of(&participant) {
                assert_eq!(tracker.owner_of(&track), Some(&participant));
            }
        }
        assert_eq!(tracker.owner_of(&"TR_b".into()), None);
        assert_eq!(tracker.owner_of(&"TR_c".into()), None);
    }
}
