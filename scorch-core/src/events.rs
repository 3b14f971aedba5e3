//! Playback status events published by the engine.
//!
//! The observer contract is "notified synchronously on every play/pause
//! transition": the broadcast send happens inside the transition, before
//! the transport method returns. UI layers subscribe and mirror `playing`
//! into their own state (icon toggling and the like).

use serde::{Deserialize, Serialize};

/// Transport state of a playback session.
///
/// A single tagged state — not separate `is_playing`/`is_paused` booleans,
/// which allow impossible combinations like "paused but never started".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No chunks scheduled, nothing audible. Entered on construction and
    /// after `reset()`.
    Idle,
    /// Chunks are scheduled onto the device clock as they arrive.
    Playing,
    /// Chunks keep accumulating but are not scheduled; audio already
    /// handed to the device finishes naturally.
    Paused,
}

impl PlaybackState {
    pub fn is_playing(self) -> bool {
        self == PlaybackState::Playing
    }
}

/// Emitted on every play/pause transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatusEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Whether audio is audibly progressing after this transition.
    pub playing: bool,
    /// The state entered by the transition.
    pub state: PlaybackState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_camel_case_and_lowercase_state() {
        let event = PlaybackStatusEvent {
            seq: 4,
            playing: true,
            state: PlaybackState::Playing,
        };

        let json = serde_json::to_value(event).expect("serialize status event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["playing"], true);
        assert_eq!(json["state"], "playing");

        let round_trip: PlaybackStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.seq, 4);
        assert_eq!(round_trip.state, PlaybackState::Playing);
    }

    #[test]
    fn playback_state_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<PlaybackState>(r#""Paused""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }
}
