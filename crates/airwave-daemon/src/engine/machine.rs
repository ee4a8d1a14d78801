//! Playback state transitions.  Pure: the machine only says what the engine
//! should do next, it never touches the media backend itself.

use airwave_proto::protocol::{PlaybackState, StationRecord};

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// (Re)acquire the stream for this station.
    Load(StationRecord),
    Pause,
}

#[derive(Debug, Default)]
pub struct PlaybackMachine {
    state: PlaybackState,
}

impl PlaybackMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// User picked `station`.  The current station toggles; anything else
    /// starts loading.
    pub fn select(&mut self, station: StationRecord) -> Effect {
        let same = self.state.station_id() == Some(station.id.as_str());
        match (&self.state, same) {
            (PlaybackState::Playing { station }, true) => {
                self.state = PlaybackState::Paused {
                    station: station.clone(),
                };
                Effect::Pause
            }
            (PlaybackState::Loading { .. }, true) => Effect::None,
            _ => {
                self.state = PlaybackState::Loading {
                    station: station.clone(),
                };
                Effect::Load(station)
            }
        }
    }

    /// Re-select whatever station is current.  No-op when idle without an
    /// errored station to go back to.
    pub fn toggle(&mut self) -> Effect {
        match self.state.station().cloned() {
            Some(station) => self.select(station),
            None => Effect::None,
        }
    }

    /// Returns true when this moved the machine into PLAYING.
    pub fn stream_ready(&mut self) -> bool {
        match &self.state {
            PlaybackState::Loading { station } | PlaybackState::Paused { station } => {
                self.state = PlaybackState::Playing {
                    station: station.clone(),
                };
                true
            }
            _ => false,
        }
    }

    pub fn stream_paused(&mut self) -> bool {
        match &self.state {
            PlaybackState::Playing { station } => {
                self.state = PlaybackState::Paused {
                    station: station.clone(),
                };
                true
            }
            // LOADING ignores pause reports from the source swap
            _ => false,
        }
    }

    pub fn stream_error(&mut self, message: impl Into<String>) {
        self.state = PlaybackState::Error {
            station: self.state.station().cloned(),
            message: message.into(),
        };
    }

    pub fn stop(&mut self) {
        self.state = PlaybackState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str) -> StationRecord {
        StationRecord {
            id: id.to_string(),
            name: id.to_uppercase(),
            stream_url: format!("http://s.test/{id}"),
            icon_url: "http://s.test/i.png".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_same_station_toggles_through_loading() {
        let mut m = PlaybackMachine::new();
        assert_eq!(m.select(station("a")), Effect::Load(station("a")));
        assert!(m.stream_ready());
        assert!(m.state().is_playing());

        assert_eq!(m.select(station("a")), Effect::Pause);
        assert_eq!(m.state().label(), "PAUSED");

        assert_eq!(m.select(station("a")), Effect::Load(station("a")));
        assert_eq!(m.state().label(), "LOADING");
        assert!(m.stream_ready());
        assert_eq!(m.state().label(), "PLAYING");
    }

    #[test]
    fn test_reselect_while_loading_is_noop() {
        let mut m = PlaybackMachine::new();
        m.select(station("a"));
        assert_eq!(m.select(station("a")), Effect::None);
        assert_eq!(m.state().label(), "LOADING");
    }

    #[test]
    fn test_different_station_clears_error() {
        let mut m = PlaybackMachine::new();
        m.select(station("a"));
        m.stream_ready();
        m.stream_error("boom");
        assert_eq!(m.state().error_message(), Some("boom"));
        assert_eq!(m.state().station_id(), Some("a"));

        assert_eq!(m.select(station("b")), Effect::Load(station("b")));
        assert_eq!(
            m.state(),
            &PlaybackState::Loading {
                station: station("b")
            }
        );
    }

    #[test]
    fn test_different_station_while_playing_loads() {
        let mut m = PlaybackMachine::new();
        m.select(station("a"));
        m.stream_ready();
        assert_eq!(m.select(station("b")), Effect::Load(station("b")));
        assert_eq!(m.state().station_id(), Some("b"));
    }

    #[test]
    fn test_error_needs_user_action() {
        let mut m = PlaybackMachine::new();
        m.select(station("a"));
        m.stream_error("gone");
        assert!(!m.stream_ready());
        assert_eq!(m.state().label(), "ERROR");
        assert_eq!(m.toggle(), Effect::Load(station("a")));
    }

    #[test]
    fn test_pause_ignored_while_loading() {
        let mut m = PlaybackMachine::new();
        m.select(station("a"));
        assert!(!m.stream_paused());
        assert_eq!(m.state().label(), "LOADING");
        m.stream_ready();
        assert!(m.stream_paused());
        assert_eq!(m.state().label(), "PAUSED");
        // backend resuming on its own goes straight back
        assert!(m.stream_ready());
    }

    #[test]
    fn test_toggle_when_idle_does_nothing() {
        let mut m = PlaybackMachine::new();
        assert_eq!(m.toggle(), Effect::None);
        m.stream_error("no backend");
        assert_eq!(m.state().station(), None);
        assert_eq!(m.toggle(), Effect::None);
    }
}
