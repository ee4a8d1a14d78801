//! Media-session adapter: what an OS "now playing" surface shows, and how its
//! transport buttons map onto daemon commands.

use serde::{Deserialize, Serialize};

use airwave_proto::protocol::{Command, DaemonState, PlaybackState};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    pub title: String,
    pub artist: String,
    pub artwork: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionAction {
    Play,
    Pause,
    Next,
    Previous,
}

impl SessionAction {
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug.to_ascii_lowercase().as_str() {
            "play" => Some(Self::Play),
            "pause" => Some(Self::Pause),
            "next" | "nexttrack" => Some(Self::Next),
            "previous" | "prev" | "previoustrack" => Some(Self::Previous),
            _ => None,
        }
    }

    /// The command this button press means in the current state, if any.
    pub fn to_command(self, playback: &PlaybackState) -> Option<Command> {
        match (self, playback) {
            (SessionAction::Play, PlaybackState::Idle) => Some(Command::Next),
            (SessionAction::Play, PlaybackState::Error { station: None, .. }) => Some(Command::Next),
            (SessionAction::Play, PlaybackState::Paused { .. } | PlaybackState::Error { .. }) => {
                Some(Command::TogglePause)
            }
            (SessionAction::Play, _) => None,
            (SessionAction::Pause, PlaybackState::Playing { .. }) => Some(Command::TogglePause),
            (SessionAction::Pause, _) => None,
            (SessionAction::Next, _) => Some(Command::Next),
            (SessionAction::Previous, _) => Some(Command::Prev),
        }
    }
}

/// Title prefers the live track, then the program, then the station name.
pub fn metadata(state: &DaemonState) -> Option<SessionMetadata> {
    let station = state.playback.station()?;
    let title = state
        .track
        .current
        .clone()
        .or_else(|| state.track.program.clone())
        .unwrap_or_else(|| station.name.clone());
    Some(SessionMetadata {
        title,
        artist: station.name.clone(),
        artwork: station.icon_url.clone(),
    })
}
