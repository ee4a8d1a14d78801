use serde::{Deserialize, Serialize};

use crate::eq::{EqGains, EqPreset};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client (UI, media-session adapter) to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Select a station.  Selecting the current station toggles pause.
    Play { station_id: String },
    TogglePause,
    Stop,
    Next,
    Prev,
    Volume { value: f32 },
    SetEqPreset { preset: EqPreset },
    SetCustomEq { bass: f32, mid: f32, treble: f32 },
    /// Re-run the catalog builder and replace the station list.
    RefreshCatalog,
    GetState,
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: daemon version + full state snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: DaemonState,
    },
    State {
        data: DaemonState,
    },
    /// Fresh now-playing snapshot for the current station.
    Track {
        station_id: String,
        info: TrackInfo,
    },
    /// Frequency magnitudes, one byte per band, low to high.
    Spectrum {
        bins: Vec<u8>,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// A canonicalized station.  Never mutated after the catalog is built.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StationRecord {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    pub icon_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub codec: String,
    /// kbps, 0 when unknown
    #[serde(default)]
    pub bitrate: u32,
}

/// One poll cycle's worth of now-playing text.  Replaced wholesale on every
/// cycle.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub program: Option<String>,
    pub current: Option<String>,
    pub next: Option<String>,
}

impl TrackInfo {
    pub fn is_empty(&self) -> bool {
        self.program.is_none() && self.current.is_none() && self.next.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(tag = "status")]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading {
        station: StationRecord,
    },
    Playing {
        station: StationRecord,
    },
    Paused {
        station: StationRecord,
    },
    /// `station` is absent only when an error arrives before anything was
    /// ever selected.
    Error {
        station: Option<StationRecord>,
        message: String,
    },
}

impl PlaybackState {
    pub fn station(&self) -> Option<&StationRecord> {
        match self {
            PlaybackState::Idle => None,
            PlaybackState::Loading { station }
            | PlaybackState::Playing { station }
            | PlaybackState::Paused { station } => Some(station),
            PlaybackState::Error { station, .. } => station.as_ref(),
        }
    }

    pub fn station_id(&self) -> Option<&str> {
        self.station().map(|s| s.id.as_str())
    }

    /// Short label for logs and status badges.
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "IDLE",
            PlaybackState::Loading { .. } => "LOADING",
            PlaybackState::Playing { .. } => "PLAYING",
            PlaybackState::Paused { .. } => "PAUSED",
            PlaybackState::Error { .. } => "ERROR",
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            PlaybackState::Error { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Full state of the daemon.  `rev` is a monotonically increasing counter
/// incremented every time the state changes.  Clients can use it to detect
/// missed updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonState {
    #[serde(default)]
    pub rev: u64,
    pub stations: Vec<StationRecord>,
    pub playback: PlaybackState,
    #[serde(default)]
    pub track: TrackInfo,
    pub volume: f32,
    #[serde(default)]
    pub eq_preset: EqPreset,
    #[serde(default)]
    pub eq_gains: EqGains,
    /// Stall recoveries issued since the last confirmed heartbeat.
    #[serde(default)]
    pub recovery_attempts: u32,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str) -> StationRecord {
        StationRecord {
            id: id.to_string(),
            name: format!("Station {id}"),
            stream_url: "http://example.test/live".to_string(),
            icon_url: "http://example.test/icon.png".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_play_command_roundtrip() {
        let msg = Message::Command(Command::Play {
            station_id: "kan-bet".to_string(),
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Play { station_id }) => assert_eq!(station_id, "kan-bet"),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let encoded = Message::Command(Command::Stop).encode().unwrap();
        assert!(Message::decode(&encoded[..2]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_hello_carries_error_state() {
        let state = DaemonState {
            rev: 42,
            playback: PlaybackState::Error {
                station: Some(station("a")),
                message: "stream unavailable".to_string(),
            },
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            daemon_rev: 42,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                daemon_rev,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(daemon_rev, 42);
                assert_eq!(state.playback.label(), "ERROR");
                assert_eq!(state.playback.station_id(), Some("a"));
                assert_eq!(state.playback.error_message(), Some("stream unavailable"));
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_idle_has_no_station() {
        assert!(PlaybackState::Idle.station().is_none());
        let playing = PlaybackState::Playing {
            station: station("b"),
        };
        assert!(playing.is_playing());
        assert_eq!(playing.station_id(), Some("b"));
    }
}
