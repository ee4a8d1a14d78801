use crate::eq::{EqGains, EqPreset};
use crate::protocol::{DaemonState, PlaybackState, StationRecord, TrackInfo};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Read-mostly snapshot store shared by the servers.  Only the daemon core
/// writes playback fields; everything else reads clones.
pub struct StateManager {
    state: Arc<RwLock<DaemonState>>,
}

impl StateManager {
    pub fn new(stations: Vec<StationRecord>, volume: f32) -> Self {
        let state = DaemonState {
            rev: 1,
            stations,
            volume: volume.clamp(0.0, 1.0),
            ..Default::default()
        };

        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn get_state(&self) -> DaemonState {
        self.state.read().await.clone()
    }

    pub async fn station(&self, id: &str) -> Option<StationRecord> {
        self.state
            .read()
            .await
            .stations
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub async fn set_stations(&self, stations: Vec<StationRecord>) {
        let mut state = self.state.write().await;
        state.stations = stations;
        state.rev += 1;
    }

    pub async fn set_playback(&self, playback: PlaybackState) {
        let mut state = self.state.write().await;
        if state.playback.station_id() != playback.station_id() {
            state.track = TrackInfo::default(); // never show the previous station's text
        }
        state.playback = playback;
        state.rev += 1;
    }

    /// Store a poll result.  Results for a station that is no longer current
    /// are dropped; returns whether the snapshot changed.
    pub async fn set_track(&self, station_id: &str, track: TrackInfo) -> bool {
        let mut state = self.state.write().await;
        if state.playback.station_id() != Some(station_id) || state.track == track {
            return false;
        }
        state.track = track;
        state.rev += 1;
        true
    }

    pub async fn set_volume(&self, volume: f32) {
        let mut state = self.state.write().await;
        state.volume = volume.clamp(0.0, 1.0);
        state.rev += 1;
    }

    pub async fn set_eq(&self, preset: EqPreset, gains: EqGains) {
        let mut state = self.state.write().await;
        state.eq_preset = preset;
        state.eq_gains = gains;
        state.rev += 1;
    }

    pub async fn set_recovery_attempts(&self, attempts: u32) {
        let mut state = self.state.write().await;
        if state.recovery_attempts != attempts {
            state.recovery_attempts = attempts;
            state.rev += 1;
        }
    }

    /// Station after the current one in catalog order, wrapping around.
    pub async fn next_station(&self) -> Option<StationRecord> {
        self.neighbour(1).await
    }

    /// Station before the current one in catalog order, wrapping around.
    pub async fn prev_station(&self) -> Option<StationRecord> {
        self.neighbour(-1).await
    }

    async fn neighbour(&self, step: isize) -> Option<StationRecord> {
        let state = self.state.read().await;
        let len = state.stations.len();
        if len == 0 {
            return None;
        }
        let current = state
            .playback
            .station_id()
            .and_then(|id| state.stations.iter().position(|s| s.id == id));
        let idx = match current {
            Some(i) => (i as isize + step).rem_euclid(len as isize) as usize,
            None if step < 0 => len - 1,
            None => 0,
        };
        state.stations.get(idx).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str) -> StationRecord {
        StationRecord {
            id: id.to_string(),
            name: id.to_uppercase(),
            stream_url: format!("http://stream.test/{id}"),
            icon_url: format!("http://stream.test/{id}.png"),
            ..Default::default()
        }
    }

    fn manager() -> StateManager {
        StateManager::new(vec![station("a"), station("b"), station("c")], 0.5)
    }

    #[tokio::test]
    async fn test_next_prev_wrap_around() {
        let sm = manager();
        assert_eq!(sm.next_station().await.unwrap().id, "a");
        assert_eq!(sm.prev_station().await.unwrap().id, "c");

        sm.set_playback(PlaybackState::Playing {
            station: station("c"),
        })
        .await;
        assert_eq!(sm.next_station().await.unwrap().id, "a");
        assert_eq!(sm.prev_station().await.unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_track_for_other_station_is_dropped() {
        let sm = manager();
        sm.set_playback(PlaybackState::Loading {
            station: station("a"),
        })
        .await;
        let info = TrackInfo {
            current: Some("Song".into()),
            ..Default::default()
        };
        assert!(!sm.set_track("b", info.clone()).await);
        assert!(sm.set_track("a", info.clone()).await);
        assert!(!sm.set_track("a", info).await, "unchanged track is not a new revision");
    }

    #[tokio::test]
    async fn test_station_switch_clears_track() {
        let sm = manager();
        sm.set_playback(PlaybackState::Playing {
            station: station("a"),
        })
        .await;
        sm.set_track(
            "a",
            TrackInfo {
                program: Some("Morning".into()),
                ..Default::default()
            },
        )
        .await;
        sm.set_playback(PlaybackState::Loading {
            station: station("b"),
        })
        .await;
        assert!(sm.get_state().await.track.is_empty());
    }

    #[tokio::test]
    async fn test_rev_increments() {
        let sm = manager();
        let before = sm.get_state().await.rev;
        sm.set_volume(2.0).await;
        let state = sm.get_state().await;
        assert_eq!(state.rev, before + 1);
        assert_eq!(state.volume, 1.0);
    }
}
