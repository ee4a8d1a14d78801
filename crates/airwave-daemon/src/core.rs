/// DaemonCore: single-owner event loop for all mutable state.
///
/// Client commands, media signals, watchdog ticks and poll results all
/// arrive as `DaemonEvent`s.  DaemonCore owns the `PlaybackEngine` and the
/// `MetadataPoller` exclusively; after each event it mirrors the engine's
/// state into the shared `StateManager` and broadcasts what changed.
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use airwave_proto::config::Config;
use airwave_proto::eq::{EqGains, EqPreset};
use airwave_proto::protocol::{Command, PlaybackState, StationRecord};
use airwave_proto::state::StateManager;

use crate::catalog::CatalogBuilder;
use crate::engine::{MediaBackend, MediaSignal, PlaybackEngine};
use crate::metadata::{MetadataPoller, TrackUpdate};
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// Something the media backend observed.
    Media(MediaSignal),
    /// Periodic stall / liveness / connect-timeout check.
    WatchdogTick,
    TrackUpdated(TrackUpdate),
    /// Result of a background catalog rebuild.
    CatalogRefreshed(Vec<StationRecord>),
    Shutdown,
}

/// Pipe a side channel into the core's event channel.
pub fn forward<T, F>(
    mut rx: mpsc::Receiver<T>,
    event_tx: mpsc::Sender<DaemonEvent>,
    wrap: F,
) -> tokio::task::JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(T) -> DaemonEvent + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            if event_tx.send(wrap(item)).await.is_err() {
                break;
            }
        }
    })
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore<B: MediaBackend> {
    config: Config,
    state_manager: Arc<StateManager>,
    engine: PlaybackEngine<B>,
    poller: MetadataPoller,
    catalog: Arc<CatalogBuilder>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// Gains behind the `custom` preset.
    custom_eq: EqGains,
    /// Last playback state mirrored into the snapshot store.
    last_playback: PlaybackState,
    last_attempts: u32,
    refresh_in_flight: bool,
}

impl<B: MediaBackend + 'static> DaemonCore<B> {
    pub fn new(
        config: Config,
        state_manager: Arc<StateManager>,
        engine: PlaybackEngine<B>,
        poller: MetadataPoller,
        catalog: Arc<CatalogBuilder>,
        event_tx: mpsc::Sender<DaemonEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let custom_eq = config.playback.custom_eq.clamped();
        Self {
            config,
            state_manager,
            engine,
            poller,
            catalog,
            event_tx,
            broadcast_tx,
            custom_eq,
            last_playback: PlaybackState::Idle,
            last_attempts: 0,
            refresh_in_flight: false,
        }
    }

    /// Borrow the state manager (for use by the servers).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the core event loop.  Returns on `Shutdown` or when every sender
    /// is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        let preset = self.config.playback.eq_preset;
        self.state_manager
            .set_eq(preset, preset.gains(self.custom_eq))
            .await;

        let ticker = self.spawn_ticker();

        loop {
            let evt = event_rx.recv().await;
            match evt {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }

                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }

                Some(DaemonEvent::ClientCommand(cmd)) => {
                    info!("DaemonCore: command {:?}", cmd);
                    self.handle_command(cmd).await;
                }

                Some(DaemonEvent::Media(signal)) => {
                    debug!("DaemonCore: media signal {:?}", signal);
                    self.engine.on_media(signal, Instant::now()).await;
                }

                Some(DaemonEvent::WatchdogTick) => {
                    self.engine.on_tick(Instant::now()).await;
                }

                Some(DaemonEvent::TrackUpdated(update)) => {
                    self.handle_track(update).await;
                }

                Some(DaemonEvent::CatalogRefreshed(stations)) => {
                    self.handle_catalog(stations).await;
                }
            }

            self.sync().await;
        }

        ticker.abort();
        self.cleanup().await;
        Ok(())
    }

    fn spawn_ticker(&self) -> AbortHandle {
        let tx = self.event_tx.clone();
        let period = self.config.playback.watchdog_interval();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick is immediate
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(DaemonEvent::WatchdogTick).await.is_err() {
                    break;
                }
            }
        });
        task.abort_handle()
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        let now = Instant::now();
        match cmd {
            Command::Play { station_id } => match self.state_manager.station(&station_id).await {
                Some(station) => self.engine.select(station, now).await,
                None => {
                    warn!("DaemonCore: unknown station {}", station_id);
                    let _ = self
                        .broadcast_tx
                        .send(BroadcastMessage::Error(format!("unknown station {station_id}")));
                }
            },
            Command::TogglePause => self.engine.toggle(now).await,
            Command::Stop => self.engine.stop().await,
            Command::Next => {
                if let Some(station) = self.state_manager.next_station().await {
                    self.engine.select(station, now).await;
                }
            }
            Command::Prev => {
                if let Some(station) = self.state_manager.prev_station().await {
                    self.engine.select(station, now).await;
                }
            }
            Command::Volume { value } => {
                let value = value.clamp(0.0, 1.0);
                self.engine.set_volume(value).await;
                self.state_manager.set_volume(value).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            Command::SetEqPreset { preset } => self.apply_eq(preset).await,
            Command::SetCustomEq { bass, mid, treble } => {
                self.custom_eq = EqGains::new(bass, mid, treble).clamped();
                self.apply_eq(EqPreset::Custom).await;
            }
            Command::RefreshCatalog => self.refresh_catalog(),
            Command::GetState => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
        }
    }

    async fn apply_eq(&mut self, preset: EqPreset) {
        let gains = preset.gains(self.custom_eq);
        info!("DaemonCore: eq {} {:?}", preset.slug(), gains);
        self.engine.set_eq(gains).await;
        self.state_manager.set_eq(preset, gains).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    fn refresh_catalog(&mut self) {
        if self.refresh_in_flight {
            debug!("DaemonCore: catalog refresh already running");
            return;
        }
        self.refresh_in_flight = true;
        let catalog = Arc::clone(&self.catalog);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let stations = catalog.build().await;
            let _ = tx.send(DaemonEvent::CatalogRefreshed(stations)).await;
        });
    }

    async fn handle_catalog(&mut self, stations: Vec<StationRecord>) {
        self.refresh_in_flight = false;
        if stations.is_empty() {
            warn!("DaemonCore: catalog refresh returned nothing, keeping current list");
            return;
        }
        info!("DaemonCore: catalog refreshed, {} stations", stations.len());
        self.state_manager.set_stations(stations).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn handle_track(&mut self, update: TrackUpdate) {
        let TrackUpdate { station_id, info } = update;
        if self.state_manager.set_track(&station_id, info.clone()).await {
            debug!("DaemonCore: track for {}: {:?}", station_id, info);
            let _ = self
                .broadcast_tx
                .send(BroadcastMessage::Track { station_id, info });
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    // ── state mirroring ───────────────────────────────────────────────────────

    /// Mirror the engine into the snapshot store and keep the poller on the
    /// active station.
    async fn sync(&mut self) {
        let mut changed = false;

        let playback = self.engine.state().clone();
        if playback != self.last_playback {
            info!(
                "DaemonCore: {} -> {}",
                self.last_playback.label(),
                playback.label()
            );
            match &playback {
                PlaybackState::Loading { station }
                | PlaybackState::Playing { station }
                | PlaybackState::Paused { station } => self.poller.follow(station),
                PlaybackState::Idle | PlaybackState::Error { .. } => self.poller.cancel(),
            }
            if let Some(message) = playback.error_message() {
                let _ = self
                    .broadcast_tx
                    .send(BroadcastMessage::Error(message.to_string()));
            }
            self.state_manager.set_playback(playback.clone()).await;
            self.last_playback = playback;
            changed = true;
        }

        let attempts = self.engine.recoveries();
        if attempts != self.last_attempts {
            self.state_manager.set_recovery_attempts(attempts).await;
            self.last_attempts = attempts;
            changed = true;
        }

        if changed {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    async fn cleanup(&mut self) {
        info!("DaemonCore: cleanup");
        self.poller.cancel();
        self.engine.shutdown().await;
    }
}
