//! Playback engine.
//!
//! Owns the state machine, the stall watchdog, the audio graph and the media
//! backend.  Nothing else mutates playback state: callers feed it user
//! intents, media signals and watchdog ticks, then read `state()`.
//!
//! ```text
//!   select/toggle/stop ──▶ PlaybackMachine ──Effect──▶ MediaBackend
//!   MediaSignal ─────────▶ machine + StallWatchdog
//!   tick ────────────────▶ connect timeout, stall check, liveness
//! ```

pub mod backend;
pub mod chain;
pub mod machine;
pub mod watchdog;

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use airwave_proto::config::PlaybackConfig;
use airwave_proto::eq::EqGains;
use airwave_proto::error::{Locale, PlaybackFailure};
use airwave_proto::protocol::{PlaybackState, StationRecord};

use crate::proxy::proxy_url;
use crate::tap;
use crate::BroadcastMessage;
pub use backend::{MediaBackend, MediaSignal};
use chain::AudioGraph;
use machine::{Effect, PlaybackMachine};
use watchdog::{StallWatchdog, Verdict};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// `http://host:port` of the local stream proxy.
    pub proxy_base: String,
    pub stall_threshold: Duration,
    pub max_recoveries: u32,
    pub connect_timeout: Duration,
    pub spectrum_period: Duration,
    /// Run the spectrum sampler while playing.
    pub visualizer: bool,
    /// Decode a PCM copy of the stream into the graph.
    pub pcm_tap: bool,
    pub locale: Locale,
}

impl EngineSettings {
    pub fn from_config(config: &PlaybackConfig, proxy_base: String) -> Self {
        Self {
            proxy_base,
            stall_threshold: config.stall_threshold(),
            max_recoveries: config.max_recoveries,
            connect_timeout: config.connect_timeout(),
            spectrum_period: config.spectrum_period(),
            visualizer: config.visualizer,
            pcm_tap: config.pcm_tap,
            locale: config.locale,
        }
    }
}

pub struct PlaybackEngine<B: MediaBackend> {
    machine: PlaybackMachine,
    watchdog: StallWatchdog,
    graph: AudioGraph,
    backend: B,
    settings: EngineSettings,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    volume: f32,
    gains: EqGains,
    loading_since: Option<Instant>,
    last_position: Option<f64>,
    tap_task: Option<AbortHandle>,
    sampler_task: Option<AbortHandle>,
}

impl<B: MediaBackend> PlaybackEngine<B> {
    pub fn new(
        backend: B,
        settings: EngineSettings,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        volume: f32,
        gains: EqGains,
    ) -> Self {
        Self {
            machine: PlaybackMachine::new(),
            watchdog: StallWatchdog::new(settings.stall_threshold, settings.max_recoveries),
            graph: AudioGraph::new(),
            backend,
            settings,
            broadcast_tx,
            volume: volume.clamp(0.0, 1.0),
            gains: gains.clamped(),
            loading_since: None,
            last_position: None,
            tap_task: None,
            sampler_task: None,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        self.machine.state()
    }

    pub fn recoveries(&self) -> u32 {
        self.watchdog.recoveries()
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler_task.is_some()
    }

    // ── user intents ──────────────────────────────────────────────────────────

    pub async fn select(&mut self, station: StationRecord, now: Instant) {
        let effect = self.machine.select(station);
        self.apply(effect, now).await;
    }

    pub async fn toggle(&mut self, now: Instant) {
        let effect = self.machine.toggle();
        self.apply(effect, now).await;
    }

    pub async fn stop(&mut self) {
        info!("engine: stop");
        self.teardown();
        if let Err(e) = self.backend.stop().await {
            debug!("engine: backend stop failed: {:#}", e);
        }
        self.machine.stop();
    }

    pub async fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Err(e) = self.backend.set_volume(self.volume).await {
            warn!("engine: set volume failed: {:#}", e);
        }
    }

    /// Retune the three bands in place; the graph is never rebuilt.
    pub async fn set_eq(&mut self, gains: EqGains) {
        self.gains = gains.clamped();
        self.graph.set_gains(self.gains);
        if let Err(e) = self.backend.set_equalizer(self.gains).await {
            warn!("engine: set equalizer failed: {:#}", e);
        }
    }

    async fn apply(&mut self, effect: Effect, now: Instant) {
        match effect {
            Effect::None => {}
            Effect::Pause => {
                info!("engine: pause");
                self.watchdog.disarm();
                self.stop_sampler();
                if let Err(e) = self.backend.set_pause(true).await {
                    warn!("engine: pause failed: {:#}", e);
                }
            }
            Effect::Load(station) => self.load(station, now).await,
        }
    }

    /// Entering LOADING: build the graph once, then hand the backend the
    /// proxied stream.
    async fn load(&mut self, station: StationRecord, now: Instant) {
        info!("engine: loading {} ({})", station.name, station.id);
        self.teardown();
        self.watchdog.reset();
        self.last_position = None;
        self.loading_since = Some(now);

        let chain = self.graph.ensure(tap::TAP_SAMPLE_RATE, self.gains);
        let url = proxy_url(&self.settings.proxy_base, &station.id, None);
        if let Err(e) = self.backend.set_equalizer(self.gains).await {
            debug!("engine: equalizer not applied: {:#}", e);
        }
        if let Err(e) = self.backend.load(&url, self.volume).await {
            warn!("engine: failed to load {}: {:#}", station.name, e);
            self.fail(PlaybackFailure::BackendUnavailable);
            return;
        }
        if self.settings.pcm_tap {
            self.tap_task = Some(tap::spawn(url, chain));
        }
    }

    // ── media signals ─────────────────────────────────────────────────────────

    pub async fn on_media(&mut self, signal: MediaSignal, now: Instant) {
        match signal {
            MediaSignal::Ready => {
                if self.machine.stream_ready() {
                    info!("engine: playing");
                    self.loading_since = None;
                    self.watchdog.arm(now);
                    self.start_sampler();
                }
            }
            MediaSignal::Paused => {
                if self.machine.stream_paused() {
                    info!("engine: paused by media layer");
                    self.watchdog.disarm();
                    self.stop_sampler();
                }
            }
            MediaSignal::Progress(position) => {
                if !self.machine.state().is_playing() {
                    return;
                }
                // the first position after a (re)load is only a baseline
                let advanced = self.last_position.is_some_and(|prev| position > prev);
                self.last_position = Some(position);
                if advanced && self.watchdog.heartbeat(now) {
                    info!("engine: stream healthy again, recovery count reset");
                }
            }
            MediaSignal::Stall => {
                if self.machine.state().is_playing() {
                    warn!("engine: media layer reported a stall");
                    let verdict = self.watchdog.trigger(now);
                    self.handle_verdict(verdict).await;
                }
            }
            MediaSignal::Error(reason) => {
                if matches!(self.machine.state(), PlaybackState::Idle) {
                    return;
                }
                warn!("engine: stream error: {}", reason);
                self.fail(PlaybackFailure::StreamUnavailable);
                let _ = self.backend.stop().await;
            }
        }
    }

    // ── periodic check ────────────────────────────────────────────────────────

    pub async fn on_tick(&mut self, now: Instant) {
        let active = matches!(
            self.machine.state(),
            PlaybackState::Loading { .. } | PlaybackState::Playing { .. }
        );
        if active && !self.backend.is_alive() {
            warn!("engine: media backend died");
            self.fail(PlaybackFailure::BackendUnavailable);
            return;
        }

        if let Some(since) = self.loading_since {
            if matches!(self.machine.state(), PlaybackState::Loading { .. })
                && now.saturating_duration_since(since) >= self.settings.connect_timeout
            {
                warn!(
                    "engine: no audio after {:?}, giving up",
                    self.settings.connect_timeout
                );
                self.fail(PlaybackFailure::ConnectTimeout);
                let _ = self.backend.stop().await;
                return;
            }
        }

        if self.machine.state().is_playing() {
            let verdict = self.watchdog.check(now);
            self.handle_verdict(verdict).await;
        }
    }

    async fn handle_verdict(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Healthy => {}
            Verdict::Recover { attempt } => {
                let Some(station) = self.machine.state().station().cloned() else {
                    return;
                };
                warn!(
                    "engine: stall on {}, recovery attempt {}/{}",
                    station.name, attempt, self.settings.max_recoveries
                );
                self.stop_tap();
                let _ = self.backend.stop().await;
                let nonce = chrono::Utc::now().timestamp_millis().to_string();
                let url = proxy_url(&self.settings.proxy_base, &station.id, Some(&nonce));
                self.last_position = None;
                if let Err(e) = self.backend.load(&url, self.volume).await {
                    warn!("engine: recovery load failed: {:#}", e);
                    return;
                }
                if self.settings.pcm_tap {
                    if let Some(chain) = self.graph.get() {
                        self.tap_task = Some(tap::spawn(url, chain));
                    }
                }
            }
            Verdict::Exhausted => {
                warn!("engine: recovery exhausted");
                self.fail(PlaybackFailure::RecoveryExhausted);
                let _ = self.backend.stop().await;
            }
        }
    }

    fn fail(&mut self, failure: PlaybackFailure) {
        self.teardown();
        self.loading_since = None;
        self.watchdog.disarm();
        self.machine
            .stream_error(failure.message(self.settings.locale));
    }

    // ── background tasks ──────────────────────────────────────────────────────

    fn teardown(&mut self) {
        self.stop_tap();
        self.stop_sampler();
    }

    fn stop_tap(&mut self) {
        if let Some(h) = self.tap_task.take() {
            h.abort();
        }
    }

    fn stop_sampler(&mut self) {
        if let Some(h) = self.sampler_task.take() {
            h.abort();
        }
    }

    /// Pull a spectrum snapshot at the configured cadence while PLAYING.
    fn start_sampler(&mut self) {
        if !self.settings.visualizer || self.sampler_task.is_some() {
            return;
        }
        let Some(chain) = self.graph.get() else {
            return;
        };
        let tx = self.broadcast_tx.clone();
        let period = self.settings.spectrum_period;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let bins = match chain.lock() {
                    Ok(mut chain) => chain.spectrum(),
                    Err(_) => break,
                };
                let _ = tx.send(BroadcastMessage::Spectrum(bins));
            }
        });
        self.sampler_task = Some(task.abort_handle());
    }

    pub async fn shutdown(&mut self) {
        self.teardown();
        self.backend.shutdown().await;
    }
}
