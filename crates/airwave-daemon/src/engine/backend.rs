use async_trait::async_trait;

use airwave_proto::eq::EqGains;

/// What the media layer reports back, already reduced to the signals the
/// engine reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSignal {
    /// Audio is flowing.
    Ready,
    Paused,
    /// Playback position in seconds; an advance is a heartbeat.
    Progress(f64),
    /// The media layer itself noticed starvation.
    Stall,
    Error(String),
}

/// The host media stack.  Decoding and output live behind this; the engine
/// only issues commands and consumes [`MediaSignal`]s from a channel the
/// backend was built with.
#[async_trait]
pub trait MediaBackend: Send {
    /// Open `url` and start playing it, unpaused.
    async fn load(&mut self, url: &str, volume: f32) -> anyhow::Result<()>;
    async fn set_pause(&mut self, paused: bool) -> anyhow::Result<()>;
    async fn stop(&mut self) -> anyhow::Result<()>;
    async fn set_volume(&mut self, volume: f32) -> anyhow::Result<()>;
    async fn set_equalizer(&mut self, gains: EqGains) -> anyhow::Result<()>;
    /// False once the underlying player is known to be gone.
    fn is_alive(&mut self) -> bool;
    async fn shutdown(&mut self);
}
