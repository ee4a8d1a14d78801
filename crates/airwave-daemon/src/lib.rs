pub mod catalog;
pub mod core;
pub mod engine;
pub mod fetch;
pub mod http;
pub mod icy;
pub mod metadata;
pub mod mpv;
pub mod proxy;
pub mod schedule;
pub mod session;
pub mod socket;
pub mod tap;

use airwave_proto::protocol::TrackInfo;
use tokio::sync::broadcast;

/// Fan-out from the daemon to connected clients.  `StateUpdated` carries no
/// payload; each client re-reads the snapshot store.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Track {
        station_id: String,
        info: TrackInfo,
    },
    Spectrum(Vec<u8>),
    Log(String),
    /// A playback failure the listener should see.
    Error(String),
}

/// Tracing layer that forwards WARN and ERROR events to clients as log lines.
pub struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    pub fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));
        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_only_warnings_are_forwarded() {
        let (tx, mut rx) = broadcast::channel(8);
        let subscriber = tracing_subscriber::registry().with(BroadcastLayer::new(tx));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("quiet");
            tracing::warn!(station = "kan-88", "stream stalled");
        });
        match rx.try_recv() {
            Ok(BroadcastMessage::Log(line)) => {
                assert!(line.contains("[WARN]"));
                assert!(line.contains("stream stalled"));
                assert!(line.contains("station=\"kan-88\""));
            }
            other => panic!("expected a log line, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
