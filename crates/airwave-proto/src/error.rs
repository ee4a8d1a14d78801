use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Language for user-facing playback messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    He,
    En,
}

/// Playback failures that escalate to a visible `PlaybackState::Error`.
/// Everything else (provider timeouts, metadata gaps) is swallowed where it
/// happens.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PlaybackFailure {
    #[error("stream could not be opened")]
    StreamUnavailable,
    #[error("stream did not start in time")]
    ConnectTimeout,
    #[error("stream stalled and recovery attempts are exhausted")]
    RecoveryExhausted,
    #[error("media backend is not available")]
    BackendUnavailable,
}

impl PlaybackFailure {
    /// Short message stored in the error state and shown to the listener.
    pub fn message(self, locale: Locale) -> String {
        let text = match (self, locale) {
            (PlaybackFailure::StreamUnavailable, Locale::He) => "לא ניתן לנגן את התחנה",
            (PlaybackFailure::StreamUnavailable, Locale::En) => "Station unavailable",
            (PlaybackFailure::ConnectTimeout, Locale::He) => "החיבור לתחנה נכשל",
            (PlaybackFailure::ConnectTimeout, Locale::En) => "Connection timed out",
            (PlaybackFailure::RecoveryExhausted, Locale::He) => "השידור נקטע, נסו שוב",
            (PlaybackFailure::RecoveryExhausted, Locale::En) => "Stream lost, try again",
            (PlaybackFailure::BackendUnavailable, Locale::He) => "נגן השמע אינו זמין",
            (PlaybackFailure::BackendUnavailable, Locale::En) => "Audio player unavailable",
        };
        text.to_string()
    }
}
