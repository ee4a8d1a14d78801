//! Equalizer presets shared by config, the wire protocol and the signal chain.

use serde::{Deserialize, Serialize};

/// Gain bounds in dB for every band.
pub const MIN_GAIN_DB: f32 = -10.0;
pub const MAX_GAIN_DB: f32 = 10.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EqPreset {
    #[default]
    Flat,
    BassBoost,
    VocalBoost,
    Rock,
    Movie,
    Custom,
}

impl EqPreset {
    pub const ALL: [EqPreset; 6] = [
        EqPreset::Flat,
        EqPreset::BassBoost,
        EqPreset::VocalBoost,
        EqPreset::Rock,
        EqPreset::Movie,
        EqPreset::Custom,
    ];

    /// Fixed (bass, mid, treble) triple for the preset.  `Custom` resolves to
    /// the user-set gains passed in.
    pub fn gains(self, custom: EqGains) -> EqGains {
        match self {
            EqPreset::Flat => EqGains::new(0.0, 0.0, 0.0),
            EqPreset::BassBoost => EqGains::new(7.0, 1.0, 0.0),
            EqPreset::VocalBoost => EqGains::new(-2.0, 5.0, 3.0),
            EqPreset::Rock => EqGains::new(5.0, -2.0, 4.0),
            EqPreset::Movie => EqGains::new(4.0, 3.0, 2.0),
            EqPreset::Custom => custom.clamped(),
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            EqPreset::Flat => "flat",
            EqPreset::BassBoost => "bass-boost",
            EqPreset::VocalBoost => "vocal-boost",
            EqPreset::Rock => "rock",
            EqPreset::Movie => "movie",
            EqPreset::Custom => "custom",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.slug() == slug)
    }
}

/// Per-band gain in dB.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct EqGains {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
}

impl EqGains {
    pub fn new(bass: f32, mid: f32, treble: f32) -> Self {
        Self { bass, mid, treble }
    }

    pub fn clamped(self) -> Self {
        Self {
            bass: clamp_gain(self.bass),
            mid: clamp_gain(self.mid),
            treble: clamp_gain(self.treble),
        }
    }
}

fn clamp_gain(db: f32) -> f32 {
    if db.is_nan() {
        0.0
    } else {
        db.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
    }
}
