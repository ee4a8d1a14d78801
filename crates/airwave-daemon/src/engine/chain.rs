//! The owned audio graph: source → low-shelf → peaking → high-shelf →
//! analyzer → output.
//!
//! Samples arrive from the PCM tap; the three filters run per sample and the
//! analyzer keeps the last `FFT_SIZE` filtered samples for on-demand
//! spectrum snapshots.  The graph is built once per engine and its filter
//! gains are retuned in place.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use airwave_proto::eq::EqGains;

pub const BASS_HZ: f32 = 250.0;
pub const MID_HZ: f32 = 1000.0;
pub const TREBLE_HZ: f32 = 4000.0;
pub const MID_Q: f32 = 1.0;

pub const FFT_SIZE: usize = 256;
/// One byte per band in every snapshot.
pub const SPECTRUM_BANDS: usize = FFT_SIZE / 2;
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    LowShelf,
    Peaking,
    HighShelf,
}

/// RBJ cookbook biquad, direct form I.
#[derive(Debug, Clone)]
struct Biquad {
    shape: Shape,
    freq: f32,
    q: f32,
    sample_rate: f32,
    b: [f32; 3],
    a: [f32; 2],
    x: [f32; 2],
    y: [f32; 2],
}

impl Biquad {
    fn new(shape: Shape, freq: f32, q: f32, sample_rate: f32, gain_db: f32) -> Self {
        let mut f = Self {
            shape,
            freq,
            q,
            sample_rate,
            b: [1.0, 0.0, 0.0],
            a: [0.0, 0.0],
            x: [0.0; 2],
            y: [0.0; 2],
        };
        f.set_gain(gain_db);
        f
    }

    /// Recompute coefficients; the delay line is kept so there is no click.
    fn set_gain(&mut self, gain_db: f32) {
        let a = 10f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * self.freq / self.sample_rate;
        let (sin, cos) = w0.sin_cos();
        let sqrt_a = a.sqrt();

        let (b0, b1, b2, a0, a1, a2) = match self.shape {
            Shape::Peaking => {
                let alpha = sin / (2.0 * self.q);
                (
                    1.0 + alpha * a,
                    -2.0 * cos,
                    1.0 - alpha * a,
                    1.0 + alpha / a,
                    -2.0 * cos,
                    1.0 - alpha / a,
                )
            }
            Shape::LowShelf => {
                let alpha = sin / 2.0 * std::f32::consts::SQRT_2;
                let k = 2.0 * sqrt_a * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos + k),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
                    a * ((a + 1.0) - (a - 1.0) * cos - k),
                    (a + 1.0) + (a - 1.0) * cos + k,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos),
                    (a + 1.0) + (a - 1.0) * cos - k,
                )
            }
            Shape::HighShelf => {
                let alpha = sin / 2.0 * std::f32::consts::SQRT_2;
                let k = 2.0 * sqrt_a * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos + k),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
                    a * ((a + 1.0) + (a - 1.0) * cos - k),
                    (a + 1.0) - (a - 1.0) * cos + k,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos),
                    (a + 1.0) - (a - 1.0) * cos - k,
                )
            }
        };
        self.b = [b0 / a0, b1 / a0, b2 / a0];
        self.a = [a1 / a0, a2 / a0];
    }

    fn process(&mut self, x0: f32) -> f32 {
        let y0 = self.b[0] * x0 + self.b[1] * self.x[0] + self.b[2] * self.x[1]
            - self.a[0] * self.y[0]
            - self.a[1] * self.y[1];
        self.x = [x0, self.x[0]];
        self.y = [y0, self.y[0]];
        y0
    }
}

/// Magnitude analyzer with exponential smoothing between snapshots.
struct Analyzer {
    fft: Arc<dyn Fft<f32>>,
    window: VecDeque<f32>,
    smoothed: Vec<f32>,
}

impl Analyzer {
    fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            fft: planner.plan_fft_forward(FFT_SIZE),
            window: VecDeque::from(vec![0.0; FFT_SIZE]),
            smoothed: vec![0.0; SPECTRUM_BANDS],
        }
    }

    fn push(&mut self, sample: f32) {
        if self.window.len() == FFT_SIZE {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }

    fn snapshot(&mut self) -> Vec<u8> {
        let n = FFT_SIZE as f32;
        let mut buf: Vec<Complex<f32>> = self
            .window
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let w = 0.5 - 0.5 * ((2.0 * PI * i as f32) / n).cos();
                Complex::new(s * w, 0.0)
            })
            .collect();
        self.fft.process(&mut buf);

        buf.iter()
            .take(SPECTRUM_BANDS)
            .zip(self.smoothed.iter_mut())
            .map(|(bin, smooth)| {
                let mag = bin.norm() / n;
                *smooth = SMOOTHING * *smooth + (1.0 - SMOOTHING) * mag;
                db_to_byte(20.0 * (*smooth + 1e-12).log10())
            })
            .collect()
    }
}

fn db_to_byte(db: f32) -> u8 {
    let unit = ((db - MIN_DB) / (MAX_DB - MIN_DB)).clamp(0.0, 1.0);
    (unit * 255.0).round() as u8
}

pub struct SignalChain {
    bass: Biquad,
    mid: Biquad,
    treble: Biquad,
    analyzer: Analyzer,
    gains: EqGains,
}

impl SignalChain {
    pub fn new(sample_rate: u32, gains: EqGains) -> Self {
        let sr = sample_rate as f32;
        let gains = gains.clamped();
        Self {
            bass: Biquad::new(Shape::LowShelf, BASS_HZ, 0.7071, sr, gains.bass),
            mid: Biquad::new(Shape::Peaking, MID_HZ, MID_Q, sr, gains.mid),
            treble: Biquad::new(Shape::HighShelf, TREBLE_HZ, 0.7071, sr, gains.treble),
            analyzer: Analyzer::new(),
            gains,
        }
    }

    pub fn gains(&self) -> EqGains {
        self.gains
    }

    pub fn set_gains(&mut self, gains: EqGains) {
        let gains = gains.clamped();
        self.bass.set_gain(gains.bass);
        self.mid.set_gain(gains.mid);
        self.treble.set_gain(gains.treble);
        self.gains = gains;
    }

    /// Run a block through the filters into the analyzer and return the
    /// filtered output.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        input
            .iter()
            .map(|&s| {
                let out = self.treble.process(self.mid.process(self.bass.process(s)));
                self.analyzer.push(out);
                out
            })
            .collect()
    }

    /// Current spectrum, `SPECTRUM_BANDS` bytes from low to high frequency.
    pub fn spectrum(&mut self) -> Vec<u8> {
        self.analyzer.snapshot()
    }
}

/// mpv `af` value that applies the same three bands to the audible output.
pub fn lavfi_graph(gains: EqGains) -> String {
    let g = gains.clamped();
    format!(
        "lavfi=[bass=g={:.1}:f={}:w=0.7071:t=q,equalizer=f={}:t=q:w={}:g={:.1},treble=g={:.1}:f={}:w=0.7071:t=q]",
        g.bass, BASS_HZ, MID_HZ, MID_Q, g.mid, g.treble, TREBLE_HZ
    )
}

/// Lazily built, shared handle to the one chain an engine owns.
#[derive(Default)]
pub struct AudioGraph {
    chain: Option<Arc<Mutex<SignalChain>>>,
    builds: u32,
}

impl AudioGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build on first call; later calls hand back the same chain.
    pub fn ensure(&mut self, sample_rate: u32, gains: EqGains) -> Arc<Mutex<SignalChain>> {
        if let Some(chain) = &self.chain {
            return Arc::clone(chain);
        }
        self.builds += 1;
        let chain = Arc::new(Mutex::new(SignalChain::new(sample_rate, gains)));
        self.chain = Some(Arc::clone(&chain));
        chain
    }

    pub fn get(&self) -> Option<Arc<Mutex<SignalChain>>> {
        self.chain.clone()
    }

    pub fn is_built(&self) -> bool {
        self.chain.is_some()
    }

    pub fn build_count(&self) -> u32 {
        self.builds
    }

    pub fn set_gains(&self, gains: EqGains) {
        if let Some(chain) = &self.chain {
            if let Ok(mut chain) = chain.lock() {
                chain.set_gains(gains);
            }
        }
    }
}
