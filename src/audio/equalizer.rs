//! 10-band parametric equalizer using biquad filters
//!
//! Band centers: 32Hz, 64Hz, 125Hz, 250Hz, 500Hz, 1kHz, 2kHz, 4kHz, 8kHz, 16kHz
//!
//! Three pieces:
//! - `EqualizerParams`: lock-free gain slots shared with the render thread
//! - `EqualizerNode`: the DSP node living inside the render graph
//! - `EqualizerState`: the control-side source of truth for band gains

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Number of equalizer bands
pub const EQ_BANDS: usize = 10;

/// Equalizer center frequencies in Hz
pub const EQ_FREQUENCIES: [f32; EQ_BANDS] = [
    32.0, 64.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Lowest settable band gain in dB
pub const MIN_GAIN_DB: f32 = -12.0;

/// Highest settable band gain in dB
pub const MAX_GAIN_DB: f32 = 12.0;

/// Q factor for each band - wider at low frequencies, narrower at high
const Q_VALUES: [f32; EQ_BANDS] = [0.7, 0.8, 1.0, 1.2, 1.4, 1.4, 1.4, 1.2, 1.0, 0.8];

/// Biquad filter coefficients
#[derive(Clone, Copy, Debug, PartialEq)]
struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    const UNITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::UNITY
    }
}

/// Biquad filter state for one channel
#[derive(Clone, Copy, Default)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    fn process(&mut self, coeffs: &BiquadCoeffs, input: f32) -> f32 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Calculate peaking EQ filter coefficients
/// gain_db: gain in decibels (-12 to +12)
/// freq: center frequency in Hz
/// sample_rate: audio sample rate
/// q: quality factor (bandwidth)
fn calc_peaking_eq(freq: f32, gain_db: f32, sample_rate: f32, q: f32) -> BiquadCoeffs {
    // Unity gain, or a band above Nyquist that the filter cannot represent
    if gain_db.abs() < 0.01 || freq >= sample_rate * 0.5 {
        return BiquadCoeffs::UNITY;
    }

    let a = 10.0_f32.powf(gain_db / 40.0);
    let omega = 2.0 * std::f32::consts::PI * freq / sample_rate;
    let sin_omega = omega.sin();
    let cos_omega = omega.cos();
    let alpha = sin_omega / (2.0 * q);

    let b0 = 1.0 + alpha * a;
    let b1 = -2.0 * cos_omega;
    let b2 = 1.0 - alpha * a;
    let a0 = 1.0 + alpha / a;
    let a1 = -2.0 * cos_omega;
    let a2 = 1.0 - alpha / a;

    BiquadCoeffs {
        b0: b0 / a0,
        b1: b1 / a0,
        b2: b2 / a0,
        a1: a1 / a0,
        a2: a2 / a0,
    }
}

/// Gain slots shared between the control thread and the render thread
///
/// Writes bump a generation counter; the node recomputes its coefficients
/// when it observes a new generation. Nothing here blocks.
#[derive(Clone)]
pub struct EqualizerParams {
    inner: Arc<EqualizerParamsInner>,
}

struct EqualizerParamsInner {
    /// Gains in dB, stored as f32 bits
    gains: [AtomicU32; EQ_BANDS],
    generation: AtomicU64,
}

impl EqualizerParams {
    /// New parameters with every band flat
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EqualizerParamsInner {
                gains: [const { AtomicU32::new(0) }; EQ_BANDS],
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Set all 10 band gains at once
    pub fn set_gains(&self, gains: &[f32; EQ_BANDS]) {
        for (slot, gain) in self.inner.gains.iter().zip(gains) {
            slot.store(gain.to_bits(), Ordering::Relaxed);
        }
        self.inner.generation.fetch_add(1, Ordering::Release);
    }

    /// Set a single band gain
    pub fn set_band_gain(&self, band: usize, gain_db: f32) {
        if let Some(slot) = self.inner.gains.get(band) {
            slot.store(gain_db.to_bits(), Ordering::Relaxed);
            self.inner.generation.fetch_add(1, Ordering::Release);
        }
    }

    /// Gains currently held by the node side
    pub fn gains(&self) -> [f32; EQ_BANDS] {
        std::array::from_fn(|i| f32::from_bits(self.inner.gains[i].load(Ordering::Relaxed)))
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }
}

impl Default for EqualizerParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Equalizer node inside the render graph
pub(crate) struct EqualizerNode {
    params: EqualizerParams,
    coeffs: [BiquadCoeffs; EQ_BANDS],
    // Filter state for each band, per channel (stereo = 2 channels)
    states: [[BiquadState; EQ_BANDS]; 2],
    sample_rate: f32,
    seen_generation: u64,
    bypass: bool,
}

impl EqualizerNode {
    pub(crate) fn new(params: EqualizerParams, sample_rate: u32) -> Self {
        let mut node = Self {
            params,
            coeffs: [BiquadCoeffs::UNITY; EQ_BANDS],
            states: [[BiquadState::default(); EQ_BANDS]; 2],
            sample_rate: sample_rate as f32,
            seen_generation: 0,
            bypass: true,
        };
        node.update_coefficients();
        node
    }

    /// Update filter coefficients from current parameters
    fn update_coefficients(&mut self) {
        self.seen_generation = self.params.generation();
        let gains = self.params.gains();

        for (i, &freq) in EQ_FREQUENCIES.iter().enumerate() {
            self.coeffs[i] = calc_peaking_eq(freq, gains[i], self.sample_rate, Q_VALUES[i]);
        }
        self.bypass = self.coeffs.iter().all(|c| *c == BiquadCoeffs::UNITY);
    }

    /// Filter interleaved samples in place
    pub(crate) fn process(&mut self, buffer: &mut [f32], channels: usize) {
        if self.params.generation() != self.seen_generation {
            self.update_coefficients();
        }
        if self.bypass || channels == 0 {
            return;
        }

        for frame in buffer.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let states = &mut self.states[ch.min(1)];
                let mut output = *sample;
                for (state, coeff) in states.iter_mut().zip(&self.coeffs) {
                    output = state.process(coeff, output);
                }
                *sample = soft_clip(output);
            }
        }
    }

    /// Clear filter memory so a new segment does not ring with the old one
    pub(crate) fn reset(&mut self) {
        for channel_states in &mut self.states {
            for state in channel_states {
                state.reset();
            }
        }
    }
}

/// Soft clipping function to prevent harsh digital clipping
pub(crate) fn soft_clip(x: f32) -> f32 {
    if x.abs() < 0.9 {
        x
    } else if x > 0.0 {
        0.9 + 0.1 * ((x - 0.9) / 0.1).tanh()
    } else {
        -0.9 - 0.1 * ((-x - 0.9) / 0.1).tanh()
    }
}

/// Built-in gain curves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EqualizerPreset {
    #[default]
    Normal,
    Rock,
    Pop,
    Jazz,
    Classical,
    Electronic,
}

impl EqualizerPreset {
    pub const ALL: [EqualizerPreset; 6] = [
        EqualizerPreset::Normal,
        EqualizerPreset::Rock,
        EqualizerPreset::Pop,
        EqualizerPreset::Jazz,
        EqualizerPreset::Classical,
        EqualizerPreset::Electronic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EqualizerPreset::Normal => "Normal",
            EqualizerPreset::Rock => "Rock",
            EqualizerPreset::Pop => "Pop",
            EqualizerPreset::Jazz => "Jazz",
            EqualizerPreset::Classical => "Classical",
            EqualizerPreset::Electronic => "Electronic",
        }
    }

    pub fn gains(&self) -> [f32; EQ_BANDS] {
        match self {
            EqualizerPreset::Normal => [0.0; EQ_BANDS],
            EqualizerPreset::Rock => [5.0, 4.0, 3.0, 1.0, -1.0, 1.0, 3.0, 4.0, 5.0, 5.0],
            EqualizerPreset::Pop => [-1.0, 2.0, 4.0, 4.0, 2.0, -1.0, -1.0, 0.0, 1.0, 1.0],
            EqualizerPreset::Jazz => [4.0, 3.0, 1.0, 2.0, -2.0, -1.0, 1.0, 2.0, 3.0, 4.0],
            EqualizerPreset::Classical => [5.0, 4.0, 3.0, 2.0, -2.0, -2.0, 0.0, 2.0, 3.0, 4.0],
            EqualizerPreset::Electronic => [5.0, 4.0, 3.0, 0.0, -1.0, 1.0, 0.0, 1.0, 3.0, 5.0],
        }
    }
}

impl std::fmt::Display for EqualizerPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Control-side equalizer settings
///
/// Outlives any playback session. The graph's node may be rebuilt at any
/// time, so the stored gains are pushed again through [`reapply`](Self::reapply).
#[derive(Clone)]
pub struct EqualizerState {
    gains: [f32; EQ_BANDS],
    enabled: bool,
    /// Last preset applied; band edits do not change it
    preset: EqualizerPreset,
    live: Option<EqualizerParams>,
}

impl std::fmt::Debug for EqualizerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EqualizerState")
            .field("gains", &self.gains)
            .field("enabled", &self.enabled)
            .field("preset", &self.preset)
            .field("attached", &self.live.is_some())
            .finish()
    }
}

impl EqualizerState {
    pub fn new() -> Self {
        Self {
            gains: [0.0; EQ_BANDS],
            enabled: true,
            preset: EqualizerPreset::Normal,
            live: None,
        }
    }

    /// Set one band. Out-of-range bands are ignored; gains are clamped to ±12 dB.
    pub fn set_gain(&mut self, band: usize, gain_db: f32) {
        if band >= EQ_BANDS || gain_db.is_nan() {
            return;
        }
        let gain = gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB);
        self.gains[band] = gain;

        if self.enabled {
            if let Some(live) = &self.live {
                live.set_band_gain(band, gain);
            }
        }
    }

    pub fn gain(&self, band: usize) -> Option<f32> {
        self.gains.get(band).copied()
    }

    pub fn all_gains(&self) -> [f32; EQ_BANDS] {
        self.gains
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling sends flat gains to the node but keeps the stored curve
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.reapply();
    }

    pub fn apply_preset(&mut self, preset: EqualizerPreset) {
        self.preset = preset;
        self.gains = preset.gains();
        self.reapply();
    }

    pub fn selected_preset(&self) -> EqualizerPreset {
        self.preset
    }

    /// Whether band edits have moved the curve off the selected preset
    pub fn has_changes_from_preset(&self) -> bool {
        self.gains != self.preset.gains()
    }

    /// Discard band edits and go back to the selected preset's curve
    pub fn reset_to_preset(&mut self) {
        self.apply_preset(self.preset);
    }

    pub fn reset_to_flat(&mut self) {
        self.apply_preset(EqualizerPreset::Normal);
    }

    /// Mean gain across all bands
    pub fn overall_boost(&self) -> f32 {
        self.gains.iter().sum::<f32>() / EQ_BANDS as f32
    }

    /// Bind to the node of a freshly built graph and push the current gains
    pub fn attach(&mut self, params: EqualizerParams) {
        self.live = Some(params);
        self.reapply();
    }

    /// Push the stored gains (or flat, when disabled) to the live node
    pub fn reapply(&self) {
        if let Some(live) = &self.live {
            live.set_gains(&self.effective_gains());
        }
    }

    fn effective_gains(&self) -> [f32; EQ_BANDS] {
        if self.enabled {
            self.gains
        } else {
            [0.0; EQ_BANDS]
        }
    }
}

impl Default for EqualizerState {
    fn default() -> Self {
        Self::new()
    }
}
