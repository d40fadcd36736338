//! Real-time spectrum analyzer
//!
//! Provides the visual level display fed from the post-equalizer tap:
//! - 20 bins of RMS energy, one per equal slice of the tap buffer
//! - 20 peak markers that follow the bins upward and fall at a fixed rate
//!
//! The tap side runs on the render thread, so publishing is allocation-free
//! and lock-free: every bin is an `f32` stored in an atomic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Number of spectrum bins
pub const SPECTRUM_BINS: usize = 20;

/// One bin value per slot, each in [0, 1]
pub type SpectrumFrame = [f32; SPECTRUM_BINS];

/// Compute the binned RMS spectrum of `samples`
///
/// The buffer is cut into `SPECTRUM_BINS` equal segments; the last segment
/// also takes the `len % SPECTRUM_BINS` leftover samples. Each bin is
/// `clamp(rms * gain, 0, 1)`.
pub fn compute_spectrum(samples: &[f32], gain: f32, out: &mut SpectrumFrame) {
    let segment_len = samples.len() / SPECTRUM_BINS;

    for (bin, value) in out.iter_mut().enumerate() {
        let start = bin * segment_len;
        let end = if bin == SPECTRUM_BINS - 1 {
            samples.len()
        } else {
            start + segment_len
        };
        let level = rms(&samples[start..end]) * gain;
        *value = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}

fn rms(segment: &[f32]) -> f32 {
    if segment.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = segment.iter().map(|s| s * s).sum();
    (sum_sq / segment.len() as f32).sqrt()
}

/// Spectrum and peak data shared between the render thread and observers
#[derive(Clone)]
pub struct SpectrumAnalyzer {
    inner: Arc<AnalyzerInner>,
}

struct AnalyzerInner {
    bins: [AtomicU32; SPECTRUM_BINS],
    peaks: [AtomicU32; SPECTRUM_BINS],
    /// Multiplier applied to RMS before clamping
    gain: f32,
    /// Subtracted from each peak per decay tick
    decay_step: f32,
    /// Bumped on every reset; a publish that straddles a reset re-zeroes
    epoch: AtomicU64,
    /// Number of frames published since creation
    sequence: AtomicU64,
}

impl SpectrumAnalyzer {
    pub fn new(gain: f32, decay_step: f32) -> Self {
        Self {
            inner: Arc::new(AnalyzerInner {
                bins: [const { AtomicU32::new(0) }; SPECTRUM_BINS],
                peaks: [const { AtomicU32::new(0) }; SPECTRUM_BINS],
                gain,
                decay_step,
                epoch: AtomicU64::new(0),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Analyze one tap buffer and publish the result (render thread)
    pub fn process(&self, samples: &[f32]) {
        let epoch = self.inner.epoch.load(Ordering::Acquire);

        let mut frame = [0.0f32; SPECTRUM_BINS];
        compute_spectrum(samples, self.inner.gain, &mut frame);

        for (i, value) in frame.iter().enumerate() {
            let bits = value.to_bits();
            self.inner.bins[i].store(bits, Ordering::Relaxed);
            // Bit patterns of non-negative floats order like the floats themselves
            self.inner.peaks[i].fetch_max(bits, Ordering::Relaxed);
        }
        self.inner.sequence.fetch_add(1, Ordering::Release);

        if self.inner.epoch.load(Ordering::Acquire) != epoch {
            self.zero();
        }
    }

    /// Lower every peak by the decay step, floored at zero
    pub fn decay_peaks(&self) {
        let step = self.inner.decay_step;
        for peak in &self.inner.peaks {
            let _ = peak.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f32::from_bits(bits) - step).max(0.0).to_bits())
            });
        }
    }

    /// Zero bins and peaks (playback stopped)
    pub fn reset(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.zero();
    }

    fn zero(&self) {
        for slot in self.inner.bins.iter().chain(&self.inner.peaks) {
            slot.store(0, Ordering::Relaxed);
        }
    }

    /// Latest spectrum frame
    pub fn spectrum(&self) -> SpectrumFrame {
        std::array::from_fn(|i| f32::from_bits(self.inner.bins[i].load(Ordering::Relaxed)))
    }

    /// Current peak markers
    pub fn peaks(&self) -> SpectrumFrame {
        std::array::from_fn(|i| f32::from_bits(self.inner.peaks[i].load(Ordering::Relaxed)))
    }

    /// Number of frames published so far
    pub fn sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::Acquire)
    }

    /// Callback suitable for installing as a graph tap
    pub fn tap_callback(&self) -> impl FnMut(&[f32]) + Send + 'static {
        let analyzer = self.clone();
        move |samples: &[f32]| analyzer.process(samples)
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new(2.0, 0.05)
    }
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("gain", &self.inner.gain)
            .field("decay_step", &self.inner.decay_step)
            .field("sequence", &self.sequence())
            .finish()
    }
}
