//! Decodable audio sources
//!
//! The playback core never decodes codecs itself. It opens a path through a
//! [`SourceOpener`] and receives something random-access over frames. The
//! production opener decodes the whole file with rodio into memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rodio::{Decoder, Source};

use crate::error::AudioError;

/// Random-access view over the frames of an opened audio file
pub trait DecodableSource: Send + Sync {
    /// Total number of frames (samples per channel)
    fn frame_count(&self) -> u64;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Copy frames starting at `start_frame` into `out`, interleaved with
    /// `out_channels` channels. Returns the number of frames written.
    fn read_frames(&self, start_frame: u64, out_channels: usize, out: &mut [f32]) -> usize;

    /// Length in seconds
    fn duration_secs(&self) -> f64 {
        if self.sample_rate() == 0 {
            0.0
        } else {
            self.frame_count() as f64 / self.sample_rate() as f64
        }
    }
}

/// Capability to turn a path into a decodable source
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn DecodableSource>, AudioError>;
}

/// Interleaved PCM held in memory
#[derive(Clone)]
pub struct PcmBuffer {
    samples: Arc<[f32]>,
    channels: u16,
    sample_rate: u32,
}

impl std::fmt::Debug for PcmBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmBuffer")
            .field("frames", &self.frame_count())
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl PcmBuffer {
    /// Wrap interleaved samples. A trailing partial frame is ignored.
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            channels: channels.max(1),
            sample_rate,
        }
    }

    /// Constant-amplitude buffer, handy for level checks
    pub fn constant(value: f32, frames: usize, channels: u16, sample_rate: u32) -> Self {
        Self::new(
            vec![value; frames * channels.max(1) as usize],
            channels,
            sample_rate,
        )
    }

    /// Sine tone at `frequency` Hz
    pub fn sine(frequency: f32, amplitude: f32, seconds: f32, sample_rate: u32) -> Self {
        let frames = (seconds * sample_rate as f32) as usize;
        let step = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
        let samples = (0..frames)
            .map(|i| amplitude * (step * i as f32).sin())
            .collect();
        Self::new(samples, 1, sample_rate)
    }
}

impl DecodableSource for PcmBuffer {
    fn frame_count(&self) -> u64 {
        (self.samples.len() / self.channels as usize) as u64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn read_frames(&self, start_frame: u64, out_channels: usize, out: &mut [f32]) -> usize {
        if out_channels == 0 {
            return 0;
        }
        let total = self.frame_count();
        if start_frame >= total {
            return 0;
        }

        let src_channels = self.channels as usize;
        let frames = ((total - start_frame) as usize).min(out.len() / out_channels);
        let start = start_frame as usize * src_channels;

        for (frame, dst) in out.chunks_exact_mut(out_channels).take(frames).enumerate() {
            let src = &self.samples[start + frame * src_channels..][..src_channels];
            for (ch, sample) in dst.iter_mut().enumerate() {
                // Mono fans out to every output channel, extra channels are dropped
                *sample = src[ch.min(src_channels - 1)];
            }
        }
        frames
    }
}

/// Opens files by fully decoding them with rodio
#[derive(Debug, Clone, Copy, Default)]
pub struct RodioSourceOpener;

impl SourceOpener for RodioSourceOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn DecodableSource>, AudioError> {
        let file = File::open(path).map_err(|e| AudioError::file_open(path, e))?;
        let reader = BufReader::new(file);
        let decoder = Decoder::new(reader)
            .map_err(|e| AudioError::file_open(path, format!("Failed to decode audio: {}", e)))?;

        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        if channels == 0 || sample_rate == 0 {
            return Err(AudioError::file_open(path, "Invalid stream format"));
        }

        let samples: Vec<f32> = decoder.collect();
        let buffer = PcmBuffer::new(samples, channels, sample_rate);
        tracing::debug!("Decoded {:?}: {:?}", path, buffer);
        Ok(Arc::new(buffer))
    }
}

/// Serves pre-built buffers by path
#[derive(Clone, Default)]
pub struct MemorySourceOpener {
    buffers: Arc<RwLock<HashMap<PathBuf, PcmBuffer>>>,
}

impl MemorySourceOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, buffer: PcmBuffer) {
        self.buffers.write().insert(path.into(), buffer);
    }

    pub fn remove(&self, path: &Path) {
        self.buffers.write().remove(path);
    }
}

impl SourceOpener for MemorySourceOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn DecodableSource>, AudioError> {
        let buffer = self
            .buffers
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| AudioError::file_open(path, "No such file"))?;
        if buffer.sample_rate == 0 {
            return Err(AudioError::file_open(path, "Invalid stream format"));
        }
        Ok(Arc::new(buffer))
    }
}
