//! Audio playback module
//!
//! This module provides playback with real-time processing and analysis:
//! - `AudioGraph`: player -> equalizer -> mixer render graph
//! - `PlaybackController`: play/stop/seek state machine with session tokens
//! - `SpectrumAnalyzer`: 20-bin RMS spectrum with decaying peaks
//! - `events` / `handle` / `thread`: event-driven control from a UI thread

pub mod analyzer;
pub mod backend;
pub mod clock;
pub mod controller;
pub mod equalizer;
pub mod events;
pub mod graph;
mod handle;
pub mod progress;
pub mod source;
mod thread;

pub use analyzer::{SPECTRUM_BINS, SpectrumAnalyzer, SpectrumFrame};
pub use backend::{OfflineBackend, RenderBackend, RodioBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::PlaybackController;
pub use equalizer::{EQ_BANDS, EQ_FREQUENCIES, EqualizerPreset, EqualizerState};
pub use events::{
    PlaybackSnapshot, PlaybackStatus, PlayerCommand, PlayerEvent, PlayerEventReceiver,
    SharedPlaybackState,
};
pub use graph::{AudioGraph, SegmentEnd, StreamFormat};
pub use handle::PlayerHandle;
pub use progress::ProgressTracker;
pub use source::{DecodableSource, MemorySourceOpener, PcmBuffer, RodioSourceOpener, SourceOpener};
pub use thread::{PlayerThreadHandle, spawn_player};
