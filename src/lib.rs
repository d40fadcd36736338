//! Tunes - audio playback and analysis core
//!
//! Drives a real-time render graph (player, 10-band equalizer, mixer),
//! runs the play/stop/seek state machine, tracks progress against a clock
//! and derives a spectrum/peak display from the live output.

pub mod audio;
pub mod error;
pub mod playlist;
pub mod settings;
pub mod song;
pub mod utils;

pub use error::AudioError;
pub use playlist::Playlist;
pub use settings::{EngineSettings, PlayMode};
pub use song::Song;
