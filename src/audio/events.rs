//! Player thread communication types
//!
//! - `PlayerCommand` - Commands sent from the UI to the controller thread
//! - `PlayerEvent` - Events broadcast by the controller thread
//! - `SharedPlaybackState` - Thread-safe state for non-blocking UI reads
//!
//! ## Architecture
//! ```text
//! UI (PlayerHandle) --[PlayerCommand]--> Controller thread (PlaybackController)
//! UI               <--[PlayerEvent]---- Controller thread (broadcast)
//! UI               <--[SharedState]---- Controller thread (non-blocking reads)
//! Render thread    --[SegmentCompletion]--> Controller thread
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};

use super::equalizer::{EQ_BANDS, EqualizerPreset};
use super::graph::SegmentEnd;
use crate::settings::PlayMode;
use crate::song::Song;

/// Buffered events per subscriber before the oldest are dropped
const EVENT_CAPACITY: usize = 256;

/// Controller state machine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    /// Nothing has played yet, or the last start failed
    #[default]
    Idle,
    Playing,
    Stopped,
}

// ============ Commands (UI -> Controller Thread) ============

/// Commands sent to the controller thread
///
/// All commands are fire-and-forget. Results come back as `PlayerEvent`s.
#[derive(Debug, Clone)]
pub enum PlayerCommand {
    /// Play a song from the start
    Play { song: Song },
    /// Stop playback and clear the display
    Stop,
    /// Stop if playing, otherwise replay the last song from the start
    TogglePlay,
    /// Seek to a position in seconds
    Seek { position: f64 },
    /// Set one equalizer band (dB)
    SetGain { band: usize, gain_db: f32 },
    SetEqualizerEnabled { enabled: bool },
    ApplyPreset { preset: EqualizerPreset },
    /// Flatten every band and select the Normal preset
    ResetEqualizer,
    /// Drop band edits made since the selected preset was applied
    ResetEqualizerToPreset,
    /// Set volume (0.0 - 1.0)
    SetVolume { volume: f32 },
    /// Set stereo balance (-1.0 left - 1.0 right)
    SetBalance { balance: f32 },
    /// Replace the queue and start playing at `start`
    SetQueue { songs: Vec<Song>, start: usize },
    PlayNext,
    PlayPrevious,
    SetPlayMode { mode: PlayMode },
    /// Stop playback and exit the controller thread
    Shutdown,
}

// ============ Events (Controller Thread -> UI) ============

/// Events broadcast by the controller thread
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Playback started for a song
    Started { song: Song },
    /// Playback stopped by request
    Stopped,
    /// The track played to its end
    Finished,
    /// Seek completed and playback resumed
    SeekComplete { position: f64 },
    /// Status changed
    StateChanged {
        old_status: PlaybackStatus,
        new_status: PlaybackStatus,
    },
    /// Periodic position update
    Progress { position: f64 },
    /// The queue has no song left to play
    QueueEnded,
    /// Error occurred
    Error { message: String },
}

/// Sent from the render thread when a scheduled segment ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCompletion {
    /// Session token captured when the segment was scheduled
    pub token: u64,
    pub end: SegmentEnd,
}

// ============ Shared State ============

/// UI snapshot of the published playback state
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    /// Current time in seconds
    pub position: f64,
    /// Track length in seconds
    pub duration: f64,
    pub volume: f32,
    pub balance: f32,
    pub is_stereo: bool,
    pub current_song: Option<Song>,
    pub gains: [f32; EQ_BANDS],
    pub equalizer_enabled: bool,
    pub equalizer_preset: EqualizerPreset,
    /// Mean gain across the equalizer bands (dB)
    pub equalizer_boost: f32,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            position: 0.0,
            duration: 0.0,
            volume: 1.0,
            balance: 0.0,
            is_stereo: false,
            current_song: None,
            gains: [0.0; EQ_BANDS],
            equalizer_enabled: true,
            equalizer_preset: EqualizerPreset::Normal,
            equalizer_boost: 0.0,
        }
    }
}

impl PlaybackSnapshot {
    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }
}

/// Thread-safe shared playback state
///
/// The UI reads this without blocking; only the controller writes it.
#[derive(Clone, Default)]
pub struct SharedPlaybackState {
    inner: Arc<RwLock<PlaybackSnapshot>>,
}

impl std::fmt::Debug for SharedPlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SharedPlaybackState")
            .field("status", &inner.status)
            .field("position", &inner.position)
            .field("duration", &inner.duration)
            .finish()
    }
}

impl SharedPlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.inner.read().clone()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.inner.read().status
    }

    pub fn position(&self) -> f64 {
        self.inner.read().position
    }

    pub fn duration(&self) -> f64 {
        self.inner.read().duration
    }

    pub fn is_playing(&self) -> bool {
        self.inner.read().is_playing()
    }

    pub fn is_stereo(&self) -> bool {
        self.inner.read().is_stereo
    }

    // ---- Update methods (called by the controller) ----

    /// Replace the whole published state at once
    pub fn publish(&self, snapshot: PlaybackSnapshot) {
        *self.inner.write() = snapshot;
    }

    pub fn set_position(&self, position: f64) {
        self.inner.write().position = position;
    }
}

// ============ Channel Types ============

pub type PlayerCommandSender = mpsc::UnboundedSender<PlayerCommand>;
pub type PlayerCommandReceiver = mpsc::UnboundedReceiver<PlayerCommand>;

pub type PlayerEventSender = broadcast::Sender<PlayerEvent>;
pub type PlayerEventReceiver = broadcast::Receiver<PlayerEvent>;

pub type CompletionSender = mpsc::UnboundedSender<SegmentCompletion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<SegmentCompletion>;

pub fn player_command_channel() -> (PlayerCommandSender, PlayerCommandReceiver) {
    mpsc::unbounded_channel()
}

pub fn player_event_channel() -> (PlayerEventSender, PlayerEventReceiver) {
    broadcast::channel(EVENT_CAPACITY)
}

pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot_is_idle_and_silent() {
        let state = SharedPlaybackState::new();
        assert_eq!(state.status(), PlaybackStatus::Idle);
        assert!(!state.is_playing());
        assert_eq!(state.position(), 0.0);
    }

    #[test]
    fn test_publish_replaces_state() {
        let state = SharedPlaybackState::new();
        let reader = state.clone();
        state.publish(PlaybackSnapshot {
            status: PlaybackStatus::Playing,
            duration: 30.0,
            is_stereo: true,
            ..Default::default()
        });
        assert!(reader.is_playing());
        assert!(reader.is_stereo());
        assert_eq!(reader.duration(), 30.0);
    }

    #[test]
    fn test_events_reach_every_subscriber() {
        let (tx, mut first) = player_event_channel();
        let mut second = tx.subscribe();
        tx.send(PlayerEvent::Stopped).unwrap();
        assert_eq!(first.try_recv().unwrap(), PlayerEvent::Stopped);
        assert_eq!(second.try_recv().unwrap(), PlayerEvent::Stopped);
    }
}
