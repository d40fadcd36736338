//! Player handle for non-blocking control from the UI thread
//!
//! `PlayerHandle` sends commands to the controller thread and returns
//! immediately. Observables are read from `SharedPlaybackState` and the
//! spectrum analyzer without blocking.

use super::analyzer::{SpectrumAnalyzer, SpectrumFrame};
use super::equalizer::EqualizerPreset;
use super::events::{
    PlaybackSnapshot, PlayerCommand, PlayerCommandSender, PlayerEventReceiver, PlayerEventSender,
    SharedPlaybackState,
};
use crate::settings::PlayMode;
use crate::song::Song;

/// Handle for controlling playback from the UI thread
///
/// Results are communicated via `PlayerEvent`. State queries read shared
/// state even while the controller thread is busy.
#[derive(Clone)]
pub struct PlayerHandle {
    command_tx: PlayerCommandSender,
    event_tx: PlayerEventSender,
    state: SharedPlaybackState,
    analyzer: SpectrumAnalyzer,
}

impl std::fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("state", &self.state)
            .finish()
    }
}

impl PlayerHandle {
    pub fn new(
        command_tx: PlayerCommandSender,
        event_tx: PlayerEventSender,
        state: SharedPlaybackState,
        analyzer: SpectrumAnalyzer,
    ) -> Self {
        Self {
            command_tx,
            event_tx,
            state,
            analyzer,
        }
    }

    fn send(&self, command: PlayerCommand) {
        if self.command_tx.send(command).is_err() {
            tracing::warn!("Player thread is gone, command dropped");
        }
    }

    // ============ Playback Control ============

    /// Play a song. Listen for `PlayerEvent::Started`.
    pub fn play(&self, song: Song) {
        self.send(PlayerCommand::Play { song });
    }

    pub fn stop(&self) {
        self.send(PlayerCommand::Stop);
    }

    /// Stop if playing, otherwise replay the last song
    pub fn toggle_play(&self) {
        self.send(PlayerCommand::TogglePlay);
    }

    /// Seek to `position` seconds
    ///
    /// The shared position jumps to the target right away so the UI does
    /// not show the old position while the seek is in flight.
    pub fn seek(&self, position: f64) {
        if position.is_finite() {
            let duration = self.state.duration();
            if duration > 0.0 {
                self.state.set_position(position.clamp(0.0, duration));
            }
        }
        self.send(PlayerCommand::Seek { position });
    }

    /// Set one equalizer band gain in dB
    pub fn set_gain(&self, band: usize, gain_db: f32) {
        self.send(PlayerCommand::SetGain { band, gain_db });
    }

    pub fn set_equalizer_enabled(&self, enabled: bool) {
        self.send(PlayerCommand::SetEqualizerEnabled { enabled });
    }

    pub fn apply_preset(&self, preset: EqualizerPreset) {
        self.send(PlayerCommand::ApplyPreset { preset });
    }

    pub fn reset_equalizer(&self) {
        self.send(PlayerCommand::ResetEqualizer);
    }

    pub fn reset_equalizer_to_preset(&self) {
        self.send(PlayerCommand::ResetEqualizerToPreset);
    }

    pub fn set_volume(&self, volume: f32) {
        self.send(PlayerCommand::SetVolume { volume });
    }

    pub fn set_balance(&self, balance: f32) {
        self.send(PlayerCommand::SetBalance { balance });
    }

    // ============ Queue ============

    /// Replace the queue and start playing `songs[start]`
    pub fn set_queue(&self, songs: Vec<Song>, start: usize) {
        self.send(PlayerCommand::SetQueue { songs, start });
    }

    pub fn play_next(&self) {
        self.send(PlayerCommand::PlayNext);
    }

    pub fn play_previous(&self) {
        self.send(PlayerCommand::PlayPrevious);
    }

    pub fn set_play_mode(&self, mode: PlayMode) {
        self.send(PlayerCommand::SetPlayMode { mode });
    }

    /// Ask the controller thread to stop and exit
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(PlayerCommand::Shutdown);
    }

    // ============ Observables ============

    /// Current time in seconds
    pub fn current_time(&self) -> f64 {
        self.state.position()
    }

    /// Track length in seconds
    pub fn duration(&self) -> f64 {
        self.state.duration()
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn is_stereo(&self) -> bool {
        self.state.is_stereo()
    }

    pub fn spectrum_frame(&self) -> SpectrumFrame {
        self.analyzer.spectrum()
    }

    pub fn peak_frame(&self) -> SpectrumFrame {
        self.analyzer.peaks()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.state.snapshot()
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> PlayerEventReceiver {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::super::events::{player_command_channel, player_event_channel};
    use super::*;

    fn handle() -> (
        PlayerHandle,
        super::super::events::PlayerCommandReceiver,
        SharedPlaybackState,
    ) {
        let (command_tx, command_rx) = player_command_channel();
        let (event_tx, _) = player_event_channel();
        let state = SharedPlaybackState::new();
        let handle = PlayerHandle::new(
            command_tx,
            event_tx,
            state.clone(),
            SpectrumAnalyzer::default(),
        );
        (handle, command_rx, state)
    }

    #[test]
    fn test_commands_are_forwarded() {
        let (handle, mut rx, _) = handle();
        handle.set_gain(3, 4.5);
        handle.stop();
        handle.toggle_play();
        handle.reset_equalizer_to_preset();
        assert!(matches!(
            rx.try_recv().unwrap(),
            PlayerCommand::SetGain { band: 3, gain_db } if gain_db == 4.5
        ));
        assert!(matches!(rx.try_recv().unwrap(), PlayerCommand::Stop));
        assert!(matches!(rx.try_recv().unwrap(), PlayerCommand::TogglePlay));
        assert!(matches!(
            rx.try_recv().unwrap(),
            PlayerCommand::ResetEqualizerToPreset
        ));
    }

    #[test]
    fn test_seek_updates_position_immediately() {
        let (handle, mut rx, state) = handle();
        state.publish(PlaybackSnapshot {
            duration: 30.0,
            ..Default::default()
        });

        handle.seek(45.0);
        assert_eq!(handle.current_time(), 30.0);
        assert!(matches!(
            rx.try_recv().unwrap(),
            PlayerCommand::Seek { position } if position == 45.0
        ));
    }

    #[test]
    fn test_observables_start_silent() {
        let (handle, _rx, _) = handle();
        assert!(!handle.is_playing());
        assert_eq!(handle.current_time(), 0.0);
        assert_eq!(handle.spectrum_frame(), [0.0; 20]);
        assert_eq!(handle.peak_frame(), [0.0; 20]);
    }
}
