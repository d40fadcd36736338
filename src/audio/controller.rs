//! Playback state machine
//!
//! `PlaybackController` owns the audio graph and the current playback
//! session. Every mutation happens on the caller's thread and returns
//! immediately; the render backend does the audio work on its own thread.
//!
//! Segment completions arrive from the render thread through a channel,
//! tagged with the session token that was current when the segment was
//! scheduled. Any later play, seek or stop bumps the token, so completions
//! from superseded segments are recognised and dropped.

use std::sync::Arc;

use super::analyzer::{SpectrumAnalyzer, SpectrumFrame};
use super::clock::Clock;
use super::equalizer::{EqualizerPreset, EqualizerState};
use super::events::{
    CompletionReceiver, CompletionSender, PlaybackSnapshot, PlaybackStatus, PlayerEvent,
    PlayerEventReceiver, PlayerEventSender, SegmentCompletion, SharedPlaybackState,
    completion_channel, player_event_channel,
};
use super::graph::{AudioGraph, SegmentEnd, StreamFormat};
use super::progress::ProgressTracker;
use super::source::{DecodableSource, SourceOpener};
use crate::error::AudioError;
use crate::settings::EngineSettings;
use crate::song::Song;

/// The file currently loaded for playback
struct PlaybackSession {
    source: Arc<dyn DecodableSource>,
    format: StreamFormat,
    total_frames: u64,
    /// Seconds
    duration: f64,
    /// Where the in-flight segment began, in seconds
    base_position: f64,
}

/// Play/stop/seek state machine over an [`AudioGraph`]
pub struct PlaybackController {
    graph: AudioGraph,
    opener: Arc<dyn SourceOpener>,
    clock: Arc<dyn Clock>,
    equalizer: EqualizerState,
    analyzer: SpectrumAnalyzer,
    progress: ProgressTracker,
    session: Option<PlaybackSession>,
    session_token: u64,
    /// Token of the segment the render thread may still be playing
    in_flight: Option<u64>,
    /// Sources of dropped sessions, held until their segment reports back
    retired: Vec<(u64, Arc<dyn DecodableSource>)>,
    status: PlaybackStatus,
    position: f64,
    volume: f32,
    balance: f32,
    current_song: Option<Song>,
    /// Last song that started; survives stop for `toggle_play`
    last_song: Option<Song>,
    tap_installed: bool,
    tap_buffer_frames: usize,
    state: SharedPlaybackState,
    event_tx: PlayerEventSender,
    completion_tx: CompletionSender,
}

impl PlaybackController {
    /// Create a controller. The returned receiver yields segment completions
    /// that must be fed back through [`Self::on_segment_complete`].
    pub fn new(
        graph: AudioGraph,
        opener: Arc<dyn SourceOpener>,
        clock: Arc<dyn Clock>,
        settings: &EngineSettings,
    ) -> (Self, CompletionReceiver) {
        let settings = settings.clone().sanitized();
        let (event_tx, _) = player_event_channel();
        let (completion_tx, completion_rx) = completion_channel();

        let controller = Self {
            graph,
            opener,
            clock,
            equalizer: EqualizerState::new(),
            analyzer: SpectrumAnalyzer::new(settings.spectrum_gain, settings.peak_decay_step),
            progress: ProgressTracker::new(),
            session: None,
            session_token: 0,
            in_flight: None,
            retired: Vec::new(),
            status: PlaybackStatus::Idle,
            position: 0.0,
            volume: settings.volume,
            balance: settings.balance,
            current_song: None,
            last_song: None,
            tap_installed: false,
            tap_buffer_frames: settings.tap_buffer_frames,
            state: SharedPlaybackState::new(),
            event_tx,
            completion_tx,
        };
        controller.publish();
        (controller, completion_rx)
    }

    // ============ Playback Control ============

    /// Play `song` from the start, replacing whatever is loaded
    ///
    /// If the file cannot be opened nothing changes and the previous
    /// playback carries on.
    pub fn play(&mut self, song: Song) -> Result<(), AudioError> {
        let source = match self.opener.open(song.path()) {
            Ok(source) => source,
            Err(e) => return Err(self.report(e)),
        };

        self.teardown_session();

        let format = StreamFormat::negotiate(source.as_ref());
        if self.graph.needs_build(format) {
            self.tap_installed = false;
            if let Err(e) = self.graph.build(format) {
                self.fail_start(None);
                return Err(self.report(e));
            }
            self.equalizer.attach(self.graph.equalizer_params());
        }

        let total_frames = source.frame_count();
        let duration = source.duration_secs();
        tracing::info!(
            "Playing {:?} ({:.2}s, {} Hz, {} channel(s))",
            song.path(),
            duration,
            format.sample_rate,
            source.channels()
        );

        self.apply_output_settings();
        self.ensure_tap();

        let token = self.next_token();
        if !self.schedule(source.clone(), 0, total_frames, token) {
            self.fail_start(None);
            return Err(self.report(AudioError::engine_start("Audio graph rejected the track")));
        }
        self.session = Some(PlaybackSession {
            source,
            format,
            total_frames,
            duration,
            base_position: 0.0,
        });

        if let Err(e) = self.graph.start() {
            self.fail_start(None);
            return Err(self.report(e));
        }

        self.progress.start(0.0, self.clock.now(), duration);
        self.position = 0.0;
        self.current_song = Some(song.clone());
        self.last_song = Some(song.clone());
        self.set_status(PlaybackStatus::Playing);
        self.publish();
        self.emit(PlayerEvent::Started { song });
        Ok(())
    }

    /// Jump to `seconds`, clamped to the track
    ///
    /// Seeking to the very end stops the session without scheduling audio.
    /// The spectrum tap stays installed across the restart.
    pub fn seek(&mut self, seconds: f64) -> Result<(), AudioError> {
        let Some(session) = &self.session else {
            tracing::debug!("Seek to {} ignored: nothing loaded", seconds);
            return Err(AudioError::NoSession);
        };

        let clamped = if seconds.is_nan() {
            0.0
        } else {
            seconds.clamp(0.0, session.duration)
        };
        let source = session.source.clone();
        let total_frames = session.total_frames;
        let seek_frame =
            ((clamped * session.format.sample_rate as f64).round() as u64).min(total_frames);
        let remaining = total_frames - seek_frame;
        tracing::debug!(
            "Seek to {:.3}s (requested {}), frame {} of {}",
            clamped,
            seconds,
            seek_frame,
            total_frames
        );

        let interrupted = self.stop_segment();
        let token = self.next_token();
        self.graph.pause();

        if let Some(session) = &mut self.session {
            session.base_position = clamped;
        }
        self.position = clamped;

        if remaining == 0 {
            tracing::info!("Seek reached the end of the track, stopping");
            self.progress.stop();
            self.set_status(PlaybackStatus::Stopped);
            self.publish();
            return Ok(());
        }

        self.apply_output_settings();
        self.ensure_tap();
        if !self.schedule(source, seek_frame, remaining, token) {
            self.fail_start(interrupted);
            return Err(self.report(AudioError::engine_start("Audio graph rejected the seek")));
        }

        if let Err(e) = self.graph.start() {
            self.fail_start(interrupted);
            return Err(self.report(e));
        }

        self.progress.restart(clamped, self.clock.now());
        self.set_status(PlaybackStatus::Playing);
        self.publish();
        self.emit(PlayerEvent::SeekComplete { position: clamped });
        Ok(())
    }

    /// Stop playback and clear position, spectrum and current song
    pub fn stop(&mut self) {
        self.halt();
        self.emit(PlayerEvent::Stopped);
    }

    /// Stop while playing; otherwise play the last started song from the top.
    /// Does nothing if no song has started yet.
    pub fn toggle_play(&mut self) -> Result<(), AudioError> {
        if self.is_playing() {
            self.stop();
            return Ok(());
        }
        match self.last_song.clone() {
            Some(song) => self.play(song),
            None => Ok(()),
        }
    }

    /// Handle a completion from the render thread
    ///
    /// Returns `true` when it ended the current track.
    pub fn on_segment_complete(&mut self, completion: SegmentCompletion) -> bool {
        // The render thread has let go of this segment's source
        self.retired.retain(|(token, _)| *token != completion.token);
        if self.in_flight == Some(completion.token) {
            self.in_flight = None;
        }

        if completion.token != self.session_token {
            tracing::trace!(
                "Discarding stale completion (token {}, current {})",
                completion.token,
                self.session_token
            );
            return false;
        }
        let Some(session) = &self.session else {
            return false;
        };

        match completion.end {
            SegmentEnd::Finished => {
                tracing::info!("Track finished");
                self.halt();
                self.emit(PlayerEvent::Finished);
                true
            }
            SegmentEnd::Interrupted => {
                tracing::debug!(
                    "Segment starting at {:.2}s was interrupted",
                    session.base_position
                );
                false
            }
        }
    }

    /// Publish the tracked position. Returns it, or `None` while not tracking.
    pub fn on_progress_tick(&mut self) -> Option<f64> {
        let position = self.progress.tick(self.clock.now())?;
        self.position = position;
        self.state.set_position(position);
        self.emit(PlayerEvent::Progress { position });
        Some(position)
    }

    /// Lower the spectrum peak markers one step
    pub fn on_decay_tick(&self) {
        self.analyzer.decay_peaks();
    }

    // ============ Output Settings ============

    pub fn set_gain(&mut self, band: usize, gain_db: f32) {
        self.equalizer.set_gain(band, gain_db);
        self.publish();
    }

    pub fn set_equalizer_enabled(&mut self, enabled: bool) {
        self.equalizer.set_enabled(enabled);
        self.publish();
    }

    pub fn apply_preset(&mut self, preset: EqualizerPreset) {
        tracing::debug!("Applying equalizer preset {}", preset.name());
        self.equalizer.apply_preset(preset);
        self.publish();
    }

    pub fn reset_equalizer(&mut self) {
        self.equalizer.reset_to_flat();
        self.publish();
    }

    pub fn reset_equalizer_to_preset(&mut self) {
        self.equalizer.reset_to_preset();
        self.publish();
    }

    /// Set volume, clamped to [0, 1]
    pub fn set_volume(&mut self, volume: f32) {
        if volume.is_nan() {
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        self.graph.set_volume(self.volume);
        self.publish();
    }

    /// Set balance, clamped to [-1, 1]
    pub fn set_balance(&mut self, balance: f32) {
        if balance.is_nan() {
            return;
        }
        self.balance = balance.clamp(-1.0, 1.0);
        self.graph.set_balance(self.balance);
        self.publish();
    }

    // ============ Observables ============

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn current_time(&self) -> f64 {
        self.position
    }

    pub fn duration(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.duration)
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn is_stereo(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.format.channels == 2)
    }

    pub fn spectrum_frame(&self) -> SpectrumFrame {
        self.analyzer.spectrum()
    }

    pub fn peak_frame(&self) -> SpectrumFrame {
        self.analyzer.peaks()
    }

    pub fn current_song(&self) -> Option<&Song> {
        self.current_song.as_ref()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn balance(&self) -> f32 {
        self.balance
    }

    pub fn equalizer(&self) -> &EqualizerState {
        &self.equalizer
    }

    pub fn session_token(&self) -> u64 {
        self.session_token
    }

    pub fn analyzer(&self) -> SpectrumAnalyzer {
        self.analyzer.clone()
    }

    pub fn shared_state(&self) -> SharedPlaybackState {
        self.state.clone()
    }

    pub fn event_sender(&self) -> PlayerEventSender {
        self.event_tx.clone()
    }

    pub fn subscribe(&self) -> PlayerEventReceiver {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    // ============ Internals ============

    /// Stop everything, including the tap, and clear the display
    fn halt(&mut self) {
        let pending = self.stop_segment();
        if self.tap_installed {
            self.graph.remove_tap();
            self.tap_installed = false;
        }
        self.graph.pause();
        self.next_token();
        self.progress.stop();
        self.analyzer.reset();
        self.drop_session(pending);
        self.position = 0.0;
        self.current_song = None;
        self.set_status(PlaybackStatus::Stopped);
        self.publish();
        tracing::info!("Playback stopped");
    }

    /// Drop the current session ahead of a new play. The tap and the
    /// current song survive.
    fn teardown_session(&mut self) {
        if self.session.is_none() {
            return;
        }
        let pending = self.stop_segment();
        self.next_token();
        self.graph.pause();
        self.progress.stop();
        self.drop_session(pending);
    }

    /// The backend refused to start; playback stays off until the next rebuild
    ///
    /// `pending` is the token of a segment that may still sit on the failed
    /// graph; it reports back when the graph is rebuilt.
    fn fail_start(&mut self, pending: Option<u64>) {
        let pending = self.in_flight.take().or(pending);
        self.next_token();
        self.progress.stop();
        self.drop_session(pending);
        self.position = 0.0;
        self.set_status(PlaybackStatus::Idle);
        self.publish();
    }

    fn next_token(&mut self) -> u64 {
        self.session_token += 1;
        self.session_token
    }

    /// Queue a segment tagged with `token`. Returns `false` if the graph refused it.
    fn schedule(
        &mut self,
        source: Arc<dyn DecodableSource>,
        start_frame: u64,
        frame_count: u64,
        token: u64,
    ) -> bool {
        let tx = self.completion_tx.clone();
        let on_complete = move |end: SegmentEnd| {
            let _ = tx.send(SegmentCompletion { token, end });
        };
        let queued = self
            .graph
            .schedule_segment(source, start_frame, frame_count, on_complete);
        if queued {
            self.in_flight = Some(token);
        }
        queued
    }

    /// Interrupt the in-flight segment, if any. Returns its token.
    fn stop_segment(&mut self) -> Option<u64> {
        let token = self.in_flight.take()?;
        self.graph.stop_player();
        Some(token)
    }

    /// Forget the session. If a segment of it may still be on the render
    /// thread, the source is kept until that segment's completion arrives.
    fn drop_session(&mut self, pending: Option<u64>) {
        if let Some(session) = self.session.take() {
            if let Some(token) = pending {
                self.retired.push((token, session.source));
            }
        }
    }

    /// Push the controller's own copies of volume, balance and EQ into the graph
    fn apply_output_settings(&mut self) {
        self.graph.set_volume(self.volume);
        self.graph.set_balance(self.balance);
        self.equalizer.reapply();
    }

    fn ensure_tap(&mut self) {
        if !self.tap_installed {
            self.tap_installed = self
                .graph
                .install_tap(self.tap_buffer_frames, self.analyzer.tap_callback());
        }
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        let old_status = self.status;
        if old_status != status {
            self.status = status;
            self.emit(PlayerEvent::StateChanged {
                old_status,
                new_status: status,
            });
        }
    }

    fn report(&self, error: AudioError) -> AudioError {
        tracing::error!("{}", error);
        self.emit(PlayerEvent::Error {
            message: error.to_string(),
        });
        error
    }

    fn publish(&self) {
        self.state.publish(PlaybackSnapshot {
            status: self.status,
            position: self.position,
            duration: self.duration(),
            volume: self.volume,
            balance: self.balance,
            is_stereo: self.is_stereo(),
            current_song: self.current_song.clone(),
            gains: self.equalizer.all_gains(),
            equalizer_enabled: self.equalizer.is_enabled(),
            equalizer_preset: self.equalizer.selected_preset(),
            equalizer_boost: self.equalizer.overall_boost(),
        });
    }
}
