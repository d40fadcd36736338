//! Controller thread implementation
//!
//! Runs the `PlaybackController` on a dedicated thread with a current-thread
//! tokio runtime. Commands, segment completions, progress ticks and peak
//! decay ticks are handled one at a time, so a tick can never observe a
//! half-applied seek.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use super::backend::RenderBackend;
use super::clock::Clock;
use super::controller::PlaybackController;
use super::events::{
    CompletionReceiver, PlayerCommand, PlayerCommandReceiver, PlayerEvent, player_command_channel,
};
use super::graph::AudioGraph;
use super::handle::PlayerHandle;
use super::source::SourceOpener;
use crate::playlist::Playlist;
use crate::settings::EngineSettings;
use crate::song::Song;

pub struct PlayerThreadHandle {
    pub handle: PlayerHandle,
    thread_handle: Option<JoinHandle<()>>,
}

impl PlayerThreadHandle {
    /// Shut the controller thread down and wait for it
    pub fn join(mut self, timeout: Duration) -> Result<(), String> {
        if let Some(handle) = self.thread_handle.take() {
            self.handle.shutdown();

            let start = std::time::Instant::now();
            loop {
                if handle.is_finished() {
                    let _ = handle.join();
                    return Ok(());
                }
                if start.elapsed() > timeout {
                    return Err("Player thread did not exit in time".to_string());
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
        Ok(())
    }
}

impl Drop for PlayerThreadHandle {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

/// Spawn the controller thread
///
/// # Arguments
/// * `backend` - Render backend the audio graph plays through
/// * `opener` - Turns song paths into decodable sources
/// * `clock` - Time source for progress tracking
/// * `settings` - Tick intervals, analyzer constants and initial output levels
pub fn spawn_player(
    backend: Box<dyn RenderBackend>,
    opener: Arc<dyn SourceOpener>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
) -> Result<PlayerThreadHandle, String> {
    let settings = settings.sanitized();
    let (command_tx, command_rx) = player_command_channel();

    let graph = AudioGraph::new(backend);
    let (controller, completion_rx) = PlaybackController::new(graph, opener, clock, &settings);

    let handle = PlayerHandle::new(
        command_tx,
        controller.event_sender(),
        controller.shared_state(),
        controller.analyzer(),
    );

    let thread_handle = thread::Builder::new()
        .name("playback-controller".to_string())
        .spawn(move || player_thread_main(controller, command_rx, completion_rx, settings))
        .map_err(|e| format!("Failed to spawn player thread: {}", e))?;

    Ok(PlayerThreadHandle {
        handle,
        thread_handle: Some(thread_handle),
    })
}

fn player_thread_main(
    controller: PlaybackController,
    command_rx: PlayerCommandReceiver,
    completion_rx: CompletionReceiver,
    settings: EngineSettings,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to create player runtime: {}", e);
            controller.emit(PlayerEvent::Error {
                message: e.to_string(),
            });
            return;
        }
    };

    tracing::info!("Player thread started");
    runtime.block_on(run_player(controller, command_rx, completion_rx, settings));
    tracing::info!("Player thread exiting");
}

async fn run_player(
    mut controller: PlaybackController,
    mut command_rx: PlayerCommandReceiver,
    mut completion_rx: CompletionReceiver,
    settings: EngineSettings,
) {
    let mut playlist = Playlist::new(settings.play_mode);

    let mut progress_tick = tokio::time::interval(Duration::from_millis(settings.progress_tick_ms));
    progress_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut decay_tick = tokio::time::interval(Duration::from_millis(settings.peak_decay_tick_ms));
    decay_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                let Some(command) = command else { break };
                tracing::debug!("Player command: {:?}", command);
                if !handle_command(&mut controller, &mut playlist, command) {
                    break;
                }
            }
            Some(completion) = completion_rx.recv() => {
                if controller.on_segment_complete(completion) {
                    let next = playlist.after_finished();
                    play_from_queue(&mut controller, &mut playlist, next);
                }
            }
            _ = progress_tick.tick() => {
                controller.on_progress_tick();
            }
            _ = decay_tick.tick() => {
                controller.on_decay_tick();
            }
        }
    }

    controller.stop();
}

/// Apply one command. Returns `false` when the thread should exit.
fn handle_command(
    controller: &mut PlaybackController,
    playlist: &mut Playlist,
    command: PlayerCommand,
) -> bool {
    match command {
        PlayerCommand::Play { song } => {
            playlist.select(&song);
            if let Err(e) = controller.play(song) {
                tracing::warn!("Play failed: {}", e);
            }
        }
        PlayerCommand::Stop => controller.stop(),
        PlayerCommand::TogglePlay => {
            if let Err(e) = controller.toggle_play() {
                tracing::warn!("Toggle play failed: {}", e);
            }
        }
        PlayerCommand::Seek { position } => {
            if let Err(e) = controller.seek(position) {
                tracing::debug!("Seek not applied: {}", e);
            }
        }
        PlayerCommand::SetGain { band, gain_db } => controller.set_gain(band, gain_db),
        PlayerCommand::SetEqualizerEnabled { enabled } => controller.set_equalizer_enabled(enabled),
        PlayerCommand::ApplyPreset { preset } => controller.apply_preset(preset),
        PlayerCommand::ResetEqualizer => controller.reset_equalizer(),
        PlayerCommand::ResetEqualizerToPreset => controller.reset_equalizer_to_preset(),
        PlayerCommand::SetVolume { volume } => controller.set_volume(volume),
        PlayerCommand::SetBalance { balance } => controller.set_balance(balance),
        PlayerCommand::SetQueue { songs, start } => {
            playlist.set_songs(songs, start);
            let first = playlist.current().cloned();
            play_from_queue(controller, playlist, first);
        }
        PlayerCommand::PlayNext => {
            let next = playlist.next();
            play_from_queue(controller, playlist, next);
        }
        PlayerCommand::PlayPrevious => {
            let previous = playlist.previous();
            play_from_queue(controller, playlist, previous);
        }
        PlayerCommand::SetPlayMode { mode } => {
            tracing::info!("Play mode: {}", mode);
            playlist.set_mode(mode);
        }
        PlayerCommand::Shutdown => return false,
    }
    true
}

/// Play `song`, skipping ahead past songs that fail to open
///
/// Emits `QueueEnded` when nothing in the queue could be played.
fn play_from_queue(
    controller: &mut PlaybackController,
    playlist: &mut Playlist,
    song: Option<Song>,
) {
    let mut candidate = song;
    for _ in 0..playlist.songs().len().max(1) {
        let Some(song) = candidate.take() else { break };
        match controller.play(song) {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!("Skipping unplayable song: {}", e);
                candidate = playlist.after_finished();
            }
        }
    }

    tracing::info!("Play queue ended");
    controller.emit(PlayerEvent::QueueEnded);
}

#[cfg(test)]
mod tests {
    use super::super::backend::{OfflineBackend, spawn_ready_thread};
    use super::super::graph::RenderGraph;
    use super::super::clock::ManualClock;
    use super::super::events::PlaybackStatus;
    use super::super::source::{MemorySourceOpener, PcmBuffer};
    use super::*;
    use crate::error::AudioError;
    use crate::settings::PlayMode;

    /// Waits for a worker thread on first start, the way the rodio backend does
    struct HandshakeBackend {
        inner: OfflineBackend,
        refuse: bool,
        worker: Option<JoinHandle<()>>,
    }

    impl HandshakeBackend {
        fn new(refuse: bool) -> Self {
            Self {
                inner: OfflineBackend::new(),
                refuse,
                worker: None,
            }
        }
    }

    impl RenderBackend for HandshakeBackend {
        fn connect(&mut self, graph: RenderGraph) -> Result<(), AudioError> {
            self.inner.connect(graph)
        }

        fn start(&mut self) -> Result<(), AudioError> {
            if self.worker.is_none() {
                let refuse = self.refuse;
                let worker = spawn_ready_thread("test-output", move |ready_tx| {
                    let reply = if refuse {
                        Err("no output device".to_string())
                    } else {
                        Ok(())
                    };
                    let _ = ready_tx.send(reply);
                })?;
                self.worker = Some(worker);
            }
            self.inner.start()
        }

        fn pause(&mut self) {
            self.inner.pause();
        }

        fn is_running(&self) -> bool {
            self.inner.is_running()
        }
    }

    fn spawn_with(backend: HandshakeBackend) -> PlayerThreadHandle {
        let opener = MemorySourceOpener::new();
        opener.insert("/t/tone.wav", PcmBuffer::sine(440.0, 0.3, 5.0, 8000));
        spawn_player(
            Box::new(backend),
            Arc::new(opener),
            Arc::new(ManualClock::new()),
            EngineSettings::default(),
        )
        .unwrap()
    }

    fn next_matching(
        events: &mut super::super::events::PlayerEventReceiver,
        want: impl Fn(&PlayerEvent) -> bool,
    ) -> PlayerEvent {
        loop {
            match events.blocking_recv() {
                Ok(event) if want(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {}", e),
            }
        }
    }

    fn queue_rig() -> (PlaybackController, Playlist, Vec<Song>) {
        let opener = MemorySourceOpener::new();
        opener.insert("/q/a.wav", PcmBuffer::constant(0.1, 500, 2, 1000));
        opener.insert("/q/b.wav", PcmBuffer::constant(0.1, 500, 2, 1000));
        let graph = AudioGraph::new(Box::new(OfflineBackend::new()));
        let (controller, _completions) = PlaybackController::new(
            graph,
            Arc::new(opener),
            Arc::new(ManualClock::new()),
            &EngineSettings::default(),
        );
        let songs = vec![
            Song::from_path(1, "/q/a.wav"),
            Song::from_path(2, "/q/missing.wav"),
            Song::from_path(3, "/q/b.wav"),
        ];
        (controller, Playlist::new(PlayMode::Sequential), songs)
    }

    #[test]
    fn test_set_queue_plays_start_song() {
        let (mut controller, mut playlist, songs) = queue_rig();
        assert!(handle_command(
            &mut controller,
            &mut playlist,
            PlayerCommand::SetQueue { songs, start: 0 }
        ));
        assert!(controller.is_playing());
        assert_eq!(controller.current_song().map(|s| s.id), Some(1));
    }

    #[test]
    fn test_unplayable_song_is_skipped() {
        let (mut controller, mut playlist, songs) = queue_rig();
        handle_command(
            &mut controller,
            &mut playlist,
            PlayerCommand::SetQueue { songs, start: 1 },
        );
        assert_eq!(controller.current_song().map(|s| s.id), Some(3));
    }

    #[test]
    fn test_queue_end_is_reported() {
        let (mut controller, mut playlist, songs) = queue_rig();
        let mut events = controller.subscribe();
        handle_command(
            &mut controller,
            &mut playlist,
            PlayerCommand::SetQueue { songs, start: 2 },
        );
        controller.stop();

        let next = playlist.after_finished();
        play_from_queue(&mut controller, &mut playlist, next);
        assert_eq!(controller.status(), PlaybackStatus::Stopped);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&PlayerEvent::QueueEnded));
    }

    #[test]
    fn test_shutdown_ends_loop() {
        let (mut controller, mut playlist, _) = queue_rig();
        assert!(!handle_command(
            &mut controller,
            &mut playlist,
            PlayerCommand::Shutdown
        ));
    }

    #[test]
    fn test_spawned_player_answers_commands() {
        let opener = MemorySourceOpener::new();
        opener.insert("/t/tone.wav", PcmBuffer::sine(440.0, 0.3, 5.0, 8000));
        let player = spawn_player(
            Box::new(OfflineBackend::new()),
            Arc::new(opener),
            Arc::new(ManualClock::new()),
            EngineSettings::default(),
        )
        .unwrap();

        let mut events = player.handle.subscribe();
        player.handle.play(Song::from_path(9, "/t/tone.wav"));

        let started = loop {
            match events.blocking_recv() {
                Ok(PlayerEvent::Started { song }) => break song,
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {}", e),
            }
        };
        assert_eq!(started.id, 9);
        assert!(player.handle.is_playing());
        assert!(!player.handle.is_stereo());

        player.join(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_backend_waiting_on_worker_starts_inside_player_thread() {
        let player = spawn_with(HandshakeBackend::new(false));
        let mut events = player.handle.subscribe();

        player.handle.play(Song::from_path(4, "/t/tone.wav"));
        next_matching(&mut events, |e| matches!(e, PlayerEvent::Started { .. }));
        assert!(player.handle.is_playing());

        // The thread is still alive and answering
        player.handle.stop();
        next_matching(&mut events, |e| *e == PlayerEvent::Stopped);

        player.join(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_worker_refusal_is_reported_not_fatal() {
        let player = spawn_with(HandshakeBackend::new(true));
        let mut events = player.handle.subscribe();

        player.handle.play(Song::from_path(4, "/t/tone.wav"));
        let first = next_matching(&mut events, |e| matches!(e, PlayerEvent::Error { .. }));
        let PlayerEvent::Error { message } = first else {
            unreachable!()
        };
        assert!(message.contains("no output device"));

        player.handle.play(Song::from_path(4, "/t/tone.wav"));
        next_matching(&mut events, |e| matches!(e, PlayerEvent::Error { .. }));
        assert!(!player.handle.is_playing());

        player.join(Duration::from_secs(5)).unwrap();
    }
}
