//! Audio render graph
//!
//! The graph is a fixed chain of nodes:
//!
//! ```text
//! source player -> 10-band equalizer -> output mixer -> (tap)
//! ```
//!
//! `AudioGraph` lives on the control thread. It builds a `RenderGraph`, hands
//! it to the render backend, and talks to it afterwards only through a
//! lock-free command ring and atomic node parameters. `RenderGraph::render`
//! runs on the backend's thread and never blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use rtrb::{Consumer, Producer, PushError, RingBuffer};

use super::backend::RenderBackend;
use super::equalizer::{EqualizerNode, EqualizerParams};
use super::source::DecodableSource;
use crate::error::AudioError;

/// Pending control commands the render thread can fall behind by
const COMMAND_CAPACITY: usize = 256;

/// Sample format of the graph's output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    /// Output format for a source: its own rate, mono or stereo
    pub fn negotiate(source: &dyn DecodableSource) -> Self {
        Self {
            sample_rate: source.sample_rate(),
            channels: source.channels().clamp(1, 2),
        }
    }
}

/// How a scheduled segment ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEnd {
    /// Every frame of the segment was rendered
    Finished,
    /// The player was stopped or the segment was replaced first
    Interrupted,
}

/// Fired once per segment, on the render thread
pub type CompletionHandler = Box<dyn FnOnce(SegmentEnd) + Send>;

/// Receives first-channel samples from the mixer output, on the render thread
pub type TapCallback = Box<dyn FnMut(&[f32]) + Send>;

/// A frame range of a source, queued on the player node
struct Segment {
    source: Arc<dyn DecodableSource>,
    next_frame: u64,
    end_frame: u64,
    on_complete: CompletionHandler,
}

impl Segment {
    /// Release the source, then report. The control side may hold the last
    /// reference to the source until the report arrives.
    fn complete(self, end: SegmentEnd) {
        let Segment {
            source,
            on_complete,
            ..
        } = self;
        drop(source);
        on_complete(end);
    }
}

enum GraphCommand {
    Schedule(Segment),
    StopPlayer,
    InstallTap(Tap),
    RemoveTap,
}

/// Volume and balance shared with the mixer node
#[derive(Clone)]
pub struct MixerParams {
    inner: Arc<MixerParamsInner>,
}

struct MixerParamsInner {
    volume: AtomicU32,
    balance: AtomicU32,
}

impl MixerParams {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MixerParamsInner {
                volume: AtomicU32::new(1.0_f32.to_bits()),
                balance: AtomicU32::new(0.0_f32.to_bits()),
            }),
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.inner
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_balance(&self, balance: f32) {
        self.inner
            .balance
            .store(balance.clamp(-1.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.inner.volume.load(Ordering::Relaxed))
    }

    pub fn balance(&self) -> f32 {
        f32::from_bits(self.inner.balance.load(Ordering::Relaxed))
    }
}

impl Default for MixerParams {
    fn default() -> Self {
        Self::new()
    }
}

struct PlayerNode {
    segment: Option<Segment>,
}

impl PlayerNode {
    /// Replace the in-flight segment. The old one completes as interrupted.
    fn schedule(&mut self, segment: Segment) {
        self.stop();
        self.segment = Some(segment);
    }

    fn stop(&mut self) {
        if let Some(old) = self.segment.take() {
            old.complete(SegmentEnd::Interrupted);
        }
    }

    /// Write the next frames of the segment into `out`, silence after its end
    fn fill(&mut self, out: &mut [f32], channels: usize) {
        let mut written = 0;

        if let Some(segment) = &mut self.segment {
            let wanted = ((segment.end_frame - segment.next_frame) as usize)
                .min(out.len() / channels);
            written = segment
                .source
                .read_frames(segment.next_frame, channels, &mut out[..wanted * channels]);
            segment.next_frame += written as u64;

            // A short read means the source ran dry before the segment end
            if written < wanted || segment.next_frame >= segment.end_frame {
                if let Some(done) = self.segment.take() {
                    done.complete(SegmentEnd::Finished);
                }
            }
        }

        out[written * channels..].fill(0.0);
    }
}

struct MixerNode {
    params: MixerParams,
}

impl MixerNode {
    fn process(&self, buffer: &mut [f32], channels: usize) {
        let volume = self.params.volume();
        if channels < 2 {
            buffer.iter_mut().for_each(|s| *s *= volume);
            return;
        }

        let balance = self.params.balance();
        let left = volume * (1.0 - balance.max(0.0));
        let right = volume * (1.0 + balance.min(0.0));
        for frame in buffer.chunks_exact_mut(channels) {
            frame[0] *= left;
            frame[1] *= right;
        }
    }
}

struct Tap {
    buffer: Vec<f32>,
    size: usize,
    callback: TapCallback,
}

impl Tap {
    fn new(size: usize, callback: TapCallback) -> Self {
        let size = size.max(1);
        Self {
            buffer: Vec::with_capacity(size),
            size,
            callback,
        }
    }

    /// Collect first-channel samples and fire the callback per full buffer
    fn feed(&mut self, samples: &[f32], channels: usize) {
        for frame in samples.chunks_exact(channels) {
            self.buffer.push(frame[0]);
            if self.buffer.len() == self.size {
                (self.callback)(&self.buffer);
                self.buffer.clear();
            }
        }
    }
}

/// The render-thread half of the graph
pub struct RenderGraph {
    format: StreamFormat,
    commands: Consumer<GraphCommand>,
    player: PlayerNode,
    equalizer: EqualizerNode,
    mixer: MixerNode,
    tap: Option<Tap>,
}

impl RenderGraph {
    fn new(
        format: StreamFormat,
        commands: Consumer<GraphCommand>,
        equalizer: EqualizerParams,
        mixer: MixerParams,
    ) -> Self {
        Self {
            format,
            commands,
            player: PlayerNode { segment: None },
            equalizer: EqualizerNode::new(equalizer, format.sample_rate),
            mixer: MixerNode { params: mixer },
            tap: None,
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Render interleaved output frames into `out`
    pub fn render(&mut self, out: &mut [f32]) {
        self.drain_commands();

        let channels = self.format.channels as usize;
        self.player.fill(out, channels);
        self.equalizer.process(out, channels);
        self.mixer.process(out, channels);
        if let Some(tap) = &mut self.tap {
            tap.feed(out, channels);
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                GraphCommand::Schedule(segment) => {
                    self.equalizer.reset();
                    self.player.schedule(segment);
                }
                GraphCommand::StopPlayer => self.player.stop(),
                GraphCommand::InstallTap(tap) => self.tap = Some(tap),
                GraphCommand::RemoveTap => self.tap = None,
            }
        }
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        // A segment dropped with the graph still owes its completion
        self.drain_commands();
        self.player.stop();
    }
}

/// Control-side owner of the render graph
pub struct AudioGraph {
    backend: Box<dyn RenderBackend>,
    format: Option<StreamFormat>,
    commands: Option<Producer<GraphCommand>>,
    equalizer: EqualizerParams,
    mixer: MixerParams,
    /// Cleared when the backend refuses to start or the command ring
    /// overflows; only a rebuild sets it again
    usable: bool,
}

impl AudioGraph {
    pub fn new(backend: Box<dyn RenderBackend>) -> Self {
        Self {
            backend,
            format: None,
            commands: None,
            equalizer: EqualizerParams::new(),
            mixer: MixerParams::new(),
            usable: false,
        }
    }

    /// Attach fresh player, equalizer and mixer nodes for `format` and hand
    /// them to the backend. Node parameters start at their defaults.
    pub fn build(&mut self, format: StreamFormat) -> Result<(), AudioError> {
        self.backend.pause();
        self.commands = None;
        self.format = None;
        self.usable = false;

        let (producer, consumer) = RingBuffer::new(COMMAND_CAPACITY);
        self.equalizer = EqualizerParams::new();
        self.mixer = MixerParams::new();
        let graph = RenderGraph::new(format, consumer, self.equalizer.clone(), self.mixer.clone());

        self.backend.connect(graph)?;

        self.commands = Some(producer);
        self.format = Some(format);
        self.usable = true;
        tracing::info!(
            "Audio graph built: {} Hz, {} channel(s)",
            format.sample_rate,
            format.channels
        );
        Ok(())
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    /// Whether `format` requires a (re)build before playback
    pub fn needs_build(&self, format: StreamFormat) -> bool {
        !self.usable || self.format != Some(format)
    }

    /// Start rendering. A failure leaves the graph unusable until rebuilt.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if !self.usable {
            return Err(AudioError::engine_start("Audio graph is not built"));
        }
        if self.backend.is_running() {
            return Ok(());
        }
        if let Err(e) = self.backend.start() {
            self.usable = false;
            return Err(e);
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        self.backend.pause();
    }

    pub fn is_running(&self) -> bool {
        self.usable && self.backend.is_running()
    }

    /// Queue `frame_count` frames of `source` from `start_frame` on the player
    ///
    /// Replaces any in-flight segment. `on_complete` fires on the render thread.
    /// Returns `false`, without ever calling `on_complete`, if the segment
    /// could not be queued.
    pub fn schedule_segment(
        &mut self,
        source: Arc<dyn DecodableSource>,
        start_frame: u64,
        frame_count: u64,
        on_complete: impl FnOnce(SegmentEnd) + Send + 'static,
    ) -> bool {
        let end_frame = start_frame.saturating_add(frame_count).min(source.frame_count());
        let segment = Segment {
            source,
            next_frame: start_frame.min(end_frame),
            end_frame,
            on_complete: Box::new(on_complete),
        };
        self.send(GraphCommand::Schedule(segment))
    }

    /// Drop the in-flight segment; its completion fires as interrupted
    pub fn stop_player(&mut self) {
        self.send(GraphCommand::StopPlayer);
    }

    /// Observe the mixer output in blocks of `buffer_size` frames
    pub fn install_tap(
        &mut self,
        buffer_size: usize,
        callback: impl FnMut(&[f32]) + Send + 'static,
    ) -> bool {
        let tap = Tap::new(buffer_size, Box::new(callback));
        self.send(GraphCommand::InstallTap(tap))
    }

    pub fn remove_tap(&mut self) {
        self.send(GraphCommand::RemoveTap);
    }

    pub fn set_volume(&self, volume: f32) {
        self.mixer.set_volume(volume);
    }

    pub fn set_balance(&self, balance: f32) {
        self.mixer.set_balance(balance);
    }

    /// Parameters of the current equalizer node
    pub fn equalizer_params(&self) -> EqualizerParams {
        self.equalizer.clone()
    }

    pub fn mixer_params(&self) -> MixerParams {
        self.mixer.clone()
    }

    fn send(&mut self, command: GraphCommand) -> bool {
        let Some(commands) = self.commands.as_mut() else {
            tracing::debug!("Audio graph not built, dropping command");
            return false;
        };
        match commands.push(command) {
            Ok(()) => true,
            Err(PushError::Full(_)) => {
                tracing::warn!("Audio graph command queue full, graph needs a rebuild");
                self.usable = false;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::super::backend::OfflineBackend;
    use super::super::source::PcmBuffer;
    use super::*;

    fn built_graph(channels: u16) -> (AudioGraph, OfflineBackend) {
        let backend = OfflineBackend::new();
        let mut graph = AudioGraph::new(Box::new(backend.clone()));
        graph
            .build(StreamFormat {
                sample_rate: 1000,
                channels,
            })
            .unwrap();
        graph.start().unwrap();
        (graph, backend)
    }

    fn completions() -> (
        Arc<Mutex<Vec<SegmentEnd>>>,
        impl FnOnce(SegmentEnd) + Send + 'static,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |end: SegmentEnd| sink.lock().unwrap().push(end))
    }

    #[test]
    fn test_negotiate_clamps_channels() {
        let surround = PcmBuffer::constant(0.0, 10, 6, 48000);
        let format = StreamFormat::negotiate(&surround);
        assert_eq!(format.channels, 2);
        assert_eq!(format.sample_rate, 48000);
    }

    #[test]
    fn test_segment_plays_range_then_silence() {
        let (mut graph, backend) = built_graph(1);
        let samples = vec![0.0, 0.01, 0.02, 0.03, 0.04, 0.05, 0.06, 0.07, 0.08, 0.09];
        let source = Arc::new(PcmBuffer::new(samples, 1, 1000));
        let (log, on_complete) = completions();

        graph.schedule_segment(source, 4, 3, on_complete);
        let out = backend.render(5);

        assert_eq!(out, vec![0.04, 0.05, 0.06, 0.0, 0.0]);
        assert_eq!(*log.lock().unwrap(), vec![SegmentEnd::Finished]);
    }

    #[test]
    fn test_stop_player_interrupts() {
        let (mut graph, backend) = built_graph(1);
        let source = Arc::new(PcmBuffer::constant(0.1, 100, 1, 1000));
        let (log, on_complete) = completions();

        graph.schedule_segment(source, 0, 100, on_complete);
        backend.render(10);
        graph.stop_player();
        let out = backend.render(10);

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(*log.lock().unwrap(), vec![SegmentEnd::Interrupted]);
    }

    #[test]
    fn test_reschedule_interrupts_previous_segment() {
        let (mut graph, backend) = built_graph(1);
        let source: Arc<dyn DecodableSource> = Arc::new(PcmBuffer::constant(0.1, 100, 1, 1000));
        let (first, first_done) = completions();
        let (second, second_done) = completions();

        graph.schedule_segment(source.clone(), 0, 100, first_done);
        graph.schedule_segment(source, 90, 10, second_done);
        backend.render(20);

        assert_eq!(*first.lock().unwrap(), vec![SegmentEnd::Interrupted]);
        assert_eq!(*second.lock().unwrap(), vec![SegmentEnd::Finished]);
    }

    #[test]
    fn test_mixer_volume_and_balance() {
        let (mut graph, backend) = built_graph(2);
        let source = Arc::new(PcmBuffer::constant(0.5, 4, 2, 1000));
        graph.set_volume(0.5);
        graph.set_balance(0.5);
        graph.schedule_segment(source, 0, 4, |_| {});

        let out = backend.render(1);
        assert_eq!(out, vec![0.125, 0.25]);
    }

    #[test]
    fn test_tap_sees_post_mix_first_channel() {
        let (mut graph, backend) = built_graph(2);
        let samples = vec![0.2, 0.9, 0.2, 0.9, 0.2, 0.9, 0.2, 0.9];
        let source = Arc::new(PcmBuffer::new(samples, 2, 1000));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        graph.set_volume(0.5);
        graph.install_tap(2, move |samples: &[f32]| {
            sink.lock().unwrap().push(samples.to_vec());
        });
        graph.schedule_segment(source, 0, 4, |_| {});
        backend.render(5);

        // Two full buffers of two frames; the fifth frame waits for the next buffer
        assert_eq!(*seen.lock().unwrap(), vec![vec![0.1, 0.1], vec![0.1, 0.1]]);
    }

    #[test]
    fn test_remove_tap_stops_callbacks() {
        let (mut graph, backend) = built_graph(1);
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        graph.install_tap(4, move |_: &[f32]| *counter.lock().unwrap() += 1);
        backend.render(8);
        graph.remove_tap();
        backend.render(8);
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn test_failed_start_requires_rebuild() {
        let backend = OfflineBackend::new();
        let mut graph = AudioGraph::new(Box::new(backend.clone()));
        let format = StreamFormat {
            sample_rate: 1000,
            channels: 1,
        };
        graph.build(format).unwrap();

        backend.fail_next_start();
        assert!(matches!(graph.start(), Err(AudioError::EngineStart(_))));
        assert!(!graph.is_running());
        assert!(graph.needs_build(format));
        assert!(graph.start().is_err());

        graph.build(format).unwrap();
        graph.start().unwrap();
        assert!(graph.is_running());
    }

    #[test]
    fn test_rebuild_resets_node_parameters() {
        let (mut graph, _backend) = built_graph(1);
        graph.set_volume(0.2);
        graph.equalizer_params().set_band_gain(0, 6.0);

        graph
            .build(StreamFormat {
                sample_rate: 2000,
                channels: 1,
            })
            .unwrap();
        assert_eq!(graph.mixer_params().volume(), 1.0);
        assert_eq!(graph.equalizer_params().gains()[0], 0.0);
    }

    #[test]
    fn test_full_command_queue_requires_rebuild() {
        let backend = OfflineBackend::new();
        let mut graph = AudioGraph::new(Box::new(backend.clone()));
        let format = StreamFormat {
            sample_rate: 1000,
            channels: 1,
        };
        graph.build(format).unwrap();

        // Paused: nothing drains the ring
        for _ in 0..COMMAND_CAPACITY {
            graph.remove_tap();
        }
        assert!(!graph.needs_build(format));

        let source = Arc::new(PcmBuffer::constant(0.1, 10, 1, 1000));
        let (log, on_complete) = completions();
        assert!(!graph.schedule_segment(source.clone(), 0, 10, on_complete));
        assert!(graph.needs_build(format));
        assert!(graph.start().is_err());

        graph.build(format).unwrap();
        graph.start().unwrap();
        let (fresh, on_complete) = completions();
        assert!(graph.schedule_segment(source, 0, 10, on_complete));
        backend.render(16);
        assert_eq!(*fresh.lock().unwrap(), vec![SegmentEnd::Finished]);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_source_released_before_completion() {
        let (mut graph, backend) = built_graph(1);
        let source: Arc<dyn DecodableSource> = Arc::new(PcmBuffer::constant(0.1, 100, 1, 1000));
        let refs = Arc::new(Mutex::new(Vec::new()));
        let seen = refs.clone();
        let watched = source.clone();

        graph.schedule_segment(source, 0, 100, move |_: SegmentEnd| {
            seen.lock().unwrap().push(Arc::strong_count(&watched));
        });
        backend.render(10);
        graph.stop_player();
        backend.render(10);

        // Only the handler's own clone is left when it runs
        assert_eq!(*refs.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_commands_before_build_are_dropped() {
        let mut graph = AudioGraph::new(Box::new(OfflineBackend::new()));
        let source = Arc::new(PcmBuffer::constant(0.0, 10, 1, 1000));
        assert!(!graph.schedule_segment(source, 0, 10, |_| {}));
        assert!(graph.start().is_err());
    }
}
